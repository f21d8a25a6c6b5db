
//! Check whether a file is structurally sound without decoding any pixels.
//! This is the entry point for hardening against malformed and hostile files:
//! every check is bounded in memory and in the amount of work performed.

use std::io::{Read, Seek};

use crate::block::chunk::Chunk;
use crate::error::{Error, Result, UnitResult, u64_to_usize};
use crate::io::{PeekRead, Tracking};
use crate::meta::{MetaData, OffsetTables};
use crate::meta::limits::SanityLimits;


/// What the validator is allowed to spend.
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {

    /// Cap single allocations tightly.
    /// An unverifiable file is reported as bad instead of exhausting memory.
    pub reduce_memory: bool,

    /// Only sample a bounded number of chunk framings instead of walking all of them.
    /// An unverifiable file is reported as bad instead of spinning forever.
    pub reduce_time: bool,

    /// Additional cap for the decompressed size of a single chunk, in bytes.
    pub max_chunk_bytes: Option<usize>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            reduce_memory: false,
            reduce_time: false,
            max_chunk_bytes: None,
        }
    }
}

/// How many chunk framings are inspected in reduced-time mode.
const REDUCED_TIME_CHUNK_SAMPLES: usize = 512;


/// Whether the specified bytes start a structurally sound exr file.
/// See `check` for the failure details.
pub fn is_structurally_sound(bytes: &[u8], options: CheckOptions) -> bool {
    check(std::io::Cursor::new(bytes), options).is_ok()
}

/// Check the structure of an exr file without decoding pixel data:
/// the magic number, the coherence of the version flags, the headers
/// including all sanity caps, the chunk offset tables, and a bounded
/// sample of the chunk framings.
pub fn check(byte_source: impl Read + Seek, options: CheckOptions) -> UnitResult {
    let mut limits = {
        if options.reduce_memory { SanityLimits::reduced_memory() }
        else { SanityLimits::default() }
    };

    if let Some(max_chunk_bytes) = options.max_chunk_bytes {
        limits.max_chunk_raw_bytes = limits.max_chunk_raw_bytes.min(max_chunk_bytes);
    }

    let mut read = PeekRead::new(Tracking::new(byte_source));

    // magic number, version flags, headers, including all caps.
    // strict parsing: a file that needs leniency to parse is not sound
    let meta_data = MetaData::read_validated_from_buffered_peekable(&mut read, true, &limits)?;

    let offset_tables = MetaData::read_offset_tables(&mut read, &meta_data.headers)?;
    let chunks_start_byte = read.byte_position();

    let file_length = stream_length(&mut read)?;

    validate_offsets_against_file(&offset_tables, chunks_start_byte, file_length)?;

    sample_chunk_framings(&mut read, &meta_data, &offset_tables, file_length, options)?;

    Ok(())
}


/// The total byte count of the stream. Restores the read position afterwards.
fn stream_length(read: &mut PeekRead<Tracking<impl Read + Seek>>) -> Result<usize> {
    // tracking cannot observe a raw seek, so the remaining
    // bytes are consumed and the position restored afterwards
    let position = read.byte_position();

    std::io::copy(read, &mut std::io::sink())?;
    let length = read.byte_position();

    read.skip_to(position)?;
    Ok(length)
}

/// Every offset must point between the end of the headers and the end of the file.
fn validate_offsets_against_file(offset_tables: &OffsetTables, chunks_start_byte: usize, file_length: usize) -> UnitResult {
    for &offset in offset_tables.iter().flatten() {
        let offset = u64_to_usize(offset);

        if offset < chunks_start_byte || offset >= file_length {
            return Err(Error::corrupt_at(offset as u64, "chunk offset out of range"));
        }
    }

    Ok(())
}

/// Parse a bounded selection of chunk framings, without decompressing any payload.
fn sample_chunk_framings(
    read: &mut PeekRead<Tracking<impl Read + Seek>>,
    meta_data: &MetaData,
    offset_tables: &OffsetTables,
    file_length: usize,
    options: CheckOptions,
) -> UnitResult {
    let all_offsets: Vec<u64> = offset_tables.iter().flatten().copied().collect();

    let inspected_offsets: Vec<u64> = {
        if options.reduce_time && all_offsets.len() > REDUCED_TIME_CHUNK_SAMPLES {
            // an evenly spread sample, always including the first and last chunk
            let step = all_offsets.len() / REDUCED_TIME_CHUNK_SAMPLES;

            all_offsets.iter().copied().step_by(step.max(1))
                .chain(all_offsets.last().copied())
                .collect()
        }
        else {
            all_offsets
        }
    };

    for offset in inspected_offsets {
        read.skip_to(u64_to_usize(offset))?;

        let chunk = Chunk::read(read, meta_data)?;

        // the framing parsed, now verify the coordinates and the end position
        let header = &meta_data.headers[chunk.layer_index];
        header.get_block_data_indices(&chunk.compressed_block)?;

        if read.byte_position() > file_length {
            return Err(Error::corrupt_at(offset, "chunk data exceeds file"));
        }
    }

    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn garbage_is_rejected() {
        assert!(!is_structurally_sound(&[ 0xde, 0xad, 0xbe, 0xef, 1, 2, 3 ], CheckOptions::default()));
        assert!(!is_structurally_sound(&[], CheckOptions::default()));
    }

    #[test]
    fn magic_number_alone_is_rejected() {
        assert!(!is_structurally_sound(&crate::meta::magic_number::BYTES, CheckOptions::default()));
    }
}
