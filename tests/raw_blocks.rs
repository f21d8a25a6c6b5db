
//! Use the low-level block streams directly, without file handles:
//! compress blocks into a file in one pass, then decompress all chunks
//! sequentially, in parallel, and filtered.

use std::io::Cursor;

use exr_core::prelude::*;
use exr_core::block::{self, UncompressedBlock};
use exr_core::block::reader::{Reader, ChunksReader};
use exr_core::block::writer::{self, ChunksWriter};
use exr_core::io::Data;


fn pixel_value(position: Vec2<usize>, level: Vec2<usize>) -> f32 {
    position.x() as f32 * 0.1 + position.y() as f32 * 0.01 + level.x() as f32
}

fn headers() -> smallvec::SmallVec<[Header; 3]> {
    smallvec![
        Header::new(
            "main".into(), Vec2(19, 23),
            smallvec![ ChannelDescription::new("L", SampleType::F32, false) ]
        ).with_encoding(Compression::ZIP16, BlockDescription::ScanLines, LineOrder::Increasing)
    ]
}

fn write_file_from_blocks(parallel: bool) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());

    writer::write_chunks_with(&mut bytes, headers(), true, |meta_data, chunk_writer| {
        let blocks = block::enumerate_ordered_header_block_indices(&meta_data.headers)
            .map(|(index_in_header, block_index)| {
                let block = UncompressedBlock::from_lines(
                    &meta_data.headers[block_index.layer].channels,
                    block_index,
                    |line| {
                        let mut write = line.value;
                        for x in 0 .. line.location.sample_count {
                            let position = Vec2(line.location.position.x() + x, line.location.position.y());
                            pixel_value(position, line.location.level).write(&mut write).unwrap();
                        }
                    }
                );

                (index_in_header, block)
            })
            .collect::<Vec<_>>();

        if parallel {
            chunk_writer.compress_all_blocks_parallel(&meta_data, blocks.into_iter())
        }
        else {
            chunk_writer.compress_all_blocks_sequential(&meta_data, blocks.into_iter())
        }
    }).unwrap();

    bytes.into_inner()
}

fn assert_block_contents(block: &UncompressedBlock, channels: &ChannelList) {
    for line in block.lines(channels) {
        let mut read = line.value;

        for x in 0 .. line.location.sample_count {
            let position = Vec2(line.location.position.x() + x, line.location.position.y());
            let expected = pixel_value(position, line.location.level);
            let actual = f32::read(&mut read).unwrap();
            assert_eq!(expected, actual, "pixel at {:?}", position);
        }
    }
}


#[test]
fn sequential_block_stream_roundtrip() {
    let bytes = write_file_from_blocks(false);

    let reader = Reader::read_from_buffered(Cursor::new(bytes), true).unwrap();
    let channels = reader.headers()[0].channels.clone();

    let chunks = reader.all_chunks(true).unwrap();
    let expected_chunk_count = chunks.expected_chunk_count();
    let mut decoded_count = 0;

    chunks.decompress_sequential(true, |_meta, block| {
        assert_block_contents(&block, &channels);
        decoded_count += 1;
        Ok(())
    }).unwrap();

    assert_eq!(decoded_count, expected_chunk_count);
}

#[test]
fn parallel_block_stream_roundtrip() {
    let bytes = write_file_from_blocks(true);

    let reader = Reader::read_from_buffered(Cursor::new(bytes), true).unwrap();
    let channels = reader.headers()[0].channels.clone();

    let mut decoded_count = 0;

    reader.all_chunks(true).unwrap()
        .decompress_parallel(true, |_meta, block| {
            assert_block_contents(&block, &channels);
            decoded_count += 1;
            Ok(())
        }).unwrap();

    assert_eq!(decoded_count, (23 + 15) / 16);
}

#[test]
fn filtered_block_stream_reads_only_requested_chunks() {
    let bytes = write_file_from_blocks(false);

    let reader = Reader::read_from_buffered(Cursor::new(bytes), true).unwrap();
    let channels = reader.headers()[0].channels.clone();

    // only the chunk containing the bottom rows
    let chunks = reader.filter_chunks(true, |_meta, _tile, block| {
        block.pixel_position.y() >= 16
    }).unwrap();

    assert_eq!(chunks.expected_chunk_count(), 1);

    let mut decompressor = chunks.sequential_decompressor(true);
    let block = decompressor.next().unwrap().unwrap();

    assert_eq!(block.index.pixel_position.y(), 16);
    assert_block_contents(&block, &channels);
    assert!(decompressor.next().is_none());
}
