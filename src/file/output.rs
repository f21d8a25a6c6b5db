
//! The stateful handle for writing pixel data into a new file.

use std::collections::HashMap;

use crate::block::UncompressedBlock;
use crate::block::chunk::{Chunk, CompressedBlock, CompressedDeepScanLineBlock, CompressedDeepTileBlock, TileCoordinates};
use crate::block::deep::{self, DeepBlockContents};
use crate::block::writer::{ChunkWriter, ChunksWriter};
use crate::error::{Error, Result, UnitResult, usize_to_i32};
use crate::file::{FileState, WriteOptions};
use crate::frame::{BoundFrameBuffer, FrameBuffer};
use crate::io::{Seek, Write};
use crate::meta::MetaData;
use crate::meta::header::Header;
use crate::meta::limits::SanityLimits;

#[cfg(feature = "rayon")]
use std::sync::Arc;


/// A file handle that writes an exr file chunk by chunk.
///
/// Creating the handle validates the headers and writes them immediately,
/// leaving a zeroed offset table as a placeholder. Every written block
/// patches its slot of the table in memory; closing the handle writes
/// the completed table into the file.
///
/// The file refuses to finalize while any block is missing
/// or any chunk error occurred.
pub struct OutputFile<W: Write + Seek> {
    meta_data: MetaData,
    chunk_writer: ChunkWriter<W>,

    /// Maps the coordinates of each block to its index in the offset table.
    block_index_of_tile: Vec<HashMap<TileCoordinates, usize>>,

    state: FileState,

    /// Once a chunk failed to compress or write, the file cannot be finalized.
    any_chunk_failed: bool,

    /// One optional frame buffer per part.
    frame_buffers: Vec<Option<BoundFrameBuffer>>,

    #[cfg(feature = "rayon")]
    pool: Option<rayon_core::ThreadPool>,
}

impl<W: Write + Seek> std::fmt::Debug for OutputFile<W> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("OutputFile")
            .field("meta_data", &self.meta_data)
            .field("state", &self.state)
            .field("any_chunk_failed", &self.any_chunk_failed)
            .finish_non_exhaustive()
    }
}

impl<W: Write + Seek> OutputFile<W> {

    /// Validate the headers and begin writing the file.
    /// The byte stream should be buffered.
    pub fn create(buffered_write: W, headers: impl Into<crate::meta::Headers>, options: WriteOptions) -> Result<Self> {
        let headers = headers.into();
        let (meta_data, chunk_writer) = ChunkWriter::new_for_buffered(buffered_write, headers, options.pedantic)?;

        let block_index_of_tile = meta_data.headers.iter()
            .map(|header|
                header.blocks_increasing_y_order().enumerate()
                    .map(|(block_index, tile)| (tile.location, block_index))
                    .collect()
            )
            .collect();

        let frame_buffers = meta_data.headers.iter().map(|_| None).collect();

        #[cfg(feature = "rayon")]
        let pool = super::input::build_pool_for_workers(options.worker_count);

        Ok(OutputFile {
            meta_data,
            chunk_writer,
            block_index_of_tile,
            state: FileState::Open,
            any_chunk_failed: false,
            frame_buffers,

            #[cfg(feature = "rayon")]
            pool,
        })
    }

    /// The validated meta data that is being written.
    pub fn meta_data(&self) -> &MetaData { &self.meta_data }

    /// Bind a frame buffer to the specified part.
    /// Validates the slices against the channels of that part.
    /// Must be called before writing pixels of that part.
    pub fn set_frame_buffer(&mut self, part_index: usize, frame_buffer: FrameBuffer) -> UnitResult {
        self.state.ensure_open()?;

        let header = self.meta_data.headers.get(part_index)
            .ok_or_else(|| Error::usage("part index out of range"))?;

        if header.deep {
            return Err(Error::usage("deep parts transfer sample blocks instead of frame buffers"));
        }

        self.frame_buffers[part_index] = Some(frame_buffer.bind(header)?);
        Ok(())
    }

    /// Take back the frame buffer of the specified part.
    pub fn take_frame_buffer(&mut self, part_index: usize) -> Option<FrameBuffer> {
        self.frame_buffers.get_mut(part_index)?
            .take().map(BoundFrameBuffer::into_frame_buffer)
    }

    /// Gather and write all scan lines within the specified range of pixel rows
    /// from the bound frame buffer of the part. The row coordinates are
    /// absolute, like the data window. Both row bounds are inclusive,
    /// and must cover whole blocks.
    pub fn write_rows(&mut self, part_index: usize, y_begin: i32, y_end: i32) -> UnitResult {
        self.state.ensure_open()?;

        let header = self.header_for(part_index)?;

        if header.blocks.has_tiles() {
            return Err(Error::usage("use write_tile for tiled parts"));
        }

        let lines_per_block = header.lines_per_block() as i32;
        let data_start_y = header.own_attributes.layer_position.y();

        let begin_offset = y_begin - data_start_y;
        let end_offset = y_end - data_start_y;

        if begin_offset < 0 || begin_offset % lines_per_block != 0 || y_begin > y_end {
            return Err(Error::usage("scan line range must start at a block boundary"));
        }

        let first_block = begin_offset / lines_per_block;
        let last_block = end_offset / lines_per_block;

        if last_block as usize >= header.chunk_count {
            return Err(Error::usage("scan line range outside of data window"));
        }

        let block_indices: Vec<usize> = (first_block as usize ..= last_block as usize).collect();
        self.write_blocks_from_frame_buffer(part_index, block_indices)
    }

    /// Gather and write a single tile from the bound frame buffer of the part.
    pub fn write_tile(&mut self, part_index: usize, tile: TileCoordinates) -> UnitResult {
        self.state.ensure_open()?;

        let header = self.header_for(part_index)?;

        if !header.blocks.has_tiles() {
            return Err(Error::usage("use write_rows for scan line parts"));
        }

        let block_index = *self.block_index_of_tile[part_index].get(&tile)
            .ok_or_else(|| Error::usage("tile coordinates out of range"))?;

        self.write_blocks_from_frame_buffer(part_index, vec![ block_index ])
    }

    /// Gather and write every block of the part from its bound frame buffer,
    /// following the line order of the header.
    pub fn write_all_blocks(&mut self, part_index: usize) -> UnitResult {
        self.state.ensure_open()?;

        let header = self.header_for(part_index)?;

        let ordered_blocks: Vec<usize> = header
            .enumerate_ordered_blocks()
            .map(|(block_index, _)| block_index)
            .collect();

        self.write_blocks_from_frame_buffer(part_index, ordered_blocks)
    }

    /// Compress and write one deep block.
    /// The sample counts and data sizes are validated before anything is written.
    pub fn write_deep_block(&mut self, part_index: usize, contents: &DeepBlockContents) -> UnitResult {
        self.state.ensure_open()?;

        let header = self.header_for(part_index)?;
        if !header.deep { return Err(Error::usage("part does not contain deep data")); }

        let compression = header.compression;
        let channels = header.channels.clone();
        let layer_position_y = header.own_attributes.layer_position.y();
        let default_block_size = header.default_block_size();
        let is_tiled = header.blocks.has_tiles();

        let compressed = deep::compress_deep_block(
            compression, contents, &channels, &SanityLimits::default()
        );

        let (table, data, decompressed_size) = match compressed {
            Ok(result) => result,
            Err(error) => {
                self.any_chunk_failed = true;
                return Err(error);
            }
        };

        let tile_coordinates = TileCoordinates {
            tile_index: contents.index.pixel_position / default_block_size,
            level_index: contents.index.level,
        };

        let block_index = *self.block_index_of_tile[part_index].get(&tile_coordinates)
            .ok_or_else(|| Error::usage("deep block coordinates out of range"))?;

        let chunk = Chunk {
            layer_index: part_index,
            compressed_block: {
                if is_tiled {
                    CompressedBlock::DeepTile(CompressedDeepTileBlock {
                        coordinates: tile_coordinates,
                        decompressed_sample_data_size: decompressed_size,
                        compressed_pixel_offset_table: table,
                        compressed_sample_data: data,
                    })
                }
                else {
                    CompressedBlock::DeepScanLine(CompressedDeepScanLineBlock {
                        y_coordinate: usize_to_i32(contents.index.pixel_position.y()) + layer_position_y,
                        decompressed_sample_data_size: decompressed_size,
                        compressed_pixel_offset_table: table,
                        compressed_sample_data: data,
                    })
                }
            },
        };

        let result = self.chunk_writer.write_chunk(block_index, chunk);
        self.track_chunk_result(result)
    }

    /// Write the completed offset tables, flush the stream, and hand it back.
    /// Refuses to finalize if any block is missing or any chunk error occurred,
    /// so that a truncated file is never reported as valid.
    pub fn close(mut self) -> Result<W> {
        self.state.ensure_open()?;

        if self.any_chunk_failed {
            return Err(Error::usage("cannot finalize the file after a chunk error"));
        }

        self.state = FileState::Closed;
        self.chunk_writer.complete_meta_data()
    }

    fn header_for(&self, part_index: usize) -> Result<&Header> {
        self.meta_data.headers.get(part_index)
            .ok_or_else(|| Error::usage("part index out of range"))
    }

    fn track_chunk_result<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.any_chunk_failed = true;
        }

        self.state.filter(result)
    }

    /// Gather the specified blocks from the frame buffer, compress them
    /// with the configured worker count, and write the chunks to the
    /// stream in exactly the submitted order.
    fn write_blocks_from_frame_buffer(&mut self, part_index: usize, block_indices: Vec<usize>) -> UnitResult {
        if self.frame_buffers[part_index].is_none() {
            return Err(Error::usage("no frame buffer was bound to this part"));
        }

        let header = &self.meta_data.headers[part_index];
        let channels = header.channels.clone();

        // gather all blocks from the frame buffer before compressing anything
        let mut blocks = Vec::with_capacity(block_indices.len());
        {
            let frame_buffer = self.frame_buffers[part_index].as_ref().expect("frame buffer presence bug");

            for &block_index in &block_indices {
                let tile = header.blocks_increasing_y_order().nth(block_index)
                    .ok_or_else(|| Error::usage("block index out of range"))?;

                let data_indices = header.get_absolute_block_pixel_coordinates(tile.location)?;

                let index = crate::block::BlockIndex {
                    layer: part_index,
                    pixel_position: data_indices.position.to_usize("block position")?,
                    pixel_size: data_indices.size,
                    level: tile.location.level_index,
                };

                blocks.push((block_index, frame_buffer.extract_block(index, &channels)?));
            }
        }

        let chunks = self.compress_blocks(blocks)?;

        for (block_index, chunk) in chunks {
            let result = self.chunk_writer.write_chunk(block_index, chunk);
            self.track_chunk_result(result)?;
        }

        Ok(())
    }

    /// Compress the blocks, returning the chunks in submission order.
    fn compress_blocks(&mut self, blocks: Vec<(usize, UncompressedBlock)>) -> Result<Vec<(usize, Chunk)>> {
        #[cfg(feature = "rayon")]
        {
            if let Some(pool) = &self.pool {
                let result = compress_parallel_ordered(pool, &self.meta_data, blocks);
                return match result {
                    Err(error) => {
                        self.any_chunk_failed = true;
                        Err(error)
                    },
                    ok => ok,
                };
            }
        }

        let headers = &self.meta_data.headers;

        let compressed: Result<Vec<(usize, Chunk)>> = blocks.into_iter()
            .map(|(block_index, block)| Ok((block_index, block.compress_to_chunk(headers)?)))
            .collect();

        if compressed.is_err() {
            self.any_chunk_failed = true;
        }

        compressed
    }
}


/// Compress all blocks in the pool, returning the chunks in submission order.
#[cfg(feature = "rayon")]
fn compress_parallel_ordered(
    pool: &rayon_core::ThreadPool,
    meta_data: &MetaData,
    blocks: Vec<(usize, UncompressedBlock)>,
) -> Result<Vec<(usize, Chunk)>> {
    use std::collections::BTreeMap;

    let block_count = blocks.len();
    let shared_meta = Arc::new(meta_data.clone());
    let (sender, receiver) = std::sync::mpsc::channel();

    for (submission_index, (block_index, block)) in blocks.into_iter().enumerate() {
        let sender = sender.clone();
        let meta = shared_meta.clone();

        pool.spawn(move || {
            let result = block.compress_to_chunk(&meta.headers)
                .map(|chunk| (block_index, chunk));

            // a send error means the receiver gave up after an earlier failure
            let _ = sender.send((submission_index, result));
        });
    }

    drop(sender);

    let mut finished = BTreeMap::new();
    for _ in 0 .. block_count {
        let (submission_index, result) = receiver.recv()
            .expect("all compressing senders hung up but more messages were expected");

        finished.insert(submission_index, result?);
    }

    Ok(finished.into_values().collect())
}
