
//! The stateful handle for reading pixel data from an open file.

use std::collections::HashMap;

use crate::block::{BlockIndex, UncompressedBlock};
use crate::block::chunk::{Chunk, CompressedBlock, TileCoordinates};
use crate::block::deep::{self, DeepBlockContents};
use crate::block::reader::{validate_offset_tables, reconstruct_offset_tables};
use crate::error::{Error, Result, UnitResult, u64_to_usize};
use crate::file::{FileState, ReadOptions};
use crate::frame::{BoundFrameBuffer, FrameBuffer};
use crate::io::{PeekRead, Read, Seek, Tracking};
use crate::meta::{MetaData, OffsetTables};
use crate::meta::header::Header;

#[cfg(feature = "rayon")]
use std::sync::Arc;


/// An open exr file, ready to deliver pixel blocks into frame buffers.
///
/// Opening the file parses and validates the meta data and the chunk
/// offset tables. Chunks are then accessed randomly through the tables.
/// Decompression is distributed over the configured worker count,
/// while pixels are always delivered in the caller's requested order.
pub struct InputFile<R> {
    meta_data: MetaData,
    offset_tables: OffsetTables,

    /// Maps the coordinates of each block to its index in the offset table.
    block_index_of_tile: Vec<HashMap<TileCoordinates, usize>>,

    read: PeekRead<Tracking<R>>,
    options: ReadOptions,
    state: FileState,

    /// One optional frame buffer per part.
    frame_buffers: Vec<Option<BoundFrameBuffer>>,

    #[cfg(feature = "rayon")]
    pool: Option<rayon_core::ThreadPool>,
}

impl<R> std::fmt::Debug for InputFile<R> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("InputFile")
            .field("meta_data", &self.meta_data)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek> InputFile<R> {

    /// Open the byte stream as an exr file. The stream should be buffered.
    /// Parses the headers and the chunk offset tables.
    pub fn open(unbuffered: R, options: ReadOptions) -> Result<Self> {
        let mut read = PeekRead::new(Tracking::new(unbuffered));

        let meta_data = MetaData::read_validated_from_buffered_peekable(
            &mut read, options.pedantic, &options.limits
        )?;

        let offset_tables = Self::read_or_reconstruct_offset_tables(&mut read, &meta_data, &options)?;

        let block_index_of_tile = meta_data.headers.iter()
            .map(|header|
                header.blocks_increasing_y_order().enumerate()
                    .map(|(block_index, tile)| (tile.location, block_index))
                    .collect()
            )
            .collect();

        let frame_buffers = meta_data.headers.iter().map(|_| None).collect();

        #[cfg(feature = "rayon")]
        let pool = build_pool_for_workers(options.worker_count);

        Ok(InputFile {
            meta_data,
            offset_tables,
            block_index_of_tile,
            read,
            options,
            state: FileState::Open,
            frame_buffers,

            #[cfg(feature = "rayon")]
            pool,
        })
    }

    fn read_or_reconstruct_offset_tables(
        read: &mut PeekRead<Tracking<R>>, meta_data: &MetaData, options: &ReadOptions
    ) -> Result<OffsetTables> {
        let tables_start_byte = read.byte_position();
        let offset_tables = MetaData::read_offset_tables(read, &meta_data.headers)?;
        let chunks_start_byte = read.byte_position();

        let validation = validate_offset_tables(
            meta_data.headers.as_slice(), &offset_tables, chunks_start_byte
        );

        match validation {
            Ok(()) => Ok(offset_tables),

            Err(_) if options.reconstruct_missing_table => {
                // the reader is already located at the first chunk.
                // if the sequential scan fails, the file is truncated
                read.skip_to(chunks_start_byte)?;

                reconstruct_offset_tables(meta_data, read)
                    .map_err(|_| Error::corrupt_at(
                        tables_start_byte as u64,
                        "chunk offset table, and chunk scan found a truncated file"
                    ))
            },

            Err(error) => Err(error),
        }
    }

    /// The decoded exr meta data from the file.
    pub fn meta_data(&self) -> &MetaData { &self.meta_data }

    /// The decoded exr headers from the file. One per part.
    pub fn headers(&self) -> &[Header] { &self.meta_data.headers }

    /// The chunk offset table of each part.
    pub fn offset_tables(&self) -> &OffsetTables { &self.offset_tables }

    /// Bind a frame buffer to the specified part.
    /// Validates the slices against the channels of that part.
    /// Must be called before reading pixels of that part.
    pub fn set_frame_buffer(&mut self, part_index: usize, frame_buffer: FrameBuffer) -> UnitResult {
        self.state.ensure_open()?;

        let header = self.meta_data.headers.get(part_index)
            .ok_or_else(|| Error::usage("part index out of range"))?;

        if header.deep {
            return Err(Error::usage("deep parts transfer sample blocks instead of frame buffers"));
        }

        let mut bound = frame_buffer.bind(header)?;
        bound.broadcast_fill_values();

        self.frame_buffers[part_index] = Some(bound);
        Ok(())
    }

    /// Take back the frame buffer of the specified part.
    pub fn take_frame_buffer(&mut self, part_index: usize) -> Option<FrameBuffer> {
        self.frame_buffers.get_mut(part_index)?
            .take().map(BoundFrameBuffer::into_frame_buffer)
    }

    /// Read all scan lines within the specified range of pixel rows
    /// into the bound frame buffer of the part. The row coordinates are
    /// absolute, like the data window. Both row bounds are inclusive.
    ///
    /// Corrupt chunks fail this call but leave the file usable;
    /// io errors poison the whole handle.
    pub fn read_rows(&mut self, part_index: usize, y_begin: i32, y_end: i32) -> UnitResult {
        self.state.ensure_open()?;

        let header = self.header_for(part_index)?;

        if header.blocks.has_tiles() {
            return Err(Error::usage("use read_tile for tiled parts"));
        }

        if y_begin > y_end {
            return Err(Error::usage("empty scan line range"));
        }

        let lines_per_block = header.lines_per_block() as i32;
        let data_start_y = header.own_attributes.layer_position.y();

        let first_block = (y_begin - data_start_y).div_euclid(lines_per_block);
        let last_block = (y_end - data_start_y).div_euclid(lines_per_block);

        if first_block < 0 || last_block as usize >= header.chunk_count {
            return Err(Error::usage("scan line range outside of data window"));
        }

        let block_indices: Vec<usize> = (first_block as usize ..= last_block as usize).collect();
        self.read_blocks_into_frame_buffer(part_index, block_indices)
    }

    /// Read a single tile into the bound frame buffer of the part.
    pub fn read_tile(&mut self, part_index: usize, tile: TileCoordinates) -> UnitResult {
        self.state.ensure_open()?;

        let header = self.header_for(part_index)?;

        if !header.blocks.has_tiles() {
            return Err(Error::usage("use read_rows for scan line parts"));
        }

        let block_index = *self.block_index_of_tile[part_index].get(&tile)
            .ok_or_else(|| Error::usage("tile coordinates out of range"))?;

        self.read_blocks_into_frame_buffer(part_index, vec![ block_index ])
    }

    /// Read every block of the part into the bound frame buffer.
    pub fn read_all_blocks(&mut self, part_index: usize) -> UnitResult {
        self.state.ensure_open()?;

        let chunk_count = self.header_for(part_index)?.chunk_count;
        self.read_blocks_into_frame_buffer(part_index, (0 .. chunk_count).collect())
    }

    /// Read the deep block containing the specified scan line.
    pub fn read_deep_row_block(&mut self, part_index: usize, y_coordinate: i32) -> Result<DeepBlockContents> {
        self.state.ensure_open()?;

        let header = self.header_for(part_index)?;
        if !header.deep { return Err(Error::usage("part does not contain deep data")); }

        let tile = header.get_scan_line_block_tile_coordinates(y_coordinate)?;
        self.read_deep_block(part_index, tile)
    }

    /// Read the deep block of the specified tile.
    pub fn read_deep_tile(&mut self, part_index: usize, tile: TileCoordinates) -> Result<DeepBlockContents> {
        self.state.ensure_open()?;

        let header = self.header_for(part_index)?;
        if !header.deep { return Err(Error::usage("part does not contain deep data")); }

        self.read_deep_block(part_index, tile)
    }

    /// Close the file, handing back the byte stream.
    /// Releases the worker slots and all frame buffers that were not taken back.
    pub fn close(mut self) -> Result<R> {
        self.state.ensure_open()?;
        self.state = FileState::Closed;
        Ok(self.read.into_inner().into_inner())
    }

    fn header_for(&self, part_index: usize) -> Result<&Header> {
        self.meta_data.headers.get(part_index)
            .ok_or_else(|| Error::usage("part index out of range"))
    }

    /// Read and decompress the chunks at the specified table indices,
    /// and deliver the pixels in exactly the given order.
    fn read_blocks_into_frame_buffer(&mut self, part_index: usize, block_indices: Vec<usize>) -> UnitResult {
        if self.frame_buffers[part_index].is_none() {
            return Err(Error::usage("no frame buffer was bound to this part"));
        }

        let chunks = self.read_compressed_chunks(part_index, &block_indices)?;
        let blocks = self.decompress_chunks(chunks)?;

        let channels = self.meta_data.headers[part_index].channels.clone();
        let frame_buffer = self.frame_buffers[part_index].as_mut().expect("frame buffer presence bug");

        for block in blocks {
            frame_buffer.insert_block(&block, &channels)?;
        }

        Ok(())
    }

    /// Read the raw chunks in table order. Io errors poison the handle.
    fn read_compressed_chunks(&mut self, part_index: usize, block_indices: &[usize]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(block_indices.len());

        for &block_index in block_indices {
            let offset = *self.offset_tables[part_index].get(block_index)
                .ok_or_else(|| Error::usage("block index out of range"))?;

            let chunk = self.read_chunk_at(offset);
            chunks.push(self.state.filter(chunk)?);
        }

        Ok(chunks)
    }

    fn read_chunk_at(&mut self, offset: u64) -> Result<Chunk> {
        self.read.skip_to(u64_to_usize(offset))
            .map_err(|_| Error::corrupt_at(offset, "chunk offset out of range"))?;

        Chunk::read(&mut self.read, &self.meta_data)
    }

    /// Decompress the chunks, in their original order.
    /// With more than zero workers, the codec work happens in the pool,
    /// but the results are reordered to the submission order.
    fn decompress_chunks(&mut self, chunks: Vec<Chunk>) -> Result<Vec<UncompressedBlock>> {
        #[cfg(feature = "rayon")]
        {
            if let Some(pool) = &self.pool {
                return decompress_parallel_ordered(pool, &self.meta_data, chunks, self.options.pedantic);
            }
        }

        let meta_data = &self.meta_data;
        let pedantic = self.options.pedantic;

        chunks.into_iter()
            .map(|chunk| UncompressedBlock::decompress_chunk(chunk, meta_data, pedantic))
            .collect()
    }

    /// Locate, read and decompress one deep block.
    fn read_deep_block(&mut self, part_index: usize, tile: TileCoordinates) -> Result<DeepBlockContents> {
        let block_index = *self.block_index_of_tile[part_index].get(&tile)
            .ok_or_else(|| Error::usage("block coordinates out of range"))?;

        let offset = self.offset_tables[part_index][block_index];

        let chunk = self.read_chunk_at(offset);
        let chunk = self.state.filter(chunk)?;

        let header = &self.meta_data.headers[part_index];

        let tile_data_indices = header.get_block_data_indices(&chunk.compressed_block)?;
        let absolute_indices = header.get_absolute_block_pixel_coordinates(tile_data_indices)?;

        let index = BlockIndex {
            layer: part_index,
            pixel_position: absolute_indices.position.to_usize("deep block position")?,
            pixel_size: absolute_indices.size,
            level: tile_data_indices.level_index,
        };

        let (table, data, decompressed_size) = match &chunk.compressed_block {
            CompressedBlock::DeepScanLine(block) => (
                &block.compressed_pixel_offset_table,
                &block.compressed_sample_data,
                block.decompressed_sample_data_size,
            ),

            CompressedBlock::DeepTile(block) => (
                &block.compressed_pixel_offset_table,
                &block.compressed_sample_data,
                block.decompressed_sample_data_size,
            ),

            _ => return Err(Error::corrupt("flat chunk in deep part")),
        };

        deep::decompress_deep_block(
            header.compression, index,
            table, data, decompressed_size,
            &header.channels, &self.options.limits, self.options.pedantic,
        )
    }
}


#[cfg(feature = "rayon")]
pub(crate) fn build_pool_for_workers(worker_count: usize) -> Option<rayon_core::ThreadPool> {
    if worker_count == 0 { return None; }

    rayon_core::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build().ok()
}

/// Decompress all chunks in the pool, returning the blocks in submission order.
#[cfg(feature = "rayon")]
fn decompress_parallel_ordered(
    pool: &rayon_core::ThreadPool,
    meta_data: &MetaData,
    chunks: Vec<Chunk>,
    pedantic: bool,
) -> Result<Vec<UncompressedBlock>> {
    use std::collections::BTreeMap;

    let chunk_count = chunks.len();
    let shared_meta = Arc::new(meta_data.clone());
    let (sender, receiver) = std::sync::mpsc::channel();

    for (submission_index, chunk) in chunks.into_iter().enumerate() {
        let sender = sender.clone();
        let meta = shared_meta.clone();

        pool.spawn(move || {
            let result = UncompressedBlock::decompress_chunk(chunk, &meta, pedantic);

            // a send error means the receiver gave up after an earlier failure
            let _ = sender.send((submission_index, result));
        });
    }

    drop(sender);

    let mut finished = BTreeMap::new();
    for _ in 0 .. chunk_count {
        let (submission_index, result) = receiver.recv()
            .expect("all decompressing senders hung up but more messages were expected");

        finished.insert(submission_index, result?);
    }

    Ok(finished.into_values().collect())
}
