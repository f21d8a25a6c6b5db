
//! Handle compressed and uncompressed pixel byte blocks.
//! Includes compression and decompression, and the parallel pipelines
//! that move blocks between the file and the caller.

pub mod chunk;
pub mod lines;
pub mod samples;
pub mod deep;
pub mod reader;
pub mod writer;


use crate::compression::ByteVec;
use crate::error::{Result, Error, usize_to_i32};
use crate::math::Vec2;
use crate::meta::{MetaData, BlockDescription};
use crate::meta::attribute::ChannelList;
use crate::meta::header::Header;
use crate::block::chunk::{Chunk, CompressedBlock, CompressedTileBlock, CompressedScanLineBlock, TileCoordinates};
use crate::block::lines::{LineIndex, LineRef, LineRefMut, LineSlice};


/// Specifies where a block of pixel data should be placed in the actual image.
/// This is a globally unique identifier which
/// includes the layer, level index, and pixel location.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Debug)]
pub struct BlockIndex {

    /// Index of the layer.
    pub layer: usize,

    /// Index of the top left pixel from the block within the data window.
    pub pixel_position: Vec2<usize>,

    /// Number of pixels in this block. Stays the same across all resolution levels.
    pub pixel_size: Vec2<usize>,

    /// Index of the mip or rip level in the image.
    pub level: Vec2<usize>,
}

/// Contains a block of pixel data and where that data should be placed in the actual image.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct UncompressedBlock {

    /// Location of the data inside the image.
    pub index: BlockIndex,

    /// Uncompressed pixel values of the whole block.
    /// One or more scan lines may be stored together as a scan line block.
    /// This byte vector contains all pixel rows, one after another.
    /// For each line in the tile, for each channel, the row values are contiguous.
    /// Stored in the little-endian wire layout.
    pub data: ByteVec,
}


/// This iterator tells you the block indices of all blocks that must be in the image.
/// The order of the blocks depends on the `LineOrder` attribute
/// (unspecified line order is treated the same as increasing line order).
/// The blocks written to the file must be exactly in this order,
/// except for when the `LineOrder` is unspecified.
/// The index represents the block index, in increasing line order, within the header.
pub fn enumerate_ordered_header_block_indices(headers: &[Header]) -> impl '_ + Iterator<Item=(usize, BlockIndex)> {
    headers.iter().enumerate().flat_map(|(layer_index, header)| {
        header.enumerate_ordered_blocks().map(move |(index_in_header, tile)| {
            let data_indices = header.get_absolute_block_pixel_coordinates(tile.location).expect("tile coordinate bug");

            let block = BlockIndex {
                layer: layer_index,
                level: tile.location.level_index,
                pixel_position: data_indices.position.to_usize("data indices start").expect("data index bug"),
                pixel_size: data_indices.size,
            };

            (index_in_header, block)
        })
    })
}


impl UncompressedBlock {

    /// Decompress the possibly compressed chunk and returns an `UncompressedBlock`.
    // for uncompressed data, the byte vector in the chunk is moved all the way
    #[inline]
    #[must_use]
    pub fn decompress_chunk(chunk: Chunk, meta_data: &MetaData, pedantic: bool) -> Result<Self> {
        let header: &Header = meta_data.headers.get(chunk.layer_index)
            .ok_or_else(|| Error::corrupt("chunk layer index"))?;

        let tile_data_indices = header.get_block_data_indices(&chunk.compressed_block)?;
        let absolute_indices = header.get_absolute_block_pixel_coordinates(tile_data_indices)?;

        absolute_indices.validate(Some(header.data_size))?;

        match chunk.compressed_block {
            CompressedBlock::Tile(CompressedTileBlock { compressed_pixels, .. }) |
            CompressedBlock::ScanLine(CompressedScanLineBlock { compressed_pixels, .. }) => {
                Ok(UncompressedBlock {
                    data: header.compression.decompress_image_section(header, compressed_pixels, absolute_indices, pedantic)?,
                    index: BlockIndex {
                        layer: chunk.layer_index,
                        pixel_position: absolute_indices.position.to_usize("data indices start")?,
                        level: tile_data_indices.level_index,
                        pixel_size: absolute_indices.size,
                    }
                })
            },

            // deep chunks carry their own sample count table and are
            // decompressed through `crate::block::deep` instead
            _ => Err(Error::usage("deep chunks must be decompressed as deep blocks")),
        }
    }

    /// Consume this block by compressing it, returning a `Chunk`.
    // for uncompressed data, the byte vector in the chunk is moved all the way
    #[inline]
    #[must_use]
    pub fn compress_to_chunk(self, headers: &[Header]) -> Result<Chunk> {
        let UncompressedBlock { data, index } = self;

        let header: &Header = headers.get(index.layer)
            .expect("block layer index bug");

        let expected_byte_size = crate::compression::uncompressed_block_byte_size(
            &header.channels,
            crate::meta::attribute::IntegerBounds::new(index.pixel_position.to_i32(), index.pixel_size)
        );

        if expected_byte_size != data.len() {
            return Err(Error::usage("block data size does not match the channel layout"));
        }

        let tile_coordinates = TileCoordinates {
            tile_index: index.pixel_position / header.default_block_size(),
            level_index: index.level,
        };

        let absolute_indices = header.get_absolute_block_pixel_coordinates(tile_coordinates)?;
        absolute_indices.validate(Some(header.data_size))?;

        let compressed_data = header.compression.compress_image_section(header, data, absolute_indices)?;

        Ok(Chunk {
            layer_index: index.layer,
            compressed_block: match header.blocks {
                BlockDescription::ScanLines => CompressedBlock::ScanLine(CompressedScanLineBlock {
                    compressed_pixels: compressed_data,
                    y_coordinate: usize_to_i32(index.pixel_position.y()) + header.own_attributes.layer_position.y(),
                }),

                BlockDescription::Tiles(_) => CompressedBlock::Tile(CompressedTileBlock {
                    compressed_pixels: compressed_data,
                    coordinates: tile_coordinates,
                }),
            }
        })
    }

    /// Iterate over the lines of samples within this block.
    pub fn lines<'s>(&'s self, channels: &ChannelList) -> impl 's + Iterator<Item=LineRef<'s>> {
        LineIndex::lines_in_block(self.index, channels)
            .map(move |(bytes, line)| LineSlice { location: line, value: &self.data[bytes] })
    }

    /// Create an uncompressed block by requesting the bytes for one line after another.
    pub fn from_lines(
        channels: &ChannelList, block_index: BlockIndex,
        mut extract_line: impl FnMut(LineRefMut<'_>)
    ) -> Self {
        let byte_count: usize = LineIndex::lines_in_block(block_index, channels)
            .map(|(byte_range, _)| byte_range.len())
            .sum();

        let mut block_bytes = vec![ 0_u8; byte_count ];

        for (byte_range, line_index) in LineIndex::lines_in_block(block_index, channels) {
            extract_line(LineSlice {
                value: &mut block_bytes[byte_range],
                location: line_index,
            });
        }

        Self { index: block_index, data: block_bytes }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::{ChannelDescription, SampleType};

    #[test]
    fn ordered_block_indices_follow_line_order() {
        use crate::meta::attribute::LineOrder;
        use crate::compression::Compression;

        let make_header = |order: LineOrder| {
            Header::new(
                "layer".into(), Vec2(4, 4),
                smallvec![ ChannelDescription::new("G", SampleType::F16, false) ]
            ).with_encoding(Compression::Uncompressed, BlockDescription::ScanLines, order)
        };

        let increasing: Vec<(usize, BlockIndex)> =
            enumerate_ordered_header_block_indices(&[ make_header(LineOrder::Increasing) ]).collect();

        let decreasing: Vec<(usize, BlockIndex)> =
            enumerate_ordered_header_block_indices(&[ make_header(LineOrder::Decreasing) ]).collect();

        assert_eq!(increasing.len(), 4);
        assert_eq!(increasing.first().unwrap().0, 0);
        assert_eq!(decreasing.first().unwrap().0, 3);
        assert_eq!(decreasing.last().unwrap().1.pixel_position.y(), 0);
    }

    #[test]
    fn block_with_wrong_byte_count_is_rejected() {
        let header = Header::new(
            "layer".into(), Vec2(4, 4),
            smallvec![ ChannelDescription::new("G", SampleType::F16, false) ]
        );

        let block = UncompressedBlock {
            index: BlockIndex {
                layer: 0,
                pixel_position: Vec2(0, 0),
                pixel_size: Vec2(4, 1),
                level: Vec2(0, 0),
            },
            data: vec![ 0; 3 ], // should be 4 * 2 bytes
        };

        assert!(matches!(block.compress_to_chunk(&[ header ]), Err(Error::Usage(_))));
    }
}
