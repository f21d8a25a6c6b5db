
//! Contains the compression attribute definition
//! and methods to compress and decompress data.


// private modules make non-breaking changes easier
mod zip;
mod rle;
mod piz;
mod pxr24;
mod b44;
mod dwa;

use crate::meta::attribute::{IntegerBounds, SampleType, ChannelList};
use crate::error::{Result, Error};
use crate::meta::header::Header;


/// A byte vector.
pub type ByteVec = Vec<u8>;

/// A byte slice.
pub type Bytes<'s> = &'s [u8];

pub(crate) use crate::math::mod_p;

/// Specifies which compression method to use.
/// Use uncompressed data for fastest loading and writing speeds.
/// Use RLE compression for fast loading and writing with slight memory savings.
/// Use ZIP compression for slow processing with large memory savings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Compression {

    /// Store uncompressed values.
    /// Produces large files that can be read and written very quickly.
    /// Consider using RLE instead, as it provides some compression with almost equivalent speed.
    Uncompressed,

    /// Produces slightly smaller files
    /// that can still be read and written rather quickly.
    /// The compressed file size is usually between 60 and 75 percent of the uncompressed size.
    /// Works best for images with large flat areas, such as masks and abstract graphics.
    /// This compression method is lossless.
    RLE,

    /// Uses ZIP compression to compress each line. Slowly produces small images
    /// which can be read with moderate speed. This compression method is lossless.
    /// Might be slightly faster but larger than `ZIP16´.
    ZIP1,

    /// Uses ZIP compression to compress blocks of 16 lines. Slowly produces small images
    /// which can be read with moderate speed. This compression method is lossless.
    /// Might be slightly slower but smaller than `ZIP1´.
    ZIP16,

    /// PIZ compression works well for noisy and natural images. Works better with larger tiles.
    /// Only supported for flat images, but not for deep data.
    /// This compression method is lossless.
    // A wavelet transform is applied to the pixel data, and the result is Huffman-
    // encoded. This scheme tends to provide the best compression ratio for the types of
    // images that are typically processed at Industrial Light & Magic. Files are
    // compressed and decompressed at roughly the same speed. For photographic
    // images with film grain, the files are reduced to between 35 and 55 percent of their
    // uncompressed size.
    PIZ,

    /// Like `ZIP1`, but reduces precision of `f32` images to `f24`.
    /// Therefore, this is lossless compression for `f16` and `u32` data, lossy compression for `f32` data.
    /// This produces really small image files. Only supported for flat images, not for deep data.
    PXR24,

    /// This lossy compression is only valid for `f16` channels.
    /// It's extremely fast, and compresses to a fixed ratio of 44 percent.
    // Channels of type HALF are split into blocks of four by four pixels or 32 bytes. Each
    // block is then packed into 14 bytes, reducing the data to 44 percent of their
    // uncompressed size.
    // Channels of type UINT or FLOAT are not compressed.
    // The size of a B44-compressed file depends on the number of pixels in the image,
    // but not on the data in the pixels. The predictable file size makes it
    // easier to allocate space on storage media efficiently.
    B44,

    /// Like `B44`, but 4x4 pixel blocks where all pixels have the same
    /// value are packed into 3 instead of 14 bytes.
    /// For images with large uniform areas, B44A produces smaller files than B44.
    B44A,

    /// Lossy DCT based compression, in blocks of 32 scanlines.
    /// More efficient for partial buffer access.
    /// The optional float is the compression level, a trade-off between
    /// size and quality. The default is `45.0`.
    DWAA(Option<f32>),

    /// Lossy DCT based compression, in blocks of 256 scanlines.
    /// More efficient space-wise and faster to decode full frames than `DWAA`.
    /// The optional float is the compression level, a trade-off between
    /// size and quality. The default is `45.0`.
    DWAB(Option<f32>),
}

impl std::fmt::Display for Compression {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} compression", match self {
            Compression::Uncompressed => "no",
            Compression::RLE => "rle",
            Compression::ZIP1 => "zip line",
            Compression::ZIP16 => "zip block",
            Compression::B44 => "b44",
            Compression::B44A => "b44a",
            Compression::DWAA(_) => "dwaa",
            Compression::DWAB(_) => "dwab",
            Compression::PIZ => "piz",
            Compression::PXR24 => "pxr24",
        })
    }
}


impl Compression {

    /// Compress the image section of bytes.
    /// The bytes must be in the little-endian channel-interleaved block layout.
    /// Stores the block uncompressed where compression would inflate it.
    pub fn compress_image_section(self, header: &Header, uncompressed: ByteVec, pixel_section: IntegerBounds) -> Result<ByteVec> {
        let max_tile_size = header.default_block_size();

        assert!(pixel_section.validate(Some(max_tile_size)).is_ok(), "compress tile coordinate bug");
        if header.deep { assert!(self.supports_deep_data(), "deep compression check bug") }

        use self::Compression::*;
        let compressed = match self {
            Uncompressed => return Ok(uncompressed),
            ZIP16 | ZIP1 => zip::compress_bytes(&uncompressed),
            RLE => rle::compress_bytes(&uncompressed),
            PIZ => piz::compress(&header.channels, &uncompressed, pixel_section),
            PXR24 => pxr24::compress(&header.channels, &uncompressed, pixel_section),
            B44 => b44::compress(&header.channels, &uncompressed, pixel_section, false),
            B44A => b44::compress(&header.channels, &uncompressed, pixel_section, true),
            DWAA(level) | DWAB(level) => dwa::compress(&header.channels, &uncompressed, pixel_section, level),
        };

        let compressed = compressed.map_err(|_|
            Error::corrupt(format!("pixels cannot be compressed ({})", self))
        )?;

        if compressed.len() < uncompressed.len() {
            // only write compressed if it actually is smaller than raw
            Ok(compressed)
        }
        else {
            // if the compressed data is larger than the raw data, the raw data is stored.
            // the reader detects this by comparing the stored size with the expected raw size
            Ok(uncompressed)
        }
    }

    /// Decompress the image section of bytes.
    /// Returns bytes in the little-endian channel-interleaved block layout.
    pub fn decompress_image_section(self, header: &Header, compressed: ByteVec, pixel_section: IntegerBounds, pedantic: bool) -> Result<ByteVec> {
        let max_tile_size = header.default_block_size();

        assert!(pixel_section.validate(Some(max_tile_size)).is_ok(), "decompress tile coordinate bug");
        if header.deep { assert!(self.supports_deep_data(), "deep compression check bug") }

        let expected_byte_size = self::uncompressed_block_byte_size(&header.channels, pixel_section);

        // a stored size that is larger than the raw data is always invalid,
        // as the writer would have fallen back to storing the raw bytes
        if compressed.len() > expected_byte_size {
            return Err(Error::corrupt("compressed data larger than raw block"));
        }

        // the compression of this block did not pay off, so the raw data was stored
        if compressed.len() == expected_byte_size {
            return Ok(compressed);
        }

        use self::Compression::*;
        let bytes = match self {
            Uncompressed => Err(Error::corrupt("uncompressed block size mismatch")),
            ZIP16 | ZIP1 => zip::decompress_bytes(&compressed, expected_byte_size),
            RLE => rle::decompress_bytes(&compressed, expected_byte_size, pedantic),
            PIZ => piz::decompress(&header.channels, compressed, pixel_section, expected_byte_size, pedantic),
            PXR24 => pxr24::decompress(&header.channels, &compressed, pixel_section, expected_byte_size, pedantic),
            B44 | B44A => b44::decompress(&header.channels, &compressed, pixel_section, expected_byte_size),
            DWAA(_) | DWAB(_) => dwa::decompress(&header.channels, &compressed, pixel_section, expected_byte_size, pedantic),
        };

        // map all errors to compression errors
        let bytes = bytes.map_err(|error| match error {
            Error::Io(_) | Error::Corrupt { .. } | Error::OutOfResources(_) =>
                Error::corrupt(format!("cannot decompress invalid data ({})", self)),
            other => other,
        })?;

        if bytes.len() != expected_byte_size {
            Err(Error::corrupt("decompressed data size mismatch"))
        }
        else {
            Ok(bytes)
        }
    }

    /// Compress a plain byte sequence, used for the two sections of a deep block.
    /// Only the methods that support deep data can be used here.
    /// Stores the bytes uncompressed where compression would inflate them.
    pub(crate) fn compress_deep_bytes(self, bytes: ByteVec) -> Result<ByteVec> {
        debug_assert!(self.supports_deep_data(), "deep compression support bug");

        let compressed = match self {
            Compression::Uncompressed => return Ok(bytes),
            Compression::RLE => rle::compress_bytes(&bytes)?,
            Compression::ZIP1 => zip::compress_bytes(&bytes)?,
            _ => return Err(Error::unsupported("compression method for deep data")),
        };

        if compressed.len() < bytes.len() { Ok(compressed) }
        else { Ok(bytes) }
    }

    /// Decompress a plain byte sequence of a deep block.
    pub(crate) fn decompress_deep_bytes(self, bytes: Bytes<'_>, expected_byte_size: usize, pedantic: bool) -> Result<ByteVec> {
        if bytes.len() > expected_byte_size {
            return Err(Error::corrupt("compressed data larger than raw block"));
        }

        if bytes.len() == expected_byte_size {
            return Ok(bytes.to_vec());
        }

        let decompressed = match self {
            Compression::Uncompressed => return Err(Error::corrupt("uncompressed block size mismatch")),
            Compression::RLE => rle::decompress_bytes(bytes, expected_byte_size, pedantic)?,
            Compression::ZIP1 => zip::decompress_bytes(bytes, expected_byte_size)?,
            _ => return Err(Error::unsupported("compression method for deep data")),
        };

        if decompressed.len() != expected_byte_size {
            return Err(Error::corrupt("decompressed data size mismatch"));
        }

        Ok(decompressed)
    }

    /// For scan line images and deep scan line images, one or more scan lines may be
    /// stored together as a scan line block. The number of scan lines per block
    /// depends on how the pixel data are compressed.
    pub fn scan_lines_per_block(self) -> usize {
        use self::Compression::*;
        match self {
            Uncompressed | RLE   | ZIP1     => 1,
            ZIP16 | PXR24                   => 16,
            PIZ   | B44   | B44A | DWAA(_)  => 32,
            DWAB(_)                         => 256,
        }
    }

    /// Deep data can only be compressed using RLE or ZIP compression.
    pub fn supports_deep_data(self) -> bool {
        use self::Compression::*;
        match self {
            Uncompressed | RLE | ZIP1 => true,
            _ => false,
        }
    }

    /// Most compression methods will reconstruct the exact pixel bytes,
    /// but some might throw away unimportant data for specific types of samples.
    pub fn is_lossless_for(self, sample_type: SampleType) -> bool {
        use self::Compression::*;
        match self {
            PXR24 => sample_type != SampleType::F32, // pxr reduces f32 to f24
            B44 | B44A => sample_type != SampleType::F16, // b44 only compresses f16 values, others are stored raw
            Uncompressed | RLE | ZIP1 | ZIP16 | PIZ => true,
            DWAB(_) | DWAA(_) => false,
        }
    }

    /// Most compression methods will reconstruct the exact pixel bytes,
    /// but some might throw away unimportant data in some cases.
    pub fn may_loose_data(self) -> bool {
        use self::Compression::*;
        match self {
            Uncompressed | RLE | ZIP1 | ZIP16 | PIZ => false,
            PXR24 | B44 | B44A | DWAB(_) | DWAA(_) => true,
        }
    }

    /// Most compression methods will reconstruct the exact pixel bytes,
    /// but some might replace NaN with zeroes.
    pub fn supports_nan(self) -> bool {
        use self::Compression::*;
        match self {
            B44 | B44A | DWAB(_) | DWAA(_) => false,
            _ => true
        }
    }
}

/// The exact size of the specified pixel section once decompressed,
/// summing all channels and respecting subsampling.
pub fn uncompressed_block_byte_size(channels: &ChannelList, pixel_section: IntegerBounds) -> usize {
    (pixel_section.position.y() .. pixel_section.end().y())
        .map(|y| channels.bytes_per_row(pixel_section, y))
        .sum()
}


/// A collection of functions used to prepare data for compression.
mod optimize_bytes {

    /// Integrate over all differences to the previous value in order to reconstruct sample values.
    pub fn differences_to_samples(buffer: &mut [u8]) {
        for index in 1..buffer.len() {
            // index accesses are checked manually at the loop bound and start at one
            buffer[index] = (buffer[index - 1] as i32 + buffer[index] as i32 - 128) as u8;
        }
    }

    /// Derive over all values in order to produce differences to the previous value.
    pub fn samples_to_differences(buffer: &mut [u8]) {
        for index in (1..buffer.len()).rev() {
            buffer[index] = (buffer[index] as i32 - buffer[index - 1] as i32 + 128) as u8;
        }
    }

    /// Interleave the bytes such that the second half of the array is every other byte.
    pub fn interleave_byte_blocks(separated: &mut [u8]) {
        let mut interleaved = Vec::with_capacity(separated.len());
        let (first_half, second_half) = separated.split_at((separated.len() + 1) / 2);

        let mut second_half_iter = second_half.iter();

        for &first in first_half {
            interleaved.push(first);

            if let Some(&second) = second_half_iter.next() {
                interleaved.push(second);
            }
        }

        separated.copy_from_slice(interleaved.as_slice())
    }

    /// Separate the bytes such that the second half contains every other byte.
    pub fn separate_bytes_fragments(source: &mut [u8]) {
        let mut first_half = Vec::with_capacity((source.len() + 1) / 2);
        let mut second_half = Vec::with_capacity(source.len() / 2);

        for (index, &value) in source.iter().enumerate() {
            if index % 2 == 0 { first_half.push(value); }
            else { second_half.push(value); }
        }

        let mut result = first_half;
        result.append(&mut second_half);
        source.copy_from_slice(result.as_slice());
    }


    #[cfg(test)]
    pub mod test {

        #[test]
        fn roundtrip_interleave() {
            let source = vec![ 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10 ];
            let mut modified = source.clone();

            super::separate_bytes_fragments(&mut modified);
            super::interleave_byte_blocks(&mut modified);

            assert_eq!(source, modified);
        }

        #[test]
        fn roundtrip_derive() {
            let source = vec![ 0, 1, 2, 7, 4, 5, 6, 7, 13, 9, 10 ];
            let mut modified = source.clone();

            super::samples_to_differences(&mut modified);
            super::differences_to_samples(&mut modified);

            assert_eq!(source, modified);
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::{ChannelDescription, ChannelList};
    use crate::meta::header::Header;
    use crate::math::Vec2;

    fn default_header(channels: ChannelList, size: Vec2<usize>, compression: Compression) -> Header {
        let mut header = Header::new("test".into(), size, smallvec![]);
        header.channels = channels;
        header.compression = compression;
        header
    }

    fn roundtrip_block(compression: Compression, channels: ChannelList, rectangle: IntegerBounds) {
        let byte_count = uncompressed_block_byte_size(&channels, rectangle);
        let data: ByteVec = (0 .. byte_count).map(|index| (index % 337) as u8).collect();

        let header = default_header(channels, rectangle.size, compression);

        let compressed = compression.compress_image_section(&header, data.clone(), rectangle).unwrap();
        let decompressed = compression.decompress_image_section(&header, compressed, rectangle, true).unwrap();

        assert_eq!(data, decompressed, "{} roundtrip", compression);
    }

    #[test]
    fn lossless_codecs_roundtrip() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription::new("B", SampleType::F16, false),
            ChannelDescription::new("G", SampleType::F32, false),
            ChannelDescription::new("R", SampleType::U32, false),
        ]);

        for &compression in &[
            Compression::Uncompressed, Compression::RLE,
            Compression::ZIP1, Compression::ZIP16, Compression::PIZ,
        ] {
            // a block never contains more scan lines than the compression allows
            let rectangle = IntegerBounds::new(
                Vec2(-10, 23),
                Vec2(17, compression.scan_lines_per_block().min(32))
            );

            roundtrip_block(compression, channels.clone(), rectangle);
        }
    }

    #[test]
    fn pxr24_roundtrips_non_float_channels() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription::new("A", SampleType::F16, false),
            ChannelDescription::new("Z", SampleType::U32, false),
        ]);

        roundtrip_block(Compression::PXR24, channels, IntegerBounds::new(Vec2(0, 0), Vec2(31, 16)));
    }

    #[test]
    fn declared_size_larger_than_raw_is_rejected() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription::new("R", SampleType::F32, false),
        ]);

        let rectangle = IntegerBounds::new(Vec2(0, 0), Vec2(4, 1));
        let header = default_header(channels, rectangle.size, Compression::ZIP1);

        let oversized = vec![ 0_u8; 4 * 4 + 1 ];
        let result = Compression::ZIP1.decompress_image_section(&header, oversized, rectangle, true);

        assert!(matches!(result, Err(Error::Corrupt { .. })));
    }
}
