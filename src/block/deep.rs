
//! Pack and unpack blocks with multiple samples per pixel.
//! Each deep block carries a sample count table and the sample data,
//! which are compressed independently of each other.

use crate::block::BlockIndex;
use crate::compression::{ByteVec, Compression};
use crate::error::{Error, Result, UnitResult};
use crate::io::Data;
use crate::meta::attribute::ChannelList;
use crate::meta::limits::SanityLimits;


/// The decompressed contents of a single deep data block.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepBlockContents {

    /// Location of the data inside the image.
    pub index: BlockIndex,

    /// The number of samples of every pixel in this block, in row-major order.
    /// Contains one entry per pixel, regardless of channel.
    pub sample_counts: Vec<u32>,

    /// The sample values of the whole block.
    /// For each line, for each channel, all samples of that line are contiguous.
    /// Each pixel contributes as many samples per channel as its sample count states.
    pub sample_data: ByteVec,
}

impl DeepBlockContents {

    /// The sum of all per-pixel sample counts.
    pub fn total_sample_count(&self) -> u64 {
        self.sample_counts.iter().map(|&count| count as u64).sum()
    }

    /// Check this block against the channel list and the configured caps.
    /// The sample data byte count must exactly match the sample counts.
    pub fn validate(&self, channels: &ChannelList, limits: &SanityLimits) -> UnitResult {
        if self.sample_counts.len() != self.index.pixel_size.area() {
            return Err(Error::corrupt("deep sample count table size"));
        }

        let total_samples = self.total_sample_count();

        if total_samples > limits.max_deep_samples_per_chunk as u64 {
            return Err(Error::out_of_resources("deep sample count sum exceeding sanity maximum"));
        }

        let expected_bytes = total_samples * bytes_per_deep_pixel(channels) as u64;

        if expected_bytes != self.sample_data.len() as u64 {
            return Err(Error::corrupt("deep sample data size disagrees with sample counts"));
        }

        Ok(())
    }
}

/// How many bytes a single sample occupies, summed over all channels.
/// Deep images never use subsampling.
pub fn bytes_per_deep_pixel(channels: &ChannelList) -> usize {
    channels.bytes_per_pixel
}


/// Serialize the sample count table as it is stored in a file:
/// one `i32` per pixel, accumulated from left to right within each row.
pub fn pack_sample_counts(sample_counts: &[u32], block_width: usize) -> Result<ByteVec> {
    let mut bytes = Vec::with_capacity(sample_counts.len() * i32::BYTE_SIZE);

    for row in sample_counts.chunks(block_width) {
        let mut running_sum = 0_u64;

        for &count in row {
            running_sum += count as u64;

            if running_sum > i32::MAX as u64 {
                return Err(Error::corrupt("deep sample count sum exceeding integer maximum"));
            }

            (running_sum as i32).write(&mut bytes)?;
        }
    }

    Ok(bytes)
}

/// Parse the cumulative sample count table into plain per-pixel counts.
/// Rejects tables with negative entries or decreasing sums,
/// and sums that exceed the configured cap.
pub fn unpack_sample_counts(
    bytes: &[u8], block_width: usize, block_height: usize, limits: &SanityLimits
) -> Result<Vec<u32>> {
    let pixel_count = block_width * block_height;

    if bytes.len() != pixel_count * i32::BYTE_SIZE {
        return Err(Error::corrupt("deep sample count table size"));
    }

    let mut remaining = bytes;
    let mut counts = Vec::with_capacity(pixel_count);
    let mut total_samples = 0_u64;

    for _ in 0 .. block_height {
        let mut previous_sum = 0_i64;

        for _ in 0 .. block_width {
            let cumulative = i32::read(&mut remaining)? as i64;

            if cumulative < previous_sum {
                return Err(Error::corrupt("deep sample count table not increasing"));
            }

            let count = (cumulative - previous_sum) as u64;
            total_samples += count;

            if total_samples > limits.max_deep_samples_per_chunk as u64 {
                return Err(Error::out_of_resources("deep sample count sum exceeding sanity maximum"));
            }

            counts.push(count as u32);
            previous_sum = cumulative;
        }
    }

    Ok(counts)
}


/// Compress the sample count table and the sample data of a deep block.
/// Returns the compressed table, the compressed data, and the decompressed data size.
pub fn compress_deep_block(
    compression: Compression,
    contents: &DeepBlockContents,
    channels: &ChannelList,
    limits: &SanityLimits,
) -> Result<(ByteVec, ByteVec, usize)> {
    debug_assert!(compression.supports_deep_data(), "deep compression support bug");

    contents.validate(channels, limits)?;

    let packed_table = pack_sample_counts(&contents.sample_counts, contents.index.pixel_size.width())?;

    let compressed_table = compression.compress_deep_bytes(packed_table)?;
    let compressed_data = compression.compress_deep_bytes(contents.sample_data.clone())?;

    Ok((compressed_table, compressed_data, contents.sample_data.len()))
}

/// Decompress a deep block. The sample counts decompress first and bound
/// the allocation of the sample data.
pub fn decompress_deep_block(
    compression: Compression,
    index: BlockIndex,
    compressed_table: &[u8],
    compressed_data: &[u8],
    decompressed_data_size: usize,
    channels: &ChannelList,
    limits: &SanityLimits,
    pedantic: bool,
) -> Result<DeepBlockContents> {
    let block_width = index.pixel_size.width();
    let block_height = index.pixel_size.height();

    let packed_table_size = block_width * block_height * i32::BYTE_SIZE;
    let packed_table = compression.decompress_deep_bytes(compressed_table, packed_table_size, pedantic)?;
    let sample_counts = unpack_sample_counts(&packed_table, block_width, block_height, limits)?;

    let total_samples: u64 = sample_counts.iter().map(|&count| count as u64).sum();
    let expected_bytes = total_samples * bytes_per_deep_pixel(channels) as u64;

    // the sample counts bound the data size before anything is allocated
    if expected_bytes != decompressed_data_size as u64 {
        return Err(Error::corrupt("deep sample data size disagrees with sample counts"));
    }

    if decompressed_data_size > limits.max_chunk_raw_bytes {
        return Err(Error::out_of_resources("deep sample data size exceeding sanity maximum"));
    }

    let sample_data = compression.decompress_deep_bytes(compressed_data, decompressed_data_size, pedantic)?;

    if sample_data.len() != decompressed_data_size {
        return Err(Error::corrupt("deep sample data size"));
    }

    let contents = DeepBlockContents { index, sample_counts, sample_data };
    contents.validate(channels, limits)?;
    Ok(contents)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::block::BlockIndex;
    use crate::math::Vec2;
    use crate::meta::attribute::{ChannelDescription, SampleType};

    fn deep_channels() -> ChannelList {
        ChannelList::new(smallvec![
            ChannelDescription::new("A", SampleType::F16, false),
            ChannelDescription::new("Z", SampleType::F32, false),
        ])
    }

    fn block_of(counts: Vec<u32>, size: Vec2<usize>, channels: &ChannelList) -> DeepBlockContents {
        let total: u64 = counts.iter().map(|&count| count as u64).sum();
        let byte_count = total as usize * bytes_per_deep_pixel(channels);

        DeepBlockContents {
            index: BlockIndex {
                layer: 0,
                pixel_position: Vec2(0, 0),
                pixel_size: size,
                level: Vec2(0, 0),
            },
            sample_counts: counts,
            sample_data: (0 .. byte_count).map(|index| (index % 131) as u8).collect(),
        }
    }

    #[test]
    fn sample_count_table_roundtrip() {
        let counts = vec![ 2, 0, 5, 1, 0, 0, 7, 3 ];
        let packed = pack_sample_counts(&counts, 4).unwrap();

        let unpacked = unpack_sample_counts(&packed, 4, 2, &SanityLimits::default()).unwrap();
        assert_eq!(counts, unpacked);
    }

    #[test]
    fn decreasing_table_is_rejected() {
        let mut bytes = Vec::new();
        for value in [ 5_i32, 3, 8, 9 ] { value.write(&mut bytes).unwrap(); }

        assert!(unpack_sample_counts(&bytes, 4, 1, &SanityLimits::default()).is_err());
    }

    #[test]
    fn block_roundtrip_for_each_deep_compression() {
        let channels = deep_channels();
        let limits = SanityLimits::default();

        for &compression in &[ Compression::Uncompressed, Compression::RLE, Compression::ZIP1 ] {
            let block = block_of(vec![ 2, 0, 1, 4, 0, 9 ], Vec2(3, 2), &channels);

            let (table, data, unpacked_size) =
                compress_deep_block(compression, &block, &channels, &limits).unwrap();

            let restored = decompress_deep_block(
                compression, block.index, &table, &data, unpacked_size, &channels, &limits, true
            ).unwrap();

            assert_eq!(block, restored);
        }
    }

    #[test]
    fn size_disagreement_is_rejected() {
        let channels = deep_channels();
        let mut block = block_of(vec![ 2, 0 ], Vec2(2, 1), &channels);

        block.sample_data.push(42); // now one byte too long

        assert!(block.validate(&channels, &SanityLimits::default()).is_err());
    }

    #[test]
    fn sample_count_cap_is_enforced() {
        let channels = deep_channels();
        let limits = SanityLimits { max_deep_samples_per_chunk: 10, .. SanityLimits::default() };

        let block = block_of(vec![ 6, 6 ], Vec2(2, 1), &channels);
        assert!(matches!(
            block.validate(&channels, &limits),
            Err(Error::OutOfResources(_))
        ));
    }
}
