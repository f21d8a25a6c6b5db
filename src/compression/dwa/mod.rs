
//! Lossy DCT-based compression for blocks of 32 or 256 scan lines.
// see https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfDwaCompressor.cpp

//! A classifier table decides per channel how it is encoded:
//! color-like f16 channels are quantized in frequency space,
//! alpha-like f16 channels are run-length encoded,
//! and everything else goes into a lossless deflated stream.
//! The classifier rules travel inside every compressed block,
//! so vendors can extend them without breaking readers.

mod classifier;
mod nonlinear;
mod dct;

use crate::compression::{ByteVec, Bytes, mod_p};
use crate::compression::piz::huffman;
use crate::error::{Error, Result, usize_to_i32, usize_to_u64, u64_to_usize};
use crate::io::Data;
use crate::math::{Vec2, subsampled_count};
use crate::meta::attribute::{ChannelList, IntegerBounds, SampleType};
use half::f16;

use self::classifier::{Classifier, ChannelScheme};


/// The compression level that is used when the header does not specify one.
pub const DEFAULT_LEVEL: f32 = 45.0;

#[derive(Debug)]
struct ChannelData {
    tmp_start_index: usize,
    tmp_end_index: usize,

    resolution: Vec2<usize>,
    y_sampling: usize,
    samples_per_pixel: usize,
}

fn dissect_channels(channels: &ChannelList, rectangle: IntegerBounds) -> Vec<ChannelData> {
    let mut channel_data = Vec::with_capacity(channels.list.len());
    let mut tmp_index = 0;

    for channel in channels.list.iter() {
        let x_resolution = subsampled_count(channel.sampling.x(), rectangle.position.x(), rectangle.max().x());
        let y_resolution = subsampled_count(channel.sampling.y(), rectangle.position.y(), rectangle.max().y());

        let channel = ChannelData {
            tmp_start_index: tmp_index,
            tmp_end_index: tmp_index,
            resolution: Vec2(x_resolution, y_resolution),
            y_sampling: channel.sampling.y(),
            samples_per_pixel: channel.sample_type.bytes_per_sample() / SampleType::F16.bytes_per_sample(),
        };

        tmp_index += channel.resolution.area() * channel.samples_per_pixel;
        channel_data.push(channel);
    }

    channel_data
}


pub fn compress(
    channels: &ChannelList,
    uncompressed: Bytes<'_>,
    rectangle: IntegerBounds,
    level: Option<f32>,
) -> Result<ByteVec> {
    if uncompressed.is_empty() {
        return Ok(Vec::new());
    }

    let base_error = level.unwrap_or(DEFAULT_LEVEL).max(0.0) / 100_000.0;
    let classifier = Classifier::default();

    let mut tmp = vec![ 0_u16; uncompressed.len() / 2 ];
    let mut channel_data = dissect_channels(channels, rectangle);

    // split the interleaved rows into planar per-channel buffers
    let mut remaining_uncompressed_bytes = uncompressed;
    for y in rectangle.position.y() .. rectangle.end().y() {
        for channel in &mut channel_data {
            if mod_p(y, usize_to_i32(channel.y_sampling)) != 0 { continue; }

            let u16s_per_line = channel.resolution.x() * channel.samples_per_pixel;
            let next_tmp_end_index = channel.tmp_end_index + u16s_per_line;
            let target = &mut tmp[channel.tmp_end_index .. next_tmp_end_index];
            channel.tmp_end_index = next_tmp_end_index;

            u16::read_slice(&mut remaining_uncompressed_bytes, target).expect("in-memory read failed");
        }
    }

    let mut ac_values = Vec::<u16>::new();
    let mut dc_values = Vec::<u16>::new();
    let mut rle_raw = Vec::<u8>::new();
    let mut unknown_raw = Vec::<u8>::new();

    for (channel, description) in channel_data.iter().zip(channels.list.iter()) {
        let plane = &tmp[channel.tmp_start_index .. channel.tmp_start_index + channel.resolution.area() * channel.samples_per_pixel];

        match classifier.scheme_for(description) {
            ChannelScheme::Deflate => {
                u16::write_slice(&mut unknown_raw, plane).expect("write to in-memory failed");
            },

            ChannelScheme::RunLength => {
                u16::write_slice(&mut rle_raw, plane).expect("write to in-memory failed");
            },

            ChannelScheme::LossyDct => {
                encode_dct_plane(plane, channel.resolution, base_error, &mut ac_values, &mut dc_values);
            },
        }
    }

    let ac_stored = huffman::compress(&ac_values)?;

    let deflate = |bytes: &[u8]| {
        if bytes.is_empty() { Vec::new() }
        else { miniz_oxide::deflate::compress_to_vec_zlib(bytes, 4) }
    };

    let dc_stored = {
        let mut dc_bytes = Vec::with_capacity(dc_values.len() * 2);
        u16::write_slice(&mut dc_bytes, &dc_values).expect("write to in-memory failed");
        deflate(&dc_bytes)
    };

    let rle_encoded = super::rle::compress_bytes(&rle_raw)?;
    let rle_stored = deflate(&rle_encoded);
    let unknown_stored = deflate(&unknown_raw);

    let mut out = Vec::with_capacity(
        9 * u64::BYTE_SIZE + ac_stored.len() + dc_stored.len() + rle_stored.len() + unknown_stored.len()
    );

    for &size in &[
        ac_values.len(), ac_stored.len(),
        dc_values.len(), dc_stored.len(),
        rle_raw.len(), rle_encoded.len(), rle_stored.len(),
        unknown_raw.len(), unknown_stored.len(),
    ] {
        usize_to_u64(size).write(&mut out)?;
    }

    classifier.write(&mut out)?;

    out.extend_from_slice(&ac_stored);
    out.extend_from_slice(&dc_stored);
    out.extend_from_slice(&rle_stored);
    out.extend_from_slice(&unknown_stored);

    Ok(out)
}

pub fn decompress(
    channels: &ChannelList,
    compressed: Bytes<'_>,
    rectangle: IntegerBounds,
    expected_byte_size: usize,
    pedantic: bool,
) -> Result<ByteVec> {
    if compressed.is_empty() {
        return Ok(Vec::new());
    }

    let mut remaining = compressed;

    let mut sizes = [0_usize; 9];
    for size in sizes.iter_mut() {
        let value = u64::read(&mut remaining)?;

        // bound every sub-stream against the raw block size. the factor
        // accounts for the 8x8 padding of narrow blocks, where the
        // coefficient count considerably exceeds the pixel count
        if value > (expected_byte_size as u64) * 64 + 65536 {
            return Err(Error::corrupt("dwa sub-stream size"));
        }

        *size = u64_to_usize(value);
    }

    let [
        ac_count, ac_stored_size,
        dc_count, dc_stored_size,
        rle_raw_size, rle_encoded_size, rle_stored_size,
        unknown_raw_size, unknown_stored_size,
    ] = sizes;

    let classifier = Classifier::read(&mut remaining)?;

    let total_stored = ac_stored_size + dc_stored_size + rle_stored_size + unknown_stored_size;
    if remaining.len() < total_stored {
        return Err(Error::corrupt("dwa stream lengths"));
    }

    let (ac_stored, remaining) = remaining.split_at(ac_stored_size);
    let (dc_stored, remaining) = remaining.split_at(dc_stored_size);
    let (rle_stored, remaining) = remaining.split_at(rle_stored_size);
    let (unknown_stored, remaining) = remaining.split_at(unknown_stored_size);

    if pedantic && !remaining.is_empty() {
        return Err(Error::corrupt("dwa trailing data"));
    }

    let ac_values = if ac_count != 0 { huffman::decompress(ac_stored, ac_count)? } else { Vec::new() };

    let dc_values = {
        let dc_bytes = inflate(dc_stored, dc_count * 2)?;
        if dc_bytes.len() != dc_count * 2 { return Err(Error::corrupt("dwa dc stream")); }

        let mut values = vec![ 0_u16; dc_count ];
        u16::read_slice(&mut dc_bytes.as_slice(), &mut values)?;
        values
    };

    let rle_raw = {
        let rle_encoded = inflate(rle_stored, rle_encoded_size)?;
        if rle_encoded.len() != rle_encoded_size { return Err(Error::corrupt("dwa rle stream")); }
        super::rle::decompress_bytes(&rle_encoded, rle_raw_size, pedantic)?
    };

    let unknown_raw = inflate(unknown_stored, unknown_raw_size)?;
    if unknown_raw.len() != unknown_raw_size { return Err(Error::corrupt("dwa raw stream")); }

    let expected_value_count = expected_byte_size / 2;
    let mut tmp = vec![ 0_u16; expected_value_count ];
    let mut channel_data = dissect_channels(channels, rectangle);

    let mut ac_values = ac_values.as_slice();
    let mut dc_values = dc_values.as_slice();
    let mut rle_raw = rle_raw.as_slice();
    let mut unknown_raw = unknown_raw.as_slice();

    for (channel, description) in channel_data.iter().zip(channels.list.iter()) {
        let value_count = channel.resolution.area() * channel.samples_per_pixel;
        let plane = &mut tmp[channel.tmp_start_index .. channel.tmp_start_index + value_count];

        match classifier.scheme_for(description) {
            ChannelScheme::Deflate => {
                u16::read_slice(&mut unknown_raw, plane)
                    .map_err(|_| Error::corrupt("dwa raw channel data"))?;
            },

            ChannelScheme::RunLength => {
                u16::read_slice(&mut rle_raw, plane)
                    .map_err(|_| Error::corrupt("dwa rle channel data"))?;
            },

            ChannelScheme::LossyDct => {
                decode_dct_plane(plane, channel.resolution, &mut ac_values, &mut dc_values)?;
            },
        }
    }

    // interleave the planar channel buffers back into rows
    let mut out = Vec::with_capacity(expected_byte_size);

    for y in rectangle.position.y() .. rectangle.end().y() {
        for channel in &mut channel_data {
            if mod_p(y, usize_to_i32(channel.y_sampling)) != 0 { continue; }

            let u16s_per_line = channel.resolution.x() * channel.samples_per_pixel;
            let next_tmp_end_index = channel.tmp_end_index + u16s_per_line;
            let values = &tmp[channel.tmp_end_index .. next_tmp_end_index];
            channel.tmp_end_index = next_tmp_end_index;

            u16::write_slice(&mut out, values).expect("write to in-memory failed");
        }
    }

    debug_assert_eq!(out.len(), expected_byte_size, "dwa expected byte size bug");
    Ok(out)
}


fn inflate(compressed: &[u8], expected_size: usize) -> Result<ByteVec> {
    if compressed.is_empty() && expected_size == 0 {
        return Ok(Vec::new());
    }

    zune_inflate::DeflateDecoder::new_with_options(
        compressed,
        zune_inflate::DeflateOptions::default().set_limit(expected_size)
    ).decode_zlib().map_err(|_| Error::corrupt("dwa deflated stream"))
}

/// Quantize one planar f16 channel in frequency space.
/// The plane is processed in 8x8 blocks, padded by repeating the edges.
fn encode_dct_plane(plane: &[u16], resolution: Vec2<usize>, base_error: f32, ac_values: &mut Vec<u16>, dc_values: &mut Vec<u16>) {
    let width = resolution.x();
    let height = resolution.y();
    let nonlinear = nonlinear::nonlinear_table();

    for block_y in (0 .. height).step_by(8) {
        for block_x in (0 .. width).step_by(8) {
            let mut block = [0.0_f32; 64];

            for row in 0..8 {
                let y = (block_y + row).min(height - 1);

                for column in 0..8 {
                    let x = (block_x + column).min(width - 1);
                    block[row * 8 + column] = nonlinear[plane[y * width + x] as usize];
                }
            }

            dct::forward_8x8(&mut block);

            dc_values.push(dct::quantize(block[0], base_error));

            for (zigzag_position, &block_index) in dct::ZIGZAG.iter().enumerate().skip(1) {
                ac_values.push(dct::quantize(block[block_index], dct::error_bound(base_error, zigzag_position)));
            }
        }
    }
}

/// Reconstruct one planar f16 channel from its quantized coefficients.
fn decode_dct_plane(plane: &mut [u16], resolution: Vec2<usize>, ac_values: &mut &[u16], dc_values: &mut &[u16]) -> Result<()> {
    let width = resolution.x();
    let height = resolution.y();

    for block_y in (0 .. height).step_by(8) {
        for block_x in (0 .. width).step_by(8) {
            let mut block = [0.0_f32; 64];

            let (&dc, remaining_dc) = dc_values.split_first()
                .ok_or_else(|| Error::corrupt("dwa dc coefficient count"))?;
            *dc_values = remaining_dc;

            if ac_values.len() < 63 {
                return Err(Error::corrupt("dwa ac coefficient count"));
            }

            let (block_ac, remaining_ac) = ac_values.split_at(63);
            *ac_values = remaining_ac;

            block[0] = dct::dequantize(dc);
            for (&block_index, &quantized) in dct::ZIGZAG.iter().skip(1).zip(block_ac) {
                block[block_index] = dct::dequantize(quantized);
            }

            dct::inverse_8x8(&mut block);

            // write the block, clipping the padded rows and columns
            let column_count = (block_x + 8).min(width) - block_x;
            let row_count = (block_y + 8).min(height) - block_y;

            for row in 0 .. row_count {
                let y = block_y + row;

                for column in 0 .. column_count {
                    let x = block_x + column;
                    let linear = nonlinear::from_nonlinear(block[row * 8 + column].max(0.0));
                    plane[y * width + x] = f16::from_f32(linear).to_bits();
                }
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::ChannelDescription;

    fn rgba_channels() -> ChannelList {
        ChannelList::new(smallvec![
            ChannelDescription::new("A", SampleType::F16, true),
            ChannelDescription::new("B", SampleType::F16, false),
            ChannelDescription::new("G", SampleType::F16, false),
            ChannelDescription::new("R", SampleType::F16, false),
        ])
    }

    fn write_f16_plane_block(channels: &ChannelList, rectangle: IntegerBounds, mut sample: impl FnMut(usize) -> f16) -> Vec<u8> {
        let count = crate::compression::uncompressed_block_byte_size(channels, rectangle) / 2;
        let values: Vec<f16> = (0 .. count).map(&mut sample).collect();

        let mut bytes = Vec::with_capacity(count * 2);
        f16::write_slice(&mut bytes, &values).unwrap();
        bytes
    }

    #[test]
    fn roundtrip_within_tolerance() {
        let channels = rgba_channels();
        let rectangle = IntegerBounds::new(Vec2(-8, 100), Vec2(37, 32));

        let data = write_f16_plane_block(&channels, rectangle, |index| {
            f16::from_f32(((index % 49) as f32 / 25.0).min(2.0))
        });

        let compressed = compress(&channels, &data, rectangle, None).unwrap();
        let decompressed = decompress(&channels, &compressed, rectangle, data.len(), true).unwrap();

        assert_eq!(decompressed.len(), data.len());

        let mut original = vec![ f16::ZERO; data.len() / 2 ];
        let mut restored = vec![ f16::ZERO; data.len() / 2 ];
        f16::read_slice(&mut data.as_slice(), &mut original).unwrap();
        f16::read_slice(&mut decompressed.as_slice(), &mut restored).unwrap();

        for (&original, &restored) in original.iter().zip(restored.iter()) {
            let difference = (original.to_f32() - restored.to_f32()).abs();
            assert!(difference < 0.1, "{} became {}", original, restored);
        }
    }

    #[test]
    fn flat_colors_compress_tightly() {
        let channels = rgba_channels();
        let rectangle = IntegerBounds::new(Vec2(0, 0), Vec2(128, 32));

        let data = write_f16_plane_block(&channels, rectangle, |_| f16::from_f32(0.5));

        let compressed = compress(&channels, &data, rectangle, None).unwrap();
        assert!(compressed.len() < data.len() / 10, "flat image did not compress: {} of {}", compressed.len(), data.len());
    }

    #[test]
    fn integer_channels_are_lossless() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription::new("id", SampleType::U32, false),
        ]);

        let rectangle = IntegerBounds::new(Vec2(0, 0), Vec2(13, 7));
        let data: Vec<u8> = (0 .. 13 * 7 * 4).map(|index| (index % 251) as u8).collect();

        let compressed = compress(&channels, &data, rectangle, None).unwrap();
        let decompressed = decompress(&channels, &compressed, rectangle, data.len(), true).unwrap();

        assert_eq!(data, decompressed);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let channels = rgba_channels();
        let rectangle = IntegerBounds::new(Vec2(0, 0), Vec2(32, 32));

        let data = write_f16_plane_block(&channels, rectangle, |index| f16::from_f32(index as f32 / 100.0));

        let compressed = compress(&channels, &data, rectangle, None).unwrap();
        let truncated = &compressed[.. compressed.len() / 3];

        assert!(decompress(&channels, truncated, rectangle, data.len(), true).is_err());
    }
}
