
// see https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfPxr24Compressor.cpp

//! Lossy compression for F32 data, but lossless compression for U32 and F16 data.
// This compression method is based on an algorithm
// that was contributed to OpenEXR by Pixar Animation Studios.

// The compressor preprocesses the pixel data to reduce entropy, and then calls zlib.
// Compression of HALF and UINT channels is lossless, but compressing
// FLOAT channels is lossy: 32-bit floating-point numbers are converted
// to 24 bits by rounding the significand to 15 bits.
//
// The preprocessing converts the pixel values to unsigned integers.
// The compressor then replaces each value with the difference between
// the value and its left neighbor. This turns flat fields in the image
// into zeroes, and ramps into strings of similar values. Next, each
// difference is split into 2, 3 or 4 bytes, and the bytes are
// transposed so that all the most significant bytes end up in a
// contiguous block, followed by the second most significant bytes,
// and so on. The resulting string of bytes is compressed with zlib.

use super::*;

use crate::error::Error;
use crate::io::Data;
use crate::meta::attribute::{ChannelList, SampleType};
use crate::math::subsampled_count;


pub fn compress(channels: &ChannelList, uncompressed: Bytes<'_>, rectangle: IntegerBounds) -> Result<ByteVec> {
    if uncompressed.is_empty() { return Ok(Vec::new()); }

    let mut remaining_bytes = uncompressed;
    let mut raw = vec![ 0_u8; uncompressed.len() ];
    let mut write_index = 0;

    for y in rectangle.position.y() .. rectangle.end().y() {
        for channel in &channels.list {
            if !channel.covers_row(y) { continue; }
            let sample_count_x = subsampled_count(channel.sampling.x(), rectangle.position.x(), rectangle.max().x());

            // each byte of a sample is written into its own contiguous lane
            let mut lanes = [0_usize; 4];
            let mut previous_pixel: u32 = 0;

            match channel.sample_type {
                SampleType::F16 => {
                    lanes[0] = write_index;
                    lanes[1] = lanes[0] + sample_count_x;
                    write_index = lanes[1] + sample_count_x;

                    for _ in 0 .. sample_count_x {
                        let pixel = u16::read(&mut remaining_bytes)? as u32;
                        let difference = pixel.wrapping_sub(previous_pixel);
                        previous_pixel = pixel;

                        raw[lanes[0]] = (difference >> 8) as u8;
                        raw[lanes[1]] = difference as u8;

                        lanes[0] += 1;
                        lanes[1] += 1;
                    }
                },

                SampleType::U32 => {
                    lanes[0] = write_index;
                    lanes[1] = lanes[0] + sample_count_x;
                    lanes[2] = lanes[1] + sample_count_x;
                    lanes[3] = lanes[2] + sample_count_x;
                    write_index = lanes[3] + sample_count_x;

                    for _ in 0 .. sample_count_x {
                        let pixel = u32::read(&mut remaining_bytes)?;
                        let difference = pixel.wrapping_sub(previous_pixel);
                        previous_pixel = pixel;

                        raw[lanes[0]] = (difference >> 24) as u8;
                        raw[lanes[1]] = (difference >> 16) as u8;
                        raw[lanes[2]] = (difference >> 8) as u8;
                        raw[lanes[3]] = difference as u8;

                        lanes[0] += 1;
                        lanes[1] += 1;
                        lanes[2] += 1;
                        lanes[3] += 1;
                    }
                },

                SampleType::F32 => {
                    lanes[0] = write_index;
                    lanes[1] = lanes[0] + sample_count_x;
                    lanes[2] = lanes[1] + sample_count_x;
                    write_index = lanes[2] + sample_count_x;

                    for _ in 0 .. sample_count_x {
                        let pixel = f32_to_f24(f32::read(&mut remaining_bytes)?);
                        let difference = pixel.wrapping_sub(previous_pixel);
                        previous_pixel = pixel;

                        raw[lanes[0]] = (difference >> 16) as u8;
                        raw[lanes[1]] = (difference >> 8) as u8;
                        raw[lanes[2]] = difference as u8;

                        lanes[0] += 1;
                        lanes[1] += 1;
                        lanes[2] += 1;
                    }
                },
            }
        }
    }

    // f32 channels shrink to three quarters, so the transposed buffer may end early
    raw.truncate(write_index);

    Ok(miniz_oxide::deflate::compress_to_vec_zlib(raw.as_slice(), 4))
}

pub fn decompress(channels: &ChannelList, compressed: Bytes<'_>, rectangle: IntegerBounds, expected_byte_size: usize, pedantic: bool) -> Result<ByteVec> {
    if compressed.is_empty() { return Ok(Vec::new()) }

    let raw = zune_inflate::DeflateDecoder::new_with_options(
        compressed,
        zune_inflate::DeflateOptions::default().set_limit(expected_byte_size)
    ).decode_zlib().map_err(|_| Error::corrupt("pxr24 block data"))?;

    let mut read_index = 0;
    let mut out = Vec::with_capacity(expected_byte_size.min(2048 * 4));

    for y in rectangle.position.y() .. rectangle.end().y() {
        for channel in &channels.list {
            if !channel.covers_row(y) { continue; }
            let sample_count_x = subsampled_count(channel.sampling.x(), rectangle.position.x(), rectangle.max().x());

            let mut lanes = [0_usize; 4];
            let mut pixel_accumulation: u32 = 0;

            let lane_count = match channel.sample_type {
                SampleType::F16 => 2,
                SampleType::F32 => 3,
                SampleType::U32 => 4,
            };

            for lane in 0 .. lane_count {
                lanes[lane] = read_index + lane * sample_count_x;
            }

            read_index += lane_count * sample_count_x;
            if read_index > raw.len() {
                return Err(Error::corrupt("pxr24 content size"));
            }

            match channel.sample_type {
                SampleType::F16 => {
                    for _ in 0 .. sample_count_x {
                        let difference = ((raw[lanes[0]] as u32) << 8) | (raw[lanes[1]] as u32);

                        lanes[0] += 1;
                        lanes[1] += 1;

                        pixel_accumulation = pixel_accumulation.wrapping_add(difference);
                        (pixel_accumulation as u16).write(&mut out)?;
                    }
                },

                SampleType::U32 => {
                    for _ in 0 .. sample_count_x {
                        let difference = ((raw[lanes[0]] as u32) << 24)
                            | ((raw[lanes[1]] as u32) << 16)
                            | ((raw[lanes[2]] as u32) << 8)
                            | (raw[lanes[3]] as u32);

                        lanes[0] += 1;
                        lanes[1] += 1;
                        lanes[2] += 1;
                        lanes[3] += 1;

                        pixel_accumulation = pixel_accumulation.wrapping_add(difference);
                        pixel_accumulation.write(&mut out)?;
                    }
                },

                SampleType::F32 => {
                    for _ in 0 .. sample_count_x {
                        let difference = ((raw[lanes[0]] as u32) << 24)
                            | ((raw[lanes[1]] as u32) << 16)
                            | ((raw[lanes[2]] as u32) << 8);

                        lanes[0] += 1;
                        lanes[1] += 1;
                        lanes[2] += 1;

                        pixel_accumulation = pixel_accumulation.wrapping_add(difference);
                        pixel_accumulation.write(&mut out)?;
                    }
                }
            }
        }
    }

    if pedantic && read_index != raw.len() {
        return Err(Error::corrupt("pxr24 content size"));
    }

    Ok(out)
}


/// Conversion from 32-bit to 24-bit floating-point numbers.
/// Reverse conversion is just a simple 8-bit left shift.
pub fn f32_to_f24(float: f32) -> u32 {
    let bits = float.to_bits();

    let sign = bits & 0x8000_0000;
    let exponent = bits & 0x7f80_0000;
    let mantissa = bits & 0x007f_ffff;

    let result = if exponent == 0x7f80_0000 {
        if mantissa != 0 {
            // F is a NAN; we preserve the sign bit and
            // the 15 leftmost bits of the significand,
            // with one exception: If the 15 leftmost
            // bits are all zero, the NAN would turn
            // into an infinity, so we have to set at
            // least one bit in the significand.

            let mantissa = mantissa >> 8;
            (exponent >> 8) | mantissa | if mantissa == 0 { 1 } else { 0 }
        }
        else { // F is an infinity.
            exponent >> 8
        }
    }
    else { // F is finite, round the significand to 15 bits.
        let result = ((exponent | mantissa) + (mantissa & 0x0000_0080)) >> 8;

        if result >= 0x7f8000 {
            // F was close to FLT_MAX, and the significand was
            // rounded up, resulting in an exponent overflow.
            // Avoid the overflow by truncating the significand
            // instead of rounding it.
            (exponent | mantissa) >> 8
        }
        else {
            result
        }
    };

    (sign >> 8) | result
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::ChannelDescription;
    use crate::math::Vec2;

    #[test]
    fn f24_truncation_is_idempotent() {
        for float in [ 0.0_f32, -1.0, 1.5, 0.25, 1e30, -1e-30, f32::INFINITY, f32::NEG_INFINITY ] {
            let truncated = f32_to_f24(float);
            let restored = f32::from_bits(truncated << 8);
            assert_eq!(f32_to_f24(restored), truncated);
        }
    }

    #[test]
    fn f24_nan_stays_nan() {
        let truncated = f32_to_f24(f32::NAN);
        assert!(f32::from_bits(truncated << 8).is_nan());
    }

    #[test]
    fn lossless_for_f16_and_u32() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription::new("depth", SampleType::U32, false),
            ChannelDescription::new("opacity", SampleType::F16, false),
        ]);

        let rectangle = IntegerBounds::new(Vec2(0, 0), Vec2(19, 16));

        let data: Vec<u8> = (0 .. super::super::uncompressed_block_byte_size(&channels, rectangle))
            .map(|index| (index % 233) as u8)
            .collect();

        let compressed = compress(&channels, &data, rectangle).unwrap();
        let decompressed = decompress(&channels, &compressed, rectangle, data.len(), true).unwrap();

        assert_eq!(data, decompressed);
    }
}
