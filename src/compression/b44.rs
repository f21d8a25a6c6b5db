
// see https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfB44Compressor.cpp

//! Lossy compression of 4x4 blocks of f16 pixels to a fixed ratio.
//! Channels of type `u32` or `f32` are stored without compression.

use super::*;
use crate::error::Error;
use crate::error::usize_to_i32;
use crate::io::Data;
use crate::math::{Vec2, subsampled_count};
use crate::meta::attribute::{ChannelList, SampleType};
use half::f16;
use std::convert::TryInto;
use std::sync::OnceLock;


/// Maps a half bit pattern from log space to linear space.
/// Built once, as a pure function of the f16 bit pattern.
fn exp_table() -> &'static [u16; 1 << 16] {
    static TABLE: OnceLock<Box<[u16; 1 << 16]>> = OnceLock::new();

    TABLE.get_or_init(|| {
        let max_log = 8.0 * (f16::MAX.to_f32()).ln();

        let mut table = vec![ 0_u16; 1 << 16 ].into_boxed_slice();
        for (bits, entry) in table.iter_mut().enumerate() {
            let value = f16::from_bits(bits as u16).to_f32();

            *entry = if !value.is_finite() { 0 }
            else if value >= max_log { f16::MAX.to_bits() }
            else { f16::from_f32((value / 8.0).exp()).to_bits() };
        }

        table.try_into().expect("table size bug")
    })
}

/// Maps a half bit pattern from linear space to log space.
/// Built once, as a pure function of the f16 bit pattern.
fn log_table() -> &'static [u16; 1 << 16] {
    static TABLE: OnceLock<Box<[u16; 1 << 16]>> = OnceLock::new();

    TABLE.get_or_init(|| {
        let mut table = vec![ 0_u16; 1 << 16 ].into_boxed_slice();
        for (bits, entry) in table.iter_mut().enumerate() {
            let value = f16::from_bits(bits as u16).to_f32();

            *entry = if !value.is_finite() || value < 0.0 { 0 }
            else { f16::from_f32(8.0 * value.ln()).to_bits() };
        }

        table.try_into().expect("table size bug")
    })
}

fn convert_from_linear(samples: &mut [u16; 16]) {
    let table = log_table();
    for sample in samples.iter_mut() {
        *sample = table[*sample as usize];
    }
}

fn convert_to_linear(samples: &mut [u16; 16]) {
    let table = exp_table();
    for sample in samples.iter_mut() {
        *sample = table[*sample as usize];
    }
}


#[inline]
fn shift_and_round(x: i32, shift: i32) -> i32 {
    let x = x << 1;
    let a = (1 << shift) - 1;
    let shift = shift + 1;
    let b = (x >> shift) & 1;
    (x + a + b) >> shift
}

/// Pack a block of 4 by 4 16-bit pixels (32 bytes) into
/// either 14 or 3 bytes. Returns the packed byte count.
fn pack(samples: [u16; 16], packed: &mut [u8; 14], optimize_flat_fields: bool, exact_max: bool) -> usize {

    // the sign of a half is transformed so that the pixel
    // bit patterns can be compared as unsigned integers
    let mut t = [0_u16; 16];

    for i in 0..16 {
        if (samples[i] & 0x7c00) == 0x7c00 {
            // infinity and nan are replaced with zero
            t[i] = 0x8000;
        } else if (samples[i] & 0x8000) != 0 {
            t[i] = !samples[i];
        } else {
            t[i] = samples[i] | 0x8000;
        }
    }

    let t_max = t.iter().copied().max().expect("max of fixed array bug");

    // compute a set of running differences r[0] ... r[14].
    // find a shift value such that, after rounding off the
    // rightmost bits and shifting, all differences are between
    // -32 and +31. then bias the differences so that they
    // end up between 0 and 63.

    let mut shift = -1_i32;
    let mut d = [0_i32; 16];
    let mut r = [0_i32; 15];
    let mut r_min: i32;
    let mut r_max: i32;

    const BIAS: i32 = 0x20;

    loop {
        shift += 1;

        // compute absolute differences d[0] ... d[15]
        // between t_max and t[0] ... t[15],
        // and shift and round them
        for i in 0..16 {
            d[i] = shift_and_round((t_max - t[i]).into(), shift);
        }

        // convert d[0] .. d[15] into running differences
        r[0] = d[0] - d[4] + BIAS;
        r[1] = d[4] - d[8] + BIAS;
        r[2] = d[8] - d[12] + BIAS;

        r[3] = d[0] - d[1] + BIAS;
        r[4] = d[4] - d[5] + BIAS;
        r[5] = d[8] - d[9] + BIAS;
        r[6] = d[12] - d[13] + BIAS;

        r[7] = d[1] - d[2] + BIAS;
        r[8] = d[5] - d[6] + BIAS;
        r[9] = d[9] - d[10] + BIAS;
        r[10] = d[13] - d[14] + BIAS;

        r[11] = d[2] - d[3] + BIAS;
        r[12] = d[6] - d[7] + BIAS;
        r[13] = d[10] - d[11] + BIAS;
        r[14] = d[14] - d[15] + BIAS;

        r_min = r.iter().copied().min().expect("min of fixed array bug");
        r_max = r.iter().copied().max().expect("max of fixed array bug");

        if r_min >= 0 && r_max <= 0x3f {
            break;
        }
    }

    if r_min == BIAS && r_max == BIAS && optimize_flat_fields {
        // special case - all pixels have the same value.
        // we encode this in 3 instead of 14 bytes by
        // storing the value 0xfc in the third output byte,
        // which cannot occur in the 14-byte encoding
        packed[0] = (t[0] >> 8) as u8;
        packed[1] = t[0] as u8;
        packed[2] = 0xfc;

        return 3;
    }

    if exact_max {
        // adjust t[0] so that the pixel whose value is equal
        // to t_max gets represented as accurately as possible
        t[0] = t_max.wrapping_sub((d[0] << shift) as u16);
    }

    // pack t[0], shift and r[0] ... r[14] into 14 bytes
    packed[0] = (t[0] >> 8) as u8;
    packed[1] = t[0] as u8;

    packed[2] = ((shift << 2) | (r[0] >> 4)) as u8;
    packed[3] = ((r[0] << 4) | (r[1] >> 2)) as u8;
    packed[4] = ((r[1] << 6) | r[2]) as u8;

    packed[5] = ((r[3] << 2) | (r[4] >> 4)) as u8;
    packed[6] = ((r[4] << 4) | (r[5] >> 2)) as u8;
    packed[7] = ((r[5] << 6) | r[6]) as u8;

    packed[8] = ((r[7] << 2) | (r[8] >> 4)) as u8;
    packed[9] = ((r[8] << 4) | (r[9] >> 2)) as u8;
    packed[10] = ((r[9] << 6) | r[10]) as u8;

    packed[11] = ((r[11] << 2) | (r[12] >> 4)) as u8;
    packed[12] = ((r[12] << 4) | (r[13] >> 2)) as u8;
    packed[13] = ((r[13] << 6) | r[14]) as u8;

    14
}


const SIX_BITS: u32 = 0x3f;

#[inline]
fn byte(packed: &[u8], index: usize) -> u32 {
    packed[index] as u32
}

/// Unpack a 14-byte block into 4 by 4 16-bit pixels.
fn unpack14(packed: &[u8], samples: &mut [u16; 16]) {
    debug_assert_eq!(packed.len(), 14, "packed block size bug");
    debug_assert_ne!(packed[2], 0xfc, "flat field marker in 14-byte block bug");

    samples[0] = ((byte(packed, 0) << 8) | byte(packed, 1)) as u16;

    let shift = byte(packed, 2) >> 2;
    let bias = 0x20 << shift;

    samples[4] = (samples[0] as u32).wrapping_add((((byte(packed, 2) << 4) | (byte(packed, 3) >> 4)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    samples[8] = (samples[4] as u32).wrapping_add((((byte(packed, 3) << 2) | (byte(packed, 4) >> 6)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    samples[12] = (samples[8] as u32).wrapping_add((byte(packed, 4) & SIX_BITS) << shift).wrapping_sub(bias) as u16;

    samples[1] = (samples[0] as u32).wrapping_add((byte(packed, 5) >> 2) << shift).wrapping_sub(bias) as u16;
    samples[5] = (samples[4] as u32).wrapping_add((((byte(packed, 5) << 4) | (byte(packed, 6) >> 4)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    samples[9] = (samples[8] as u32).wrapping_add((((byte(packed, 6) << 2) | (byte(packed, 7) >> 6)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    samples[13] = (samples[12] as u32).wrapping_add((byte(packed, 7) & SIX_BITS) << shift).wrapping_sub(bias) as u16;

    samples[2] = (samples[1] as u32).wrapping_add((byte(packed, 8) >> 2) << shift).wrapping_sub(bias) as u16;
    samples[6] = (samples[5] as u32).wrapping_add((((byte(packed, 8) << 4) | (byte(packed, 9) >> 4)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    samples[10] = (samples[9] as u32).wrapping_add((((byte(packed, 9) << 2) | (byte(packed, 10) >> 6)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    samples[14] = (samples[13] as u32).wrapping_add((byte(packed, 10) & SIX_BITS) << shift).wrapping_sub(bias) as u16;

    samples[3] = (samples[2] as u32).wrapping_add((byte(packed, 11) >> 2) << shift).wrapping_sub(bias) as u16;
    samples[7] = (samples[6] as u32).wrapping_add((((byte(packed, 11) << 4) | (byte(packed, 12) >> 4)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    samples[11] = (samples[10] as u32).wrapping_add((((byte(packed, 12) << 2) | (byte(packed, 13) >> 6)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    samples[15] = (samples[14] as u32).wrapping_add((byte(packed, 13) & SIX_BITS) << shift).wrapping_sub(bias) as u16;

    for sample in samples.iter_mut() {
        if (*sample & 0x8000) != 0 {
            *sample &= 0x7fff;
        } else {
            *sample = !*sample;
        }
    }
}

/// Unpack a 3-byte block into 4 by 4 identical 16-bit pixels.
fn unpack3(packed: &[u8], samples: &mut [u16; 16]) {
    debug_assert_eq!(packed[2], 0xfc, "missing flat field marker bug");

    let mut value = ((byte(packed, 0) << 8) | byte(packed, 1)) as u16;

    if (value & 0x8000) != 0 {
        value &= 0x7fff;
    } else {
        value = !value;
    }

    for sample in samples.iter_mut() {
        *sample = value;
    }
}


#[derive(Debug)]
struct ChannelData {
    tmp_start_index: usize,
    tmp_end_index: usize,

    resolution: Vec2<usize>,
    y_sampling: usize,
    sample_type: SampleType,
    quantize_linearly: bool,
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
            sample_type: channel.sample_type,
            quantize_linearly: channel.quantize_linearly,
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
    optimize_flat_fields: bool,
) -> Result<ByteVec> {
    if uncompressed.is_empty() {
        return Ok(Vec::new());
    }

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

    let mut out = Vec::with_capacity(uncompressed.len() / 2);

    for channel in &channel_data {
        if channel.sample_type != SampleType::F16 {
            // u32 and f32 channels are stored uncompressed
            let channel_values = &tmp[channel.tmp_start_index .. channel.tmp_start_index + channel.resolution.area() * channel.samples_per_pixel];
            u16::write_slice(&mut out, channel_values).expect("write to in-memory failed");
            continue;
        }

        let width = channel.resolution.x();
        let height = channel.resolution.y();

        for block_y in (0 .. height).step_by(4) {
            for block_x in (0 .. width).step_by(4) {

                // copy the next 4x4 pixel block into a flat array.
                // if the width or height is not divisible by 4, the
                // data is padded by repeating the rightmost column
                // and the bottom row
                let mut samples = [0_u16; 16];

                for row in 0..4 {
                    let y = (block_y + row).min(height - 1);

                    for column in 0..4 {
                        let x = (block_x + column).min(width - 1);
                        samples[row * 4 + column] = tmp[channel.tmp_start_index + y * width + x];
                    }
                }

                if channel.quantize_linearly {
                    convert_from_linear(&mut samples);
                }

                let mut packed = [0_u8; 14];
                let packed_size = pack(samples, &mut packed, optimize_flat_fields, !channel.quantize_linearly);

                out.extend_from_slice(&packed[..packed_size]);
            }
        }
    }

    Ok(out)
}

pub fn decompress(
    channels: &ChannelList,
    compressed: Bytes<'_>,
    rectangle: IntegerBounds,
    expected_byte_size: usize,
) -> Result<ByteVec> {
    if compressed.is_empty() {
        return Ok(Vec::new());
    }

    let expected_value_count = expected_byte_size / 2;
    let mut tmp = vec![ 0_u16; expected_value_count ];
    let mut channel_data = dissect_channels(channels, rectangle);

    let mut remaining = compressed;

    for channel in &channel_data {
        let value_count = channel.resolution.area() * channel.samples_per_pixel;

        if channel.sample_type != SampleType::F16 {
            // u32 and f32 channels are stored uncompressed
            let target = &mut tmp[channel.tmp_start_index .. channel.tmp_start_index + value_count];
            u16::read_slice(&mut remaining, target).map_err(|_| not_enough_data())?;
            continue;
        }

        let width = channel.resolution.x();
        let height = channel.resolution.y();

        for block_y in (0 .. height).step_by(4) {
            for block_x in (0 .. width).step_by(4) {
                let mut samples = [0_u16; 16];

                if remaining.len() < 3 { return Err(not_enough_data()); }

                // a third byte of 0xfc marks a 3-byte flat block.
                // invalid shift exponents are caught by this check as well
                if remaining[2] >= (13 << 2) {
                    unpack3(&remaining[..3], &mut samples);
                    remaining = &remaining[3..];
                }
                else {
                    if remaining.len() < 14 { return Err(not_enough_data()); }
                    unpack14(&remaining[..14], &mut samples);
                    remaining = &remaining[14..];
                }

                if channel.quantize_linearly {
                    convert_to_linear(&mut samples);
                }

                // write the unpacked block, clipping the padded rows and columns
                let column_count = (block_x + 4).min(width) - block_x;
                let row_count = (block_y + 4).min(height) - block_y;

                for row in 0 .. row_count {
                    let y = block_y + row;
                    let target_start = channel.tmp_start_index + y * width + block_x;
                    let target = &mut tmp[target_start .. target_start + column_count];
                    target.copy_from_slice(&samples[row * 4 .. row * 4 + column_count]);
                }
            }
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

    debug_assert_eq!(out.len(), expected_byte_size, "b44 expected byte size bug");
    Ok(out)
}

fn not_enough_data() -> Error {
    Error::corrupt("b44 block data")
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::ChannelDescription;
    use half::f16;

    #[test]
    fn exp_log_tables_invert_each_other() {
        for &value in &[ 0.0_f32, 0.5, 1.0, 2.0, 65000.0, 0.0001 ] {
            let bits = f16::from_f32(value).to_bits();
            let roundtrip = f16::from_bits(exp_table()[log_table()[bits as usize] as usize]);

            let error = (roundtrip.to_f32() - value).abs();
            assert!(error <= value.abs() * 0.02 + 0.01, "value {} became {}", value, roundtrip);
        }
    }

    #[test]
    fn pack_unpack_14_exact_flat() {
        let samples = [ f16::from_f32(0.5).to_bits(); 16 ];
        let mut packed = [0_u8; 14];

        // without the flat field optimization, flat blocks are packed into 14 bytes
        let size = pack(samples, &mut packed, false, true);
        assert_eq!(size, 14);

        let mut unpacked = [0_u16; 16];
        unpack14(&packed, &mut unpacked);
        assert_eq!(unpacked, samples);
    }

    #[test]
    fn pack_unpack_3_flat() {
        let samples = [ f16::from_f32(-13.37).to_bits(); 16 ];
        let mut packed = [0_u8; 14];

        let size = pack(samples, &mut packed, true, true);
        assert_eq!(size, 3);

        let mut unpacked = [0_u16; 16];
        unpack3(&packed[..3], &mut unpacked);
        assert_eq!(unpacked, samples);
    }

    #[test]
    fn pack_does_not_exceed_error_bound() {
        let mut state = 905_u32;
        let mut next = || {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            f16::from_f32((state >> 20) as f32 / 100.0)
        };

        for _ in 0 .. 100 {
            let mut samples = [0_u16; 16];
            for sample in samples.iter_mut() { *sample = next().to_bits(); }

            let mut packed = [0_u8; 14];
            let size = pack(samples, &mut packed, false, true);
            assert_eq!(size, 14);

            let mut unpacked = [0_u16; 16];
            unpack14(&packed, &mut unpacked);

            for (&original, &result) in samples.iter().zip(unpacked.iter()) {
                let original = f16::from_bits(original).to_f32();
                let result = f16::from_bits(result).to_f32();

                // the quantization error scales with the value range of the
                // block, which is wide for these random samples
                let max = samples.iter().map(|&sample| f16::from_bits(sample).to_f32()).fold(0.0_f32, f32::max);
                assert!((original - result).abs() <= max * 0.4 + 0.05, "{} became {}", original, result);
            }
        }
    }

    #[test]
    fn non_half_channels_are_stored_verbatim() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription::new("depth", SampleType::F32, false),
        ]);

        let rectangle = IntegerBounds::new(Vec2(0, 0), Vec2(7, 5));
        let data: Vec<u8> = (0 .. 7 * 5 * 4).map(|index| (index % 199) as u8).collect();

        let compressed = compress(&channels, &data, rectangle, true).unwrap();
        let decompressed = decompress(&channels, &compressed, rectangle, data.len()).unwrap();

        assert_eq!(data, decompressed);
    }

    #[test]
    fn roundtrip_within_tolerance() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription::new("L", SampleType::F16, false),
        ]);

        let rectangle = IntegerBounds::new(Vec2(-2, 10), Vec2(13, 17));

        // a smooth ramp, which is the kind of data this codec is made for
        let values: Vec<f16> = (0 .. 13 * 17)
            .map(|index| f16::from_f32(0.3 + (index % 13) as f32 * 0.01))
            .collect();

        let mut data = Vec::with_capacity(values.len() * 2);
        f16::write_slice(&mut data, &values).unwrap();

        let compressed = compress(&channels, &data, rectangle, false).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = decompress(&channels, &compressed, rectangle, data.len()).unwrap();

        let mut decompressed_values = vec![ f16::ZERO; values.len() ];
        f16::read_slice(&mut decompressed.as_slice(), &mut decompressed_values).unwrap();

        for (&original, &result) in values.iter().zip(decompressed_values.iter()) {
            assert!(
                (original.to_f32() - result.to_f32()).abs() <= 0.05,
                "{} became {}", original, result
            );
        }
    }
}
