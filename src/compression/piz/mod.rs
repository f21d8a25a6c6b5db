
//! The PIZ compression method is a wavelet compression,
//! based on the PIZ image format, customized for OpenEXR.
// inspired by https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfPizCompressor.cpp

pub(crate) mod huffman;
mod wavelet;

use crate::error::{Error, Result, usize_to_u16, usize_to_i32, i32_to_usize};
use crate::io::Data;
use crate::math::{Vec2, subsampled_count};
use crate::meta::attribute::{ChannelList, IntegerBounds, SampleType};
use crate::compression::{ByteVec, Bytes};


const U16_RANGE: usize = 1 << 16;
const BITMAP_SIZE: usize = U16_RANGE >> 3;

#[derive(Debug)]
struct ChannelData {
    tmp_start_index: usize,
    tmp_end_index: usize,

    resolution: Vec2<usize>,
    y_sampling: usize,

    /// u16 values per pixel. two for 32-bit channels, as they are
    /// compressed as a pair of interleaved 16-bit values.
    samples_per_pixel: usize,
}


pub fn decompress(
    channels: &ChannelList,
    compressed: ByteVec,
    rectangle: IntegerBounds,
    expected_byte_size: usize,
    pedantic: bool
) -> Result<ByteVec>
{
    let expected_value_count = expected_byte_size / 2;
    debug_assert_ne!(expected_value_count, 0, "empty piz block bug");
    debug_assert!(!channels.list.is_empty(), "no channels bug");

    if compressed.is_empty() {
        return Ok(Vec::new());
    }

    let channel_data = dissect_channels(channels, rectangle);
    debug_assert_eq!(
        channel_data.last().map(|channel|
            channel.tmp_start_index + channel.resolution.area() * channel.samples_per_pixel
        ),
        Some(expected_value_count), "piz channel byte size bug"
    );

    let mut bitmap = vec![ 0_u8; BITMAP_SIZE ];

    let mut remaining_input = compressed.as_slice();
    let min_non_zero = u16::read(&mut remaining_input)? as usize;
    let max_non_zero = u16::read(&mut remaining_input)? as usize;

    if max_non_zero >= BITMAP_SIZE || min_non_zero >= BITMAP_SIZE {
        return Err(Error::corrupt("compressed data bitmap range"));
    }

    if min_non_zero <= max_non_zero {
        u8::read_slice(&mut remaining_input, &mut bitmap[min_non_zero ..= max_non_zero])?;
    }

    let (lookup_table, max_value) = reverse_lookup_table_from_bitmap(&bitmap);

    {
        let length = i32::read(&mut remaining_input)?;
        if pedantic && i32_to_usize(length, "huffman data length")? != remaining_input.len() {
            return Err(Error::corrupt("compressed data length"));
        }
    }

    let mut tmp_u16_buffer = huffman::decompress(remaining_input, expected_value_count)?;

    for channel in &channel_data {
        let u16_count = channel.resolution.area() * channel.samples_per_pixel;
        let u16s = &mut tmp_u16_buffer[channel.tmp_start_index .. channel.tmp_start_index + u16_count];

        // a 32-bit channel is compressed as two interleaved 16-bit planes
        for offset in 0 .. channel.samples_per_pixel {
            wavelet::decode(
                &mut u16s[offset..],
                channel.resolution,
                Vec2(channel.samples_per_pixel, channel.resolution.x() * channel.samples_per_pixel),
                max_value
            )?;
        }
    }

    // expand the pixel data to their original range
    apply_lookup_table(&mut tmp_u16_buffer, &lookup_table);

    let mut out = Vec::with_capacity(expected_byte_size);
    let mut channel_data = channel_data;

    for y in rectangle.position.y() .. rectangle.end().y() {
        for channel in &mut channel_data {
            if crate::math::mod_p(y, usize_to_i32(channel.y_sampling)) != 0 {
                continue;
            }

            let u16s_per_line = channel.resolution.x() * channel.samples_per_pixel;
            let next_tmp_end_index = channel.tmp_end_index + u16s_per_line;
            let values = &tmp_u16_buffer[channel.tmp_end_index .. next_tmp_end_index];
            channel.tmp_end_index = next_tmp_end_index;

            u16::write_slice(&mut out, values).expect("write to in-memory failed");
        }
    }

    for index in 1..channel_data.len() {
        debug_assert_eq!(channel_data[index - 1].tmp_end_index, channel_data[index].tmp_start_index, "piz channel order bug");
    }

    debug_assert_eq!(out.len(), expected_byte_size, "piz expected byte size bug");
    Ok(out)
}


pub fn compress(
    channels: &ChannelList,
    uncompressed: Bytes<'_>,
    rectangle: IntegerBounds
) -> Result<ByteVec>
{
    if uncompressed.is_empty() {
        return Ok(Vec::new());
    }

    let mut tmp = vec![ 0_u16; uncompressed.len() / 2 ];
    let mut channel_data = dissect_channels(channels, rectangle);

    let mut remaining_uncompressed_bytes = uncompressed;
    for y in rectangle.position.y() .. rectangle.end().y() {
        for channel in &mut channel_data {
            if crate::math::mod_p(y, usize_to_i32(channel.y_sampling)) != 0 { continue; }

            let u16s_per_line = channel.resolution.x() * channel.samples_per_pixel;
            let next_tmp_end_index = channel.tmp_end_index + u16s_per_line;
            let target = &mut tmp[channel.tmp_end_index .. next_tmp_end_index];
            channel.tmp_end_index = next_tmp_end_index;

            u16::read_slice(&mut remaining_uncompressed_bytes, target).expect("in-memory read failed");
        }
    }

    debug_assert_eq!(channel_data.last().unwrap().tmp_end_index, tmp.len(), "piz channel byte size bug");

    let (min_non_zero, max_non_zero, bitmap) = bitmap_from_data(&tmp);
    let (max_value, table) = forward_lookup_table_from_bitmap(&bitmap);
    apply_lookup_table(&mut tmp, &table);

    let mut piz_compressed = Vec::with_capacity(uncompressed.len() / 2);
    usize_to_u16(min_non_zero)?.write(&mut piz_compressed)?;
    usize_to_u16(max_non_zero)?.write(&mut piz_compressed)?;

    if min_non_zero <= max_non_zero {
        piz_compressed.extend_from_slice(&bitmap[min_non_zero ..= max_non_zero]);
    }

    for channel in channel_data {
        for offset in 0 .. channel.samples_per_pixel {
            wavelet::encode(
                &mut tmp[channel.tmp_start_index + offset .. channel.tmp_end_index],
                channel.resolution,
                Vec2(channel.samples_per_pixel, channel.resolution.x() * channel.samples_per_pixel),
                max_value
            )?;
        }
    }

    let huffman_compressed = huffman::compress(&tmp)?;
    u8::write_i32_sized_slice(&mut piz_compressed, &huffman_compressed).expect("in-memory write failed");

    Ok(piz_compressed)
}

fn dissect_channels(channels: &ChannelList, rectangle: IntegerBounds) -> Vec<ChannelData> {
    let mut channel_data = Vec::with_capacity(channels.list.len());
    let mut tmp_read_index = 0;

    for channel in channels.list.iter() {
        let x_resolution = subsampled_count(channel.sampling.x(), rectangle.position.x(), rectangle.max().x());
        let y_resolution = subsampled_count(channel.sampling.y(), rectangle.position.y(), rectangle.max().y());

        let channel = ChannelData {
            tmp_start_index: tmp_read_index,
            tmp_end_index: tmp_read_index,
            y_sampling: channel.sampling.y(),
            resolution: Vec2(x_resolution, y_resolution),
            samples_per_pixel: channel.sample_type.bytes_per_sample() / SampleType::F16.bytes_per_sample()
        };

        tmp_read_index += channel.resolution.area() * channel.samples_per_pixel;
        channel_data.push(channel);
    }

    channel_data
}


fn bitmap_from_data(data: &[u16]) -> (usize, usize, Vec<u8>) {
    let mut bitmap = vec![ 0_u8; BITMAP_SIZE ];

    for value in data {
        bitmap[*value as usize >> 3] |= 1 << (*value as u8 & 7);
    }

    bitmap[0] &= !1; // zero is not explicitly stored in the bitmap; we assume that the data always contain zeroes

    let min_index = bitmap.iter().position(|&value| value != 0);
    let max_index = min_index.map(|min| // only if min was found
        min + bitmap[min..].iter().rposition(|&value| value != 0).expect("[min] not found")
    );

    (min_index.unwrap_or(0), max_index.unwrap_or(0), bitmap)
}

fn forward_lookup_table_from_bitmap(bitmap: &[u8]) -> (u16, Vec<u16>) {
    debug_assert_eq!(bitmap.len(), BITMAP_SIZE, "bitmap size bug");

    let mut table = vec![ 0_u16; U16_RANGE ];
    let mut count = 0_usize;

    for (index, entry) in table.iter_mut().enumerate() {
        if index == 0 || bitmap[index >> 3] as usize & (1 << (index & 7)) != 0 {
            *entry = count as u16;
            count += 1;
        }
    }

    ((count - 1) as u16, table)
}

fn reverse_lookup_table_from_bitmap(bitmap: Bytes<'_>) -> (Vec<u16>, u16) {
    let mut table = Vec::with_capacity(U16_RANGE);

    for index in 0 .. U16_RANGE {
        if index == 0 || ((bitmap[index >> 3] as usize & (1 << (index & 7))) != 0) {
            table.push(index as u16);
        }
    }

    debug_assert!(!table.is_empty(), "empty reverse lookup table bug");
    let max_value = (table.len() - 1) as u16;

    // fill remaining up to u16 range
    debug_assert!(table.len() <= U16_RANGE, "reverse lookup table size bug");
    table.resize(U16_RANGE, 0);

    (table, max_value)
}

fn apply_lookup_table(data: &mut [u16], table: &[u16]) {
    for data in data {
        *data = table[*data as usize];
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::ChannelDescription;

    fn test_roundtrip_noise_with(channels: ChannelList, rectangle: IntegerBounds) {
        let byte_count = crate::compression::uncompressed_block_byte_size(&channels, rectangle);

        let mut state = 0x1234_5678_u32;
        let pixel_bytes: ByteVec = (0 .. byte_count)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();

        let compressed = compress(&channels, &pixel_bytes, rectangle).unwrap();
        let decompressed = decompress(&channels, compressed, rectangle, pixel_bytes.len(), true).unwrap();

        assert_eq!(pixel_bytes, decompressed);
    }

    #[test]
    fn roundtrip_any_sample_type() {
        for &sample_type in &[ SampleType::F16, SampleType::F32, SampleType::U32 ] {
            let channel = ChannelDescription {
                sample_type,

                name: Default::default(),
                quantize_linearly: false,
                sampling: Vec2(1, 1)
            };

            let channels = ChannelList::new(smallvec![ channel.clone(), channel ]);

            let rectangle = IntegerBounds {
                position: Vec2(-30, 100),
                size: Vec2(80, 96),
            };

            test_roundtrip_noise_with(channels, rectangle);
        }
    }

    #[test]
    fn roundtrip_mixed_channels() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription {
                sample_type: SampleType::F16,
                name: Default::default(),
                quantize_linearly: false,
                sampling: Vec2(1, 1)
            },

            ChannelDescription {
                sample_type: SampleType::F32,
                name: Default::default(),
                quantize_linearly: false,
                sampling: Vec2(1, 1)
            },
        ]);

        let rectangle = IntegerBounds {
            position: Vec2(-3, 1),
            size: Vec2(223, 31),
        };

        test_roundtrip_noise_with(channels, rectangle);
    }

    #[test]
    fn roundtrip_single_pixel() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription {
                sample_type: SampleType::F16,
                name: Default::default(),
                quantize_linearly: false,
                sampling: Vec2(1, 1)
            },
        ]);

        test_roundtrip_noise_with(channels, IntegerBounds::new(Vec2(0, 0), Vec2(1, 1)));
    }
}
