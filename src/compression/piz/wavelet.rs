
//! Wavelet encoding and decoding.
// see https://github.com/AcademySoftwareFoundation/openexr/blob/master/OpenEXR/IlmImf/ImfWav.cpp

use crate::error::UnitResult;
use crate::math::Vec2;

/// Apply the 2D wavelet transform in place.
/// The buffer contains `count` samples with the specified offsets between columns and rows.
pub fn encode(
    buffer: &mut [u16],
    Vec2(count_x, count_y): Vec2<usize>,
    Vec2(offset_x, offset_y): Vec2<usize>,
    max_value: u16
) -> UnitResult
{
    // the modulo-free basis compresses better but only works for 14-bit data
    let is_14_bit = max_value < (1 << 14);
    let count = count_x.min(count_y);

    let mut p: usize = 1; // == 1 << level
    let mut p2: usize = 2; // == 1 << (level + 1)

    // hierarchical loop on smaller dimension
    while p2 <= count {
        let mut position_y = 0;
        let end_y = offset_y * (count_y - p2);
        let (offset1_x, offset1_y) = (offset_x * p, offset_y * p);
        let (offset2_x, offset2_y) = (offset_x * p2, offset_y * p2);

        while position_y <= end_y {
            let mut position_x = position_y;
            let end_x = position_x + offset_x * (count_x - p2);

            while position_x <= end_x {
                let p01 = position_x + offset1_x;
                let p10 = position_x + offset1_y;
                let p11 = p10 + offset1_x;

                // 2D wavelet encoding over four values
                let (i00, i01, i10, i11) = {
                    if is_14_bit {
                        let (i00, i01) = encode_14bit(buffer[position_x], buffer[p01]);
                        let (i10, i11) = encode_14bit(buffer[p10], buffer[p11]);

                        let (new_00, new_10) = encode_14bit(i00, i10);
                        let (new_01, new_11) = encode_14bit(i01, i11);
                        (new_00, new_01, new_10, new_11)
                    }
                    else {
                        let (i00, i01) = encode_16bit(buffer[position_x], buffer[p01]);
                        let (i10, i11) = encode_16bit(buffer[p10], buffer[p11]);

                        let (new_00, new_10) = encode_16bit(i00, i10);
                        let (new_01, new_11) = encode_16bit(i01, i11);
                        (new_00, new_01, new_10, new_11)
                    }
                };

                buffer[position_x] = i00;
                buffer[p01] = i01;
                buffer[p10] = i10;
                buffer[p11] = i11;

                position_x += offset2_x;
            }

            // encode the remaining odd pixel column
            if count_x & p != 0 {
                let p10 = position_x + offset1_y;

                let (i00, p10_value) = {
                    if is_14_bit { encode_14bit(buffer[position_x], buffer[p10]) }
                    else { encode_16bit(buffer[position_x], buffer[p10]) }
                };

                buffer[position_x] = i00;
                buffer[p10] = p10_value;
            }

            position_y += offset2_y;
        }

        // encode the remaining odd pixel row
        if count_y & p != 0 {
            let mut position_x = position_y;
            let end_x = position_y + offset_x * (count_x - p2);

            while position_x <= end_x {
                let p01 = position_x + offset1_x;

                let (i00, p01_value) = {
                    if is_14_bit { encode_14bit(buffer[position_x], buffer[p01]) }
                    else { encode_16bit(buffer[position_x], buffer[p01]) }
                };

                buffer[position_x] = i00;
                buffer[p01] = p01_value;

                position_x += offset2_x;
            }
        }

        p = p2;
        p2 <<= 1;
    }

    Ok(())
}

/// Reverse the 2D wavelet transform in place.
pub fn decode(
    buffer: &mut [u16],
    Vec2(count_x, count_y): Vec2<usize>,
    Vec2(offset_x, offset_y): Vec2<usize>,
    max_value: u16
) -> UnitResult
{
    let is_14_bit = max_value < (1 << 14);
    let count = count_x.min(count_y);

    // search max level
    let mut p: usize = 1;
    let mut p2: usize;

    while p <= count { p <<= 1; }

    p >>= 1;
    p2 = p;
    p >>= 1;

    // hierarchical loop on smaller dimension
    while p >= 1 {
        let mut position_y = 0;
        let end_y = offset_y * (count_y - p2);

        let (offset1_x, offset1_y) = (offset_x * p, offset_y * p);
        let (offset2_x, offset2_y) = (offset_x * p2, offset_y * p2);

        while position_y <= end_y {
            let mut position_x = position_y;
            let end_x = position_x + offset_x * (count_x - p2);

            while position_x <= end_x {
                let p01 = position_x + offset1_x;
                let p10 = position_x + offset1_y;
                let p11 = p10 + offset1_x;

                // 2D wavelet decoding over four values
                let (i00, i01, i10, i11) = {
                    if is_14_bit {
                        let (i00, i10) = decode_14bit(buffer[position_x], buffer[p10]);
                        let (i01, i11) = decode_14bit(buffer[p01], buffer[p11]);

                        let (new_00, new_01) = decode_14bit(i00, i01);
                        let (new_10, new_11) = decode_14bit(i10, i11);
                        (new_00, new_01, new_10, new_11)
                    }
                    else {
                        let (i00, i10) = decode_16bit(buffer[position_x], buffer[p10]);
                        let (i01, i11) = decode_16bit(buffer[p01], buffer[p11]);

                        let (new_00, new_01) = decode_16bit(i00, i01);
                        let (new_10, new_11) = decode_16bit(i10, i11);
                        (new_00, new_01, new_10, new_11)
                    }
                };

                buffer[position_x] = i00;
                buffer[p01] = i01;
                buffer[p10] = i10;
                buffer[p11] = i11;

                position_x += offset2_x;
            }

            // decode the remaining odd pixel column
            if count_x & p != 0 {
                let p10 = position_x + offset1_y;

                let (i00, p10_value) = {
                    if is_14_bit { decode_14bit(buffer[position_x], buffer[p10]) }
                    else { decode_16bit(buffer[position_x], buffer[p10]) }
                };

                buffer[position_x] = i00;
                buffer[p10] = p10_value;
            }

            position_y += offset2_y;
        }

        // decode the remaining odd pixel row
        if count_y & p != 0 {
            let mut position_x = position_y;
            let end_x = position_x + offset_x * (count_x - p2);

            while position_x <= end_x {
                let p01 = position_x + offset1_x;

                let (i00, p01_value) = {
                    if is_14_bit { decode_14bit(buffer[position_x], buffer[p01]) }
                    else { decode_16bit(buffer[position_x], buffer[p01]) }
                };

                buffer[position_x] = i00;
                buffer[p01] = p01_value;

                position_x += offset2_x;
            }
        }

        p2 = p;
        p >>= 1;
    }

    Ok(())
}


// Wavelet basis functions without modulo arithmetic. They produce
// the best compression ratios when the wavelet-transformed data are
// Huffman-encoded, but the wavelet transform works only for 14-bit
// data (untransformed data values must be less than (1 << 14)).

#[inline]
fn encode_14bit(a: u16, b: u16) -> (u16, u16) {
    let (a, b) = (a as i16, b as i16);

    let m = (a.wrapping_add(b)) >> 1;
    let d = a.wrapping_sub(b);

    (m as u16, d as u16)
}

#[inline]
fn decode_14bit(l: u16, h: u16) -> (u16, u16) {
    let (l, h) = (l as i16, h as i16);

    let hi = h as i32;
    let ai = l as i32 + (hi & 1) + (hi >> 1);

    let a = ai as i16;
    let b = (ai - hi) as i16;

    (a as u16, b as u16)
}


// Wavelet basis functions with modulo arithmetic. They work with full
// 16-bit data, but Huffman-encoding the wavelet-transformed data does not
// compress the data quite as well.

const BIT_COUNT: i32 = 16;
const OFFSET: i32 = 1 << (BIT_COUNT - 1);
const MOD_MASK: i32 = (1 << BIT_COUNT) - 1;

#[inline]
fn encode_16bit(a: u16, b: u16) -> (u16, u16) {
    let (a, b) = (a as i32, b as i32);

    let a_offset = (a + OFFSET) & MOD_MASK;
    let mut m = (a_offset + b) >> 1;
    let d = a_offset - b;

    if d < 0 { m = (m + OFFSET) & MOD_MASK; }
    let d = d & MOD_MASK;

    (m as u16, d as u16)
}

#[inline]
fn decode_16bit(l: u16, h: u16) -> (u16, u16) {
    let (m, d) = (l as i32, h as i32);

    let b = (m - (d >> 1)) & MOD_MASK;
    let a = (d + b - OFFSET) & MOD_MASK;

    (a as u16, b as u16)
}


#[cfg(test)]
mod test {
    use crate::math::Vec2;

    #[test]
    fn roundtrip_14_bit_values() {
        let data = [
            (13, 54), (3, 123), (423, 53), (1, 23), (23, 515), (513, 43),
            (16374, 16381), (16284, 3), (2, 1), (0, 0), (0, 4), (3, 0)
        ];

        for &values in &data {
            let (l, h) = super::encode_14bit(values.0, values.1);
            let result = super::decode_14bit(l, h);
            assert_eq!(values, result);
        }
    }

    #[test]
    fn roundtrip_16_bit_values() {
        let data = [
            (13, 54), (3, 123), (423, 53), (1, 23), (23, 515), (513, 43),
            (16385, 56384), (18384, 36384), (2, 1), (0, 0), (0, 4), (3, 0)
        ];

        for &values in &data {
            let (l, h) = super::encode_16bit(values.0, values.1);
            let result = super::decode_16bit(l, h);
            assert_eq!(values, result);
        }
    }

    #[test]
    fn roundtrip_14bit_image() {
        let data: [u16; 6 * 4] = [
            13, 54, 3, 123, 423, 53,
            1, 23, 23, 515, 513, 43,
            16374, 16381, 16284, 3, 2, 1,
            0, 0, 0, 4, 3, 0,
        ];

        let max = *data.iter().max().unwrap();

        let mut transformed = data;

        super::encode(&mut transformed, Vec2(6, 4), Vec2(1, 6), max).unwrap();
        super::decode(&mut transformed, Vec2(6, 4), Vec2(1, 6), max).unwrap();

        assert_eq!(data, transformed);
    }

    #[test]
    fn roundtrip_16bit_image() {
        let data: [u16; 6 * 4] = [
            13, 54, 3, 123, 423, 53,
            1, 23, 23, 515, 513, 43,
            16385, 56384, 18384, 36384, 2, 1,
            0, 0, 0, 4, 3, 0,
        ];

        let max = *data.iter().max().unwrap();

        let mut transformed = data;

        super::encode(&mut transformed, Vec2(6, 4), Vec2(1, 6), max).unwrap();
        super::decode(&mut transformed, Vec2(6, 4), Vec2(1, 6), max).unwrap();

        assert_eq!(data, transformed);
    }

    #[test]
    fn roundtrip_tall_and_wide_images() {
        for &(width, height) in &[ (1_usize, 17_usize), (17, 1), (5, 7), (8, 8), (7, 5) ] {
            let data: Vec<u16> = (0 .. width * height).map(|i| (i * 379 % 16000) as u16).collect();
            let max = *data.iter().max().unwrap();

            let mut transformed = data.clone();
            super::encode(&mut transformed, Vec2(width, height), Vec2(1, width), max).unwrap();
            super::decode(&mut transformed, Vec2(width, height), Vec2(1, width), max).unwrap();

            assert_eq!(data, transformed);
        }
    }
}
