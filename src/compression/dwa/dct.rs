
//! The 8x8 discrete cosine transform and the coefficient quantization.
//! All constants are spelled out so that every platform
//! computes bit-identical results.

use half::f16;
use std::sync::OnceLock;


/// cos(m * pi / 16) for m in `0 ..= 8`, to f32 precision.
const COSINES: [f32; 9] = [
    1.0,
    0.980_785_3,
    0.923_879_5,
    0.831_469_6,
    0.707_106_78,
    0.555_570_2,
    0.382_683_43,
    0.195_090_32,
    0.0,
];

/// cos(m * pi / 16) for any m, derived by symmetry from the constant table.
fn cosine_16th(m: usize) -> f32 {
    let m = m % 32;
    let m = if m > 16 { 32 - m } else { m };

    if m > 8 { -COSINES[16 - m] }
    else { COSINES[m] }
}

/// The orthonormal 8-point DCT basis: `basis[k][n] = c(k) * cos(pi * (2n+1) * k / 16)`.
fn basis() -> &'static [[f32; 8]; 8] {
    static BASIS: OnceLock<[[f32; 8]; 8]> = OnceLock::new();

    BASIS.get_or_init(|| {
        // normalization factors to f32 precision: sqrt(1/8) and sqrt(2/8)
        const NORM_DC: f32 = 0.353_553_39;
        const NORM_AC: f32 = 0.5;

        let mut basis = [[0.0_f32; 8]; 8];

        for (frequency, row) in basis.iter_mut().enumerate() {
            let normalization = if frequency == 0 { NORM_DC } else { NORM_AC };

            for (sample, value) in row.iter_mut().enumerate() {
                *value = normalization * cosine_16th((2 * sample + 1) * frequency);
            }
        }

        basis
    })
}

/// Transform the 64 spatial values into 64 frequency coefficients, in place.
pub fn forward_8x8(block: &mut [f32; 64]) {
    let basis = basis();
    let mut intermediate = [0.0_f32; 64];

    // transform the rows
    for row in 0..8 {
        for frequency in 0..8 {
            let mut sum = 0.0;
            for sample in 0..8 {
                sum += basis[frequency][sample] * block[row * 8 + sample];
            }
            intermediate[row * 8 + frequency] = sum;
        }
    }

    // transform the columns
    for column in 0..8 {
        for frequency in 0..8 {
            let mut sum = 0.0;
            for sample in 0..8 {
                sum += basis[frequency][sample] * intermediate[sample * 8 + column];
            }
            block[frequency * 8 + column] = sum;
        }
    }
}

/// Transform the 64 frequency coefficients back into spatial values, in place.
pub fn inverse_8x8(block: &mut [f32; 64]) {
    let basis = basis();
    let mut intermediate = [0.0_f32; 64];

    // transform the columns
    for column in 0..8 {
        for sample in 0..8 {
            let mut sum = 0.0;
            for frequency in 0..8 {
                sum += basis[frequency][sample] * block[frequency * 8 + column];
            }
            intermediate[sample * 8 + column] = sum;
        }
    }

    // transform the rows
    for row in 0..8 {
        for sample in 0..8 {
            let mut sum = 0.0;
            for frequency in 0..8 {
                sum += basis[frequency][sample] * intermediate[row * 8 + frequency];
            }
            block[row * 8 + sample] = sum;
        }
    }
}


/// The order in which the 64 coefficients of a block are stored,
/// walking the frequency plane diagonally from low to high.
pub const ZIGZAG: [usize; 64] = [
    0,  1,  8,  16, 9,  2,  3,  10,
    17, 24, 32, 25, 18, 11, 4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13, 6,  7,  14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// The acceptable quantization error of the coefficient at
/// the given zigzag position. Higher frequencies tolerate more error.
#[inline]
pub fn error_bound(base_error: f32, zigzag_position: usize) -> f32 {
    base_error * (1.0 + zigzag_position as f32 * 0.25)
}

/// Quantize a coefficient into the f16 bit pattern with the most
/// trailing mantissa zeroes that still satisfies the error bound.
/// Trailing zeroes compress extremely well in the entropy coder.
pub fn quantize(coefficient: f32, error_bound: f32) -> u16 {
    let exact = f16::from_f32(coefficient);

    if coefficient == 0.0 || exact.to_f32() == 0.0 {
        return 0;
    }

    // a zeroed coefficient is preferred over all others
    if coefficient.abs() < error_bound {
        return 0;
    }

    for zeroed_bits in (1 ..= 10_u16).rev() {
        let candidate = exact.to_bits() & (u16::MAX << zeroed_bits);
        let candidate_value = f16::from_bits(candidate).to_f32();

        if (candidate_value - coefficient).abs() < error_bound {
            return candidate;
        }
    }

    exact.to_bits()
}

/// The coefficient value that a quantized bit pattern decodes to.
#[inline]
pub fn dequantize(quantized: u16) -> f32 {
    f16::from_bits(quantized).to_f32()
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transform_roundtrip() {
        let mut block = [0.0_f32; 64];
        for (index, value) in block.iter_mut().enumerate() {
            *value = ((index * 7919) % 100) as f32 / 10.0;
        }

        let original = block;

        forward_8x8(&mut block);
        inverse_8x8(&mut block);

        for (&original, &restored) in original.iter().zip(block.iter()) {
            assert!((original - restored).abs() < 1e-3, "{} became {}", original, restored);
        }
    }

    #[test]
    fn flat_block_transforms_to_single_coefficient() {
        let mut block = [3.0_f32; 64];
        forward_8x8(&mut block);

        assert!((block[0] - 24.0).abs() < 1e-3, "dc coefficient is {}", block[0]);
        assert!(block[1..].iter().all(|&ac| ac.abs() < 1e-4));
    }

    #[test]
    fn zigzag_is_a_permutation() {
        let mut seen = [false; 64];
        for &index in &ZIGZAG { seen[index] = true; }
        assert!(seen.iter().all(|&covered| covered));
    }

    #[test]
    fn quantization_respects_error_bound() {
        for &value in &[ 0.0_f32, 0.001, 0.5, 1.0, 17.29, -4.2, 100.0 ] {
            for &bound in &[ 0.0005_f32, 0.01, 0.1 ] {
                let restored = dequantize(quantize(value, bound));

                // half precision itself limits how exact large values can be
                let representable = f16::from_f32(value).to_f32();
                assert!(
                    (restored - value).abs() <= bound.max((representable - value).abs() + 1e-6),
                    "{} became {} (bound {})", value, restored, bound
                );
            }
        }
    }
}
