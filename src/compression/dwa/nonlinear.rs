
//! Perceptual transfer curve for quantization.
//! Quantization errors are distributed evenly in terms of human
//! perception rather than in terms of linear light values.

use half::f16;
use std::convert::TryInto;
use std::sync::OnceLock;


/// Convert a linear light value into the perceptually uniform space.
/// Gamma below 1.0, logarithmic above, continuous at 1.0.
#[inline]
pub fn to_nonlinear(linear: f32) -> f32 {
    if linear <= 1.0 {
        linear.powf(1.0 / 2.2)
    }
    else {
        linear.ln() / 2.2_f32.ln() + 1.0
    }
}

/// Convert a perceptually uniform value back into linear light.
#[inline]
pub fn from_nonlinear(nonlinear: f32) -> f32 {
    if nonlinear <= 1.0 {
        nonlinear.powf(2.2)
    }
    else {
        (2.2_f32.ln() * (nonlinear - 1.0)).exp()
    }
}

/// Perceptual value for every possible f16 bit pattern.
/// Built once, as a pure function of the bit pattern.
/// Non-finite and negative values quantize like black.
pub fn nonlinear_table() -> &'static [f32; 1 << 16] {
    static TABLE: OnceLock<Box<[f32; 1 << 16]>> = OnceLock::new();

    TABLE.get_or_init(|| {
        let mut table = vec![ 0.0_f32; 1 << 16 ].into_boxed_slice();

        for (bits, entry) in table.iter_mut().enumerate() {
            let value = f16::from_bits(bits as u16).to_f32();

            *entry = if !value.is_finite() || value < 0.0 { 0.0 }
            else { to_nonlinear(value) };
        }

        table.try_into().expect("table size bug")
    })
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        for &value in &[ 0.0_f32, 0.1, 0.5, 0.9, 1.0, 1.1, 2.0, 5.0, 10.0, 100.0 ] {
            let recovered = from_nonlinear(to_nonlinear(value));
            let relative_error = ((recovered - value) / value.max(1e-6)).abs();
            assert!(relative_error < 1e-5, "{} became {}", value, recovered);
        }
    }

    #[test]
    fn monotonic() {
        let mut previous = to_nonlinear(0.0);

        for index in 1 .. 1000 {
            let current = to_nonlinear(index as f32 / 10.0);
            assert!(current >= previous, "not monotonic at {}", index);
            previous = current;
        }
    }

    #[test]
    fn table_handles_special_values() {
        let table = nonlinear_table();

        assert_eq!(table[half::f16::NAN.to_bits() as usize], 0.0);
        assert_eq!(table[half::f16::NEG_INFINITY.to_bits() as usize], 0.0);
        assert_eq!(table[half::f16::from_f32(-2.0).to_bits() as usize], 0.0);
        assert_eq!(table[0], 0.0);
    }
}
