
//! Simple math utilities: a 2D vector, rounding modes,
//! and the mip level arithmetic shared by meta data and codecs.

use std::convert::TryFrom;
use std::ops::{Add, Sub, Mul, Div};
use crate::error::{Error, Result};

/// Simple two-dimensional vector of any numerical type.
/// Supports only few mathematical operations, as this is used mainly as data struct.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Vec2<T> (pub T, pub T);

impl<T> Vec2<T> {

    /// Returns the vector with the maximum of both components of the two inputs.
    pub fn max(self, other: Self) -> Self where T: Ord {
        Vec2(self.0.max(other.0), self.1.max(other.1))
    }

    /// Returns the vector with the minimum of both components of the two inputs.
    pub fn min(self, other: Self) -> Self where T: Ord {
        Vec2(self.0.min(other.0), self.1.min(other.1))
    }

    /// Try to convert all components of this vector to a new type,
    /// yielding either a vector of that new type, or an error.
    pub fn try_from<S>(value: Vec2<S>) -> std::result::Result<Self, T::Error> where T: TryFrom<S> {
        let x = T::try_from(value.0)?;
        let y = T::try_from(value.1)?;
        Ok(Vec2(x, y))
    }

    /// Seeing this vector as a dimension or size (width and height),
    /// this returns the area that this dimensions contains (`width * height`).
    #[inline]
    pub fn area(self) -> T where T: Mul<T, Output = T> {
        self.0 * self.1
    }

    /// The first component of this 2D vector.
    #[inline]
    pub fn x(self) -> T { self.0 }

    /// The second component of this 2D vector.
    #[inline]
    pub fn y(self) -> T { self.1 }

    /// The first component of this 2D vector.
    #[inline]
    pub fn width(self) -> T { self.0 }

    /// The second component of this 2D vector.
    #[inline]
    pub fn height(self) -> T { self.1 }
}

impl Vec2<i32> {

    /// Try to convert to [`Vec2<usize>`], returning an error on negative numbers.
    pub fn to_usize(self, error_message: &'static str) -> Result<Vec2<usize>> {
        Vec2::try_from(self).map_err(|_| Error::corrupt(error_message))
    }
}

impl Vec2<usize> {

    /// Panics for too large values
    pub fn to_i32(self) -> Vec2<i32> {
        Vec2::try_from(self).expect("(debug) vector exceeds i32 range")
    }
}

impl<T: Add<T>> Add<Vec2<T>> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn add(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 + other.0, self.1 + other.1)
    }
}

impl<T: Sub<T>> Sub<Vec2<T>> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn sub(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 - other.0, self.1 - other.1)
    }
}

impl<T: Mul<T>> Mul<Vec2<T>> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn mul(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 * other.0, self.1 * other.1)
    }
}

impl<T: Div<T>> Div<Vec2<T>> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn div(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 / other.0, self.1 / other.1)
    }
}

impl<T> From<(T, T)> for Vec2<T> {
    fn from((x, y): (T, T)) -> Self { Vec2(x, y) }
}

impl<T> From<Vec2<T>> for (T, T) {
    fn from(vec2: Vec2<T>) -> Self { (vec2.0, vec2.1) }
}


/// Whether to round up or down when dividing by two while computing smaller mip levels.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RoundingMode {

    /// Divide by two and discard the remainder.
    Down,

    /// Divide by two and round up if there was a remainder.
    Up,
}

impl RoundingMode {

    /// Compute the logarithm to the base of two, rounding according to this mode.
    pub fn log2(self, number: u32) -> u32 {
        debug_assert_ne!(number, 0, "log2 of zero");

        let floor_log_2 = 31 - number.leading_zeros();

        match self {
            RoundingMode::Down => floor_log_2,
            RoundingMode::Up if number.is_power_of_two() => floor_log_2,
            RoundingMode::Up => floor_log_2 + 1,
        }
    }

    /// Divide the number, rounding the result according to this mode.
    /// Only correct for non-negative numbers.
    pub fn divide(self, dividend: usize, divisor: usize) -> usize {
        match self {
            RoundingMode::Up => (dividend + divisor - 1) / divisor,
            RoundingMode::Down => dividend / divisor,
        }
    }
}

// The rust modulo operator is negative for negative dividends,
// while the exr file format expects positional arithmetic to
// wrap towards negative infinity, as in the following two functions.

/// Integer division rounding towards negative infinity.
pub(crate) fn div_p(x: i32, y: i32) -> i32 {
    if x >= 0 {
        if y >= 0 { x / y }
        else { -(x / -y) }
    }
    else if y >= 0 { -((y - 1 - x) / y) }
    else { (-y - 1 - x) / -y }
}

/// Remainder of `div_p`. Always non-negative for positive divisors.
pub(crate) fn mod_p(x: i32, y: i32) -> i32 {
    x - y * div_p(x, y)
}

/// The number of samples of a channel inside the inclusive pixel range `min_x ..= max_x`,
/// respecting the channel x sampling rate.
pub(crate) fn subsampled_count(sampling: usize, min_x: i32, max_x: i32) -> usize {
    let sampling = usize_as_i32_sampling(sampling);
    let count = div_p(max_x, sampling) - div_p(min_x - 1, sampling);
    debug_assert!(count >= 0, "negative sample count");
    count as usize
}

fn usize_as_i32_sampling(sampling: usize) -> i32 {
    debug_assert!(sampling >= 1, "invalid sampling rate");
    crate::error::usize_to_i32(sampling)
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn log2_rounding() {
        assert_eq!(RoundingMode::Down.log2(1), 0);
        assert_eq!(RoundingMode::Up.log2(1), 0);
        assert_eq!(RoundingMode::Down.log2(4), 2);
        assert_eq!(RoundingMode::Up.log2(4), 2);
        assert_eq!(RoundingMode::Down.log2(5), 2);
        assert_eq!(RoundingMode::Up.log2(5), 3);
        assert_eq!(RoundingMode::Down.log2(1023), 9);
        assert_eq!(RoundingMode::Up.log2(1023), 10);
    }

    #[test]
    fn division_rounding() {
        assert_eq!(RoundingMode::Up.divide(10, 10), 1);
        assert_eq!(RoundingMode::Up.divide(10, 3), 4);
        assert_eq!(RoundingMode::Up.divide(100, 49), 3);
        assert_eq!(RoundingMode::Down.divide(10, 3), 3);
        assert_eq!(RoundingMode::Down.divide(100, 49), 2);
    }

    #[test]
    fn wrapping_division() {
        assert_eq!(div_p(7, 2), 3);
        assert_eq!(div_p(-7, 2), -4);
        assert_eq!(mod_p(-7, 2), 1);
        assert_eq!(mod_p(-4, 2), 0);
        assert_eq!(mod_p(3, 2), 1);
    }

    #[test]
    fn sample_counting() {
        assert_eq!(subsampled_count(1, 0, 9), 10);
        assert_eq!(subsampled_count(2, 0, 9), 5);
        assert_eq!(subsampled_count(2, 0, 8), 5);
        assert_eq!(subsampled_count(2, -4, 3), 4);
    }
}
