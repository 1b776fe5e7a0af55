//! Signed Q32.32 fixed-point arithmetic.
//!
//! All geometry and interpolation math in the pipeline runs on [Fix64]. Conversions to and
//! from floating point only happen at the edges (light directions, divisions, rectangle
//! stepping).

use std::{fmt, ops};

use bytemuck::{Pod, Zeroable};

/// A 64 bit fixed-point number with 32 integer bits and 32 fractional bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct Fix64(pub i64);

const FRAC_SCALE: f64 = 4294967296.0;

impl Fix64 {
    #[allow(missing_docs)]
    pub const ZERO: Self = Self(0);
    #[allow(missing_docs)]
    pub const ONE: Self = Self(1 << 32);
    #[allow(missing_docs)]
    pub const HALF: Self = Self(1 << 31);
    /// Largest representable value, used as the saturated result of division by zero.
    pub const MAX: Self = Self(i64::MAX);
    /// Smallest representable value.
    pub const MIN: Self = Self(i64::MIN);

    #[allow(missing_docs)]
    pub const fn from_int(v: i32) -> Self {
        Self((v as i64) << 32)
    }

    /// Converts from a float. Out of range values saturate and NaN becomes zero.
    pub fn from_f32(v: f32) -> Self {
        Self::from_f64(v as f64)
    }

    #[allow(missing_docs)]
    pub fn from_f64(v: f64) -> Self {
        Self((v * FRAC_SCALE) as i64)
    }

    /// Converts a signed Q16.16 value (the N64 matrix format) to Q32.32.
    pub const fn from_q16(v: i32) -> Self {
        Self((v as i64) << 16)
    }

    /// Truncates toward negative infinity.
    pub const fn to_int(self) -> i32 {
        (self.0 >> 32) as i32
    }

    #[allow(missing_docs)]
    pub fn to_f32(self) -> f32 {
        self.to_f64() as f32
    }

    #[allow(missing_docs)]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / FRAC_SCALE
    }

    /// The fractional bits as an unsigned integer.
    pub const fn frac(self) -> u32 {
        self.0 as u32
    }

    /// Multiplies by a plain integer without rescaling.
    pub const fn scale(self, n: i32) -> Self {
        Self(self.0.wrapping_mul(n as i64))
    }

    fn split(self) -> (i64, i64) {
        (self.0 >> 32, (self.0 as u32) as i64)
    }

    /// Integer part of `self * rhs`.
    ///
    /// The product of the fractional parts is dropped, so the result can be one less than
    /// `(self * rhs).to_int()`.
    pub fn mul_int(self, rhs: Self) -> i32 {
        let (i1, f1) = self.split();
        let (i2, f2) = rhs.split();
        let sum = (i1.wrapping_mul(i2) << 32)
            .wrapping_add(i1.wrapping_mul(f2))
            .wrapping_add(i2.wrapping_mul(f1));
        (sum >> 32) as i32
    }

    /// Computes `1 / self` as `2^63 / |x|` doubled, losing at most the lowest bit.
    ///
    /// The sign is applied after the unsigned division. Zero and values too small for the
    /// quotient to fit saturate to [Fix64::MAX] or [Fix64::MIN].
    pub fn inv(self) -> Self {
        if self.0 == 0 {
            return Self::MAX;
        }
        let mag = self.0.unsigned_abs();
        let q = (1u64 << 63) / mag;
        if q >= 1 << 62 {
            return if self.0 < 0 { Self::MIN } else { Self::MAX };
        }
        let r = (q << 1) as i64;
        Self(if self.0 < 0 { -r } else { r })
    }

    /// Divides through single precision floats.
    ///
    /// Relative error is around `2^-22`. A zero divisor saturates to [Fix64::MAX] or
    /// [Fix64::MIN] with the sign of the dividend, and `0 / 0` is zero.
    pub fn div(self, rhs: Self) -> Self {
        match saturate_div(self, rhs) {
            Some(v) => v,
            None => Self::from_f32(self.to_f32() / rhs.to_f32()),
        }
    }

    /// Divides through double precision floats, with the same zero policy as [Fix64::div].
    pub fn div_precise(self, rhs: Self) -> Self {
        match saturate_div(self, rhs) {
            Some(v) => v,
            None => Self::from_f64(self.to_f64() / rhs.to_f64()),
        }
    }

    #[allow(missing_docs)]
    pub const fn abs(self) -> Self {
        Self(self.0.wrapping_abs())
    }

    /// Clamps into `[lo, hi]`.
    pub fn clamp_to(self, lo: Self, hi: Self) -> Self {
        self.max(lo).min(hi)
    }
}

fn saturate_div(num: Fix64, denom: Fix64) -> Option<Fix64> {
    if denom.0 != 0 {
        None
    } else if num.0 > 0 {
        Some(Fix64::MAX)
    } else if num.0 < 0 {
        Some(Fix64::MIN)
    } else {
        Some(Fix64::ZERO)
    }
}

impl fmt::Debug for Fix64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fix64({})", self.to_f64())
    }
}

impl From<i32> for Fix64 {
    fn from(v: i32) -> Self {
        Self::from_int(v)
    }
}

impl ops::Add for Fix64 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl ops::AddAssign for Fix64 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl ops::Sub for Fix64 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl ops::SubAssign for Fix64 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl ops::Neg for Fix64 {
    type Output = Self;

    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

/// Exact Q32.32 product via split integer/fraction cross multiplication.
impl ops::Mul for Fix64 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let (i1, f1) = self.split();
        let (i2, f2) = rhs.split();
        let ff = ((f1 as u64).wrapping_mul(f2 as u64) >> 32) as i64;
        Self(
            ff.wrapping_add(i1.wrapping_mul(i2) << 32)
                .wrapping_add(i1.wrapping_mul(f2))
                .wrapping_add(i2.wrapping_mul(f1)),
        )
    }
}

impl ops::MulAssign for Fix64 {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl ops::Shr<u32> for Fix64 {
    type Output = Self;

    fn shr(self, rhs: u32) -> Self {
        Self(self.0 >> rhs)
    }
}

impl ops::Shl<u32> for Fix64 {
    type Output = Self;

    fn shl(self, rhs: u32) -> Self {
        Self(self.0.wrapping_shl(rhs))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fx(v: f64) -> Fix64 {
        Fix64::from_f64(v)
    }

    #[test]
    fn test_mul_exact() {
        assert_eq!(Fix64::from_int(3) * Fix64::from_int(-7), Fix64::from_int(-21));
        assert_eq!(Fix64::HALF * Fix64::HALF, fx(0.25));
        assert_eq!(fx(-1.5) * fx(2.5), fx(-3.75));
        assert_eq!(fx(-0.5) * fx(-0.5), fx(0.25));
    }

    #[test]
    fn test_mul_within_one_ulp() {
        let values = [0.1, -3.3, 1234.5678, -0.0001, 77.0 / 3.0];
        for &a in &values {
            for &b in &values {
                let exact = fx(a).to_f64() * fx(b).to_f64();
                let got = (fx(a) * fx(b)).to_f64();
                let err = (got - exact).abs();
                assert!(err <= 2.0 / FRAC_SCALE + exact.abs() * 1e-15, "{} * {}", a, b);
            }
        }
    }

    #[test]
    fn test_mul_int() {
        assert_eq!(Fix64::from_int(255).mul_int(Fix64::HALF), 127);
        assert_eq!(fx(10.75).mul_int(Fix64::from_int(4)), 43);
        assert_eq!(Fix64::from_int(-3).mul_int(Fix64::from_int(5)), -15);
    }

    #[test]
    fn test_inv() {
        assert_eq!(Fix64::from_int(2).inv(), Fix64::HALF);
        assert_eq!(Fix64::from_int(-4).inv(), fx(-0.25));
        assert_eq!(Fix64::HALF.inv(), Fix64::from_int(2));
        assert_eq!(Fix64::ONE.inv(), Fix64::ONE);
        assert_eq!(Fix64::ZERO.inv(), Fix64::MAX);
        assert_eq!(Fix64(-1).inv(), Fix64::MIN);
        assert_eq!(Fix64(2).inv(), Fix64::MAX);
        assert_eq!(Fix64(-2).inv(), Fix64::MIN);
        let third = Fix64::from_int(3).inv();
        assert!((third.to_f64() - 1.0 / 3.0).abs() < 2.0 / FRAC_SCALE);
    }

    #[test]
    fn test_div_mul_round_trip() {
        let values = [1.0, -2.5, 100.25, 0.003, -7777.0, 31.0 / 7.0];
        for &a in &values {
            for &b in &values {
                let q = fx(a).div(fx(b));
                let back = (q * fx(b)).to_f64();
                let bound = a.abs() * 2f64.powi(-20) + b.abs() * 2.0 / FRAC_SCALE + 1e-9;
                assert!((back - a).abs() <= bound, "{} / {}", a, b);
            }
        }
    }

    #[test]
    fn test_div_by_zero_saturates() {
        assert_eq!(Fix64::from_int(5).div(Fix64::ZERO), Fix64::MAX);
        assert_eq!(Fix64::from_int(-5).div(Fix64::ZERO), Fix64::MIN);
        assert_eq!(Fix64::ZERO.div(Fix64::ZERO), Fix64::ZERO);
        assert_eq!(Fix64::from_int(-5).div_precise(Fix64::ZERO), Fix64::MIN);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(fx(-1.25).to_int(), -2);
        assert_eq!(fx(1.75).to_int(), 1);
        assert_eq!(Fix64::from_q16(0x0001_8000), fx(1.5));
        assert_eq!(fx(2.5).frac(), 0x8000_0000);
        assert_eq!(Fix64::HALF.scale(6), Fix64::from_int(3));
        assert_eq!(Fix64::from_f32(f32::NAN), Fix64::ZERO);
    }
}
