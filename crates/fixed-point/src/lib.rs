use std::{
    fmt,
    ops::{Add, Sub},
};

use ethers::types::U256;
use fixed_point_macros::{fixed, uint256};
use rand::{
    distributions::{
        uniform::{SampleBorrow, SampleUniform, UniformSampler},
        Distribution, Standard,
    },
    Rng,
};

/// The number of decimals carried by a `FixedPoint`.
pub const DECIMALS: usize = 18;

/// An 18-decimal fixed point wrapper around the `U256` type from ethers-rs.
///
/// This is the "mantissa" representation used by Compound-style contracts:
/// a ratio of `0.5` is stored as `0.5e18`. The unchecked operators panic on
/// overflow and division by zero in the same places the Solidity math would
/// revert; the `checked_*` variants return `None` instead.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct FixedPoint(U256);

impl Default for FixedPoint {
    fn default() -> FixedPoint {
        fixed!(0)
    }
}

/// Formatting ///

impl fmt::Debug for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedPoint({})", self.to_scaled_string(DECIMALS))
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_scaled_string(DECIMALS))
    }
}

/// Conversions ///

impl From<[u8; 32]> for FixedPoint {
    fn from(bytes: [u8; 32]) -> FixedPoint {
        U256::from(bytes).into()
    }
}

impl From<U256> for FixedPoint {
    fn from(u: U256) -> FixedPoint {
        FixedPoint(u)
    }
}

impl From<u128> for FixedPoint {
    fn from(u: u128) -> FixedPoint {
        FixedPoint(U256::from(u))
    }
}

impl From<FixedPoint> for U256 {
    fn from(f: FixedPoint) -> U256 {
        f.0
    }
}

/// Math ///

impl Add for FixedPoint {
    type Output = FixedPoint;

    fn add(self, other: FixedPoint) -> FixedPoint {
        FixedPoint(self.0 + other.0)
    }
}

impl Sub for FixedPoint {
    type Output = FixedPoint;

    fn sub(self, other: FixedPoint) -> FixedPoint {
        FixedPoint(self.0 - other.0)
    }
}

impl FixedPoint {
    pub fn one() -> FixedPoint {
        fixed!(1e18)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_sub(self, other: FixedPoint) -> Option<FixedPoint> {
        self.0.checked_sub(other.0).map(FixedPoint)
    }

    pub fn mul_div_down(self, other: FixedPoint, divisor: FixedPoint) -> FixedPoint {
        FixedPoint((self.0 * other.0) / divisor.0)
    }

    /// Computes `self * other / divisor` rounding down, returning `None` on
    /// overflow or a zero divisor.
    pub fn checked_mul_div_down(self, other: FixedPoint, divisor: FixedPoint) -> Option<FixedPoint> {
        if divisor.is_zero() {
            return None;
        }
        self.0
            .checked_mul(other.0)
            .map(|product| FixedPoint(product / divisor.0))
    }

    /// Renders the raw value with a decimal point inserted `decimals` places
    /// from the right, keeping trailing zeros.
    pub fn to_scaled_string(self, decimals: usize) -> String {
        let mut value = self.0;
        let mut digits = 0;
        let mut result = vec![];
        while value > uint256!(0) {
            if digits == decimals && decimals > 0 {
                result.push('.');
            }

            result.push(((value % uint256!(10)).low_u32() + 48) as u8 as char);
            value /= uint256!(10);
            digits += 1;
        }

        // Add leading zeros.
        if digits < decimals {
            result.resize(result.len() + decimals - digits, '0');
            digits += decimals - digits;
        }

        // Add the decimal point and leading zero.
        if digits == decimals {
            if decimals > 0 {
                result.push('.');
            }
            result.push('0');
        }

        result.iter().rev().collect()
    }
}

/// Sampling ///

impl Distribution<FixedPoint> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> FixedPoint {
        FixedPoint(U256::from(rng.gen::<[u8; 32]>()))
    }
}

pub struct UniformFixedPoint {
    low: FixedPoint,
    high: FixedPoint,
}

impl SampleUniform for FixedPoint {
    type Sampler = UniformFixedPoint;
}

impl UniformSampler for UniformFixedPoint {
    type X = FixedPoint;

    #[inline]
    fn new<B1, B2>(low_b: B1, high_b: B2) -> Self
    where
        B1: SampleBorrow<Self::X> + Sized,
        B2: SampleBorrow<Self::X> + Sized,
    {
        let low = *low_b.borrow();
        let high = *high_b.borrow();
        if low >= high {
            panic!("UniformFixedPoint::new called with invalid range");
        }
        UniformFixedPoint { low, high }
    }

    #[inline]
    fn new_inclusive<B1, B2>(low_b: B1, high_b: B2) -> Self
    where
        B1: SampleBorrow<Self::X> + Sized,
        B2: SampleBorrow<Self::X> + Sized,
    {
        let low = *low_b.borrow();
        let high = *high_b.borrow();
        if low > high {
            panic!("UniformFixedPoint::new called with invalid range");
        }
        UniformFixedPoint::new(low, high + FixedPoint::from(1))
    }

    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> FixedPoint {
        let value = rng.gen::<FixedPoint>();
        let size: FixedPoint = self.high - self.low;
        let narrowed = FixedPoint::from(value.0 % size.0);
        narrowed + self.low
    }
}
