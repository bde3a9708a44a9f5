use std::{fmt, str::FromStr};

use ethers::{types::U256, utils::parse_units};
use fixed_point::FixedPoint;
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::ParamError;

/// The largest precision whose scale factor fits in a `U256`.
pub const MAX_PRECISION: u32 = 77;

/// Precision of the mantissas the protocol contracts expect.
pub const WAD_DECIMALS: u32 = 18;

/// A non-negative, human-readable decimal amount such as `"1.05"` or `"19.00"`.
///
/// The value is kept as normalized digit strings so that no precision is
/// lost until it is scaled to a concrete number of decimals with
/// [`Decimal::to_units`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    whole: String,
    fraction: String,
}

impl Decimal {
    pub fn zero() -> Self {
        Self {
            whole: "0".into(),
            fraction: String::new(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.whole == "0" && self.fraction.is_empty()
    }

    /// Scales the amount to an integer with `precision` decimals, so `"2"` at
    /// 36 decimals is `2e36`. Fractional digits beyond the precision are
    /// truncated.
    pub fn to_units(&self, precision: u32) -> Result<U256, ParamError> {
        if precision > MAX_PRECISION {
            return Err(ParamError::PrecisionTooLarge(precision));
        }
        // With the fraction padded to the full precision `parse_units` never
        // multiplies, so an oversized value is a parse error, not a panic.
        let mut fraction = self.fraction.clone();
        if fraction.len() < precision as usize {
            fraction.extend(std::iter::repeat('0').take(precision as usize - fraction.len()));
        }
        let amount = if fraction.is_empty() {
            self.whole.clone()
        } else {
            format!("{}.{}", self.whole, fraction)
        };
        parse_units(amount, precision)
            .map(U256::from)
            .map_err(|_| ParamError::Overflow {
                value: self.to_string(),
                precision,
            })
    }

    /// The amount as an 18-decimal fixed point number.
    pub fn to_fixed(&self) -> Result<FixedPoint, ParamError> {
        self.to_units(WAD_DECIMALS).map(FixedPoint::from)
    }

    /// Drops fractional digits beyond `precision`.
    pub fn truncate(&self, precision: u32) -> Self {
        let mut fraction = self.fraction.clone();
        fraction.truncate(precision as usize);
        Self::normalized(self.whole.clone(), fraction)
    }

    fn normalized(whole: String, fraction: String) -> Self {
        let whole = whole.trim_start_matches('0');
        let fraction = fraction.trim_end_matches('0');
        Self {
            whole: if whole.is_empty() { "0" } else { whole }.to_string(),
            fraction: fraction.to_string(),
        }
    }
}

/// The inverse of [`Decimal::to_units`].
pub fn format_units(value: U256, precision: u32) -> Result<Decimal, ParamError> {
    let formatted = ethers::utils::format_units(value, precision)
        .map_err(|_| ParamError::PrecisionTooLarge(precision))?;
    formatted.parse()
}

impl From<FixedPoint> for Decimal {
    fn from(value: FixedPoint) -> Self {
        let scaled = value.to_scaled_string(WAD_DECIMALS as usize);
        let (whole, fraction) = scaled.split_once('.').unwrap_or((&scaled, ""));
        Self::normalized(whole.to_string(), fraction.to_string())
    }
}

impl From<u64> for Decimal {
    fn from(value: u64) -> Self {
        Self::normalized(value.to_string(), String::new())
    }
}

impl FromStr for Decimal {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| ParamError::InvalidDecimal {
            value: s.to_string(),
            reason: reason.to_string(),
        };
        if s.starts_with('-') {
            return Err(ParamError::Negative(s.to_string()));
        }
        let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("no digits"));
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("only digits and a single decimal point are allowed"));
        }
        Ok(Self::normalized(whole.to_string(), fraction.to_string()))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fraction.is_empty() {
            write!(f, "{}", self.whole)
        } else {
            write!(f, "{}.{}", self.whole, self.fraction)
        }
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts both JSON strings (`"1.05"`) and plain numbers (`20`). Strings
/// are preferred in parameter files since they are never rounded.
impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DecimalVisitor;

        impl<'de> Visitor<'de> for DecimalVisitor {
            type Value = Decimal;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative decimal string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Decimal, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Decimal, E> {
                Ok(Decimal::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Decimal, E> {
                u64::try_from(v)
                    .map(Decimal::from)
                    .map_err(|_| E::custom(ParamError::Negative(v.to_string())))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Decimal, E> {
                v.to_string().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DecimalVisitor)
    }
}
