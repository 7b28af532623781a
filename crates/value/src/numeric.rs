use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive, Zero};

/// Arbitrary-precision SQL numeric with a scale.
///
/// All numeric SQL types share this representation at runtime; the declared
/// type only matters for widening (see [`crate::widen_numeric`]) and for
/// column validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Numeric(BigDecimal);

impl Numeric {
    pub fn parse(text: &str) -> Option<Numeric> {
        BigDecimal::from_str(text).ok().map(Numeric)
    }

    pub fn from_i64(value: i64) -> Numeric {
        Numeric(BigDecimal::from(value))
    }

    pub fn from_f64(value: f64) -> Option<Numeric> {
        BigDecimal::from_f64(value).map(Numeric)
    }

    /// Number of digits after the decimal point. Negative scales (trailing
    /// zeroes absorbed into the exponent) count as zero fractional digits.
    pub fn scale(&self) -> i64 {
        self.0.fractional_digit_count()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_zero_or_one(&self) -> bool {
        self.0.is_zero() || self.0 == BigDecimal::from(1)
    }

    pub fn fits_i8(&self) -> bool {
        self.0.is_integer() && self.0.to_i64().is_some_and(|v| i8::try_from(v).is_ok())
    }

    pub fn fits_i16(&self) -> bool {
        self.0.is_integer() && self.0.to_i64().is_some_and(|v| i16::try_from(v).is_ok())
    }

    pub fn fits_i32(&self) -> bool {
        self.0.is_integer() && self.0.to_i64().is_some_and(|v| i32::try_from(v).is_ok())
    }

    pub fn fits_i64(&self) -> bool {
        self.0.is_integer() && self.0.to_i64().is_some()
    }

    pub fn fits_f32(&self) -> bool {
        match BigDecimal::from_f32(f32::MAX) {
            Some(max) => self.0.abs() <= max,
            None => false,
        }
    }

    pub fn fits_f64(&self) -> bool {
        match BigDecimal::from_f64(f64::MAX) {
            Some(max) => self.0.abs() <= max,
            None => false,
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        self.0.is_integer().then(|| self.0.to_i64()).flatten()
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.0.to_f64()
    }

    pub fn add(&self, other: &Numeric) -> Numeric {
        Numeric(&self.0 + &other.0)
    }

    pub fn sub(&self, other: &Numeric) -> Numeric {
        Numeric(&self.0 - &other.0)
    }

    pub fn mul(&self, other: &Numeric) -> Numeric {
        Numeric(&self.0 * &other.0)
    }

    /// `None` on division by zero.
    pub fn div(&self, other: &Numeric) -> Option<Numeric> {
        if other.0.is_zero() {
            None
        } else {
            Some(Numeric(&self.0 / &other.0))
        }
    }

    pub fn neg(&self) -> Numeric {
        Numeric(-&self.0)
    }

    /// Canonical text form, used by the cell serializer.
    ///
    /// `BigDecimal`'s display form round-trips through [`Numeric::parse`]
    /// without loss.
    pub fn canonical_string(&self) -> String {
        self.0.to_string()
    }
}

impl PartialOrd for Numeric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Numeric {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
