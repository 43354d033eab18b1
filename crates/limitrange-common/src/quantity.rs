//! Numeric interpretation of Kubernetes resource quantities
//!
//! `k8s_openapi` carries quantities as opaque strings, so `"0.5"` and `"500m"`
//! look different even though the API server treats them as the same amount.
//! [`ParsedQuantity`] holds the exact value in nano-units so two quantities can
//! be compared (and divided, for limit/request ratios) without touching floats.
//!
//! Grammar: `[+-]<digits>[.<digits>]<suffix>` where suffix is one of
//! - binary SI: `Ki Mi Gi Ti Pi Ei`
//! - decimal SI: `n u m k M G T P E` (or nothing)
//! - decimal exponent: `e<int>` / `E<int>`

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::{Error, Result};

/// Nano-units per whole unit
const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Exact numeric value of a quantity, stored as nano-units
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParsedQuantity {
    nanos: i128,
}

/// Multiplier described by a suffix: `2^binary_exp * 10^decimal_exp`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Scale {
    binary_exp: u32,
    decimal_exp: i32,
}

impl ParsedQuantity {
    /// Zero
    pub const ZERO: ParsedQuantity = ParsedQuantity { nanos: 0 };

    /// Build from a whole number of milli-units (e.g. millicores)
    pub fn from_millis(millis: i64) -> Self {
        Self {
            nanos: i128::from(millis) * 1_000_000,
        }
    }

    /// Value in nano-units
    pub fn as_nanos(&self) -> i128 {
        self.nanos
    }

    /// Value in milli-units, rounded up (how the API server reports millicores)
    pub fn as_millis_ceil(&self) -> i128 {
        div_ceil(self.nanos, 1_000_000)
    }

    /// True when the quantity is exactly zero
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Compare `self / other` against `ratio` without losing precision.
    ///
    /// Returns `None` when `other` is zero (the ratio is undefined).
    pub fn ratio_cmp(&self, other: &ParsedQuantity, ratio: &ParsedQuantity) -> Option<Ordering> {
        if other.nanos == 0 {
            return None;
        }
        // self/other <=> ratio/1e9 (ratio is itself in nanos)
        // => self * 1e9 <=> ratio * other, with signs normalised on `other`
        let (lhs, rhs) = match (
            self.nanos.checked_mul(NANOS_PER_UNIT),
            ratio.nanos.checked_mul(other.nanos),
        ) {
            (Some(lhs), Some(rhs)) => (lhs, rhs),
            _ => {
                let lhs = self.nanos as f64 / other.nanos as f64;
                let rhs = ratio.nanos as f64 / NANOS_PER_UNIT as f64;
                return lhs.partial_cmp(&rhs);
            }
        };
        let ordering = lhs.cmp(&rhs);
        Some(if other.nanos < 0 {
            ordering.reverse()
        } else {
            ordering
        })
    }
}

impl FromStr for ParsedQuantity {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(Error::quantity(raw, "empty quantity"));
        }

        let (negative, unsigned) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_len = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);

        let (whole, fraction) = match number.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (number, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(Error::quantity(raw, "missing numeric value"));
        }
        if fraction.contains('.') {
            return Err(Error::quantity(raw, "more than one decimal point"));
        }

        let scale = parse_suffix(suffix).ok_or_else(|| {
            Error::quantity(raw, format!("unknown suffix '{}'", suffix))
        })?;

        let digits = format!("{}{}", whole, fraction);
        let mantissa: i128 = digits
            .parse()
            .map_err(|_| Error::quantity(raw, "numeric value out of range"))?;

        let binary = 2i128
            .checked_pow(scale.binary_exp)
            .and_then(|m| mantissa.checked_mul(m))
            .ok_or_else(|| Error::quantity(raw, "value out of range"))?;

        // nanos = binary * 10^(9 + decimal_exp - fraction_digits)
        let exp = 9 + i64::from(scale.decimal_exp) - fraction.len() as i64;
        let magnitude = if exp >= 0 {
            u32::try_from(exp)
                .ok()
                .and_then(|e| 10i128.checked_pow(e))
                .and_then(|m| binary.checked_mul(m))
                .ok_or_else(|| Error::quantity(raw, "value out of range"))?
        } else {
            match u32::try_from(exp.unsigned_abs())
                .ok()
                .and_then(|e| 10i128.checked_pow(e))
            {
                Some(divisor) => div_ceil(binary, divisor),
                // Anything below the smallest representable step rounds up to one nano-unit
                None => i128::from(binary != 0),
            }
        };

        let nanos = if negative { -magnitude } else { magnitude };
        Ok(ParsedQuantity { nanos })
    }
}

impl TryFrom<&Quantity> for ParsedQuantity {
    type Error = Error;

    fn try_from(q: &Quantity) -> Result<Self> {
        q.0.parse()
    }
}

impl fmt::Display for ParsedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.nanos;
        if nanos % NANOS_PER_UNIT == 0 {
            write!(f, "{}", nanos / NANOS_PER_UNIT)
        } else if nanos % 1_000_000 == 0 {
            write!(f, "{}m", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            write!(f, "{}u", nanos / 1_000)
        } else {
            write!(f, "{}n", nanos)
        }
    }
}

/// Parse a quantity held in a `k8s_openapi` [`Quantity`]
pub fn parse_quantity(q: &Quantity) -> Result<ParsedQuantity> {
    ParsedQuantity::try_from(q)
}

/// Numeric equality of two quantities (`"0.5"` == `"500m"`)
pub fn quantities_equal(a: &Quantity, b: &Quantity) -> Result<bool> {
    Ok(parse_quantity(a)? == parse_quantity(b)?)
}

fn parse_suffix(suffix: &str) -> Option<Scale> {
    let binary = |binary_exp| Scale {
        binary_exp,
        decimal_exp: 0,
    };
    let decimal = |decimal_exp| Scale {
        binary_exp: 0,
        decimal_exp,
    };

    let scale = match suffix {
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "" => decimal(0),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            let valid = !exponent.is_empty()
                && exponent
                    .trim_start_matches(['+', '-'])
                    .chars()
                    .all(|c| c.is_ascii_digit());
            if !valid {
                return None;
            }
            decimal(exponent.parse().ok()?)
        }
    };
    Some(scale)
}

fn div_ceil(value: i128, divisor: i128) -> i128 {
    let quotient = value / divisor;
    if value % divisor > 0 {
        quotient + 1
    } else {
        quotient
    }
}
