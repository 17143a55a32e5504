//! Quantity strings as found in resource lists (`500m`, `2`, `1.5Gi`).
//!
//! Values are held in milli-units. Parsing rounds up to the next milli-unit,
//! so `0.0001` is one milli and never silently zero.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::QuantityError;

/// Longest mantissa accepted before the value is rejected as out of range.
const MAX_MANTISSA_DIGITS: usize = 30;

/// A resource quantity in milli-units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    millis: i64,
}

impl Quantity {
    /// Zero quantity.
    pub const ZERO: Quantity = Quantity { millis: 0 };

    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Creates a quantity from a whole value (`from_value(2)` is `"2"`).
    #[must_use]
    pub const fn from_value(value: i64) -> Self {
        Self {
            millis: value.saturating_mul(1000),
        }
    }

    /// Value in milli-units.
    #[must_use]
    pub const fn millis(&self) -> i64 {
        self.millis
    }

    /// Whole value, rounded up.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.millis.div_euclid(1000) + i64::from(self.millis.rem_euclid(1000) != 0)
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Parses a quantity string.
    pub fn parse(raw: &str) -> Result<Self, QuantityError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, body) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_end = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(number_end);

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::InvalidNumber(raw.to_string()));
        }
        if frac_part.contains('.') {
            return Err(QuantityError::InvalidNumber(raw.to_string()));
        }
        if int_part.len() + frac_part.len() > MAX_MANTISSA_DIGITS {
            return Err(QuantityError::OutOfRange(raw.to_string()));
        }

        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = digits
            .parse()
            .map_err(|_| QuantityError::InvalidNumber(raw.to_string()))?;

        let (mult_num, pow10) = parse_suffix(suffix, raw)?;
        let pow10 = i32::try_from(frac_part.len())
            .ok()
            .and_then(|digits| pow10.checked_sub(digits))
            .ok_or_else(|| QuantityError::OutOfRange(raw.to_string()))?;

        // milli-units: multiply by 1000 up front
        let mut numerator = mantissa
            .checked_mul(mult_num)
            .and_then(|n| n.checked_mul(1000))
            .ok_or_else(|| QuantityError::OutOfRange(raw.to_string()))?;
        let mut denominator: i128 = 1;

        if pow10 >= 0 {
            let scale = 10_i128
                .checked_pow(pow10 as u32)
                .ok_or_else(|| QuantityError::OutOfRange(raw.to_string()))?;
            numerator = numerator
                .checked_mul(scale)
                .ok_or_else(|| QuantityError::OutOfRange(raw.to_string()))?;
        } else {
            denominator = 10_i128
                .checked_pow(pow10.unsigned_abs())
                .ok_or_else(|| QuantityError::OutOfRange(raw.to_string()))?;
        }

        let millis = (numerator + denominator - 1) / denominator;
        let millis = i64::try_from(millis).map_err(|_| QuantityError::OutOfRange(raw.to_string()))?;

        Ok(Self {
            millis: if negative { -millis } else { millis },
        })
    }
}

/// Returns (binary multiplier, decimal exponent) for a suffix.
fn parse_suffix(suffix: &str, raw: &str) -> Result<(i128, i32), QuantityError> {
    let binary = |shift: u32| Ok((1_i128 << shift, 0));
    let decimal = |exp: i32| Ok((1_i128, exp));

    match suffix {
        "" => decimal(0),
        "m" => decimal(-3),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        other => {
            // Decimal exponent form: 1e3, 5E-2
            if let Some(exp) = other.strip_prefix(['e', 'E']) {
                if let Ok(exp) = exp.parse::<i32>() {
                    return decimal(exp);
                }
            }
            Err(QuantityError::UnknownSuffix {
                suffix: other.to_string(),
                value: raw.to_string(),
            })
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 == 0 {
            write!(f, "{}", self.millis / 1000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Quantity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(Quantity::from_value(v)),
            Raw::Str(s) => Quantity::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", 1_000)]
    #[case("500m", 500)]
    #[case("0.5", 500)]
    #[case("1.5", 1_500)]
    #[case("2k", 2_000_000)]
    #[case("1Ki", 1_024_000)]
    #[case("1.5Gi", 1_610_612_736_000)]
    #[case("4M", 4_000_000_000)]
    #[case("1e3", 1_000_000)]
    #[case("0.0001", 1)]
    #[case("-2", -2_000)]
    fn test_parse(#[case] raw: &str, #[case] millis: i64) {
        assert_eq!(Quantity::parse(raw).unwrap().millis(), millis);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("1.2.3")]
    #[case("5Qi")]
    #[case(".")]
    fn test_parse_rejects(#[case] raw: &str) {
        assert!(Quantity::parse(raw).is_err());
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            Quantity::parse("100Ei"),
            Err(QuantityError::OutOfRange(_))
        ));
    }

    #[rstest]
    #[case("1.5e-2147483648")]
    #[case("1e2147483647")]
    #[case("1e-60")]
    fn test_extreme_exponent_out_of_range(#[case] raw: &str) {
        assert!(matches!(
            Quantity::parse(raw),
            Err(QuantityError::OutOfRange(_))
        ));
        let decoded = serde_json::from_str::<Quantity>(&format!("\"{raw}\""));
        assert!(decoded.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Quantity::from_millis(2_000).to_string(), "2");
        assert_eq!(Quantity::from_millis(250).to_string(), "250m");
    }

    #[test]
    fn test_value_rounds_up() {
        assert_eq!(Quantity::from_millis(1_001).value(), 2);
        assert_eq!(Quantity::from_millis(1_000).value(), 1);
    }

    #[test]
    fn test_deserialize_int_or_string() {
        let q: Quantity = serde_json::from_str("4").unwrap();
        assert_eq!(q, Quantity::from_value(4));
        let q: Quantity = serde_json::from_str("\"100m\"").unwrap();
        assert_eq!(q.millis(), 100);
    }
}
