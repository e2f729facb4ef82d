//! Integer money in minor units.
//!
//! Amounts never pass through floating point: major-unit strings are parsed
//! digit by digit and rendered back with exactly two decimals.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const MINOR_PER_MAJOR: i64 = 100;

/// Unit tag carried by every amount source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AmountUnit {
    Minor,
    #[default]
    Major,
}

/// An amount of money in minor units (cents).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor_units(minor: i64) -> Self {
        Self(minor)
    }

    pub fn to_minor_units(self) -> i64 {
        self.0
    }

    /// Parse a decimal string in major units ("50", "50.5", "-3.25").
    pub fn parse_major(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_amount(input, "empty amount"));
        }

        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole, fraction) = match unsigned.split_once('.') {
            Some((w, f)) => (w, f),
            None => (unsigned, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(CoreError::invalid_amount(input, "no digits"));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoreError::invalid_amount(input, "not a decimal number"));
        }
        if fraction.len() > 2 {
            // Trailing zeros beyond cents are harmless ("50.000")
            if fraction[2..].chars().any(|c| c != '0') {
                return Err(CoreError::invalid_amount(input, "more than two decimal places"));
            }
        }

        let whole_value: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| CoreError::invalid_amount(input, "amount out of range"))?
        };

        let cents_digits: String = fraction.chars().chain("00".chars()).take(2).collect();
        let cents: i64 = cents_digits
            .parse()
            .map_err(|_| CoreError::invalid_amount(input, "not a decimal number"))?;

        let magnitude = whole_value
            .checked_mul(MINOR_PER_MAJOR)
            .and_then(|v| v.checked_add(cents))
            .ok_or_else(|| CoreError::invalid_amount(input, "amount out of range"))?;

        Ok(Self(if negative { -magnitude } else { magnitude }))
    }

    /// Parse an amount whose unit is given explicitly by its source.
    pub fn parse_tagged(input: &str, unit: AmountUnit) -> Result<Self> {
        match unit {
            AmountUnit::Major => Self::parse_major(input),
            AmountUnit::Minor => input
                .trim()
                .parse::<i64>()
                .map(Self)
                .map_err(|_| CoreError::invalid_amount(input, "minor units must be an integer")),
        }
    }

    /// Render in major units with exactly two decimals.
    pub fn to_major_string(self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        format!(
            "{}{}.{:02}",
            sign,
            magnitude / MINOR_PER_MAJOR as u64,
            magnitude % MINOR_PER_MAJOR as u64
        )
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_major_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major() {
        assert_eq!(Money::parse_major("50.00").unwrap().to_minor_units(), 5000);
        assert_eq!(Money::parse_major("50").unwrap().to_minor_units(), 5000);
        assert_eq!(Money::parse_major("50.5").unwrap().to_minor_units(), 5050);
        assert_eq!(Money::parse_major("0.07").unwrap().to_minor_units(), 7);
        assert_eq!(Money::parse_major(".5").unwrap().to_minor_units(), 50);
        assert_eq!(Money::parse_major("-3.25").unwrap().to_minor_units(), -325);
        assert_eq!(Money::parse_major(" 12.10 ").unwrap().to_minor_units(), 1210);
        assert_eq!(Money::parse_major("7.100").unwrap().to_minor_units(), 710);
    }

    #[test]
    fn test_parse_major_rejects_garbage() {
        assert!(Money::parse_major("").is_err());
        assert!(Money::parse_major("abc").is_err());
        assert!(Money::parse_major("1.234").is_err());
        assert!(Money::parse_major("1,50").is_err());
        assert!(Money::parse_major(".").is_err());
        assert!(Money::parse_major("99999999999999999999").is_err());
    }

    #[test]
    fn test_parse_tagged() {
        assert_eq!(
            Money::parse_tagged("5000", AmountUnit::Minor).unwrap(),
            Money::from_minor_units(5000)
        );
        assert_eq!(
            Money::parse_tagged("50.00", AmountUnit::Major).unwrap(),
            Money::from_minor_units(5000)
        );
        assert!(Money::parse_tagged("50.00", AmountUnit::Minor).is_err());
    }

    #[test]
    fn test_to_major_string() {
        assert_eq!(Money::from_minor_units(5000).to_major_string(), "50.00");
        assert_eq!(Money::from_minor_units(7).to_major_string(), "0.07");
        assert_eq!(Money::from_minor_units(-325).to_major_string(), "-3.25");
        assert_eq!(Money::from_minor_units(-5).to_major_string(), "-0.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn test_minor_units_round_trip() {
        for minor in (-100_000..=100_000).step_by(7) {
            let rendered = Money::from_minor_units(minor).to_major_string();
            assert_eq!(Money::parse_major(&rendered).unwrap().to_minor_units(), minor);
        }
        for minor in [i64::MAX / 100, i64::MIN / 100, 1, -1, 99, 100, 101] {
            let rendered = Money::from_minor_units(minor).to_major_string();
            assert_eq!(Money::parse_major(&rendered).unwrap().to_minor_units(), minor);
        }
    }

    #[test]
    fn test_serializes_as_integer() {
        let json = serde_json::to_string(&Money::from_minor_units(1234)).unwrap();
        assert_eq!(json, "1234");
    }
}
