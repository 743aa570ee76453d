//! Fixed-Point Decimal Codec
//!
//! The transducer speaks plain decimal ASCII without thousands separators.
//! Values are carried as integers scaled by `10^precision`.

use crate::K_VALUE_PRECISION;
use thiserror::Error;

/// Errors parsing a decimal string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixedPointError {
    /// No digits at all
    #[error("no digits")]
    Empty,

    /// Character that is neither a digit nor the decimal point
    #[error("invalid character {0:?}")]
    InvalidCharacter(char),

    /// More than one decimal point
    #[error("more than one decimal point")]
    MultiplePoints,

    /// Value does not fit the integer range
    #[error("value out of range")]
    Overflow,

    /// K-value outside what the transducer accepts
    #[error("K-Value must be between 0.1 and 25.5")]
    KValueOutOfRange,
}

/// Parse a probe K-value into tenths, accepting 0.1 to 25.5
pub fn parse_k_value(text: &str) -> Result<u8, FixedPointError> {
    match parse_fixed(text, K_VALUE_PRECISION).map(u8::try_from)? {
        Ok(0) | Err(_) => Err(FixedPointError::KValueOutOfRange),
        Ok(k_value) => Ok(k_value),
    }
}

/// Parse a decimal with up to `precision` fractional digits into an integer
/// scaled by `10^precision`.
///
/// Missing fractional digits are padded with zeros, so `"123"`, `"123."`
/// and `"123.000"` all yield `123000` at precision 3. Digits beyond
/// `precision` are truncated.
pub fn parse_fixed(text: &str, precision: u8) -> Result<u32, FixedPointError> {
    let text = text.trim();
    let mut value: u32 = 0;
    let mut digits = 0usize;
    let mut decimals: Option<u8> = None;

    for c in text.chars() {
        match c {
            '.' if decimals.is_some() => return Err(FixedPointError::MultiplePoints),
            '.' => decimals = Some(0),
            '0'..='9' => {
                if let Some(seen) = decimals {
                    if seen >= precision {
                        // Beyond the declared precision
                        digits += 1;
                        continue;
                    }
                    decimals = Some(seen + 1);
                }
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(c as u32 - '0' as u32))
                    .ok_or(FixedPointError::Overflow)?;
                digits += 1;
            }
            other => return Err(FixedPointError::InvalidCharacter(other)),
        }
    }

    if digits == 0 {
        return Err(FixedPointError::Empty);
    }

    // Correct for missing decimals
    for _ in decimals.unwrap_or(0)..precision {
        value = value.checked_mul(10).ok_or(FixedPointError::Overflow)?;
    }

    Ok(value)
}

/// Render an integer scaled by `10^precision` as a decimal string
pub fn format_fixed(value: i64, precision: u8) -> String {
    if precision == 0 {
        return value.to_string();
    }

    let scale = 10u64.pow(u32::from(precision));
    let sign = if value < 0 { "-" } else { "" };
    let magnitude = value.unsigned_abs();
    format!(
        "{}{}.{:0width$}",
        sign,
        magnitude / scale,
        magnitude % scale,
        width = precision as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_pads_missing_decimals() {
        assert_eq!(parse_fixed("123", 3), Ok(123000));
        assert_eq!(parse_fixed("1.5", 3), Ok(1500));
        assert_eq!(parse_fixed("0.001", 3), Ok(1));
        assert_eq!(parse_fixed("1413.00", 3), Ok(1413000));
        assert_eq!(parse_fixed("7.", 3), Ok(7000));
        assert_eq!(parse_fixed(".5", 1), Ok(5));
    }

    #[test]
    fn test_parse_truncates_extra_decimals() {
        assert_eq!(parse_fixed("1.23456", 3), Ok(1234));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_fixed("", 3), Err(FixedPointError::Empty));
        assert_eq!(parse_fixed(".", 3), Err(FixedPointError::Empty));
        assert_eq!(parse_fixed("*ER", 3), Err(FixedPointError::InvalidCharacter('*')));
        assert_eq!(parse_fixed("-1.0", 1), Err(FixedPointError::InvalidCharacter('-')));
        assert_eq!(parse_fixed("1.2.3", 3), Err(FixedPointError::MultiplePoints));
        assert_eq!(parse_fixed("99999999", 3), Err(FixedPointError::Overflow));
    }

    #[test]
    fn test_parse_k_value_range() {
        assert_eq!(parse_k_value("0.1"), Ok(1));
        assert_eq!(parse_k_value("1"), Ok(10));
        assert_eq!(parse_k_value("25.5"), Ok(255));
        assert_eq!(parse_k_value("0"), Err(FixedPointError::KValueOutOfRange));
        assert_eq!(parse_k_value("0.05"), Err(FixedPointError::KValueOutOfRange));
        assert_eq!(parse_k_value("25.6"), Err(FixedPointError::KValueOutOfRange));
        assert_eq!(parse_k_value("k"), Err(FixedPointError::InvalidCharacter('k')));
    }

    #[test]
    fn test_format_fixed() {
        assert_eq!(format_fixed(10, 1), "1.0");
        assert_eq!(format_fixed(5, 1), "0.5");
        assert_eq!(format_fixed(0, 1), "0.0");
        assert_eq!(format_fixed(1413000, 3), "1413.000");
        assert_eq!(format_fixed(2315, 2), "23.15");
        assert_eq!(format_fixed(-125, 2), "-1.25");
        assert_eq!(format_fixed(42, 0), "42");
    }

    proptest! {
        #[test]
        fn prop_parse_scales_to_precision(whole in 0u32..100_000, frac in 0u32..1000, places in 0usize..=3) {
            // Render `frac` with exactly `places` digits
            let frac = frac % 10u32.pow(places as u32);
            let text = if places == 0 {
                whole.to_string()
            } else {
                format!("{}.{:0width$}", whole, frac, width = places)
            };

            let expected = whole * 1000 + frac * 10u32.pow(3 - places as u32);
            prop_assert_eq!(parse_fixed(&text, 3), Ok(expected));
        }

        #[test]
        fn prop_format_then_parse(value in 0u32..10_000_000) {
            let text = format_fixed(i64::from(value), 3);
            prop_assert_eq!(parse_fixed(&text, 3), Ok(value));
        }
    }
}
