//! Human-readable size strings such as `100M` or `50kb`.
//!
//! Units are powers of 1024. The unit letter is case-insensitive and may be
//! followed by an optional `b`/`B`.

use once_cell::sync::Lazy;
use regex::Regex;

static SIZE_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)([a-zA-Z]?)[bB]?$").expect("size pattern is valid"));

/// Errors returned by [`parse_size`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeError {
    #[error("invalid size syntax")]
    InvalidSyntax,

    #[error("invalid size number '{0}'")]
    InvalidNumber(String),
}

/// Parses a size string into a byte count.
///
/// An empty string yields `0`.
pub fn parse_size(value: &str) -> Result<u64, SizeError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }

    let caps = SIZE_RX.captures(value).ok_or(SizeError::InvalidSyntax)?;
    let number = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" => 1,
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        "t" => 1 << 40,
        _ => return Err(SizeError::InvalidSyntax),
    };

    if number.is_empty() {
        return Err(SizeError::InvalidSyntax);
    }

    let number: u64 = number
        .parse()
        .map_err(|_| SizeError::InvalidNumber(number.to_string()))?;

    number
        .checked_mul(multiplier)
        .ok_or_else(|| SizeError::InvalidNumber(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_units() {
        assert_eq!(parse_size("").unwrap(), 0);
        assert_eq!(parse_size("50").unwrap(), 50);
        assert_eq!(parse_size("50K").unwrap(), 50 * 1024);
        assert_eq!(parse_size("50k").unwrap(), 50 * 1024);
        assert_eq!(parse_size("100M").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size("50g").unwrap(), 50 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("2T").unwrap(), 2 * 1024 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_byte_suffix() {
        assert_eq!(parse_size("50Kb").unwrap(), 50 * 1024);
        assert_eq!(parse_size("50mB").unwrap(), 50 * 1024 * 1024);
        assert_eq!(parse_size("50GB").unwrap(), 50 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_size("50E"), Err(SizeError::InvalidSyntax));
        assert_eq!(parse_size("k"), Err(SizeError::InvalidSyntax));
        assert_eq!(parse_size("K"), Err(SizeError::InvalidSyntax));
        assert_eq!(parse_size("poggers"), Err(SizeError::InvalidSyntax));
        assert_eq!(
            parse_size("1pK"),
            Err(SizeError::InvalidNumber("1p".to_string()))
        );
    }
}
