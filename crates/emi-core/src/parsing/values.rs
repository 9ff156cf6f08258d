use crate::error::EmiError;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse the leading integer of a free-text value.
///
/// Handles formats like:
/// - "65W" -> 65
/// - "100%" -> 100
/// - "230Vac/50Hz" -> 230
///
/// Returns None when the text does not start with a digit.
pub fn leading_int(s: &str) -> Option<u32> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Parse a decimal value from a report token.
///
/// Plain decimal text first, then scientific notation ("1.2E-3") through
/// `Decimal::from_scientific`.
pub fn parse_decimal(s: &str) -> Result<Decimal, EmiError> {
    let s = s.trim();
    if let Ok(d) = Decimal::from_str(s) {
        return Ok(d);
    }
    if let Ok(d) = Decimal::from_scientific(s) {
        return Ok(d);
    }
    Err(EmiError::ParseError(format!("invalid number '{}'", s)))
}
