//! Money amounts as integer minor units
//!
//! Amounts coming back from the classifier are JSON numbers or strings.
//! They are converted to cents once, at the edge, so the ledger never
//! sees floating-point noise like `13.290000000000001`.

use std::fmt;

/// Money is represented as integer cents (1 unit = 100 cents).
pub type Cents = i64;

/// Format cents as a plain decimal string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.abs();
    format!("{}{}.{:02}", sign, abs_cents / 100, abs_cents % 100)
}

/// Parse a decimal string into cents.
///
/// Accepts `.` or `,` as the decimal separator and ignores whitespace.
/// A lone `,` followed by one or two digits is a decimal comma; otherwise
/// `,` groups thousands. With both present, the last one is the decimal
/// separator. Digits beyond the second decimal place are truncated.
/// Example: "50.00" -> 5000, "13,29" -> 1329, "1,500" -> 150000, "1,500.50" -> 150050
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let input = input.trim();
    let negative = input.starts_with('-');
    let input: String = input.trim_start_matches(['-', '+']).chars().filter(|c| !c.is_whitespace()).collect();
    if input.is_empty() {
        return Err(ParseCentsError::InvalidFormat);
    }

    let (units, decimals, grouping) = split_separators(&input);
    let units = match grouping {
        Some(sep) => strip_grouping(units, sep)?,
        None => units.to_string(),
    };
    let units = if units.is_empty() && decimals.is_some() { 0 } else { parse_units(&units)? };
    let decimals = match decimals {
        Some(decimals) => parse_decimals(decimals)?,
        None => 0,
    };
    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(decimals))
        .ok_or(ParseCentsError::Overflow)?;

    Ok(if negative { -cents } else { cents })
}

/// Split into (integer part, fraction, thousands separator)
fn split_separators(input: &str) -> (&str, Option<&str>, Option<char>) {
    let dot = input.rfind('.');
    let comma = input.rfind(',');
    match (dot, comma) {
        (None, None) => (input, None, None),
        (Some(d), Some(c)) => {
            let (at, grouping) = if d > c { (d, ',') } else { (c, '.') };
            (&input[..at], Some(&input[at + 1..]), Some(grouping))
        }
        (Some(d), None) if input.matches('.').count() == 1 => (&input[..d], Some(&input[d + 1..]), None),
        (Some(_), None) => (input, None, Some('.')),
        (None, Some(c)) => {
            let tail = &input[c + 1..];
            if input.matches(',').count() == 1 && (1..=2).contains(&tail.len()) {
                (&input[..c], Some(tail), None)
            } else {
                (input, None, Some(','))
            }
        }
    }
}

/// Remove thousands separators, requiring three-digit groups after the first
fn strip_grouping(units: &str, sep: char) -> Result<String, ParseCentsError> {
    let mut groups = units.split(sep);
    let first = groups.next().unwrap_or_default();
    if first.is_empty() || first.len() > 3 {
        return Err(ParseCentsError::InvalidFormat);
    }
    let mut digits = first.to_string();
    for group in groups {
        if group.len() != 3 {
            return Err(ParseCentsError::InvalidFormat);
        }
        digits.push_str(group);
    }
    Ok(digits)
}

fn parse_units(units: &str) -> Result<i64, ParseCentsError> {
    if !units.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseCentsError::InvalidFormat);
    }
    units.parse::<i64>().map_err(|_| ParseCentsError::Overflow)
}

fn parse_decimals(decimals: &str) -> Result<i64, ParseCentsError> {
    if !decimals.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseCentsError::InvalidFormat);
    }
    let value = match decimals.len() {
        0 => 0,
        1 => decimals.parse::<i64>().map_err(|_| ParseCentsError::InvalidFormat)? * 10,
        _ => decimals[..2].parse::<i64>().map_err(|_| ParseCentsError::InvalidFormat)?,
    };
    Ok(value)
}

/// Convert a float amount (e.g. from scientific JSON notation) into cents.
pub fn cents_from_f64(value: f64) -> Option<Cents> {
    if !value.is_finite() {
        return None;
    }
    let cents = (value * 100.0).round();
    if cents.abs() > i64::MAX as f64 {
        return None;
    }
    Some(cents as Cents)
}

/// Cents as a float amount for numeric cells
pub fn cents_to_f64(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

/// Multiply an amount by an exchange rate, rounding to the nearest cent.
pub fn convert(cents: Cents, rate: f64) -> Cents {
    cents_from_f64(cents as f64 * rate / 100.0).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    InvalidFormat,
    Overflow,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
            ParseCentsError::Overflow => write!(f, "amount out of range"),
        }
    }
}

impl std::error::Error for ParseCentsError {}
