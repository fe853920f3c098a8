use thiserror::Error;

/// Money is represented as integer minor units (cents) to avoid floating-point drift.
/// For USD, 1 unit = 100 cents, so $15.00 = 1500 cents.
pub type Cents = i64;

/// Format cents as a human-readable amount.
/// Example: 8500 -> "85.00", -1500 -> "-15.00"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs_cents / 100, abs_cents % 100)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCentsError {
    #[error("invalid money format: '{0}'")]
    InvalidFormat(String),

    #[error("too many decimal places in '{0}' (at most 2)")]
    TooPrecise(String),

    #[error("amount out of range: '{0}'")]
    OutOfRange(String),
}

/// Parse a decimal string into cents.
/// Accepts "100", "100.5", "100.50", ".50" and a leading '-'.
/// Comma is accepted as decimal separator since balances are often pasted from bank UIs.
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let raw = input.trim();
    let invalid = || ParseCentsError::InvalidFormat(raw.to_string());

    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let digits = digits.replace(',', ".");
    if digits.is_empty() {
        return Err(invalid());
    }

    let (units_str, frac_str) = match digits.split_once('.') {
        Some((u, f)) => (u, f),
        None => (digits.as_str(), ""),
    };

    if !units_str.chars().all(|c| c.is_ascii_digit())
        || !frac_str.chars().all(|c| c.is_ascii_digit())
        || (units_str.is_empty() && frac_str.is_empty())
    {
        return Err(invalid());
    }
    if frac_str.len() > 2 {
        return Err(ParseCentsError::TooPrecise(raw.to_string()));
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str
            .parse()
            .map_err(|_| ParseCentsError::OutOfRange(raw.to_string()))?
    };
    let frac: i64 = match frac_str.len() {
        0 => 0,
        1 => frac_str.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => frac_str.parse().map_err(|_| invalid())?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(frac))
        .ok_or_else(|| ParseCentsError::OutOfRange(raw.to_string()))?;

    Ok(if negative { -cents } else { cents })
}
