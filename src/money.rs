use crate::error::{Error, Result};

/// Parses a decimal money string into cents.
///
/// Accepts an optional leading sign, thousands separators, a `$` prefix and
/// at most two fraction digits. An empty string parses as zero so that a
/// blank cost cell reads back as a zero amount.
pub fn parse_cents(raw: &str) -> Result<i64> {
    let mut text = raw.trim().replace(',', "");
    if let Some(rest) = text.strip_prefix('$') {
        text = rest.trim().to_string();
    }
    if text.is_empty() {
        return Ok(0);
    }
    let negative = text.starts_with('-');
    if text.starts_with('-') || text.starts_with('+') {
        text = text[1..].to_string();
        if let Some(rest) = text.strip_prefix('$') {
            text = rest.trim().to_string();
        }
    }
    if text.is_empty() {
        return Err(Error::BadAmount(raw.to_string()));
    }
    let parts = text.split('.').collect::<Vec<_>>();
    if parts.len() > 2 {
        return Err(Error::BadAmount(raw.to_string()));
    }
    let int_part = if parts[0].is_empty() { "0" } else { parts[0] };
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::BadAmount(raw.to_string()));
    }
    let frac_part = if parts.len() == 2 { parts[1] } else { "" };
    if !frac_part.chars().all(|c| c.is_ascii_digit()) || frac_part.len() > 2 {
        return Err(Error::BadAmount(raw.to_string()));
    }
    let int_val = int_part
        .parse::<i64>()
        .map_err(|_| Error::BadAmount(raw.to_string()))?;
    let frac_val = match frac_part.len() {
        0 => 0,
        1 => {
            frac_part
                .parse::<i64>()
                .map_err(|_| Error::BadAmount(raw.to_string()))?
                * 10
        }
        _ => frac_part
            .parse::<i64>()
            .map_err(|_| Error::BadAmount(raw.to_string()))?,
    };
    let mut cents = int_val
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| Error::BadAmount(raw.to_string()))?;
    if negative {
        cents = -cents;
    }
    Ok(cents)
}

pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
