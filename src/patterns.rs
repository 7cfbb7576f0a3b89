use regex::Regex;

use crate::money;

/// Named capture slots pulled out of one pattern match. The amount is a
/// positive magnitude in cents; the calling provider routine decides the
/// sign.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub amount_cents: Option<i64>,
    pub counterparty: Option<String>,
    pub detail: Option<String>,
}

/// Runs one pattern against one text. Pure: same inputs, same output.
///
/// Subject patterns are written anchored (`^...$`) so a stray prefix or
/// suffix defeats the match; body patterns are unanchored. Anchoring is the
/// pattern's own business, not this function's.
pub fn capture(re: &Regex, text: &str) -> Option<Extraction> {
    let caps = re.captures(text)?;
    let amount_cents = caps
        .name("amount")
        .and_then(|m| money::parse_cents(m.as_str()).ok())
        .map(i64::abs);
    let counterparty = caps
        .name("counterparty")
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    let detail = caps
        .name("detail")
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    Some(Extraction {
        amount_cents,
        counterparty,
        detail,
    })
}

/// Tries patterns in order and returns the first hit.
pub fn first_capture<'a, I>(res: I, text: &str) -> Option<Extraction>
where
    I: IntoIterator<Item = &'a Regex>,
{
    res.into_iter().find_map(|re| capture(re, text))
}
