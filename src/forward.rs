use crate::error::{Error, Result};

/// Known forwarding banners, each with the number of header lines that sit
/// between the `From` line and the original content. The first entry is the
/// Gmail banner (From/Date/Subject/To), the second the Apple Mail one
/// (From/Subject/Date/To).
const FORWARD_BANNERS: &[(&str, usize)] = &[
    ("---------- Forwarded message ---------", 4),
    ("Begin forwarded message:", 4),
];

/// How far past the banner the `From` line may sit. Apple Mail puts a blank
/// line between the banner and the header block.
const FROM_SCAN_LINES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedOrigin {
    pub address: String,
    pub body: String,
}

/// Recovers the original sender and body from a forwarded copy.
///
/// Scans the body for a known banner, takes the `From` header line following
/// it, and skips the banner's fixed header-line count to reach the original
/// content. Fails with `UnresolvableForward` when no banner is present.
pub fn resolve_forward(body: &str) -> Result<ForwardedOrigin> {
    let lines: Vec<&str> = body.lines().collect();
    for (marker, header_lines) in FORWARD_BANNERS {
        let Some(banner_idx) = lines
            .iter()
            .position(|line| line.trim_start().starts_with(marker))
        else {
            continue;
        };
        let from_idx = lines
            .iter()
            .enumerate()
            .skip(banner_idx + 1)
            .take(FROM_SCAN_LINES)
            .find(|(_, line)| line.trim_start().starts_with("From:"))
            .map(|(idx, _)| idx);
        let Some(from_idx) = from_idx else {
            continue;
        };
        let raw_from = lines[from_idx]
            .trim_start()
            .strip_prefix("From:")
            .unwrap_or_default()
            .trim();
        let address = normalize_address(raw_from);
        if address.is_empty() {
            continue;
        }
        let content_start = (from_idx + header_lines).min(lines.len());
        let origin_body = lines[content_start..].join("\n").trim_start().to_string();
        return Ok(ForwardedOrigin {
            address,
            body: origin_body,
        });
    }
    Err(Error::UnresolvableForward)
}

/// Reduces `Display Name <addr@host>` to a bare lowercase address.
/// Already-bare input passes through unchanged, so the function is
/// idempotent.
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
        _ => trimmed,
    };
    inner.trim().trim_matches('"').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GMAIL_FORWARD: &str = "\
FYI

---------- Forwarded message ---------
From: Venmo <venmo@venmo.com>
Date: Tue, Jul 7, 2026 at 10:02 AM
Subject: You paid Alex Kim $12.50
To: <sam@example.com>

You paid Alex Kim $12.50
Payment ID 123";

    const APPLE_FORWARD: &str = "\
Begin forwarded message:

From: \"Chase\" <no.reply.alerts@chase.com>
Subject: Your $42.10 transaction with Example Store
Date: July 7, 2026 at 10:02:11 AM PDT
To: sam@example.com

Your $42.10 transaction with Example Store";

    #[test]
    fn resolves_gmail_banner() {
        let origin = resolve_forward(GMAIL_FORWARD).expect("resolvable");
        assert_eq!(origin.address, "venmo@venmo.com");
        assert!(origin.body.starts_with("You paid Alex Kim $12.50"));
    }

    #[test]
    fn resolves_apple_mail_banner() {
        let origin = resolve_forward(APPLE_FORWARD).expect("resolvable");
        assert_eq!(origin.address, "no.reply.alerts@chase.com");
        assert!(origin
            .body
            .starts_with("Your $42.10 transaction with Example Store"));
    }

    #[test]
    fn unknown_body_is_unresolvable() {
        let err = resolve_forward("just a plain reply, nothing forwarded").unwrap_err();
        assert!(matches!(err, Error::UnresolvableForward));
    }

    #[test]
    fn address_normalization_is_idempotent() {
        let once = normalize_address("Pay Pal <Service@PayPal.com>");
        assert_eq!(once, "service@paypal.com");
        assert_eq!(normalize_address(&once), once);
        assert_eq!(normalize_address("service@paypal.com"), "service@paypal.com");
    }
}
