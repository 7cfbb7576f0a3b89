use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::forward;
use crate::mail_store::RawMessage;
use crate::patterns;

const CHASE_ADDRESSES: &[&str] = &["no.reply.alerts@chase.com", "no-reply@alertsp.chase.com"];
const VENMO_ADDRESSES: &[&str] = &["venmo@venmo.com"];
const PAYPAL_ADDRESSES: &[&str] = &["service@paypal.com"];

/// One extracted transaction candidate. Both `amount_cents` and
/// `counterparty` absent marks the sentinel "this was mail from a known
/// provider, but not a transaction" record; such a receipt is never surfaced
/// as a real entry and exists only to carry a note or error.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Receipt {
    pub date: NaiveDate,
    pub amount_cents: Option<i64>,
    pub counterparty: Option<String>,
    pub category: Option<String>,
    pub provider_label: Option<String>,
    pub note: String,
    pub error: String,
}

impl Receipt {
    pub fn blank(date: NaiveDate) -> Self {
        Receipt {
            date,
            amount_cents: None,
            counterparty: None,
            category: None,
            provider_label: None,
            note: String::new(),
            error: String::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.amount_cents.is_none() && self.counterparty.is_none()
    }

    /// Row annotation text; the error renders before the note when both
    /// exist.
    pub fn annotation(&self) -> String {
        match (self.error.is_empty(), self.note.is_empty()) {
            (false, false) => format!("{}\n{}", self.error, self.note),
            (false, true) => self.error.clone(),
            (true, false) => self.note.clone(),
            (true, true) => String::new(),
        }
    }
}

/// Closed set of known payment providers; dispatch is by effective origin
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Chase,
    Venmo,
    PayPal,
}

impl Provider {
    pub fn from_address(address: &str) -> Option<Provider> {
        let addr = address.trim().to_lowercase();
        if CHASE_ADDRESSES.contains(&addr.as_str()) {
            Some(Provider::Chase)
        } else if VENMO_ADDRESSES.contains(&addr.as_str()) {
            Some(Provider::Venmo)
        } else if PAYPAL_ADDRESSES.contains(&addr.as_str()) {
            Some(Provider::PayPal)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Provider::Chase => "Chase",
            Provider::Venmo => "Venmo",
            Provider::PayPal => "PayPal",
        }
    }
}

fn chase_purchase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Your \$(?P<amount>[\d,]+\.\d{2}) transaction with (?P<counterparty>.+)$")
            .expect("invalid chase purchase regex")
    })
}

fn chase_credit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^You have a \$(?P<amount>[\d,]+\.\d{2}) credit pending on your credit card$")
            .expect("invalid chase credit regex")
    })
}

fn chase_transfer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^You sent \$(?P<amount>[\d,]+\.\d{2}) to (?P<counterparty>.+)$")
            .expect("invalid chase transfer regex")
    })
}

fn chase_merchant_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*Merchant\s{2,}(?P<counterparty>.+)$")
            .expect("invalid chase merchant line regex")
    })
}

fn venmo_paid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^You paid (?P<counterparty>.+) \$(?P<amount>[\d,]+\.\d{2})$")
            .expect("invalid venmo paid regex")
    })
}

fn venmo_received_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<counterparty>.+) paid you \$(?P<amount>[\d,]+\.\d{2})$")
            .expect("invalid venmo received regex")
    })
}

fn venmo_charge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^You completed (?P<counterparty>.+?)'s \$(?P<amount>[\d,]+\.\d{2}) charge request$",
        )
        .expect("invalid venmo charge regex")
    })
}

fn paypal_sent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^You sent a \$(?P<amount>[\d,]+\.\d{2}) (?:USD )?payment to (?P<counterparty>.+)$",
        )
        .expect("invalid paypal sent regex")
    })
}

fn paypal_received_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^You received a \$(?P<amount>[\d,]+\.\d{2}) (?:USD )?payment from (?P<counterparty>.+)$",
        )
        .expect("invalid paypal received regex")
    })
}

fn paypal_purchase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Your \$(?P<amount>[\d,]+\.\d{2}) purchase is complete$")
            .expect("invalid paypal purchase regex")
    })
}

fn paypal_seller_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*Seller\s{2,}(?P<counterparty>.+)$")
            .expect("invalid paypal seller line regex")
    })
}

struct ProviderHit {
    amount_cents: Option<i64>,
    counterparty: Option<String>,
    category: Option<String>,
}

/// Extracts a receipt from one message.
///
/// Mail from the configured forwarding relay is unwrapped first; the
/// recovered origin address picks the provider routine. A message from a
/// known provider that matches no pattern yields a blank receipt — that is a
/// normal result, not an error. Only `UnknownProvider` and
/// `UnresolvableForward` fail.
pub fn classify(message: &RawMessage, config: &Config) -> Result<Receipt> {
    let relay = config.settings.forwarding_relay.trim().to_lowercase();
    let sender = forward::normalize_address(&message.sender);
    let (origin, body, forwarded) = if !relay.is_empty() && sender == relay {
        let fw = forward::resolve_forward(&message.body)?;
        (fw.address, fw.body, true)
    } else {
        (sender, message.body.clone(), false)
    };

    let provider =
        Provider::from_address(&origin).ok_or_else(|| Error::UnknownProvider(origin.clone()))?;

    let label = if forwarded {
        let destination = forward::normalize_address(&message.destination);
        format!(
            "{} fwd: {}",
            config.attribution_label(&destination),
            provider.label()
        )
    } else {
        provider.label().to_string()
    };

    // an auto-forward keeps the original subject; a manual forward prefixes
    // it, which would defeat the anchored subject patterns
    let subject = if forwarded {
        strip_forward_prefix(&message.subject)
    } else {
        message.subject.trim()
    };
    let hit = match provider {
        Provider::Chase => classify_chase(subject, &body),
        Provider::Venmo => classify_venmo(subject),
        Provider::PayPal => classify_paypal(subject, &body),
    };

    let mut receipt = Receipt::blank(message.date.date());
    receipt.provider_label = Some(label);
    if let Some(hit) = hit {
        receipt.amount_cents = hit.amount_cents;
        receipt.counterparty = hit.counterparty;
        receipt.category = hit.category;
    }
    Ok(receipt)
}

fn strip_forward_prefix(subject: &str) -> &str {
    let mut text = subject.trim();
    loop {
        let lower = text.to_lowercase();
        let mut stripped = false;
        for prefix in ["fwd:", "fw:"] {
            if lower.starts_with(prefix) {
                text = text[prefix.len()..].trim_start();
                stripped = true;
                break;
            }
        }
        if !stripped {
            return text;
        }
    }
}

fn classify_chase(subject: &str, body: &str) -> Option<ProviderHit> {
    if let Some(x) = patterns::capture(chase_purchase_re(), subject) {
        return Some(ProviderHit {
            amount_cents: x.amount_cents,
            counterparty: x.counterparty,
            category: None,
        });
    }
    if let Some(x) = patterns::capture(chase_credit_re(), subject) {
        // a pending credit is a refund; the subject never names the
        // merchant, the body does
        let counterparty = patterns::capture(chase_merchant_line_re(), body)
            .and_then(|line| line.counterparty);
        return Some(ProviderHit {
            amount_cents: x.amount_cents.map(|cents| -cents),
            counterparty,
            category: None,
        });
    }
    if let Some(x) = patterns::capture(chase_transfer_re(), subject) {
        return Some(ProviderHit {
            amount_cents: x.amount_cents,
            counterparty: x.counterparty,
            category: Some("Transfer".to_string()),
        });
    }
    None
}

fn classify_venmo(subject: &str) -> Option<ProviderHit> {
    if let Some(x) = patterns::capture(venmo_paid_re(), subject) {
        return Some(ProviderHit {
            amount_cents: x.amount_cents,
            counterparty: x.counterparty,
            category: None,
        });
    }
    if let Some(x) = patterns::capture(venmo_received_re(), subject) {
        return Some(ProviderHit {
            amount_cents: x.amount_cents.map(|cents| -cents),
            counterparty: x.counterparty,
            category: None,
        });
    }
    if let Some(x) = patterns::capture(venmo_charge_re(), subject) {
        return Some(ProviderHit {
            amount_cents: x.amount_cents,
            counterparty: x.counterparty,
            category: None,
        });
    }
    None
}

fn classify_paypal(subject: &str, body: &str) -> Option<ProviderHit> {
    if let Some(x) = patterns::capture(paypal_sent_re(), subject) {
        return Some(ProviderHit {
            amount_cents: x.amount_cents,
            counterparty: x.counterparty,
            category: None,
        });
    }
    if let Some(x) = patterns::capture(paypal_received_re(), subject) {
        return Some(ProviderHit {
            amount_cents: x.amount_cents.map(|cents| -cents),
            counterparty: x.counterparty,
            category: None,
        });
    }
    if let Some(x) = patterns::capture(paypal_purchase_re(), subject) {
        let counterparty = patterns::capture(paypal_seller_line_re(), body)
            .and_then(|line| line.counterparty);
        return Some(ProviderHit {
            amount_cents: x.amount_cents,
            counterparty,
            category: None,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use chrono::NaiveDateTime;
    use std::collections::HashMap;

    fn test_config() -> Config {
        let mut attribution = HashMap::new();
        attribution.insert("sam@example.com".to_string(), "Sam".to_string());
        Config {
            settings: Settings {
                period_days: 14,
                template_partition: "Template".to_string(),
                tax_multiplier: 1.0875,
                forwarding_relay: "relay@example.com".to_string(),
                default_attribution: "Shared".to_string(),
                search_query: String::new(),
                window_start_row: 4,
                window_rows: 40,
                date_col: 1,
                meta_offset: 2,
                checkbox_col: 7,
            },
            attribution,
        }
    }

    fn message(sender: &str, subject: &str, body: &str) -> RawMessage {
        RawMessage {
            id: "<m1@example.com>".to_string(),
            sender: sender.to_string(),
            destination: "sam@example.com".to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            date: NaiveDateTime::parse_from_str("2026-07-07 10:02:11", "%Y-%m-%d %H:%M:%S")
                .expect("valid datetime"),
            thread_id: "thread_abc123".to_string(),
        }
    }

    #[test]
    fn card_purchase_subject_yields_debit() {
        let msg = message(
            "Chase <no.reply.alerts@chase.com>",
            "Your $42.10 transaction with Example Store",
            "",
        );
        let receipt = classify(&msg, &test_config()).expect("classify");
        assert_eq!(receipt.amount_cents, Some(4210));
        assert_eq!(receipt.counterparty.as_deref(), Some("Example Store"));
        assert_eq!(receipt.provider_label.as_deref(), Some("Chase"));
    }

    #[test]
    fn pending_credit_negates_and_reads_merchant_from_body() {
        let msg = message(
            "no.reply.alerts@chase.com",
            "You have a $5.00 credit pending on your credit card",
            "Account ending 1234\nMerchant    Example Store\nCategory    Merchandise",
        );
        let receipt = classify(&msg, &test_config()).expect("classify");
        assert_eq!(receipt.amount_cents, Some(-500));
        assert_eq!(receipt.counterparty.as_deref(), Some("Example Store"));
    }

    #[test]
    fn venmo_received_payment_is_a_credit() {
        let msg = message("venmo@venmo.com", "Alex Kim paid you $20.00", "");
        let receipt = classify(&msg, &test_config()).expect("classify");
        assert_eq!(receipt.amount_cents, Some(-2000));
        assert_eq!(receipt.counterparty.as_deref(), Some("Alex Kim"));
    }

    #[test]
    fn unmatched_subject_from_known_provider_is_blank_not_an_error() {
        let msg = message("venmo@venmo.com", "Your 2026 year in review", "");
        let receipt = classify(&msg, &test_config()).expect("classify");
        assert!(receipt.is_blank());
        assert_eq!(receipt.provider_label.as_deref(), Some("Venmo"));
    }

    #[test]
    fn unknown_sender_fails_classification() {
        let msg = message("noreply@unrelated.example", "Your receipt", "");
        let err = classify(&msg, &test_config()).unwrap_err();
        assert!(matches!(err, Error::UnknownProvider(_)));
    }

    #[test]
    fn forwarded_mail_resolves_origin_and_attributes_the_relay() {
        let body = "\
---------- Forwarded message ---------
From: Venmo <venmo@venmo.com>
Date: Tue, Jul 7, 2026 at 10:02 AM
Subject: You paid Alex Kim $12.50
To: <sam@example.com>

You paid Alex Kim $12.50";
        let msg = message("relay@example.com", "Fwd: You paid Alex Kim $12.50", body);
        let receipt = classify(&msg, &test_config()).expect("classify");
        assert_eq!(receipt.amount_cents, Some(1250));
        assert_eq!(receipt.provider_label.as_deref(), Some("Sam fwd: Venmo"));
    }

    #[test]
    fn forwarded_mail_without_banner_is_unresolvable() {
        let msg = message("relay@example.com", "Fwd: something", "no banner here");
        let err = classify(&msg, &test_config()).unwrap_err();
        assert!(matches!(err, Error::UnresolvableForward));
    }

    #[test]
    fn classification_is_deterministic() {
        let msg = message("venmo@venmo.com", "You paid Alex Kim $12.50", "");
        let a = classify(&msg, &test_config()).expect("first");
        let b = classify(&msg, &test_config()).expect("second");
        assert_eq!(a, b);
    }
}
