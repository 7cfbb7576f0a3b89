use chrono::NaiveDate;
use chrono::NaiveDateTime;
use log::info;
use std::cmp::Ordering;

use crate::classifier::{self, Receipt};
use crate::config::Config;
use crate::error::Error;
use crate::mail_store::{MailStore, RawMessage, Thread};

const ERROR_BANNER: &str = "--------";
const NOTE_BODY_PREFIX_CHARS: usize = 80;

/// Everything one thread produced: receipts in message order, plus
/// diagnostic notes and errors. Kept by the caller only when it holds
/// receipts or errors; a notes-only result is discarded (and the discard is
/// logged).
#[derive(Debug, Clone)]
pub struct ThreadResult {
    pub thread_id: String,
    pub last_activity: NaiveDateTime,
    pub receipts: Vec<Receipt>,
    pub notes: Vec<String>,
    pub errors: Vec<String>,
}

impl ThreadResult {
    pub fn is_keepable(&self) -> bool {
        !self.receipts.is_empty() || !self.errors.is_empty()
    }
}

/// Walks one thread's messages through classification.
///
/// A failing message becomes a thread error and processing continues with
/// its siblings; a blank receipt becomes a thread note. Failure to
/// enumerate the messages at all is recorded as a single thread error.
/// Returns `None` when the result is not worth keeping.
pub fn aggregate_thread(
    store: &dyn MailStore,
    thread: &Thread,
    config: &Config,
) -> Option<ThreadResult> {
    let mut result = ThreadResult {
        thread_id: thread.id.clone(),
        last_activity: thread.last_activity,
        receipts: Vec::new(),
        notes: Vec::new(),
        errors: Vec::new(),
    };

    match store.messages(thread) {
        Ok(messages) => {
            for message in &messages {
                match classifier::classify(message, config) {
                    Ok(receipt) if receipt.is_blank() => {
                        result.notes.push(describe_unmatched(message, &receipt));
                    }
                    Ok(receipt) => result.receipts.push(receipt),
                    Err(err) => result.errors.push(describe_failure(message, &err)),
                }
            }
        }
        Err(err) => result.errors.push(format!(
            "thread {} \"{}\": could not enumerate messages: {err}",
            thread.id, thread.subject
        )),
    }

    if !result.is_keepable() {
        for note in &result.notes {
            info!("discarding note from thread {}: {note}", thread.id);
        }
        return None;
    }
    Some(result)
}

pub fn classify_and_aggregate(
    store: &dyn MailStore,
    threads: &[Thread],
    config: &Config,
) -> Vec<ThreadResult> {
    threads
        .iter()
        .filter_map(|thread| aggregate_thread(store, thread, config))
        .collect()
}

/// Flattens thread results into one receipt list ready for placement.
///
/// A thread with errors or notes but no receipts gets a placeholder receipt
/// dated at its last activity, purely to carry the diagnostic text. Each
/// thread's errors (joined under a banner) and notes land on its first
/// receipt. The final list is sorted ascending by date; equal dates keep
/// their input order.
pub fn flatten_for_placement(results: &[ThreadResult]) -> Vec<Receipt> {
    let mut receipts = Vec::new();
    for result in results {
        let mut thread_receipts = result.receipts.clone();
        if thread_receipts.is_empty() {
            thread_receipts.push(Receipt::blank(result.last_activity.date()));
        }
        let first = thread_receipts
            .first_mut()
            .expect("thread always has at least the placeholder");
        if !result.errors.is_empty() {
            first.error = result.errors.join(&format!("\n{ERROR_BANNER}\n"));
        }
        if !result.notes.is_empty() {
            first.note = result.notes.join("\n");
        }
        receipts.extend(thread_receipts);
    }
    receipts.sort_by(|a, b| {
        if same_day(a.date, b.date) {
            Ordering::Equal
        } else {
            a.date.cmp(&b.date)
        }
    });
    receipts
}

/// Date equality used when ordering receipts for placement.
pub fn same_day(a: NaiveDate, b: NaiveDate) -> bool {
    a == b
}

fn describe_unmatched(message: &RawMessage, receipt: &Receipt) -> String {
    let provider = receipt.provider_label.as_deref().unwrap_or("unknown");
    let prefix: String = message
        .body
        .chars()
        .take(NOTE_BODY_PREFIX_CHARS)
        .collect::<String>()
        .replace(['\r', '\n'], " ");
    format!(
        "{provider} message \"{}\" on {} (thread {}) is not a transaction: {}",
        message.subject,
        message.date.date(),
        message.thread_id,
        prefix.trim()
    )
}

fn describe_failure(message: &RawMessage, err: &Error) -> String {
    format!(
        "message {} \"{}\" on {} (thread {}): {err}",
        message.id,
        message.subject,
        message.date.date(),
        message.thread_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::Result;
    use std::collections::HashMap;

    struct FakeMailStore {
        messages: HashMap<String, Vec<RawMessage>>,
        broken_threads: Vec<String>,
    }

    impl MailStore for FakeMailStore {
        fn search(&self, _query: &str) -> Result<Vec<Thread>> {
            unimplemented!("tests drive aggregate_thread directly")
        }

        fn messages(&self, thread: &Thread) -> Result<Vec<RawMessage>> {
            if self.broken_threads.contains(&thread.id) {
                return Err(Error::Mail("backend unavailable".to_string()));
            }
            Ok(self.messages.get(&thread.id).cloned().unwrap_or_default())
        }

        fn mark_processed(&self, _thread: &Thread) -> Result<()> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            settings: Settings {
                period_days: 14,
                template_partition: "Template".to_string(),
                tax_multiplier: 1.0875,
                forwarding_relay: String::new(),
                default_attribution: "Shared".to_string(),
                search_query: String::new(),
                window_start_row: 4,
                window_rows: 40,
                date_col: 1,
                meta_offset: 2,
                checkbox_col: 7,
            },
            attribution: HashMap::new(),
        }
    }

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
            .expect("valid datetime")
    }

    fn message(id: &str, thread_id: &str, sender: &str, subject: &str, when: NaiveDateTime) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            sender: sender.to_string(),
            destination: "sam@example.com".to_string(),
            subject: subject.to_string(),
            body: String::new(),
            date: when,
            thread_id: thread_id.to_string(),
        }
    }

    fn thread(id: &str, when: NaiveDateTime) -> Thread {
        Thread {
            id: id.to_string(),
            subject: "subject".to_string(),
            last_activity: when,
        }
    }

    #[test]
    fn one_bad_message_does_not_abort_the_thread() {
        let when = at("2026-07-07", "10:00:00");
        let store = FakeMailStore {
            messages: HashMap::from([(
                "t1".to_string(),
                vec![
                    message("m1", "t1", "stranger@unknown.example", "hello", when),
                    message("m2", "t1", "venmo@venmo.com", "You paid Alex Kim $12.50", when),
                ],
            )]),
            broken_threads: Vec::new(),
        };

        let result = aggregate_thread(&store, &thread("t1", when), &test_config())
            .expect("keepable: has a receipt and an error");
        assert_eq!(result.receipts.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("no provider is registered"));
    }

    #[test]
    fn unmatched_provider_mail_becomes_a_note() {
        let when = at("2026-07-07", "10:00:00");
        let store = FakeMailStore {
            messages: HashMap::from([(
                "t1".to_string(),
                vec![
                    message("m1", "t1", "venmo@venmo.com", "You paid Alex Kim $12.50", when),
                    message("m2", "t1", "venmo@venmo.com", "Your 2026 year in review", when),
                ],
            )]),
            broken_threads: Vec::new(),
        };

        let result = aggregate_thread(&store, &thread("t1", when), &test_config())
            .expect("keepable: has a receipt");
        assert_eq!(result.receipts.len(), 1);
        assert_eq!(result.notes.len(), 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn notes_only_thread_is_discarded() {
        let when = at("2026-07-07", "10:00:00");
        let store = FakeMailStore {
            messages: HashMap::from([(
                "t1".to_string(),
                vec![message("m1", "t1", "venmo@venmo.com", "Your 2026 year in review", when)],
            )]),
            broken_threads: Vec::new(),
        };

        assert!(aggregate_thread(&store, &thread("t1", when), &test_config()).is_none());
    }

    #[test]
    fn enumeration_failure_is_one_thread_error() {
        let when = at("2026-07-07", "10:00:00");
        let store = FakeMailStore {
            messages: HashMap::new(),
            broken_threads: vec!["t1".to_string()],
        };

        let result = aggregate_thread(&store, &thread("t1", when), &test_config())
            .expect("keepable: has an error");
        assert!(result.receipts.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("could not enumerate"));
    }

    #[test]
    fn flatten_synthesizes_a_placeholder_for_receiptless_threads() {
        let when = at("2026-07-07", "10:00:00");
        let results = vec![ThreadResult {
            thread_id: "t1".to_string(),
            last_activity: when,
            receipts: Vec::new(),
            notes: vec!["a note".to_string()],
            errors: vec!["first error".to_string(), "second error".to_string()],
        }];

        let receipts = flatten_for_placement(&results);
        assert_eq!(receipts.len(), 1);
        let placeholder = &receipts[0];
        assert!(placeholder.is_blank());
        assert_eq!(placeholder.date, when.date());
        assert_eq!(
            placeholder.error,
            format!("first error\n{ERROR_BANNER}\nsecond error")
        );
        assert_eq!(placeholder.note, "a note");
        // the error renders before the note
        assert!(placeholder.annotation().starts_with("first error"));
    }

    #[test]
    fn flatten_attaches_diagnostics_to_the_first_real_receipt() {
        let when = at("2026-07-07", "10:00:00");
        let mut receipt = Receipt::blank(when.date());
        receipt.amount_cents = Some(1250);
        receipt.counterparty = Some("Alex Kim".to_string());
        let results = vec![ThreadResult {
            thread_id: "t1".to_string(),
            last_activity: when,
            receipts: vec![receipt],
            notes: vec!["a note".to_string()],
            errors: Vec::new(),
        }];

        let receipts = flatten_for_placement(&results);
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].note, "a note");
        assert!(receipts[0].error.is_empty());
    }

    #[test]
    fn flatten_sorts_by_date_and_keeps_input_order_for_equal_dates() {
        let day_one = at("2026-07-01", "09:00:00");
        let day_two = at("2026-07-02", "09:00:00");
        let mk = |date: NaiveDate, name: &str| {
            let mut r = Receipt::blank(date);
            r.amount_cents = Some(100);
            r.counterparty = Some(name.to_string());
            r
        };
        let results = vec![
            ThreadResult {
                thread_id: "t1".to_string(),
                last_activity: day_two,
                receipts: vec![mk(day_two.date(), "b"), mk(day_one.date(), "c")],
                notes: Vec::new(),
                errors: Vec::new(),
            },
            ThreadResult {
                thread_id: "t2".to_string(),
                last_activity: day_two,
                receipts: vec![mk(day_two.date(), "d"), mk(day_one.date(), "a")],
                notes: Vec::new(),
                errors: Vec::new(),
            },
        ];

        let flat = flatten_for_placement(&results);
        let names: Vec<&str> = flat
            .iter()
            .map(|r| r.counterparty.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["c", "a", "b", "d"]);
    }
}
