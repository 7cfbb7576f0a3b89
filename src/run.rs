use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::aggregator;
use crate::config::Config;
use crate::error::Result;
use crate::ledger_store::LedgerStore;
use crate::mail_store::MailStore;
use crate::partitioner;

/// What one import run did, in a shape ready for display or JSON output.
#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub run_id: String,
    pub threads_seen: usize,
    pub threads_kept: usize,
    pub receipts: usize,
    pub errors: usize,
    pub partitions_created: usize,
    pub placed: BTreeMap<String, usize>,
    pub threads_marked: usize,
}

/// One full import pass: search threads, classify and aggregate, catch the
/// partitions up to `today`, place everything, then optionally mark clean
/// threads as processed. A thread that recorded any error is never marked,
/// even when some of its receipts were extracted and placed.
pub fn run_import(
    mail: &dyn MailStore,
    ledger: &dyn LedgerStore,
    config: &Config,
    today: NaiveDate,
    mark_processed: bool,
) -> Result<ImportSummary> {
    let run_id = Uuid::new_v4().to_string();
    let threads = mail.search(&config.settings.search_query)?;
    info!(
        "run {run_id}: {} thread(s) match {:?}",
        threads.len(),
        config.settings.search_query
    );

    let results = aggregator::classify_and_aggregate(mail, &threads, config);
    let partitions_created = partitioner::ensure_partitions_current(ledger, config, today)?;
    let placed = partitioner::place_receipts(ledger, config, &results)?;

    let mut threads_marked = 0;
    if mark_processed {
        for result in &results {
            if !result.errors.is_empty() {
                continue;
            }
            if let Some(thread) = threads.iter().find(|t| t.id == result.thread_id) {
                mail.mark_processed(thread)?;
                threads_marked += 1;
            }
        }
    }

    let receipts = results.iter().map(|r| r.receipts.len()).sum();
    let errors: usize = results.iter().map(|r| r.errors.len()).sum();
    if errors > 0 {
        warn!("run {run_id}: {errors} processing error(s) recorded as row annotations");
    }

    Ok(ImportSummary {
        run_id,
        threads_seen: threads.len(),
        threads_kept: results.len(),
        receipts,
        errors,
        partitions_created,
        placed,
        threads_marked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::ledger_store::SqliteLedgerStore;
    use crate::mail_store::{RawMessage, Thread};
    use chrono::NaiveDateTime;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeMailStore {
        threads: Vec<Thread>,
        messages: HashMap<String, Vec<RawMessage>>,
        marked: RefCell<Vec<String>>,
    }

    impl MailStore for FakeMailStore {
        fn search(&self, _query: &str) -> Result<Vec<Thread>> {
            Ok(self.threads.clone())
        }

        fn messages(&self, thread: &Thread) -> Result<Vec<RawMessage>> {
            Ok(self.messages.get(&thread.id).cloned().unwrap_or_default())
        }

        fn mark_processed(&self, thread: &Thread) -> Result<()> {
            self.marked.borrow_mut().push(thread.id.clone());
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
                window_rows: 10,
                date_col: 1,
                meta_offset: 2,
                checkbox_col: 7,
            },
            attribution: HashMap::new(),
        }
    }

    fn at(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").expect("valid datetime")
    }

    fn message(id: &str, thread_id: &str, sender: &str, subject: &str, when: &str) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            sender: sender.to_string(),
            destination: "sam@example.com".to_string(),
            subject: subject.to_string(),
            body: String::new(),
            date: at(when),
            thread_id: thread_id.to_string(),
        }
    }

    fn thread(id: &str, when: &str) -> Thread {
        Thread {
            id: id.to_string(),
            subject: "subject".to_string(),
            last_activity: at(when),
        }
    }

    #[test]
    fn clean_threads_are_marked_and_errored_threads_are_not() {
        let store = FakeMailStore {
            threads: vec![
                thread("clean", "2026-07-07 10:00:00"),
                thread("dirty", "2026-07-07 11:00:00"),
            ],
            messages: HashMap::from([
                (
                    "clean".to_string(),
                    vec![message(
                        "m1",
                        "clean",
                        "venmo@venmo.com",
                        "You paid Alex Kim $12.50",
                        "2026-07-07 10:00:00",
                    )],
                ),
                (
                    "dirty".to_string(),
                    vec![
                        message(
                            "m2",
                            "dirty",
                            "venmo@venmo.com",
                            "You paid Alex Kim $3.00",
                            "2026-07-07 11:00:00",
                        ),
                        message(
                            "m3",
                            "dirty",
                            "stranger@unknown.example",
                            "hello",
                            "2026-07-07 11:05:00",
                        ),
                    ],
                ),
            ]),
            marked: RefCell::new(Vec::new()),
        };

        let ledger = SqliteLedgerStore::open_in_memory().expect("open ledger");
        ledger.create_partition("Template").expect("template");
        ledger
            .create_partition("2026-07-01 - 2026-07-14")
            .expect("partition");

        let config = test_config();
        let today = NaiveDate::from_ymd_opt(2026, 7, 8).expect("valid date");
        let summary = run_import(&store, &ledger, &config, today, true).expect("run");

        assert_eq!(summary.threads_seen, 2);
        assert_eq!(summary.threads_kept, 2);
        assert_eq!(summary.receipts, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.partitions_created, 0);
        assert_eq!(summary.placed.get("2026-07-01 - 2026-07-14"), Some(&2));
        assert_eq!(*store.marked.borrow(), vec!["clean".to_string()]);
    }
}
