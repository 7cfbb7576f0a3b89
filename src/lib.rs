mod aggregator;
mod classifier;
mod config;
mod error;
mod forward;
mod ledger_store;
mod mail_store;
mod money;
mod partitioner;
mod patterns;
mod run;
mod split;

pub use aggregator::{
    aggregate_thread, classify_and_aggregate, flatten_for_placement, same_day, ThreadResult,
};
pub use classifier::{classify, Provider, Receipt};
pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use forward::{normalize_address, resolve_forward, ForwardedOrigin};
pub use ledger_store::{LedgerStore, SqliteLedgerStore};
pub use mail_store::{EmlMailStore, MailStore, RawMessage, Thread};
pub use money::{format_cents, parse_cents};
pub use partitioner::{
    create_next_partition_if_needed, ensure_partitions_current, find_partition_for,
    partition_window_name, place_receipts, scan_partitions, Partition,
};
pub use patterns::{capture, first_capture, Extraction};
pub use run::{run_import, ImportSummary};
pub use split::{dates_match, same_transaction, split_entry, RowRange};
