use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the whole crate.
///
/// `UnknownProvider` and `UnresolvableForward` are per-message failures: the
/// aggregator contains them as thread errors and keeps going.
/// `PartitionNotFound` and the split precondition variants are fatal and
/// surface to the caller before any ledger mutation happens.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no provider is registered for sender address {0}")]
    UnknownProvider(String),

    #[error("no forwarding banner recognized in message body")]
    UnresolvableForward,

    #[error("no partition window contains {0}")]
    PartitionNotFound(chrono::NaiveDate),

    #[error("partition {partition} has no room for {needed} more row(s)")]
    WindowFull { partition: String, needed: usize },

    #[error("row {0} is empty; nothing to split")]
    EmptySplitTarget(usize),

    #[error("row {0} is already inside a split group")]
    AlreadySplit(usize),

    #[error("unknown partition {0}")]
    UnknownPartition(String),

    #[error("unparseable amount {0:?}")]
    BadAmount(String),

    #[error("config: {0}")]
    Config(String),

    #[error("mail store: {0}")]
    Mail(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
