use super::{ColumnType, Record};
use thiserror::Error;

/// A single destination whose batch write failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationFailure {
    pub destination: usize,
    pub endpoint: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Record does not match table '{table}': {detail}")]
    SchemaMismatch { table: String, detail: String },

    #[error("Column '{column}' of table '{table}' cannot be used as a key: {reason}")]
    InvalidKeyColumn {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Column type {0} cannot be encoded as a key")]
    UnsupportedKeyType(ColumnType),

    #[error("Invalid value for column '{column}': {detail}")]
    InvalidValue { column: String, detail: String },

    #[error("Duplicate primary key rejected for table '{0}'")]
    DuplicateKeyRejected(String),

    /// Carries every record that was in flight for the failed destinations plus any
    /// input records that were never processed. Records already written are not included.
    #[error(
        "Write failed for {} destination(s), {} record(s) carried for retry",
        .failures.len(),
        .records.len()
    )]
    DestinationWriteFailed {
        failures: Vec<DestinationFailure>,
        records: Vec<Record>,
    },

    #[error("Topology unavailable: {0}")]
    TopologyUnavailable(String),

    #[error("Topology changed from {previous} to {current} destination(s); rebuild required")]
    TopologyChanged { previous: usize, current: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker for destination {0} has stopped")]
    WorkerStopped(usize),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Records the caller must resubmit, if this error carries any.
    pub fn carried_records(&self) -> &[Record] {
        match self {
            Self::DestinationWriteFailed { records, .. } => records,
            _ => &[],
        }
    }

    /// Consumes the error and returns the carried retry set.
    pub fn into_carried_records(self) -> Vec<Record> {
        match self {
            Self::DestinationWriteFailed { records, .. } => records,
            _ => Vec::new(),
        }
    }

    pub fn failures(&self) -> &[DestinationFailure] {
        match self {
            Self::DestinationWriteFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for IngestError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
