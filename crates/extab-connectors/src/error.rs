//! Typed errors for the connectors crate.

use thiserror::Error;

/// Errors raised while driving an external table.
///
/// Predicates that cannot be pushed down are not errors; see
/// [`crate::translate::Translation::NotPushable`].
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The statement category has no access mode mapping.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),
    /// The backend could not locate or parse its resource.
    #[error("cannot open table {table}: {reason}")]
    BackendOpen { table: String, reason: String },
    /// Reading a row from an open backend failed.
    #[error("read failed: {0}")]
    BackendRead(String),
    /// The requested index operation is impossible for this table.
    #[error("index conflict: {0}")]
    IndexConflict(String),
    /// The schema change cannot be applied to this table.
    #[error("alter rejected: {0}")]
    AlterRejected(String),
    /// Write access requested on a read-only table.
    #[error("table {0} is read only")]
    ReadOnly(String),
    /// Internal signal that a cached handle belongs to an earlier statement.
    #[error("stale handle for table {0}")]
    StaleHandle(String),
    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}

impl ConnectorError {
    pub fn open(table: &str, reason: impl ToString) -> Self {
        ConnectorError::BackendOpen {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error aborts the current statement.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConnectorError::StaleHandle(_))
    }
}

impl From<url::ParseError> for ConnectorError {
    fn from(e: url::ParseError) -> Self {
        ConnectorError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
