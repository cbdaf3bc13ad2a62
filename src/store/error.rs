//! Store error types.

use std::fmt;

/// Errors that can occur while buffering or flushing rows.
#[derive(Debug)]
pub enum PersistenceError {
    /// Encoder or sender error reported by the store client
    Store(questdb::Error),
    /// The blocking flush task did not complete
    Io(std::io::Error),
    /// Connecting to the store took too long
    ConnectTimeout(String),
    /// Value that cannot be encoded (out-of-range timestamp)
    InvalidValue(String),
    /// Row without any column
    EmptyRow(&'static str),
    /// Unusable connection string
    Conf(String),
    /// Flush failed and the buffer was too large to keep for retry
    Discarded { bytes: usize, rows: usize },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {}", e),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::ConnectTimeout(addr) => write!(f, "timed out connecting to {}", addr),
            Self::InvalidValue(e) => write!(f, "invalid value: {}", e),
            Self::EmptyRow(table) => write!(f, "row for {} has no columns", table),
            Self::Conf(e) => write!(f, "invalid store configuration: {}", e),
            Self::Discarded { bytes, rows } => {
                write!(f, "discarded {} rows ({} bytes) after failed flush", rows, bytes)
            }
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<questdb::Error> for PersistenceError {
    fn from(err: questdb::Error) -> Self {
        Self::Store(err)
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
