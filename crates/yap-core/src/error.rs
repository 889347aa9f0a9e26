//! Error types for Yap Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transaction conflict: gave up after {attempts} attempts")]
    TransactionConflict { attempts: u32 },

    #[error("Store unreachable: {0}")]
    Offline(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed document {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether the failure came from missing connectivity
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::Offline(_))
    }
}

/// Result type alias for Yap operations
pub type Result<T> = std::result::Result<T, Error>;
