//! Error types for the ledger module.

use strand_core::Address;
use thiserror::Error;

/// Errors that can occur while talking to a ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Nothing is posted at the address (yet).
    #[error("no envelope at {0}")]
    NotFound(Address),

    /// Different bytes are already posted at the address.
    #[error("address {0} already holds a different envelope")]
    Collision(Address),

    /// The ledger could not be reached or refused the request.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("migration error: {0}")]
    Migration(String),

    /// The blocking worker running a query panicked or its lock was
    /// poisoned.
    #[error("storage worker failed: {0}")]
    Worker(String),
}

impl LedgerError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Transport(_))
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
