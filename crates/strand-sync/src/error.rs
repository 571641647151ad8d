//! Error types for the sync module.

use strand_core::Address;
use strand_ledger::LedgerError;
use thiserror::Error;

/// Errors that abort a catch-up run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The ledger failed after all retries.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Ancestor recovery went deeper than allowed.
    #[error("recovery of {address} exceeded depth {depth}")]
    RecoveryDepthExceeded { address: Address, depth: usize },
}

impl SyncError {
    /// Whether a later run may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_retryable(),
            Self::RecoveryDepthExceeded { .. } => false,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
