//! Error types for the keyload module.

use strand_core::{CoreError, Ed25519PublicKey, PayloadKind};
use thiserror::Error;

/// Errors that can occur while issuing or applying keyloads.
#[derive(Debug, Error)]
pub enum KeyloadError {
    /// Caller is not allowed to perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Keyload is not signed by the channel author.
    #[error("keyload is not signed by the channel author")]
    SignatureInvalid,

    /// A wrapped key or masked segment failed to decrypt.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Message handed to the keyload path is some other kind.
    #[error("not a keyload: {0:?}")]
    NotAKeyload(PayloadKind),

    /// Recipient has no known exchange key.
    #[error("unknown recipient: {0}")]
    UnknownRecipient(Ed25519PublicKey),

    /// Unwrapped key material is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for keyload operations.
pub type Result<T> = std::result::Result<T, KeyloadError>;
