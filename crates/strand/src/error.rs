//! Error types for Strand parties.
//!
//! Every component crate has its own error enum. They all flatten into
//! [`ProtocolError`], so callers match one set of variants.

use strand_core::{
    Address, BranchId, ChannelId, CoreError, Ed25519PublicKey, PayloadKind, ValidationError,
};
use strand_keyload::KeyloadError;
use strand_ledger::LedgerError;
use strand_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // ─────────────────────────────────────────────────────────────────────────
    // Identity and encoding
    // ─────────────────────────────────────────────────────────────────────────
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("malformed address: {0}")]
    MalformedAddress(String),

    #[error("corrupt envelope: {0}")]
    CorruptEnvelope(String),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported payload kind: {0:#06x}")]
    UnsupportedPayloadKind(u16),

    #[error("envelope of {size} bytes exceeds the {limit} byte limit")]
    EnvelopeTooLarge { size: usize, limit: usize },

    /// Message breaks a structural rule.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    // ─────────────────────────────────────────────────────────────────────────
    // Cryptography
    // ─────────────────────────────────────────────────────────────────────────
    #[error("signature invalid")]
    SignatureInvalid,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("crypto error: {0}")]
    Crypto(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Topology
    // ─────────────────────────────────────────────────────────────────────────
    #[error("address collision at {0}")]
    AddressCollision(Address),

    /// The previous link is not known yet. Fetch `missing` and retry.
    #[error("message {address} links to unknown message {missing}")]
    OutOfOrder { address: Address, missing: Address },

    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("unknown branch: {0}")]
    UnknownBranch(BranchId),

    #[error("channel mismatch: expected {expected}, found {found}")]
    ChannelMismatch { expected: ChannelId, found: ChannelId },

    // ─────────────────────────────────────────────────────────────────────────
    // Access control and state machines
    // ─────────────────────────────────────────────────────────────────────────
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("channel already announced")]
    AlreadyAnnounced,

    #[error("no announcement known")]
    AnnouncementUnknown,

    #[error("branch {0} has never been keyed")]
    BranchNotKeyed(BranchId),

    #[error("not an announcement: {0:?}")]
    NotAnAnnouncement(PayloadKind),

    #[error("not a keyload: {0:?}")]
    NotAKeyload(PayloadKind),

    #[error("unexpected payload kind: {0:?}")]
    UnexpectedPayloadKind(PayloadKind),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(Ed25519PublicKey),

    #[error("channel does not allow additional branches")]
    BranchingDisabled,

    #[error("operation needs an active party, state is {0}")]
    NotActive(&'static str),

    // ─────────────────────────────────────────────────────────────────────────
    // Ledger
    // ─────────────────────────────────────────────────────────────────────────
    #[error("nothing at {0} yet")]
    NotFound(Address),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("recovery of {address} exceeded depth {depth}")]
    RecoveryDepthExceeded { address: Address, depth: usize },
}

impl ProtocolError {
    /// Whether the failure is a control-flow signal that retrying or
    /// fetching missing data can resolve.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::OutOfOrder { .. } | Self::NotFound(_) | Self::Transport(_)
        )
    }
}

impl From<CoreError> for ProtocolError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSeed(s) => Self::InvalidSeed(s),
            CoreError::UnsupportedEncoding(s) => Self::UnsupportedEncoding(s),
            CoreError::InvalidPublicKey => Self::Crypto("invalid public key".into()),
            CoreError::SignatureInvalid => Self::SignatureInvalid,
            CoreError::DecryptionFailed => Self::DecryptionFailed,
            CoreError::EncryptionFailed(s) => Self::Crypto(s),
            CoreError::MalformedAddress(s) => Self::MalformedAddress(s),
            CoreError::CorruptEnvelope(s) => Self::CorruptEnvelope(s),
            CoreError::Encoding(s) => Self::CorruptEnvelope(s),
            CoreError::UnsupportedPayloadKind(k) => Self::UnsupportedPayloadKind(k),
            CoreError::UnsupportedVersion(v) => Self::UnsupportedVersion(v),
            CoreError::EnvelopeTooLarge { size, limit } => Self::EnvelopeTooLarge { size, limit },
            CoreError::AddressCollision(a) => Self::AddressCollision(a),
            CoreError::OutOfOrder { address, missing } => Self::OutOfOrder { address, missing },
            CoreError::UnknownChannel(c) => Self::UnknownChannel(c),
            CoreError::UnknownBranch(b) => Self::UnknownBranch(b),
            CoreError::ChannelMismatch { expected, found } => {
                Self::ChannelMismatch { expected, found }
            }
            CoreError::NotAnAnnouncement(k) => Self::NotAnAnnouncement(k),
            CoreError::Invalid(v) => Self::Invalid(v),
        }
    }
}

impl From<KeyloadError> for ProtocolError {
    fn from(e: KeyloadError) -> Self {
        match e {
            KeyloadError::Unauthorized(s) => Self::Unauthorized(s),
            KeyloadError::SignatureInvalid => Self::SignatureInvalid,
            KeyloadError::DecryptionFailed => Self::DecryptionFailed,
            KeyloadError::NotAKeyload(k) => Self::NotAKeyload(k),
            KeyloadError::UnknownRecipient(pk) => Self::UnknownRecipient(pk),
            KeyloadError::InvalidKey(s) => Self::Crypto(s),
            KeyloadError::Core(e) => e.into(),
        }
    }
}

impl From<LedgerError> for ProtocolError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(a) => Self::NotFound(a),
            LedgerError::Collision(a) => Self::AddressCollision(a),
            LedgerError::Transport(s) => Self::Transport(s),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<SyncError> for ProtocolError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Ledger(e) => e.into(),
            SyncError::RecoveryDepthExceeded { address, depth } => {
                Self::RecoveryDepthExceeded { address, depth }
            }
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
