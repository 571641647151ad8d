//! Error types for Strand core.

use thiserror::Error;

use crate::address::Address;
use crate::message::PayloadKind;
use crate::types::{BranchId, ChannelId};

/// Core errors raised by identities, codecs and the topology.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("malformed address: {0}")]
    MalformedAddress(String),

    #[error("corrupt envelope: {0}")]
    CorruptEnvelope(String),

    #[error("unsupported payload kind: {0:#06x}")]
    UnsupportedPayloadKind(u16),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error("envelope of {size} bytes exceeds the {limit} byte limit")]
    EnvelopeTooLarge { size: usize, limit: usize },

    #[error("address collision at {0}")]
    AddressCollision(Address),

    #[error("message {address} links to unknown message {missing}")]
    OutOfOrder { address: Address, missing: Address },

    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("unknown branch: {0}")]
    UnknownBranch(BranchId),

    #[error("channel mismatch: expected {expected}, found {found}")]
    ChannelMismatch { expected: ChannelId, found: ChannelId },

    #[error("not an announcement: {0:?}")]
    NotAnAnnouncement(PayloadKind),

    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Structural rule violations found before any cryptographic check.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("header kind {header:?} does not match content kind {content:?}")]
    KindMismatch {
        header: PayloadKind,
        content: PayloadKind,
    },

    #[error("announcement must sit at sequence 0 of the root branch without a previous link")]
    MisplacedAnnouncement,

    #[error("announcement channel does not derive from its author key")]
    ForeignChannel,

    #[error("only announcements may sit at sequence 0 of the root branch")]
    ReservedAddress,

    #[error("message is missing its previous link")]
    MissingPreviousLink,

    #[error("previous link points into another channel")]
    CrossChannelLink,

    #[error("publisher does not match the key carried in the body")]
    PublisherMismatch,

    #[error("subscription is not addressed to the subscriber's slot")]
    WrongSubscriptionSlot,

    #[error("subscription does not link to the channel announcement")]
    DetachedSubscription,

    #[error("message links to itself")]
    SelfLink,

    #[error("{0:?} messages must be signed")]
    MissingSignature(PayloadKind),

    #[error("sequence {to} jumps too far past {from}")]
    SequenceJump { from: u64, to: u64 },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
