//! # Strand Core
//!
//! Pure primitives for Strand channels: identities, addresses, envelopes and
//! the per-party message topology.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Identity`] - Seed-derived signing and key-exchange keys
//! - [`Address`] - `(channel, branch, sequence)` ledger location
//! - [`Message`] - Header, kind-specific content and optional signature
//! - [`Topology`] - Arena-backed DAG of the messages a party has seen
//!
//! ## Envelopes
//!
//! Messages travel as deterministic CBOR envelopes. See the [`canonical`] module.

pub mod address;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod message;
pub mod topology;
pub mod types;
pub mod validation;

pub use address::{channel_address, next_address, Address, SequenceCounter, ADDRESS_LEN};
pub use canonical::{decode, decode_bounded, encode, encode_bounded, header_bytes};
pub use crypto::{
    Ed25519PublicKey, Ed25519Signature, EncryptionKey, EncryptionNonce, Keypair, X25519PublicKey,
};
pub use error::{CoreError, Result, ValidationError};
pub use identity::{Encoding, Identity, MAX_SEED_LEN};
pub use message::{
    AnnouncementBody, Content, KeyloadBody, MaskedSegment, Message, MessageBuilder,
    MessageHeader, PacketBody, PayloadKind, PskShare, RecipientShare, SubscribeBody,
    PROTOCOL_VERSION,
};
pub use topology::{Admission, BranchHealth, BranchState, Channel, RecordResult, Topology};
pub use types::{BranchId, ChannelId, KeyId, PskId};
pub use validation::{validate, validate_structure, verify_signature, verify_signed_by};
