//! # Strand Keyload
//!
//! Access control for Strand branches.
//!
//! ## Overview
//!
//! A branch starts open. The channel author keys it by publishing a
//! keyload: a signed message naming the complete set of subscriber keys and
//! pre-shared keys allowed into the branch, with a fresh branch key wrapped
//! for each of them. Consumers replace their local set with the keyload's,
//! and the keyload with the highest sequence wins.
//!
//! ## Encryption Model
//!
//! 1. **Branch key**: a ChaCha20-Poly1305 key, one per keyload, named by its [`KeyId`]
//! 2. **Shares**: the branch key wrapped per recipient via ephemeral X25519, and per PSK
//! 3. **Masked segments**: packet payloads sealed under the branch key, bound to
//!    the packet header and public part
//!
//! Superseded keys are kept, so packets sealed before a re-key stay readable
//! to those who could read them at the time.
//!
//! [`KeyId`]: strand_core::KeyId

pub mod error;
pub mod keyshare;
pub mod masked;
pub mod psk;
pub mod state;

pub use error::{KeyloadError, Result};
pub use keyshare::{key_id_for, Recipient};
pub use masked::{mask, unmask};
pub use psk::{Psk, PskStore};
pub use state::{AccessControl, AccessState, BranchAccess, KeyloadOutcome};
