//! # Strand
//!
//! Secure multi-party channels over an append-only ledger.
//!
//! ## Overview
//!
//! An author announces a channel, subscribers ask to join, and the author
//! decides who may read and write each branch by publishing keyloads.
//! Every message is an envelope posted at a deterministic address, so any
//! party can find, verify and replay the channel from the ledger alone.
//!
//! ## Key Types
//!
//! - [`Author`] - Owns a channel: announces, keys branches, publishes
//! - [`Subscriber`] - Joins a channel and reads or writes where authorized
//! - [`Client`] - Binds a party to a [`Ledger`](strand_ledger::Ledger) and
//!   handles posting, retries and catch-up
//! - [`ChannelConfig`] - Seed, encoding, size limits and retry policy
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use strand::ledger::MemoryLedger;
//! use strand::{Author, ChannelConfig, Client, Subscriber};
//!
//! async fn example() -> strand::Result<()> {
//!     let ledger = Arc::new(MemoryLedger::new());
//!
//!     let mut author = Client::new(Author::new(ChannelConfig::new("AUTHOR"))?, ledger.clone());
//!     let announcement = author.party_mut().announce()?;
//!     author.post(&announcement).await?;
//!
//!     let mut subscriber = Client::new(Subscriber::new(ChannelConfig::new("SUB"))?, ledger);
//!     subscriber.receive(&announcement.address).await?;
//!     let request = subscriber.party_mut().subscribe(&announcement.address)?;
//!     subscriber.post(&request).await?;
//!
//!     author.sync().await?;
//!     let root = author.party().root_branch();
//!     let keyload = author.party_mut().share_keyload_for_everyone(&root)?;
//!     author.post(&keyload).await?;
//!     let packet = author.party_mut().publish_tagged(&root, b"public", b"secret")?;
//!     author.post(&packet).await?;
//!
//!     let report = subscriber.sync().await?;
//!     for unwrapped in &report.applied {
//!         if let Some((public, masked)) = unwrapped.payloads() {
//!             println!("{:?} {:?}", public, masked);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Single writer**: Every state change takes `&mut self`; one identity,
//!   one owner
//! - **No hidden I/O**: [`Author`] and [`Subscriber`] are synchronous; only
//!   [`Client`] talks to the ledger
//! - **Retries reuse addresses**: A failed post stays in the outbox and is
//!   reposted at the address it was given
//!
//! ## Re-exports
//!
//! - `strand::core` - Identities, addresses, messages and the codec
//! - `strand::keyload` - Keyloads, PSKs and payload masking
//! - `strand::ledger` - The ledger trait and its implementations
//! - `strand::sync` - Retry policy and catch-up

pub mod author;
pub mod client;
pub mod config;
pub mod error;
pub mod party;
pub mod subscriber;

pub use strand_core as core;
pub use strand_keyload as keyload;
pub use strand_ledger as ledger;
pub use strand_sync as sync;

pub use author::{Author, AuthorState};
pub use client::{ChannelReport, Client};
pub use config::{ChannelConfig, DEFAULT_MAX_ENVELOPE_SIZE};
pub use error::{ProtocolError, Result};
pub use party::{Outgoing, Participant, Party, Unwrapped, UnwrappedContent};
pub use subscriber::{Subscriber, SubscriberState};

pub use strand_core::{
    Address, BranchId, ChannelId, Ed25519PublicKey, Encoding, Message, PayloadKind, PskId,
};
pub use strand_keyload::{KeyloadOutcome, Psk};
