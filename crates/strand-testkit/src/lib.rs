//! # Strand Testkit
//!
//! Testing utilities for Strand.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Identity vectors**: Known seeds whose derived keys must stay stable
//! - **Generators**: Proptest strategies for seeds, payloads and addresses
//! - **Fixtures**: A ledger with an announced author, and helpers to join it
//!
//! ## Identity Vectors
//!
//! ```rust
//! use strand_testkit::vectors::{all_vectors, verify_all_vectors};
//!
//! for vector in all_vectors() {
//!     println!("{}: {}", vector.name, vector.public_key_hex());
//! }
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use strand_testkit::generators::{payload, seed};
//!
//! proptest! {
//!     #[test]
//!     fn identity_is_deterministic(seed in seed()) {
//!         let a = strand::core::Identity::derive(&seed, "utf-8").unwrap();
//!         let b = strand::core::Identity::derive(&seed, "utf-8").unwrap();
//!         prop_assert_eq!(a.public_key(), b.public_key());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use strand_testkit::fixtures::TestChannel;
//!
//! async fn example() {
//!     let mut channel = TestChannel::announced("AUTHOR").await;
//!     let subscriber = channel.join("SUB").await;
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{config, multi_party_seeds, TestChannel};
pub use generators::{payload, seed, PacketParams};
pub use vectors::{all_vectors, verify_all_vectors, IdentityVector};
