//! # Strand Sync
//!
//! Pull-based catch-up for Strand parties.
//!
//! ## Overview
//!
//! The ledger may lag, drop a post or hand out a branch listing with holes.
//! This crate wraps the [`Ledger`](strand_ledger::Ledger) calls with a
//! [`RetryPolicy`] and drives any [`Ingest`] target through a branch,
//! recovering missing ancestors by address.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Re-running a sync only produces duplicates
//! - **Resumable**: A [`SyncReport`] records the last position read
//! - **Nothing silently dropped**: Rejected and unresolved envelopes are reported
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strand_sync::{CatchUp, RetryPolicy};
//!
//! async fn example() {
//!     let catch_up = CatchUp::new(RetryPolicy::default());
//!     // let report = catch_up.sync_branch(&ledger, &mut party, channel, branch, None).await?;
//!     // for rejected in &report.rejected { ... }
//! }
//! ```

pub mod catchup;
pub mod error;
pub mod retry;

pub use catchup::{CatchUp, Ingest, IngestStatus, Rejected, SyncReport, DEFAULT_MAX_RECOVERY_DEPTH};
pub use error::{Result, SyncError};
pub use retry::{fetch_with_backoff, Backoff, RetryPolicy};
