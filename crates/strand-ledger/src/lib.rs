//! # Strand Ledger
//!
//! The ledger collaborator for Strand. Every protocol message is an envelope
//! posted at an [`Address`](strand_core::Address); parties only ever post and
//! fetch.
//!
//! ## Key Types
//!
//! - [`Ledger`] - The async trait the protocol talks to
//! - [`SqliteLedger`] - SQLite-based persistent ledger
//! - [`MemoryLedger`] - In-memory ledger with fault injection for tests
//! - [`BranchReader`] - Lazy, restartable reader over one branch
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strand_ledger::{Ledger, SqliteLedger};
//!
//! async fn example() {
//!     let ledger = SqliteLedger::open("strand.db").unwrap();
//!     // let outcome = ledger.post(&address, &bytes).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent posts**: Posting the same bytes twice returns `AlreadyPresent`
//! - **Collision detection**: Different bytes at an occupied address return `Collision`
//! - **Missing is retryable**: `NotFound` may turn into data once the ledger catches up

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{LedgerError, Result};
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;
pub use traits::{BranchReader, Envelope, Ledger, LedgerExt, PostOutcome, DEFAULT_PAGE_SIZE};
