//! Ledger trait: the collaborator boundary of the protocol core.
//!
//! A ledger is an append-only store of envelopes keyed by [`Address`]. The
//! protocol only ever posts and fetches; it never deletes or rewrites.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use strand_core::{Address, BranchId, ChannelId};

use crate::error::Result;

/// Default page size used by [`BranchReader`].
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// An envelope as stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub address: Address,
    pub bytes: Bytes,
}

/// Result of posting an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// The envelope was stored.
    Posted,
    /// Identical bytes were already stored at the address (idempotent).
    AlreadyPresent,
}

/// The Ledger trait: async interface for envelope posting and retrieval.
///
/// # Design Notes
///
/// - **Idempotent posts**: Posting the same bytes twice returns `AlreadyPresent`.
/// - **Collision detection**: Posting different bytes at an occupied address
///   fails with `Collision`.
/// - **Ordering**: Listings are ordered by sequence within a branch.
#[async_trait]
pub trait Ledger: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Envelope Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Post envelope bytes at an address.
    async fn post(&self, address: &Address, bytes: &[u8]) -> Result<PostOutcome>;

    /// Fetch the envelope at an address. Fails with `NotFound` if nothing is
    /// posted there yet.
    async fn fetch(&self, address: &Address) -> Result<Envelope>;

    // ─────────────────────────────────────────────────────────────────────────
    // Branch Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Envelopes of a branch with sequence strictly greater than `after`
    /// (all of them for `None`), ordered by sequence, at most `limit`.
    async fn fetch_after(
        &self,
        channel_id: &ChannelId,
        branch_id: &BranchId,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Envelope>>;

    /// Branches of a channel that hold at least one envelope.
    async fn branches(&self, channel_id: &ChannelId) -> Result<Vec<BranchId>>;
}

#[async_trait]
impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    async fn post(&self, address: &Address, bytes: &[u8]) -> Result<PostOutcome> {
        (**self).post(address, bytes).await
    }

    async fn fetch(&self, address: &Address) -> Result<Envelope> {
        (**self).fetch(address).await
    }

    async fn fetch_after(
        &self,
        channel_id: &ChannelId,
        branch_id: &BranchId,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Envelope>> {
        (**self).fetch_after(channel_id, branch_id, after, limit).await
    }

    async fn branches(&self, channel_id: &ChannelId) -> Result<Vec<BranchId>> {
        (**self).branches(channel_id).await
    }
}

/// Extension trait for common ledger patterns.
pub trait LedgerExt: Ledger {
    /// Read a whole branch lazily, one page at a time.
    fn fetch_branch(&self, channel_id: ChannelId, branch_id: BranchId) -> BranchReader<'_, Self> {
        BranchReader::new(self, channel_id, branch_id)
    }
}

impl<L: Ledger + ?Sized> LedgerExt for L {}

/// A lazy, finite, restartable reader over one branch.
///
/// Pages are pulled on demand through [`Ledger::fetch_after`]. A drain ends
/// at the first empty page; calling [`BranchReader::next`] again polls for
/// envelopes posted since. [`BranchReader::restart`] and
/// [`BranchReader::seek`] rewind it.
pub struct BranchReader<'a, L: ?Sized> {
    ledger: &'a L,
    channel_id: ChannelId,
    branch_id: BranchId,
    page_size: usize,
    after: Option<u64>,
    buffer: VecDeque<Envelope>,
}

impl<'a, L: Ledger + ?Sized> BranchReader<'a, L> {
    fn new(ledger: &'a L, channel_id: ChannelId, branch_id: BranchId) -> Self {
        Self {
            ledger,
            channel_id,
            branch_id,
            page_size: DEFAULT_PAGE_SIZE,
            after: None,
            buffer: VecDeque::new(),
        }
    }

    /// Set the page size.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Start after `sequence` instead of at the beginning.
    pub fn after(mut self, sequence: Option<u64>) -> Self {
        self.after = sequence;
        self
    }

    /// The next envelope, or `None` once the branch is exhausted.
    pub async fn next(&mut self) -> Result<Option<Envelope>> {
        if self.buffer.is_empty() {
            let page = self
                .ledger
                .fetch_after(&self.channel_id, &self.branch_id, self.after, self.page_size)
                .await?;
            self.buffer.extend(page);
        }

        let envelope = self.buffer.pop_front();
        if let Some(envelope) = &envelope {
            self.after = Some(envelope.address.sequence);
        }
        Ok(envelope)
    }

    /// Drain the rest of the branch.
    pub async fn collect_all(&mut self) -> Result<Vec<Envelope>> {
        let mut out = Vec::new();
        while let Some(envelope) = self.next().await? {
            out.push(envelope);
        }
        Ok(out)
    }

    /// Rewind to the beginning of the branch.
    pub fn restart(&mut self) {
        self.seek(0);
    }

    /// Position the reader so the next envelope has sequence `>= sequence`.
    pub fn seek(&mut self, sequence: u64) {
        self.after = sequence.checked_sub(1);
        self.buffer.clear();
    }

    /// Sequence of the last envelope returned.
    pub fn position(&self) -> Option<u64> {
        self.after
    }
}
