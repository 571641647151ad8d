//! In-memory implementation of the Ledger trait.
//!
//! Same semantics as SQLite, no persistence. Also carries fault injection
//! hooks so tests can simulate an unreliable or lagging ledger.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use strand_core::{Address, BranchId, ChannelId};

use crate::error::{LedgerError, Result};
use crate::traits::{Envelope, Ledger, PostOutcome};

/// In-memory ledger.
///
/// All data is lost when the ledger is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryLedger {
    inner: RwLock<MemoryLedgerInner>,
}

#[derive(Default)]
struct MemoryLedgerInner {
    /// Envelopes ordered by address, so a branch is a contiguous range.
    envelopes: BTreeMap<Address, Bytes>,

    /// Posts left to fail with a transport error.
    failing_posts: usize,

    /// Addresses hidden from readers, with the number of reads left to hide.
    withheld: HashMap<Address, usize>,
}

impl MemoryLedger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored envelopes.
    pub fn len(&self) -> usize {
        self.read().envelopes.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.read().envelopes.is_empty()
    }

    /// Make the next `count` posts fail with [`LedgerError::Transport`].
    pub fn fail_next_posts(&self, count: usize) {
        self.write().failing_posts = count;
    }

    /// Hide `address` from the next `reads` fetches and listings, as if it
    /// had not propagated yet.
    pub fn withhold(&self, address: Address, reads: usize) {
        self.write().withheld.insert(address, reads);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryLedgerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryLedgerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryLedgerInner {
    /// Whether `address` is hidden for this read; consumes one read.
    fn is_withheld(&mut self, address: &Address) -> bool {
        match self.withheld.get_mut(address) {
            Some(0) | None => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }
}

fn branch_start(channel_id: &ChannelId, branch_id: &BranchId, sequence: u64) -> Address {
    Address::new(*channel_id, *branch_id, sequence)
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn post(&self, address: &Address, bytes: &[u8]) -> Result<PostOutcome> {
        let mut inner = self.write();

        if inner.failing_posts > 0 {
            inner.failing_posts -= 1;
            return Err(LedgerError::Transport(format!(
                "injected failure posting {}",
                address
            )));
        }

        if let Some(existing) = inner.envelopes.get(address) {
            if existing.as_ref() == bytes {
                return Ok(PostOutcome::AlreadyPresent);
            }
            return Err(LedgerError::Collision(*address));
        }

        inner
            .envelopes
            .insert(*address, Bytes::copy_from_slice(bytes));
        trace!(address = %address, len = bytes.len(), "posted envelope");
        Ok(PostOutcome::Posted)
    }

    async fn fetch(&self, address: &Address) -> Result<Envelope> {
        let mut inner = self.write();
        if inner.is_withheld(address) {
            return Err(LedgerError::NotFound(*address));
        }
        inner
            .envelopes
            .get(address)
            .map(|bytes| Envelope {
                address: *address,
                bytes: bytes.clone(),
            })
            .ok_or(LedgerError::NotFound(*address))
    }

    async fn fetch_after(
        &self,
        channel_id: &ChannelId,
        branch_id: &BranchId,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Envelope>> {
        let start = match after {
            Some(u64::MAX) => return Ok(Vec::new()),
            Some(seq) => seq + 1,
            None => 0,
        };
        let from = branch_start(channel_id, branch_id, start);
        let to = branch_start(channel_id, branch_id, u64::MAX);

        let mut inner = self.write();
        let candidates: Vec<(Address, Bytes)> = inner
            .envelopes
            .range(from..=to)
            .map(|(address, bytes)| (*address, bytes.clone()))
            .collect();

        let mut out = Vec::new();
        for (address, bytes) in candidates {
            if out.len() >= limit {
                break;
            }
            if inner.is_withheld(&address) {
                // Later envelopes stay invisible too, like a lagging node.
                break;
            }
            out.push(Envelope { address, bytes });
        }
        Ok(out)
    }

    async fn branches(&self, channel_id: &ChannelId) -> Result<Vec<BranchId>> {
        let inner = self.read();
        let branches: BTreeSet<BranchId> = inner
            .envelopes
            .keys()
            .filter(|address| address.channel_id == *channel_id)
            .map(|address| address.branch_id)
            .collect();
        Ok(branches.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LedgerExt;

    fn channel() -> ChannelId {
        ChannelId::from_bytes([1; 32])
    }

    fn address(branch: u8, sequence: u64) -> Address {
        Address::new(channel(), BranchId::from_bytes([branch; 32]), sequence)
    }

    #[tokio::test]
    async fn test_post_and_fetch() {
        let ledger = MemoryLedger::new();
        let addr = address(1, 0);

        assert_eq!(ledger.post(&addr, b"hello").await.unwrap(), PostOutcome::Posted);
        let envelope = ledger.fetch(&addr).await.unwrap();
        assert_eq!(envelope.bytes.as_ref(), b"hello");
        assert_eq!(envelope.address, addr);
    }

    #[tokio::test]
    async fn test_post_idempotent() {
        let ledger = MemoryLedger::new();
        let addr = address(1, 0);

        ledger.post(&addr, b"hello").await.unwrap();
        assert_eq!(
            ledger.post(&addr, b"hello").await.unwrap(),
            PostOutcome::AlreadyPresent
        );
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_post_collision() {
        let ledger = MemoryLedger::new();
        let addr = address(1, 0);

        ledger.post(&addr, b"hello").await.unwrap();
        assert!(matches!(
            ledger.post(&addr, b"other").await,
            Err(LedgerError::Collision(a)) if a == addr
        ));
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        let ledger = MemoryLedger::new();
        let err = ledger.fetch(&address(1, 0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_after_is_per_branch_and_ordered() {
        let ledger = MemoryLedger::new();
        for seq in [3, 1, 2] {
            ledger.post(&address(1, seq), &[seq as u8]).await.unwrap();
        }
        ledger.post(&address(2, 1), b"other branch").await.unwrap();

        let branch = BranchId::from_bytes([1; 32]);
        let all = ledger.fetch_after(&channel(), &branch, None, 10).await.unwrap();
        let seqs: Vec<u64> = all.iter().map(|e| e.address.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let tail = ledger.fetch_after(&channel(), &branch, Some(1), 1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].address.sequence, 2);
    }

    #[tokio::test]
    async fn test_branches() {
        let ledger = MemoryLedger::new();
        ledger.post(&address(2, 1), b"a").await.unwrap();
        ledger.post(&address(1, 1), b"b").await.unwrap();
        ledger.post(&address(1, 2), b"c").await.unwrap();

        let branches = ledger.branches(&channel()).await.unwrap();
        assert_eq!(
            branches,
            vec![BranchId::from_bytes([1; 32]), BranchId::from_bytes([2; 32])]
        );
        assert!(ledger
            .branches(&ChannelId::from_bytes([9; 32]))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_injected_post_failures() {
        let ledger = MemoryLedger::new();
        ledger.fail_next_posts(2);

        for _ in 0..2 {
            let err = ledger.post(&address(1, 0), b"x").await.unwrap_err();
            assert!(matches!(err, LedgerError::Transport(_)));
            assert!(err.is_retryable());
        }
        assert_eq!(ledger.post(&address(1, 0), b"x").await.unwrap(), PostOutcome::Posted);
    }

    #[tokio::test]
    async fn test_withheld_envelope_appears_later() {
        let ledger = MemoryLedger::new();
        let addr = address(1, 1);
        ledger.post(&addr, b"late").await.unwrap();
        ledger.post(&address(1, 2), b"after").await.unwrap();
        ledger.withhold(addr, 2);

        assert!(ledger.fetch(&addr).await.is_err());
        let branch = BranchId::from_bytes([1; 32]);
        assert!(ledger
            .fetch_after(&channel(), &branch, None, 10)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(ledger.fetch(&addr).await.unwrap().bytes.as_ref(), b"late");
    }

    #[tokio::test]
    async fn test_branch_reader_pages_and_restarts() {
        let ledger = MemoryLedger::new();
        for seq in 1..=5 {
            ledger.post(&address(1, seq), &[seq as u8]).await.unwrap();
        }

        let mut reader = ledger
            .fetch_branch(channel(), BranchId::from_bytes([1; 32]))
            .page_size(2);
        let all = reader.collect_all().await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(reader.next().await.unwrap().is_none());

        ledger.post(&address(1, 6), &[6]).await.unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap().address.sequence, 6);

        reader.seek(3);
        assert_eq!(reader.next().await.unwrap().unwrap().address.sequence, 3);

        reader.restart();
        assert_eq!(reader.collect_all().await.unwrap().len(), 6);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fetch_after_returns_sorted_tail(
                seqs in proptest::collection::btree_set(0u64..1000, 0..40),
                after in proptest::option::of(0u64..1000),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
                runtime.block_on(async {
                    let ledger = MemoryLedger::new();
                    for seq in seqs.iter().rev() {
                        ledger.post(&address(1, *seq), &seq.to_be_bytes()).await.unwrap();
                    }

                    let branch = BranchId::from_bytes([1; 32]);
                    let got: Vec<u64> = ledger
                        .fetch_after(&channel(), &branch, after, usize::MAX)
                        .await
                        .unwrap()
                        .iter()
                        .map(|e| e.address.sequence)
                        .collect();
                    let expected: Vec<u64> = seqs
                        .iter()
                        .copied()
                        .filter(|seq| after.map_or(true, |a| *seq > a))
                        .collect();
                    prop_assert_eq!(got, expected);
                    Ok(())
                })?;
            }
        }
    }
}
