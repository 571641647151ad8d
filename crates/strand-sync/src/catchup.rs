//! Pull-based catch-up.
//!
//! A party reads a branch from the ledger in sequence order and hands each
//! envelope to an [`Ingest`] target. When the target reports a missing
//! previous link, the ancestor chain is fetched by address and applied
//! oldest-first before the descendant is retried.

use std::fmt;

use tracing::{debug, warn};

use strand_core::{Address, BranchId, ChannelId};
use strand_ledger::{Envelope, Ledger, LedgerError, LedgerExt, DEFAULT_PAGE_SIZE};

use crate::error::{Result, SyncError};
use crate::retry::{fetch_with_backoff, RetryPolicy};

/// Default bound on ancestor recovery depth.
pub const DEFAULT_MAX_RECOVERY_DEPTH: usize = 1024;

/// What an [`Ingest`] target did with an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus<T, E> {
    /// Applied to local state.
    Applied(T),
    /// Already known; nothing changed.
    Duplicate,
    /// The previous link is unknown; fetch `Address` first.
    Missing(Address),
    /// Recorded, so later envelopes can link to it, but its content could
    /// not be read. Reported as rejected without breaking the chain.
    Unreadable(E),
}

/// Something that consumes envelopes pulled from the ledger.
pub trait Ingest {
    /// Value produced for each applied envelope.
    type Output;
    /// Rejection reason for envelopes that fail verification.
    type Error: fmt::Display;

    fn ingest(
        &mut self,
        envelope: &Envelope,
    ) -> std::result::Result<IngestStatus<Self::Output, Self::Error>, Self::Error>;
}

/// An envelope the target refused.
#[derive(Debug)]
pub struct Rejected<E> {
    pub address: Address,
    pub error: E,
}

/// Summary of a catch-up run.
#[derive(Debug)]
pub struct SyncReport<T, E> {
    /// Outputs of applied envelopes, in application order.
    pub applied: Vec<T>,
    /// Envelopes that were already known.
    pub duplicates: usize,
    /// Ancestors pulled in by address during recovery.
    pub recovered: Vec<Address>,
    /// Envelopes refused by the target.
    pub rejected: Vec<Rejected<E>>,
    /// Envelopes left unapplied because an ancestor could not be obtained.
    pub unresolved: Vec<Address>,
    /// Last sequence read from the branch listing.
    pub position: Option<u64>,
}

impl<T, E> Default for SyncReport<T, E> {
    fn default() -> Self {
        Self {
            applied: Vec::new(),
            duplicates: 0,
            recovered: Vec::new(),
            rejected: Vec::new(),
            unresolved: Vec::new(),
            position: None,
        }
    }
}

impl<T, E> SyncReport<T, E> {
    /// Whether every envelope seen was applied or already known.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.unresolved.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: SyncReport<T, E>) {
        self.applied.extend(other.applied);
        self.duplicates += other.duplicates;
        self.recovered.extend(other.recovered);
        self.rejected.extend(other.rejected);
        self.unresolved.extend(other.unresolved);
        self.position = self.position.max(other.position);
    }
}

/// Catch-up driver configuration.
#[derive(Debug, Clone)]
pub struct CatchUp {
    retry: RetryPolicy,
    page_size: usize,
    max_depth: usize,
}

impl Default for CatchUp {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl CatchUp {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            page_size: DEFAULT_PAGE_SIZE,
            max_depth: DEFAULT_MAX_RECOVERY_DEPTH,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Apply one envelope, recovering missing ancestors first.
    pub async fn apply<L, I>(
        &self,
        ledger: &L,
        target: &mut I,
        envelope: &Envelope,
        report: &mut SyncReport<I::Output, I::Error>,
    ) -> Result<()>
    where
        L: Ledger + ?Sized,
        I: Ingest + ?Sized,
    {
        match target.ingest(envelope) {
            Ok(IngestStatus::Applied(output)) => report.applied.push(output),
            Ok(IngestStatus::Duplicate) => report.duplicates += 1,
            Ok(IngestStatus::Unreadable(error)) => reject(report, envelope.address, error),
            Ok(IngestStatus::Missing(missing)) => {
                if !self.recover(ledger, target, missing, report).await? {
                    report.unresolved.push(envelope.address);
                    return Ok(());
                }
                match target.ingest(envelope) {
                    Ok(IngestStatus::Applied(output)) => report.applied.push(output),
                    Ok(IngestStatus::Duplicate) => report.duplicates += 1,
                    Ok(IngestStatus::Missing(still)) => {
                        warn!(address = %envelope.address, missing = %still, "link still unresolved after recovery");
                        report.unresolved.push(envelope.address);
                    }
                    Ok(IngestStatus::Unreadable(error)) | Err(error) => {
                        reject(report, envelope.address, error)
                    }
                }
            }
            Err(error) => reject(report, envelope.address, error),
        }
        Ok(())
    }

    /// Fetch and apply the ancestor chain ending at `missing`.
    ///
    /// Returns `false` if some ancestor is not on the ledger or was rejected;
    /// the caller's envelope then stays unapplied. An unreadable ancestor is
    /// reported but does not stop recovery.
    pub async fn recover<L, I>(
        &self,
        ledger: &L,
        target: &mut I,
        missing: Address,
        report: &mut SyncReport<I::Output, I::Error>,
    ) -> Result<bool>
    where
        L: Ledger + ?Sized,
        I: Ingest + ?Sized,
    {
        let mut stack = vec![missing];

        while let Some(&address) = stack.last() {
            let envelope = match fetch_with_backoff(ledger, &address, &self.retry).await {
                Ok(envelope) => envelope,
                Err(LedgerError::NotFound(_)) => {
                    warn!(address = %address, "ancestor not available on ledger");
                    report.unresolved.extend(pending_descendants(&stack));
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };

            match target.ingest(&envelope) {
                Ok(IngestStatus::Applied(output)) => {
                    debug!(address = %address, "recovered ancestor");
                    report.applied.push(output);
                    report.recovered.push(address);
                    stack.pop();
                }
                Ok(IngestStatus::Duplicate) => {
                    stack.pop();
                }
                Ok(IngestStatus::Unreadable(error)) => {
                    reject(report, address, error);
                    report.recovered.push(address);
                    stack.pop();
                }
                Ok(IngestStatus::Missing(previous)) => {
                    if stack.len() >= self.max_depth {
                        return Err(SyncError::RecoveryDepthExceeded {
                            address: missing,
                            depth: self.max_depth,
                        });
                    }
                    stack.push(previous);
                }
                Err(error) => {
                    reject(report, address, error);
                    report.unresolved.extend(pending_descendants(&stack));
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Read a branch from the ledger after `after` and apply every envelope.
    pub async fn sync_branch<L, I>(
        &self,
        ledger: &L,
        target: &mut I,
        channel_id: ChannelId,
        branch_id: BranchId,
        after: Option<u64>,
    ) -> Result<SyncReport<I::Output, I::Error>>
    where
        L: Ledger + ?Sized,
        I: Ingest + ?Sized,
    {
        let mut report = SyncReport::default();
        let mut reader = ledger
            .fetch_branch(channel_id, branch_id)
            .page_size(self.page_size)
            .after(after);
        let mut backoff = self.retry.backoff();

        loop {
            let envelope = match reader.next().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(e) if e.is_retryable() => {
                    backoff.wait(e).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.apply(ledger, target, &envelope, &mut report).await?;
        }

        report.position = reader.position();
        debug!(
            channel = %channel_id,
            branch = %branch_id,
            applied = report.applied.len(),
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "branch sync finished"
        );
        Ok(report)
    }
}

/// Envelopes fetched during recovery that wait on the top of the stack,
/// nearest first.
fn pending_descendants(stack: &[Address]) -> impl Iterator<Item = Address> + '_ {
    stack[..stack.len().saturating_sub(1)].iter().rev().copied()
}

fn reject<T, E: fmt::Display>(report: &mut SyncReport<T, E>, address: Address, error: E) {
    warn!(address = %address, error = %error, "rejected envelope");
    report.rejected.push(Rejected { address, error });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use strand_ledger::MemoryLedger;

    /// A toy chain: each envelope's bytes name the sequence it links to,
    /// or are empty for a root. `0xff` marks an envelope to reject, and a
    /// `0xfe` prefix one that is recorded but unreadable.
    #[derive(Default)]
    struct Chain {
        known: BTreeSet<Address>,
    }

    impl Ingest for Chain {
        type Output = u64;
        type Error = String;

        fn ingest(
            &mut self,
            envelope: &Envelope,
        ) -> std::result::Result<IngestStatus<u64, String>, String> {
            if self.known.contains(&envelope.address) {
                return Ok(IngestStatus::Duplicate);
            }
            let (unreadable, link) = match envelope.bytes.as_ref() {
                [0xff, ..] => return Err("forged".into()),
                [0xfe, rest @ ..] => (true, rest.first()),
                rest => (false, rest.first()),
            };
            if let Some(&prev) = link {
                let previous = envelope.address.with_sequence(u64::from(prev));
                if !self.known.contains(&previous) {
                    return Ok(IngestStatus::Missing(previous));
                }
            }
            self.known.insert(envelope.address);
            if unreadable {
                Ok(IngestStatus::Unreadable("sealed".into()))
            } else {
                Ok(IngestStatus::Applied(envelope.address.sequence))
            }
        }
    }

    fn branch() -> BranchId {
        BranchId::from_bytes([2; 32])
    }

    fn at(sequence: u64) -> Address {
        Address::new(ChannelId::from_bytes([1; 32]), branch(), sequence)
    }

    fn catch_up() -> CatchUp {
        CatchUp::new(RetryPolicy::immediate(2)).with_page_size(2)
    }

    async fn chain_ledger(len: u64) -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger.post(&at(0), b"").await.unwrap();
        for seq in 1..len {
            ledger.post(&at(seq), &[(seq - 1) as u8]).await.unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn test_sync_applies_in_order() {
        let ledger = chain_ledger(5).await;
        let mut chain = Chain::default();

        let report = catch_up()
            .sync_branch(&ledger, &mut chain, at(0).channel_id, branch(), None)
            .await
            .unwrap();
        assert_eq!(report.applied, vec![0, 1, 2, 3, 4]);
        assert!(report.is_clean());
        assert_eq!(report.position, Some(4));

        let again = catch_up()
            .sync_branch(&ledger, &mut chain, at(0).channel_id, branch(), None)
            .await
            .unwrap();
        assert_eq!(again.duplicates, 5);
        assert!(again.applied.is_empty());
    }

    #[tokio::test]
    async fn test_missing_ancestor_is_recovered() {
        let ledger = chain_ledger(4).await;
        let mut chain = Chain::default();

        let mut report = SyncReport::default();
        let tip = ledger.fetch(&at(3)).await.unwrap();
        catch_up()
            .apply(&ledger, &mut chain, &tip, &mut report)
            .await
            .unwrap();

        assert_eq!(report.applied, vec![0, 1, 2, 3]);
        assert_eq!(report.recovered, vec![at(0), at(1), at(2)]);
    }

    #[tokio::test]
    async fn test_rejected_envelope_is_reported() {
        let ledger = chain_ledger(2).await;
        ledger.post(&at(2), &[0xff]).await.unwrap();
        let mut chain = Chain::default();

        let report = catch_up()
            .sync_branch(&ledger, &mut chain, at(0).channel_id, branch(), None)
            .await
            .unwrap();
        assert_eq!(report.applied, vec![0, 1]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].address, at(2));
        assert_eq!(report.rejected[0].error, "forged");
    }

    #[tokio::test]
    async fn test_unreadable_ancestor_does_not_stop_recovery() {
        let ledger = chain_ledger(2).await;
        ledger.post(&at(2), &[0xfe, 1]).await.unwrap();
        ledger.post(&at(3), &[2]).await.unwrap();
        let mut chain = Chain::default();

        let mut report = SyncReport::default();
        let tip = ledger.fetch(&at(3)).await.unwrap();
        catch_up()
            .apply(&ledger, &mut chain, &tip, &mut report)
            .await
            .unwrap();

        assert_eq!(report.applied, vec![0, 1, 3]);
        assert_eq!(report.recovered, vec![at(0), at(1), at(2)]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].address, at(2));
        assert!(report.unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_ancestor_leaves_descendant_unresolved() {
        let ledger = MemoryLedger::new();
        ledger.post(&at(5), &[4]).await.unwrap();
        let mut chain = Chain::default();

        let report = catch_up()
            .sync_branch(&ledger, &mut chain, at(0).channel_id, branch(), None)
            .await
            .unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.unresolved, vec![at(5)]);
    }

    #[tokio::test]
    async fn test_recovery_depth_is_bounded() {
        let ledger = chain_ledger(10).await;
        let mut chain = Chain::default();
        let tip = ledger.fetch(&at(9)).await.unwrap();

        let mut report = SyncReport::default();
        let err = catch_up()
            .with_max_depth(3)
            .apply(&ledger, &mut chain, &tip, &mut report)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RecoveryDepthExceeded { depth: 3, .. }));
    }

    #[tokio::test]
    async fn test_sync_resumes_after_position() {
        let ledger = chain_ledger(3).await;
        let mut chain = Chain::default();
        let first = catch_up()
            .sync_branch(&ledger, &mut chain, at(0).channel_id, branch(), None)
            .await
            .unwrap();

        ledger.post(&at(3), &[2]).await.unwrap();
        let next = catch_up()
            .sync_branch(&ledger, &mut chain, at(0).channel_id, branch(), first.position)
            .await
            .unwrap();
        assert_eq!(next.applied, vec![3]);
        assert_eq!(next.duplicates, 0);
    }
}
