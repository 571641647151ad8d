//! The async client: one party bound to one ledger.
//!
//! The state machines never touch the network. A [`Client`] posts what
//! they produce, fetches what they need and drives catch-up, with every
//! ledger call going through the party's [`RetryPolicy`](strand_sync::RetryPolicy).

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use strand_core::{Address, BranchId};
use strand_ledger::{Ledger, LedgerError, PostOutcome};
use strand_sync::{fetch_with_backoff, CatchUp, SyncReport};

use crate::error::{ProtocolError, Result};
use crate::party::{Ingester, Outgoing, Participant, Unwrapped};

/// Report of a sync run.
pub type ChannelReport = SyncReport<Unwrapped, ProtocolError>;

/// A party and the ledger it publishes to.
pub struct Client<P, L: ?Sized> {
    party: P,
    ledger: Arc<L>,
    catch_up: CatchUp,
    /// Last sequence read per branch. Sync resumes after it.
    positions: BTreeMap<BranchId, Option<u64>>,
}

impl<P: Participant, L: Ledger + ?Sized> Client<P, L> {
    pub fn new(party: P, ledger: Arc<L>) -> Self {
        let catch_up = CatchUp::new(party.party().retry_policy().clone());
        Self {
            party,
            ledger,
            catch_up,
            positions: BTreeMap::new(),
        }
    }

    /// Replace the catch-up settings, e.g. page size or recovery depth.
    pub fn with_catch_up(mut self, catch_up: CatchUp) -> Self {
        self.catch_up = catch_up;
        self
    }

    pub fn party(&self) -> &P {
        &self.party
    }

    pub fn party_mut(&mut self) -> &mut P {
        &mut self.party
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn into_party(self) -> P {
        self.party
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Posting
    // ─────────────────────────────────────────────────────────────────────────

    /// Post an envelope and confirm it.
    ///
    /// A transport failure leaves the envelope in the outbox at its
    /// address; [`flush_pending`](Self::flush_pending) reposts it. A
    /// collision means somebody else took the address, so the envelope is
    /// dropped from the outbox.
    pub async fn post(&mut self, outgoing: &Outgoing) -> Result<PostOutcome> {
        let ledger = &self.ledger;
        let result = self
            .catch_up
            .retry_policy()
            .run(|| ledger.post(&outgoing.address, &outgoing.bytes))
            .await;

        match result {
            Ok(outcome) => {
                self.party.confirm(&outgoing.address);
                debug!(address = %outgoing.address, ?outcome, "envelope posted");
                Ok(outcome)
            }
            Err(LedgerError::Collision(address)) => {
                self.party.discard(&address);
                warn!(address = %address, "address taken by another envelope; discarded");
                Err(ProtocolError::AddressCollision(address))
            }
            Err(e) => {
                warn!(address = %outgoing.address, error = %e, "post failed; envelope kept in outbox");
                Err(e.into())
            }
        }
    }

    /// Repost every unconfirmed envelope at its original address.
    ///
    /// Stops at the first failure. Returns how many were posted.
    pub async fn flush_pending(&mut self) -> Result<usize> {
        let pending: Vec<Outgoing> = self.party.party().pending().cloned().collect();
        let mut posted = 0;
        for outgoing in &pending {
            self.post(outgoing).await?;
            posted += 1;
        }
        Ok(posted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch and unwrap the envelope at `address`, pulling in missing
    /// ancestors first if needed.
    pub async fn receive(&mut self, address: &Address) -> Result<Unwrapped> {
        let envelope =
            fetch_with_backoff(self.ledger.as_ref(), address, self.catch_up.retry_policy()).await?;

        match self.party.unwrap(&envelope.address, &envelope.bytes) {
            Err(ProtocolError::OutOfOrder { missing, .. }) => {
                let mut report = ChannelReport::default();
                let recovered = self
                    .catch_up
                    .recover(
                        self.ledger.as_ref(),
                        &mut Ingester(&mut self.party),
                        missing,
                        &mut report,
                    )
                    .await?;
                if !recovered {
                    return Err(match report.rejected.pop() {
                        Some(rejected) => rejected.error,
                        None => ProtocolError::OutOfOrder {
                            address: *address,
                            missing,
                        },
                    });
                }
                debug!(address = %address, recovered = report.recovered.len(), "ancestors recovered");
                self.party.unwrap(&envelope.address, &envelope.bytes)
            }
            other => other,
        }
    }

    /// Read every branch of the channel that has anything on the ledger,
    /// root first.
    pub async fn sync(&mut self) -> Result<ChannelReport> {
        let channel = self.party.party().require_channel()?.clone();
        let ledger = &self.ledger;
        let listed = self
            .catch_up
            .retry_policy()
            .run(|| ledger.branches(&channel.channel_id))
            .await?;

        let mut branches = vec![channel.root_branch()];
        for branch_id in listed {
            if !branches.contains(&branch_id) {
                branches.push(branch_id);
            }
        }

        let mut report = ChannelReport::default();
        for branch_id in branches {
            report.merge(self.sync_branch(branch_id).await?);
        }
        Ok(report)
    }

    /// Read one branch from where the last sync of it stopped.
    ///
    /// Envelopes left unresolved are read again next time.
    pub async fn sync_branch(&mut self, branch_id: BranchId) -> Result<ChannelReport> {
        let channel_id = self.party.party().require_channel()?.channel_id;
        let after = self.positions.get(&branch_id).copied().flatten();

        let report = self
            .catch_up
            .sync_branch(
                self.ledger.as_ref(),
                &mut Ingester(&mut self.party),
                channel_id,
                branch_id,
                after,
            )
            .await?;

        let first_unresolved = report
            .unresolved
            .iter()
            .filter(|address| address.branch_id == branch_id)
            .map(|address| address.sequence)
            .min();
        let position = match first_unresolved {
            Some(sequence) => sequence.checked_sub(1).max(after),
            None => report.position.max(after),
        };
        self.positions.insert(branch_id, position);
        Ok(report)
    }

    /// Forget sync positions, so the next sync reads every branch from the
    /// start.
    pub fn reset_positions(&mut self) {
        self.positions.clear();
    }
}
