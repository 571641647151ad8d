//! Per-branch access state.
//!
//! A keyload names the complete authorized set of its branch. Applying one
//! replaces the local set instead of merging into it, and the keyload with
//! the highest sequence in the branch wins, whatever order they arrive in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use strand_core::{
    validation::verify_signed_by, Address, BranchId, Channel, Content, CoreError,
    Ed25519PublicKey, EncryptionKey, Identity, KeyId, KeyloadBody, Message, MessageBuilder,
    PayloadKind, PskId,
};

use crate::error::{KeyloadError, Result};
use crate::keyshare::{
    key_id_for, open_psk_share, open_recipient_share, share_with_psk, share_with_recipient,
    Recipient,
};
use crate::psk::{Psk, PskStore};

/// Access state of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    /// No subscriber or PSK authorized.
    Open,
    /// At least one subscriber or PSK authorized.
    Keyed,
}

/// What one party knows about access to one branch.
#[derive(Debug, Clone)]
pub struct BranchAccess {
    /// The branch identifier.
    pub branch_id: BranchId,

    /// Sequence of the keyload currently in force.
    pub keyload_sequence: Option<u64>,

    /// Subscriber keys named by that keyload. The author is implicit.
    pub authorized: BTreeSet<Ed25519PublicKey>,

    /// PSK ids named by that keyload.
    pub psk_ids: BTreeSet<PskId>,

    current_key: Option<KeyId>,
    keys: HashMap<KeyId, EncryptionKey>,

    /// Key id of every keyload seen, by sequence. A key is in force from
    /// its keyload up to the next one.
    epochs: BTreeMap<u64, KeyId>,
}

impl BranchAccess {
    fn new(branch_id: BranchId) -> Self {
        Self {
            branch_id,
            keyload_sequence: None,
            authorized: BTreeSet::new(),
            psk_ids: BTreeSet::new(),
            current_key: None,
            keys: HashMap::new(),
            epochs: BTreeMap::new(),
        }
    }

    /// Open or keyed.
    pub fn state(&self) -> AccessState {
        if self.authorized.is_empty() && self.psk_ids.is_empty() {
            AccessState::Open
        } else {
            AccessState::Keyed
        }
    }

    /// Whether we hold the key of the keyload in force.
    pub fn has_current_key(&self) -> bool {
        self.current_key.is_some()
    }
}

/// Result of applying a keyload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyloadOutcome {
    pub branch_id: BranchId,
    pub sequence: u64,
    pub key_id: KeyId,

    /// Subscriber keys named by the keyload.
    pub authorized: BTreeSet<Ed25519PublicKey>,

    /// PSK ids named by the keyload.
    pub psk_ids: BTreeSet<PskId>,

    /// An equal or newer keyload was already in force; the authorized set
    /// was left alone.
    pub stale: bool,

    /// We could unwrap the branch key.
    pub key_received: bool,
}

/// Access control for every branch of one channel, from one party's view.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    branches: BTreeMap<BranchId, BranchAccess>,
}

impl AccessControl {
    /// Create an empty access state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and sign a keyload for the branch `address` belongs to, then
    /// apply it locally.
    ///
    /// Only the channel author may issue keyloads.
    pub fn issue_keyload(
        &mut self,
        issuer: &Identity,
        channel: &Channel,
        address: Address,
        previous: Address,
        recipients: &[Recipient],
        psks: &[&Psk],
    ) -> Result<Message> {
        if issuer.public_key() != channel.author_key {
            return Err(KeyloadError::Unauthorized(format!(
                "{} is not the author of channel {}",
                issuer.public_key(),
                channel.channel_id
            )));
        }

        let key = EncryptionKey::generate();
        let key_id = key_id_for(&key);

        // The author wraps the key for itself too, so a fresh instance
        // derived from the same seed can recover it from the ledger.
        let author = Recipient {
            public_key: issuer.public_key(),
            exchange_key: issuer.exchange_public_key(),
        };
        let mut unique: BTreeSet<Recipient> = recipients.iter().copied().collect();
        unique.insert(author);

        let recipients = unique
            .iter()
            .map(|r| share_with_recipient(&key_id, &key, r))
            .collect::<Result<Vec<_>>>()?;
        let psk_shares = psks
            .iter()
            .map(|psk| share_with_psk(&key_id, &key, psk))
            .collect::<Result<Vec<_>>>()?;

        let body = KeyloadBody {
            key_id,
            recipients,
            psk_shares,
        };
        let authorized = authorized_set(&body, &channel.author_key);
        let psk_ids = body.psk_shares.iter().map(|s| s.psk_id).collect();

        let message = MessageBuilder::new(address, issuer.public_key(), PayloadKind::Keyload)
            .previous(previous)
            .sign(Content::Keyload(body), issuer.keypair())?;

        self.install(
            address.branch_id,
            address.sequence,
            authorized,
            psk_ids,
            key_id,
            Some(key),
        );
        Ok(message)
    }

    /// Apply a keyload published by the channel author.
    ///
    /// Nothing changes unless the signature verifies and every share meant
    /// for us unwraps.
    pub fn apply_keyload(
        &mut self,
        message: &Message,
        channel: &Channel,
        identity: &Identity,
        psks: &PskStore,
    ) -> Result<KeyloadOutcome> {
        let body = match &message.content {
            Content::Keyload(body) => body,
            _ => return Err(KeyloadError::NotAKeyload(message.kind())),
        };
        verify_signed_by(message, &channel.author_key).map_err(|e| match e {
            CoreError::SignatureInvalid => KeyloadError::SignatureInvalid,
            other => KeyloadError::Core(other),
        })?;

        let key = self.unwrap_key(body, identity, psks)?;

        let address = message.address();
        let authorized = authorized_set(body, &channel.author_key);
        let psk_ids: BTreeSet<PskId> = body.psk_shares.iter().map(|s| s.psk_id).collect();
        let stale = self
            .branches
            .get(&address.branch_id)
            .and_then(|b| b.keyload_sequence)
            .is_some_and(|applied| applied >= address.sequence);

        let outcome = KeyloadOutcome {
            branch_id: address.branch_id,
            sequence: address.sequence,
            key_id: body.key_id,
            authorized: authorized.clone(),
            psk_ids: psk_ids.clone(),
            stale,
            key_received: key.is_some(),
        };

        if stale {
            let entry = self
                .branches
                .entry(address.branch_id)
                .or_insert_with(|| BranchAccess::new(address.branch_id));
            entry.epochs.insert(address.sequence, body.key_id);
            if let Some(key) = key {
                entry.keys.insert(body.key_id, key);
            }
            debug!(
                branch = %address.branch_id,
                sequence = address.sequence,
                "stale keyload kept for its key only"
            );
        } else {
            self.install(
                address.branch_id,
                address.sequence,
                authorized,
                psk_ids,
                body.key_id,
                key,
            );
        }

        Ok(outcome)
    }

    fn unwrap_key(
        &self,
        body: &KeyloadBody,
        identity: &Identity,
        psks: &PskStore,
    ) -> Result<Option<EncryptionKey>> {
        let me = identity.public_key();
        if let Some(share) = body.recipients.iter().find(|s| s.recipient == me) {
            return open_recipient_share(share, &body.key_id, identity.exchange_secret()).map(Some);
        }
        for share in &body.psk_shares {
            if let Some(psk) = psks.get(&share.psk_id) {
                return open_psk_share(share, &body.key_id, psk).map(Some);
            }
        }
        Ok(None)
    }

    fn install(
        &mut self,
        branch_id: BranchId,
        sequence: u64,
        authorized: BTreeSet<Ed25519PublicKey>,
        psk_ids: BTreeSet<PskId>,
        key_id: KeyId,
        key: Option<EncryptionKey>,
    ) {
        let entry = self
            .branches
            .entry(branch_id)
            .or_insert_with(|| BranchAccess::new(branch_id));
        entry.keyload_sequence = Some(sequence);
        entry.epochs.insert(sequence, key_id);
        entry.authorized = authorized;
        entry.psk_ids = psk_ids;
        entry.current_key = match key {
            Some(key) => {
                entry.keys.insert(key_id, key);
                Some(key_id)
            }
            None => None,
        };
        debug!(
            branch = %branch_id,
            sequence,
            authorized = entry.authorized.len(),
            psks = entry.psk_ids.len(),
            keyed = entry.current_key.is_some(),
            "keyload applied"
        );
    }

    /// Access state of a branch, if any keyload was seen for it.
    pub fn branch(&self, branch_id: &BranchId) -> Option<&BranchAccess> {
        self.branches.get(branch_id)
    }

    /// Open or keyed. Branches never keyed are open.
    pub fn state(&self, branch_id: &BranchId) -> AccessState {
        self.branches
            .get(branch_id)
            .map_or(AccessState::Open, BranchAccess::state)
    }

    /// Whether any keyload was ever applied for the branch.
    pub fn was_keyed(&self, branch_id: &BranchId) -> bool {
        self.branches
            .get(branch_id)
            .is_some_and(|b| b.keyload_sequence.is_some())
    }

    /// Whether `key` is named by the keyload in force.
    pub fn is_authorized(&self, branch_id: &BranchId, key: &Ed25519PublicKey) -> bool {
        self.branches
            .get(branch_id)
            .is_some_and(|b| b.authorized.contains(key))
    }

    /// The key of the keyload in force, if we hold it.
    pub fn current_key(&self, branch_id: &BranchId) -> Option<(KeyId, &EncryptionKey)> {
        let branch = self.branches.get(branch_id)?;
        let key_id = branch.current_key?;
        branch.keys.get(&key_id).map(|key| (key_id, key))
    }

    /// Any key we hold for the branch, including superseded ones.
    pub fn key_for(&self, branch_id: &BranchId, key_id: &KeyId) -> Option<&EncryptionKey> {
        self.branches.get(branch_id)?.keys.get(key_id)
    }

    /// Id of the key in force at `sequence`: the one carried by the latest
    /// keyload below it. Packets must be sealed with this key.
    pub fn key_in_force(&self, branch_id: &BranchId, sequence: u64) -> Option<KeyId> {
        self.branches
            .get(branch_id)?
            .epochs
            .range(..sequence)
            .next_back()
            .map(|(_, key_id)| *key_id)
    }

    /// Branches whose current key we hold.
    pub fn authorized_branches(&self) -> impl Iterator<Item = &BranchId> {
        self.branches
            .values()
            .filter(|b| b.current_key.is_some())
            .map(|b| &b.branch_id)
    }
}

fn authorized_set(body: &KeyloadBody, author: &Ed25519PublicKey) -> BTreeSet<Ed25519PublicKey> {
    body.recipient_keys()
        .filter(|key| *key != author)
        .copied()
        .collect()
}
