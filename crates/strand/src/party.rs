//! State and behavior shared by authors and subscribers.
//!
//! A [`Party`] owns one identity's view of one channel: the message
//! topology, branch access, held PSKs and the outbox of envelopes not yet
//! confirmed on the ledger. The role state machines wrap it.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::debug;

use strand_core::{
    decode_bounded, encode_bounded, validate_structure, verify_signature, Address, Admission,
    BranchId, Channel, Content, Ed25519PublicKey, Identity, Message, MessageBuilder, PacketBody,
    PayloadKind, PskId, Topology,
};
use strand_keyload::{mask, unmask, AccessControl, KeyloadOutcome, Psk, PskStore, Recipient};
use strand_ledger::Envelope;
use strand_sync::{Ingest, IngestStatus, RetryPolicy};

use crate::config::ChannelConfig;
use crate::error::{ProtocolError, Result};

/// An envelope produced by a publish operation.
///
/// It stays in the publisher's outbox until confirmed. Reposting uses the
/// same address and the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub address: Address,
    pub message: Message,
    pub bytes: Bytes,
}

/// What an envelope turned out to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnwrappedContent {
    Announcement {
        author: Ed25519PublicKey,
        multi_branching: bool,
    },
    Subscription {
        subscriber: Ed25519PublicKey,
    },
    Keyload(KeyloadOutcome),
    TaggedPacket {
        public: Bytes,
        masked: Bytes,
    },
    SignedPacket {
        public: Bytes,
        masked: Bytes,
    },
    /// Already known; nothing changed.
    Duplicate,
}

/// Result of ingesting an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    pub address: Address,
    pub publisher: Ed25519PublicKey,
    pub content: UnwrappedContent,
}

impl Unwrapped {
    pub(crate) fn new(message: &Message, content: UnwrappedContent) -> Self {
        Self {
            address: *message.address(),
            publisher: *message.publisher(),
            content,
        }
    }

    /// Public and masked payloads, for packets.
    pub fn payloads(&self) -> Option<(&Bytes, &Bytes)> {
        match &self.content {
            UnwrappedContent::TaggedPacket { public, masked }
            | UnwrappedContent::SignedPacket { public, masked } => Some((public, masked)),
            _ => None,
        }
    }

    /// The subscriber key, for subscription requests.
    pub fn subscriber(&self) -> Option<&Ed25519PublicKey> {
        match &self.content {
            UnwrappedContent::Subscription { subscriber } => Some(subscriber),
            _ => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.content == UnwrappedContent::Duplicate
    }
}

/// The operations the async [`Client`](crate::Client) needs from a party.
pub trait Participant: Send {
    /// The party's shared state.
    fn party(&self) -> &Party;

    /// Decode, verify and apply an envelope fetched from `address`.
    fn unwrap(&mut self, address: &Address, bytes: &[u8]) -> Result<Unwrapped>;

    /// Mark an outbox entry as posted.
    fn confirm(&mut self, address: &Address) -> bool;

    /// Drop an outbox entry that can never be posted.
    fn discard(&mut self, address: &Address) -> Option<Outgoing>;
}

/// One identity's view of one channel.
#[derive(Debug)]
pub struct Party {
    identity: Identity,
    max_envelope_size: usize,
    retry: RetryPolicy,
    pub(crate) topology: Topology,
    pub(crate) access: AccessControl,
    pub(crate) psks: PskStore,
    outbox: BTreeMap<Address, Outgoing>,
}

impl Party {
    pub(crate) fn new(config: &ChannelConfig) -> Result<Self> {
        Ok(Self {
            identity: config.identity()?,
            max_envelope_size: config.max_envelope_size,
            retry: config.retry.clone(),
            topology: Topology::new(),
            access: AccessControl::new(),
            psks: PskStore::new(),
            outbox: BTreeMap::new(),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.identity.public_key()
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.topology.channel()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn max_envelope_size(&self) -> usize {
        self.max_envelope_size
    }

    /// Envelopes published but not yet confirmed, in address order.
    pub fn pending(&self) -> impl Iterator<Item = &Outgoing> {
        self.outbox.values()
    }

    pub(crate) fn confirm(&mut self, address: &Address) -> bool {
        self.outbox.remove(address).is_some()
    }

    /// Drop an unconfirmed envelope whose address went to someone else.
    pub(crate) fn discard(&mut self, address: &Address) -> Option<Outgoing> {
        let outgoing = self.outbox.remove(address)?;
        self.topology.forget(address);
        debug!(address = %address, "discarded envelope");
        Some(outgoing)
    }

    pub(crate) fn require_channel(&self) -> Result<&Channel> {
        self.topology.channel().ok_or(ProtocolError::AnnouncementUnknown)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // PSKs
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn store_psk(&mut self, psk: Psk) -> PskId {
        self.psks.insert(psk)
    }

    pub(crate) fn remove_psk(&mut self, id: &PskId) -> bool {
        self.psks.remove(id).is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────────────────

    /// Encode a message built locally, record it and queue it for posting.
    pub(crate) fn queue(&mut self, message: Message) -> Result<Outgoing> {
        let bytes = Bytes::from(encode_bounded(&message, self.max_envelope_size)?);
        let address = *message.address();
        self.topology.record(message.clone())?;

        let outgoing = Outgoing {
            address,
            message,
            bytes,
        };
        self.outbox.insert(address, outgoing.clone());
        debug!(address = %address, kind = ?outgoing.message.kind(), "queued envelope");
        Ok(outgoing)
    }

    /// Allocate the next address of a branch and the link it should carry.
    pub(crate) fn allocate(&mut self, branch_id: &BranchId) -> Result<(Address, Address)> {
        if self.topology.branch(branch_id).is_none() {
            return Err(ProtocolError::UnknownBranch(*branch_id));
        }
        let previous = self.topology.link_target(branch_id)?;
        let address = self.topology.next_address(branch_id)?;
        debug!(address = %address, previous = %previous, "allocated address");
        Ok((address, previous))
    }

    /// Build, apply and queue a keyload for `recipients` and every held PSK.
    pub(crate) fn issue_keyload(
        &mut self,
        branch_id: &BranchId,
        recipients: &[Recipient],
    ) -> Result<Outgoing> {
        let channel = self.require_channel()?.clone();
        let (address, previous) = self.allocate(branch_id)?;
        let psks: Vec<&Psk> = self.psks.iter().map(|(_, psk)| psk).collect();
        let message = self.access.issue_keyload(
            &self.identity,
            &channel,
            address,
            previous,
            recipients,
            &psks,
        )?;
        self.queue(message)
    }

    /// Whether this party may publish signed packets into a branch.
    fn is_author(&self, key: &Ed25519PublicKey) -> bool {
        self.topology
            .channel()
            .is_some_and(|c| c.author_key == *key)
    }

    fn may_sign_into(&self, branch_id: &BranchId, publisher: &Ed25519PublicKey) -> bool {
        self.is_author(publisher) || self.access.is_authorized(branch_id, publisher)
    }

    /// Build and queue a tagged or signed packet.
    pub(crate) fn publish_packet(
        &mut self,
        kind: PayloadKind,
        branch_id: &BranchId,
        public: &[u8],
        private: &[u8],
    ) -> Result<Outgoing> {
        self.require_channel()?;
        if self.topology.branch(branch_id).is_none() {
            return Err(ProtocolError::UnknownBranch(*branch_id));
        }

        let me = self.public_key();
        let signed = kind == PayloadKind::SignedPacket;
        if signed && !self.may_sign_into(branch_id, &me) {
            return Err(ProtocolError::Unauthorized(format!(
                "{} may not sign packets into branch {}",
                me, branch_id
            )));
        }

        let key = match self.access.current_key(branch_id) {
            Some((key_id, key)) if !signed || !private.is_empty() => Some((key_id, key.clone())),
            Some(_) => None,
            None if signed && private.is_empty() => None,
            None if self.access.was_keyed(branch_id) => {
                return Err(ProtocolError::Unauthorized(format!(
                    "no current key for branch {}",
                    branch_id
                )))
            }
            // A branch that was never keyed takes the author's public-only tagged packets.
            None if private.is_empty() && self.is_author(&me) => None,
            None => return Err(ProtocolError::BranchNotKeyed(*branch_id)),
        };

        let (address, previous) = self.allocate(branch_id)?;
        let builder = MessageBuilder::new(address, me, kind).previous(previous);
        let header = builder.header();
        let masked = match &key {
            Some((key_id, key)) => Some(mask(*key_id, key, &header, public, private)?),
            None => None,
        };
        let body = PacketBody {
            public: Bytes::copy_from_slice(public),
            masked,
        };

        let content = if signed {
            Content::SignedPacket(body)
        } else {
            Content::TaggedPacket(body)
        };
        let message = builder.sign(content, self.identity.keypair())?;
        self.queue(message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingest
    // ─────────────────────────────────────────────────────────────────────────

    /// Decode an envelope fetched from `address`.
    pub(crate) fn decode_envelope(&self, address: &Address, bytes: &[u8]) -> Result<Message> {
        let message = decode_bounded(bytes, self.max_envelope_size)?;
        if message.address() != address {
            return Err(ProtocolError::CorruptEnvelope(format!(
                "envelope for {} was posted at {}",
                message.address(),
                address
            )));
        }
        Ok(message)
    }

    /// Check a message against the topology. `Ok(false)` for a duplicate.
    pub(crate) fn admit(&self, message: &Message) -> Result<bool> {
        Ok(self.topology.admit(message)? == Admission::New)
    }

    /// Apply a keyload from the channel author.
    pub(crate) fn ingest_keyload(&mut self, message: &Message) -> Result<Unwrapped> {
        if message.kind() != PayloadKind::Keyload {
            return Err(ProtocolError::NotAKeyload(message.kind()));
        }
        verify(message)?;
        if !self.admit(message)? {
            return Ok(Unwrapped::new(message, UnwrappedContent::Duplicate));
        }

        let channel = self.require_channel()?.clone();
        let outcome = self
            .access
            .apply_keyload(message, &channel, &self.identity, &self.psks)?;
        self.topology.record(message.clone())?;
        Ok(Unwrapped::new(message, UnwrappedContent::Keyload(outcome)))
    }

    /// Record a subscription request published by anyone.
    pub(crate) fn ingest_subscription(&mut self, message: &Message) -> Result<Unwrapped> {
        let subscriber = match &message.content {
            Content::Subscribe(body) => body.subscriber_key,
            _ => return Err(ProtocolError::UnexpectedPayloadKind(message.kind())),
        };
        verify(message)?;
        if !self.admit(message)? {
            return Ok(Unwrapped::new(message, UnwrappedContent::Duplicate));
        }
        self.topology.record(message.clone())?;
        Ok(Unwrapped::new(
            message,
            UnwrappedContent::Subscription { subscriber },
        ))
    }

    /// Verify and open a tagged or signed packet.
    ///
    /// A packet we hold no key for is still recorded, so later messages can
    /// link to it, and the error says why it could not be read. Packets that
    /// fail authentication are never recorded, and neither are segments
    /// sealed under a key other than the one in force at their sequence.
    pub(crate) fn ingest_packet(&mut self, message: &Message) -> Result<Unwrapped> {
        let (body, signed) = match &message.content {
            Content::TaggedPacket(body) => (body, false),
            Content::SignedPacket(body) => (body, true),
            _ => return Err(ProtocolError::UnexpectedPayloadKind(message.kind())),
        };
        verify(message)?;
        if !self.admit(message)? {
            return Ok(Unwrapped::new(message, UnwrappedContent::Duplicate));
        }

        let branch_id = message.address().branch_id;
        if signed && !self.may_sign_into(&branch_id, message.publisher()) {
            return Err(ProtocolError::Unauthorized(format!(
                "{} is not authorized in branch {}",
                message.publisher(),
                branch_id
            )));
        }

        let sequence = message.address().sequence;
        let in_force = self.access.key_in_force(&branch_id, sequence);
        let masked = match &body.masked {
            None if signed => Bytes::new(),
            None => {
                if in_force.is_some() || !self.is_author(message.publisher()) {
                    return Err(ProtocolError::Unauthorized(format!(
                        "unsealed tagged packet at {} from {}",
                        message.address(),
                        message.publisher()
                    )));
                }
                Bytes::new()
            }
            Some(segment) => {
                let superseded = match in_force {
                    Some(key_id) => key_id != segment.key_id,
                    None => self.access.key_for(&branch_id, &segment.key_id).is_some(),
                };
                if superseded {
                    return Err(ProtocolError::Unauthorized(format!(
                        "key {} was not in force at {}",
                        segment.key_id,
                        message.address()
                    )));
                }
                match self.access.key_for(&branch_id, &segment.key_id) {
                    Some(key) => unmask(segment, key, &message.header, &body.public)?,
                    None => {
                        let keyed = self.access.was_keyed(&branch_id);
                        self.topology.record(message.clone())?;
                        debug!(address = %message.address(), "recorded packet without a readable key");
                        return Err(if keyed {
                            ProtocolError::DecryptionFailed
                        } else {
                            ProtocolError::BranchNotKeyed(branch_id)
                        });
                    }
                }
            }
        };

        self.topology.record(message.clone())?;
        let public = body.public.clone();
        let content = if signed {
            UnwrappedContent::SignedPacket { public, masked }
        } else {
            UnwrappedContent::TaggedPacket { public, masked }
        };
        Ok(Unwrapped::new(message, content))
    }

    pub(crate) fn ingest_announcement(&mut self, message: &Message) -> Result<Unwrapped> {
        let body = match &message.content {
            Content::Announcement(body) => body.clone(),
            _ => return Err(ProtocolError::NotAnAnnouncement(message.kind())),
        };
        verify(message)?;
        if !self.admit(message)? {
            return Ok(Unwrapped::new(message, UnwrappedContent::Duplicate));
        }
        self.topology.record(message.clone())?;
        Ok(Unwrapped::new(
            message,
            UnwrappedContent::Announcement {
                author: body.author_key,
                multi_branching: body.multi_branching,
            },
        ))
    }
}

/// Structural rules and the publisher's signature.
pub(crate) fn verify(message: &Message) -> Result<()> {
    validate_structure(message)?;
    verify_signature(message)?;
    Ok(())
}

/// Adapter driving a participant through catch-up.
pub(crate) struct Ingester<'a, P: ?Sized>(pub(crate) &'a mut P);

impl<P: Participant + ?Sized> Ingest for Ingester<'_, P> {
    type Output = Unwrapped;
    type Error = ProtocolError;

    fn ingest(&mut self, envelope: &Envelope) -> Result<IngestStatus<Unwrapped, ProtocolError>> {
        match self.0.unwrap(&envelope.address, &envelope.bytes) {
            Ok(unwrapped) if unwrapped.is_duplicate() => Ok(IngestStatus::Duplicate),
            Ok(unwrapped) => Ok(IngestStatus::Applied(unwrapped)),
            Err(ProtocolError::OutOfOrder { missing, .. }) => Ok(IngestStatus::Missing(missing)),
            Err(e @ (ProtocolError::DecryptionFailed | ProtocolError::BranchNotKeyed(_)))
                if self.0.party().topology().contains(&envelope.address) =>
            {
                Ok(IngestStatus::Unreadable(e))
            }
            Err(e) => Err(e),
        }
    }
}
