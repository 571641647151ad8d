//! The channel subscriber.
//!
//! States: `Created → AnnouncementKnown → Subscribed → Active`. A
//! subscriber learns the channel from its announcement, asks for access
//! with a subscription request and becomes active once a keyload hands it
//! a branch key, either directly or through a PSK.

use std::fmt;

use tracing::{debug, info};

use strand_core::{
    encode_bounded, Address, BranchId, Content, Ed25519PublicKey, Message, MessageBuilder,
    PayloadKind, PskId, SubscribeBody,
};
use strand_keyload::{KeyloadOutcome, Psk};

use crate::config::ChannelConfig;
use crate::error::{ProtocolError, Result};
use crate::party::{Outgoing, Participant, Party, Unwrapped, UnwrappedContent};

/// Lifecycle of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Created,
    AnnouncementKnown,
    /// Subscription request published; no branch key yet.
    Subscribed,
    /// Holds the current key of at least one branch.
    Active,
}

impl SubscriberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AnnouncementKnown => "announcement-known",
            Self::Subscribed => "subscribed",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reader, and possibly writer, of somebody else's channel.
#[derive(Debug)]
pub struct Subscriber {
    party: Party,
    state: SubscriberState,
    subscribed: bool,
}

impl Subscriber {
    pub fn new(config: ChannelConfig) -> Result<Self> {
        Ok(Self {
            party: Party::new(&config)?,
            state: SubscriberState::Created,
            subscribed: false,
        })
    }

    pub fn state(&self) -> SubscriberState {
        self.state
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.party.public_key()
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    /// Root branch of the known channel.
    pub fn root_branch(&self) -> Option<BranchId> {
        self.party.channel().map(|c| c.root_branch())
    }

    /// Branches whose current key we hold.
    pub fn authorized_branches(&self) -> Vec<BranchId> {
        self.party.access().authorized_branches().copied().collect()
    }

    fn transition(&mut self, next: SubscriberState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "subscriber state");
            self.state = next;
        }
    }

    /// Derive the state from what we hold. Keys win over the request.
    fn refresh_state(&mut self) {
        let next = if self.party.access().authorized_branches().next().is_some() {
            SubscriberState::Active
        } else if self.subscribed {
            SubscriberState::Subscribed
        } else if self.party.channel().is_some() {
            SubscriberState::AnnouncementKnown
        } else {
            SubscriberState::Created
        };
        self.transition(next);
    }

    fn require_active(&self) -> Result<()> {
        match self.state {
            SubscriberState::Active => Ok(()),
            other => Err(ProtocolError::NotActive(other.as_str())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Joining
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify and record a channel announcement.
    pub fn unwrap_announcement(&mut self, message: &Message) -> Result<Unwrapped> {
        let unwrapped = self.party.ingest_announcement(message)?;
        if !unwrapped.is_duplicate() {
            info!(channel = %message.address().channel_id, "announcement accepted");
        }
        self.refresh_state();
        Ok(unwrapped)
    }

    /// Build the subscription request for the announced channel.
    ///
    /// Subscribing twice returns the request already built.
    pub fn subscribe(&mut self, announcement: &Address) -> Result<Outgoing> {
        let channel = match self.party.channel() {
            Some(channel) if channel.announcement == *announcement => channel.clone(),
            _ => return Err(ProtocolError::AnnouncementUnknown),
        };

        let identity = self.party.identity();
        let me = identity.public_key();
        let address = Address::new(
            channel.channel_id,
            BranchId::subscription(&channel.channel_id, &me),
            1,
        );

        if let Some(existing) = self.party.topology().get(&address) {
            let message = existing.clone();
            let bytes = encode_bounded(&message, self.party.max_envelope_size())?.into();
            return Ok(Outgoing {
                address,
                message,
                bytes,
            });
        }

        let body = SubscribeBody {
            subscriber_key: me,
            exchange_key: identity.exchange_public_key(),
        };
        let message = MessageBuilder::new(address, me, PayloadKind::Subscribe)
            .previous(channel.announcement)
            .sign(Content::Subscribe(body), identity.keypair())?;

        let outgoing = self.party.queue(message)?;
        self.subscribed = true;
        self.refresh_state();
        info!(channel = %channel.channel_id, "subscription requested");
        Ok(outgoing)
    }

    /// Add a PSK shared out of band.
    pub fn store_psk(&mut self, psk: Psk) -> PskId {
        self.party.store_psk(psk)
    }

    pub fn remove_psk(&mut self, id: &PskId) -> bool {
        self.party.remove_psk(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keyloads & packets
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a keyload and recompute the state from the keys we now hold.
    pub fn unwrap_keyload(&mut self, message: &Message) -> Result<Unwrapped> {
        let unwrapped = self.party.ingest_keyload(message)?;
        self.refresh_state();
        Ok(unwrapped)
    }

    /// The keyload outcome, when `unwrapped` came from a keyload.
    pub fn keyload_outcome(unwrapped: &Unwrapped) -> Option<&KeyloadOutcome> {
        match &unwrapped.content {
            UnwrappedContent::Keyload(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Open a tagged packet.
    pub fn unwrap_tagged(&mut self, message: &Message) -> Result<Unwrapped> {
        if message.kind() != PayloadKind::TaggedPacket {
            return Err(ProtocolError::UnexpectedPayloadKind(message.kind()));
        }
        self.party.ingest_packet(message)
    }

    /// Verify and open a signed packet.
    pub fn unwrap_signed(&mut self, message: &Message) -> Result<Unwrapped> {
        if message.kind() != PayloadKind::SignedPacket {
            return Err(ProtocolError::UnexpectedPayloadKind(message.kind()));
        }
        self.party.ingest_packet(message)
    }

    /// Publish a signed packet whose private part is sealed under the branch key.
    pub fn publish_tagged(
        &mut self,
        branch_id: &BranchId,
        public: &[u8],
        private: &[u8],
    ) -> Result<Outgoing> {
        self.require_active()?;
        self.party
            .publish_packet(PayloadKind::TaggedPacket, branch_id, public, private)
    }

    /// Publish a packet signed with our key. Needs to be named by the
    /// keyload in force; a PSK alone is not enough.
    pub fn publish_signed(
        &mut self,
        branch_id: &BranchId,
        public: &[u8],
        private: &[u8],
    ) -> Result<Outgoing> {
        self.require_active()?;
        self.party
            .publish_packet(PayloadKind::SignedPacket, branch_id, public, private)
    }

    pub fn confirm(&mut self, address: &Address) -> bool {
        self.party.confirm(address)
    }

    fn unwrap_message(&mut self, message: &Message) -> Result<Unwrapped> {
        match message.kind() {
            PayloadKind::Announcement => self.unwrap_announcement(message),
            PayloadKind::Keyload => self.unwrap_keyload(message),
            PayloadKind::Subscribe => self.party.ingest_subscription(message),
            PayloadKind::TaggedPacket | PayloadKind::SignedPacket => {
                self.party.ingest_packet(message)
            }
        }
    }
}

impl Participant for Subscriber {
    fn party(&self) -> &Party {
        &self.party
    }

    fn unwrap(&mut self, address: &Address, bytes: &[u8]) -> Result<Unwrapped> {
        let message = self.party.decode_envelope(address, bytes)?;
        self.unwrap_message(&message)
    }

    fn confirm(&mut self, address: &Address) -> bool {
        self.party.confirm(address)
    }

    fn discard(&mut self, address: &Address) -> Option<Outgoing> {
        self.party.discard(address)
    }
}
