//! The channel author.
//!
//! States: `Created → Announced → Active`. The author announces the
//! channel, learns subscribers from their subscription requests, keys
//! branches with keyloads and publishes packets.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use strand_core::{
    channel_address, Address, AnnouncementBody, BranchId, Content, Ed25519PublicKey, Message,
    MessageBuilder, PayloadKind, PskId,
};
use strand_keyload::{Psk, Recipient};

use crate::config::ChannelConfig;
use crate::error::{ProtocolError, Result};
use crate::party::{Outgoing, Participant, Party, Unwrapped};

/// Lifecycle of an author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorState {
    /// Identity derived, nothing published.
    Created,
    /// Announcement built, not yet confirmed on the ledger.
    Announced,
    /// Announcement confirmed; publishing allowed.
    Active,
}

impl AuthorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Announced => "announced",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for AuthorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity that owns a channel.
#[derive(Debug)]
pub struct Author {
    party: Party,
    state: AuthorState,
    multi_branching: bool,
    /// Subscribers whose requests were accepted, by public key.
    subscribers: BTreeMap<Ed25519PublicKey, Recipient>,
}

impl Author {
    /// Derive the author identity. Nothing is published yet.
    pub fn new(config: ChannelConfig) -> Result<Self> {
        Ok(Self {
            party: Party::new(&config)?,
            state: AuthorState::Created,
            multi_branching: config.multi_branching,
            subscribers: BTreeMap::new(),
        })
    }

    pub fn state(&self) -> AuthorState {
        self.state
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.party.public_key()
    }

    /// The announcement address. Known before announcing, since it only
    /// depends on the author key.
    pub fn channel_address(&self) -> Address {
        channel_address(self.party.identity())
    }

    /// The root branch of the channel.
    pub fn root_branch(&self) -> BranchId {
        BranchId::root(&self.channel_address().channel_id)
    }

    fn require_active(&self) -> Result<()> {
        match self.state {
            AuthorState::Active => Ok(()),
            other => Err(ProtocolError::NotActive(other.as_str())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Channel Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Build the channel announcement.
    pub fn announce(&mut self) -> Result<Outgoing> {
        if self.state != AuthorState::Created {
            return Err(ProtocolError::AlreadyAnnounced);
        }
        let identity = self.party.identity();
        let body = AnnouncementBody {
            author_key: identity.public_key(),
            exchange_key: identity.exchange_public_key(),
            multi_branching: self.multi_branching,
        };
        let message = MessageBuilder::new(
            self.channel_address(),
            identity.public_key(),
            PayloadKind::Announcement,
        )
        .sign(Content::Announcement(body), identity.keypair())?;

        let outgoing = self.party.queue(message)?;
        self.state = AuthorState::Announced;
        info!(channel = %outgoing.address.channel_id, "channel announced");
        Ok(outgoing)
    }

    /// Confirm an envelope as posted. Confirming the announcement
    /// activates the author.
    pub fn confirm(&mut self, address: &Address) -> bool {
        let confirmed = self.party.confirm(address);
        if *address == self.channel_address() && self.state == AuthorState::Announced {
            self.state = AuthorState::Active;
            debug!(channel = %address.channel_id, "author active");
        }
        confirmed
    }

    /// Open a named branch. Subscribers learn about it through its first
    /// keyload.
    pub fn create_branch(&mut self, label: &str) -> Result<BranchId> {
        self.require_active()?;
        if !self.multi_branching {
            return Err(ProtocolError::BranchingDisabled);
        }
        let channel_id = self.channel_address().channel_id;
        let branch_id = BranchId::named(&channel_id, label);
        self.party.topology.open_branch(branch_id);
        debug!(branch = %branch_id, label, "branch opened");
        Ok(branch_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscribers & PSKs
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a subscription request. Access is only granted by a later
    /// keyload naming the subscriber.
    pub fn accept_subscription(&mut self, message: &Message) -> Result<Unwrapped> {
        let recipient = match &message.content {
            Content::Subscribe(body) => Recipient {
                public_key: body.subscriber_key,
                exchange_key: body.exchange_key,
            },
            _ => return Err(ProtocolError::UnexpectedPayloadKind(message.kind())),
        };
        if self.state == AuthorState::Created {
            return Err(ProtocolError::NotActive(self.state.as_str()));
        }
        let unwrapped = self.party.ingest_subscription(message)?;
        if self
            .subscribers
            .insert(recipient.public_key, recipient)
            .is_none()
        {
            info!(subscriber = %recipient.public_key, "subscription accepted");
        }
        Ok(unwrapped)
    }

    /// Forget a subscriber. Later keyloads can no longer name it.
    pub fn remove_subscriber(&mut self, key: &Ed25519PublicKey) -> bool {
        self.subscribers.remove(key).is_some()
    }

    /// Accepted subscribers.
    pub fn subscribers(&self) -> impl Iterator<Item = &Ed25519PublicKey> {
        self.subscribers.keys()
    }

    /// Add a PSK. Every later keyload wraps its branch key under it.
    pub fn store_psk(&mut self, psk: Psk) -> PskId {
        self.party.store_psk(psk)
    }

    pub fn remove_psk(&mut self, id: &PskId) -> bool {
        self.party.remove_psk(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keyloads
    // ─────────────────────────────────────────────────────────────────────────

    /// Key a branch for exactly `recipients` plus every stored PSK.
    pub fn share_keyload(
        &mut self,
        branch_id: &BranchId,
        recipients: &[Ed25519PublicKey],
    ) -> Result<Outgoing> {
        self.require_active()?;
        let recipients = recipients
            .iter()
            .map(|key| {
                self.subscribers
                    .get(key)
                    .copied()
                    .ok_or(ProtocolError::UnknownRecipient(*key))
            })
            .collect::<Result<Vec<_>>>()?;

        let outgoing = self.party.issue_keyload(branch_id, &recipients)?;
        info!(
            branch = %branch_id,
            sequence = outgoing.address.sequence,
            recipients = recipients.len(),
            "keyload issued"
        );
        Ok(outgoing)
    }

    /// Key a branch for every accepted subscriber.
    pub fn share_keyload_for_everyone(&mut self, branch_id: &BranchId) -> Result<Outgoing> {
        let everyone: Vec<Ed25519PublicKey> = self.subscribers.keys().copied().collect();
        self.share_keyload(branch_id, &everyone)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Packets
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish a signed packet whose private part is sealed under the branch
    /// key. A branch that was never keyed takes it only with no private part.
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

    /// Publish a packet signed by the author.
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

    // ─────────────────────────────────────────────────────────────────────────
    // Ingest
    // ─────────────────────────────────────────────────────────────────────────

    fn unwrap_message(&mut self, message: &Message) -> Result<Unwrapped> {
        match message.kind() {
            PayloadKind::Announcement => {
                if *message.address() == self.channel_address() {
                    // Our own announcement, e.g. read back after a restart.
                    let unwrapped = self.party.ingest_announcement(message)?;
                    if self.state == AuthorState::Created {
                        self.state = AuthorState::Active;
                    }
                    return Ok(unwrapped);
                }
                Err(ProtocolError::ChannelMismatch {
                    expected: self.channel_address().channel_id,
                    found: message.address().channel_id,
                })
            }
            PayloadKind::Subscribe => self.accept_subscription(message),
            PayloadKind::Keyload => self.party.ingest_keyload(message),
            PayloadKind::TaggedPacket | PayloadKind::SignedPacket => {
                self.party.ingest_packet(message)
            }
        }
    }

    pub fn party(&self) -> &Party {
        &self.party
    }
}

impl Participant for Author {
    fn party(&self) -> &Party {
        &self.party
    }

    fn unwrap(&mut self, address: &Address, bytes: &[u8]) -> Result<Unwrapped> {
        let message = self.party.decode_envelope(address, bytes)?;
        self.unwrap_message(&message)
    }

    fn confirm(&mut self, address: &Address) -> bool {
        Author::confirm(self, address)
    }

    fn discard(&mut self, address: &Address) -> Option<Outgoing> {
        self.party.discard(address)
    }
}
