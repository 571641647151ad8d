//! Message: the unit posted to the ledger.
//!
//! A message is an immutable header plus a kind-specific body and, for every
//! kind except tagged packets, an Ed25519 signature over both.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::canonical::{body_bytes, signing_bytes};
use crate::crypto::{
    Ed25519PublicKey, Ed25519Signature, EncryptionNonce, Keypair, X25519PublicKey,
};
use crate::error::{CoreError, Result, ValidationError};
use crate::types::{KeyId, PskId};

/// The envelope layout version this crate reads and writes.
pub const PROTOCOL_VERSION: u8 = 1;

/// The kind of message, determining how the body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum PayloadKind {
    // Channel control (0x0000 - 0x000F)
    /// Channel root, signed by the author.
    Announcement = 0x0001,
    /// Subscription request carrying the subscriber's keys.
    Subscribe = 0x0002,
    /// Complete authorized set and wrapped key for one branch.
    Keyload = 0x0003,

    // Packets (0x0010 - 0x001F)
    /// Public segment plus encrypted segment sealed under the branch key.
    TaggedPacket = 0x0010,
    /// Public segment plus optional encrypted segment, signed by the publisher.
    SignedPacket = 0x0011,
}

impl PayloadKind {
    /// Convert to u16 for serialization.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Try to parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Announcement),
            0x0002 => Some(Self::Subscribe),
            0x0003 => Some(Self::Keyload),
            0x0010 => Some(Self::TaggedPacket),
            0x0011 => Some(Self::SignedPacket),
            _ => None,
        }
    }

    /// Check if this is a packet kind.
    pub fn is_packet(self) -> bool {
        (self.to_u16() & 0xFFF0) == 0x0010
    }
}

/// Header fields common to every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Envelope layout version.
    pub version: u8,

    /// Where this message lives on the ledger.
    pub address: Address,

    /// The message this one links to. `None` only for announcements.
    pub previous: Option<Address>,

    /// The publishing identity.
    pub publisher: Ed25519PublicKey,

    /// How to interpret the body.
    pub kind: PayloadKind,
}

/// Body of an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementBody {
    pub author_key: Ed25519PublicKey,
    pub exchange_key: X25519PublicKey,
    pub multi_branching: bool,
}

/// Body of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeBody {
    pub subscriber_key: Ed25519PublicKey,
    pub exchange_key: X25519PublicKey,
}

/// The branch key wrapped for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientShare {
    pub recipient: Ed25519PublicKey,
    pub ephemeral_key: X25519PublicKey,
    pub nonce: EncryptionNonce,
    pub wrapped_key: Bytes,
}

/// The branch key wrapped under a pre-shared key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PskShare {
    pub psk_id: PskId,
    pub nonce: EncryptionNonce,
    pub wrapped_key: Bytes,
}

/// Body of a keyload. The recipient and PSK lists are the complete
/// authorized set for the branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyloadBody {
    pub key_id: KeyId,
    pub recipients: Vec<RecipientShare>,
    pub psk_shares: Vec<PskShare>,
}

impl KeyloadBody {
    /// Public keys named by this keyload, in order.
    pub fn recipient_keys(&self) -> impl Iterator<Item = &Ed25519PublicKey> {
        self.recipients.iter().map(|share| &share.recipient)
    }
}

/// The encrypted part of a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedSegment {
    /// The branch key epoch the segment was sealed under.
    pub key_id: KeyId,
    pub nonce: EncryptionNonce,
    pub ciphertext: Bytes,
}

/// Body shared by tagged and signed packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketBody {
    pub public: Bytes,
    pub masked: Option<MaskedSegment>,
}

/// Kind-specific message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Announcement(AnnouncementBody),
    Subscribe(SubscribeBody),
    Keyload(KeyloadBody),
    TaggedPacket(PacketBody),
    SignedPacket(PacketBody),
}

impl Content {
    /// The payload kind this content encodes as.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Announcement(_) => PayloadKind::Announcement,
            Self::Subscribe(_) => PayloadKind::Subscribe,
            Self::Keyload(_) => PayloadKind::Keyload,
            Self::TaggedPacket(_) => PayloadKind::TaggedPacket,
            Self::SignedPacket(_) => PayloadKind::SignedPacket,
        }
    }
}

/// A complete message: header, content and optional signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub content: Content,

    /// Ed25519 signature over the signing bytes. Absent for tagged packets.
    pub signature: Option<Ed25519Signature>,
}

impl Message {
    /// Get the address.
    pub fn address(&self) -> &Address {
        &self.header.address
    }

    /// Get the previous link.
    pub fn previous(&self) -> Option<&Address> {
        self.header.previous.as_ref()
    }

    /// Get the publisher key.
    pub fn publisher(&self) -> &Ed25519PublicKey {
        &self.header.publisher
    }

    /// Get the payload kind.
    pub fn kind(&self) -> PayloadKind {
        self.header.kind
    }

    /// Check if this is an announcement.
    pub fn is_announcement(&self) -> bool {
        self.header.kind == PayloadKind::Announcement
    }

    /// The packet body, for either packet kind.
    pub fn packet(&self) -> Option<&PacketBody> {
        match &self.content {
            Content::TaggedPacket(body) | Content::SignedPacket(body) => Some(body),
            _ => None,
        }
    }
}

/// Builder for creating messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    address: Address,
    previous: Option<Address>,
    publisher: Ed25519PublicKey,
    kind: PayloadKind,
}

impl MessageBuilder {
    /// Start building a message.
    pub fn new(address: Address, publisher: Ed25519PublicKey, kind: PayloadKind) -> Self {
        Self {
            address,
            previous: None,
            publisher,
            kind,
        }
    }

    /// Set the previous link.
    pub fn previous(mut self, previous: Address) -> Self {
        self.previous = Some(previous);
        self
    }

    /// The header this builder will produce.
    pub fn header(&self) -> MessageHeader {
        MessageHeader {
            version: PROTOCOL_VERSION,
            address: self.address,
            previous: self.previous,
            publisher: self.publisher,
            kind: self.kind,
        }
    }

    fn check_kind(&self, content: &Content) -> Result<()> {
        if content.kind() != self.kind {
            return Err(ValidationError::KindMismatch {
                header: self.kind,
                content: content.kind(),
            }
            .into());
        }
        Ok(())
    }

    /// Build and sign the message.
    pub fn sign(self, content: Content, keypair: &Keypair) -> Result<Message> {
        self.check_kind(&content)?;
        if keypair.public_key() != self.publisher {
            return Err(CoreError::Invalid(ValidationError::PublisherMismatch));
        }

        let header = self.header();
        let body = body_bytes(&content)?;
        let signature = keypair.sign(&signing_bytes(&header, &body));

        Ok(Message {
            header,
            content,
            signature: Some(signature),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::X25519StaticSecret;
    use crate::types::{BranchId, ChannelId};

    fn packet_content() -> Content {
        Content::SignedPacket(PacketBody {
            public: Bytes::from_static(b"hello"),
            masked: None,
        })
    }

    #[test]
    fn test_payload_kind_roundtrip() {
        for kind in [
            PayloadKind::Announcement,
            PayloadKind::Subscribe,
            PayloadKind::Keyload,
            PayloadKind::TaggedPacket,
            PayloadKind::SignedPacket,
        ] {
            assert_eq!(PayloadKind::from_u16(kind.to_u16()), Some(kind));
        }
        assert_eq!(PayloadKind::from_u16(0x0004), None);
    }

    #[test]
    fn test_packet_kinds() {
        assert!(PayloadKind::TaggedPacket.is_packet());
        assert!(PayloadKind::SignedPacket.is_packet());
        assert!(!PayloadKind::Subscribe.is_packet());
    }

    #[test]
    fn test_builder_signs() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let channel = ChannelId::derive(&keypair.public_key());
        let root = Address::announcement(channel);
        let address = Address::new(channel, BranchId::root(&channel), 1);

        let message = MessageBuilder::new(address, keypair.public_key(), PayloadKind::SignedPacket)
            .previous(root)
            .sign(packet_content(), &keypair)
            .unwrap();

        assert_eq!(message.address(), &address);
        assert_eq!(message.previous(), Some(&root));
        assert!(message.signature.is_some());
        assert_eq!(message.packet().unwrap().public.as_ref(), b"hello");
    }

    #[test]
    fn test_builder_rejects_kind_mismatch() {
        let keypair = Keypair::generate();
        let address = Address::for_author(&keypair.public_key());
        let err = MessageBuilder::new(address, keypair.public_key(), PayloadKind::Keyload)
            .sign(packet_content(), &keypair)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Invalid(ValidationError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_foreign_keypair() {
        let keypair = Keypair::generate();
        let other = Keypair::generate();
        let address = Address::for_author(&keypair.public_key());
        let content = Content::Announcement(AnnouncementBody {
            author_key: keypair.public_key(),
            exchange_key: X25519StaticSecret::generate().public_key(),
            multi_branching: false,
        });
        let err = MessageBuilder::new(address, keypair.public_key(), PayloadKind::Announcement)
            .sign(content, &other)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Invalid(ValidationError::PublisherMismatch)
        ));
    }
}
