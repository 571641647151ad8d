//! Message validation: structural rules and signature verification.
//!
//! Structural checks need nothing but the message itself. Context checks
//! (known previous link, keyload authority, branch authorization) live in
//! the topology and access-control layers.

use crate::address::Address;
use crate::canonical::message_signing_bytes;
use crate::crypto::Ed25519PublicKey;
use crate::error::{CoreError, Result, ValidationError};
use crate::message::{Content, Message, PROTOCOL_VERSION};
use crate::types::{BranchId, ChannelId};

/// Validate a message's structure without verifying its signature.
pub fn validate_structure(message: &Message) -> std::result::Result<(), ValidationError> {
    let header = &message.header;

    if header.version != PROTOCOL_VERSION {
        return Err(ValidationError::UnsupportedVersion(header.version));
    }

    if header.kind != message.content.kind() {
        return Err(ValidationError::KindMismatch {
            header: header.kind,
            content: message.content.kind(),
        });
    }

    match (&message.content, header.previous) {
        (Content::Announcement(body), previous) => {
            if previous.is_some() || !header.address.is_announcement() {
                return Err(ValidationError::MisplacedAnnouncement);
            }
            if ChannelId::derive(&header.publisher) != header.address.channel_id {
                return Err(ValidationError::ForeignChannel);
            }
            if body.author_key != header.publisher {
                return Err(ValidationError::PublisherMismatch);
            }
        }
        (_, None) => return Err(ValidationError::MissingPreviousLink),
        (content, Some(previous)) => {
            if header.address.is_announcement() {
                return Err(ValidationError::ReservedAddress);
            }
            if previous.channel_id != header.address.channel_id {
                return Err(ValidationError::CrossChannelLink);
            }
            if previous == header.address {
                return Err(ValidationError::SelfLink);
            }
            match content {
                Content::Subscribe(body) => {
                    if body.subscriber_key != header.publisher {
                        return Err(ValidationError::PublisherMismatch);
                    }
                    let channel = header.address.channel_id;
                    if header.address.branch_id != BranchId::subscription(&channel, &header.publisher)
                    {
                        return Err(ValidationError::WrongSubscriptionSlot);
                    }
                    if previous != Address::announcement(channel) {
                        return Err(ValidationError::DetachedSubscription);
                    }
                }
                _ => {}
            }
        }
    }

    if message.signature.is_none() {
        return Err(ValidationError::MissingSignature(header.kind));
    }
    Ok(())
}

/// Verify the publisher's signature.
pub fn verify_signature(message: &Message) -> Result<()> {
    let signature = message
        .signature
        .as_ref()
        .ok_or(ValidationError::MissingSignature(message.kind()))?;
    let bytes = message_signing_bytes(message)?;
    message
        .publisher()
        .verify(&bytes, signature)
        .map_err(|_| CoreError::SignatureInvalid)
}

/// Verify that `expected` published and signed the message.
pub fn verify_signed_by(message: &Message, expected: &Ed25519PublicKey) -> Result<()> {
    if message.publisher() != expected || message.signature.is_none() {
        return Err(CoreError::SignatureInvalid);
    }
    verify_signature(message)
}

/// Structural validation followed by signature verification.
pub fn validate(message: &Message) -> Result<()> {
    validate_structure(message)?;
    verify_signature(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionNonce, Keypair, X25519StaticSecret};
    use crate::message::{
        AnnouncementBody, MaskedSegment, MessageBuilder, PacketBody, PayloadKind, SubscribeBody,
    };
    use crate::types::KeyId;
    use bytes::Bytes;

    fn make_test_keypair() -> Keypair {
        Keypair::from_seed(&[0x42; 32])
    }

    fn announcement(keypair: &Keypair) -> Message {
        MessageBuilder::new(
            Address::for_author(&keypair.public_key()),
            keypair.public_key(),
            PayloadKind::Announcement,
        )
        .sign(
            Content::Announcement(AnnouncementBody {
                author_key: keypair.public_key(),
                exchange_key: X25519StaticSecret::from_bytes([1; 32]).public_key(),
                multi_branching: true,
            }),
            keypair,
        )
        .unwrap()
    }

    fn signed_packet(keypair: &Keypair, sequence: u64) -> Message {
        let root = Address::for_author(&keypair.public_key());
        MessageBuilder::new(
            root.with_sequence(sequence),
            keypair.public_key(),
            PayloadKind::SignedPacket,
        )
        .previous(root)
        .sign(
            Content::SignedPacket(PacketBody {
                public: Bytes::from_static(b"hi"),
                masked: None,
            }),
            keypair,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_announcement() {
        validate(&announcement(&make_test_keypair())).unwrap();
    }

    #[test]
    fn test_valid_signed_packet() {
        validate(&signed_packet(&make_test_keypair(), 1)).unwrap();
    }

    #[test]
    fn test_invalid_signature() {
        let keypair = make_test_keypair();
        let mut message = signed_packet(&keypair, 1);
        if let Content::SignedPacket(body) = &mut message.content {
            body.public = Bytes::from_static(b"tampered");
        }
        validate_structure(&message).unwrap();
        assert!(matches!(
            verify_signature(&message),
            Err(CoreError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_announcement_must_sit_at_root() {
        let keypair = make_test_keypair();
        let mut message = announcement(&keypair);
        message.header.address.sequence = 1;
        assert!(matches!(
            validate_structure(&message),
            Err(ValidationError::MisplacedAnnouncement)
        ));
    }

    #[test]
    fn test_announcement_for_foreign_channel() {
        let keypair = make_test_keypair();
        let other = Keypair::generate();
        let mut message = announcement(&keypair);
        message.header.address = Address::for_author(&other.public_key());
        assert!(matches!(
            validate_structure(&message),
            Err(ValidationError::ForeignChannel)
        ));
    }

    #[test]
    fn test_packet_at_announcement_slot() {
        let keypair = make_test_keypair();
        let mut message = signed_packet(&keypair, 1);
        message.header.address.sequence = 0;
        assert!(matches!(
            validate_structure(&message),
            Err(ValidationError::ReservedAddress)
        ));
    }

    #[test]
    fn test_packet_without_previous() {
        let keypair = make_test_keypair();
        let mut message = signed_packet(&keypair, 1);
        message.header.previous = None;
        assert!(matches!(
            validate_structure(&message),
            Err(ValidationError::MissingPreviousLink)
        ));
    }

    #[test]
    fn test_cross_channel_link() {
        let keypair = make_test_keypair();
        let mut message = signed_packet(&keypair, 1);
        message.header.previous = Some(Address::for_author(&Keypair::generate().public_key()));
        assert!(matches!(
            validate_structure(&message),
            Err(ValidationError::CrossChannelLink)
        ));
    }

    #[test]
    fn test_self_link() {
        let keypair = make_test_keypair();
        let mut message = signed_packet(&keypair, 1);
        message.header.previous = Some(message.header.address);
        assert!(matches!(
            validate_structure(&message),
            Err(ValidationError::SelfLink)
        ));
    }

    #[test]
    fn test_subscription_slot_rules() {
        let author = make_test_keypair();
        let subscriber = Keypair::from_seed(&[0x07; 32]);
        let channel = ChannelId::derive(&author.public_key());
        let root = Address::announcement(channel);
        let body = SubscribeBody {
            subscriber_key: subscriber.public_key(),
            exchange_key: X25519StaticSecret::from_bytes([2; 32]).public_key(),
        };
        let slot = Address::new(
            channel,
            BranchId::subscription(&channel, &subscriber.public_key()),
            1,
        );

        let good = MessageBuilder::new(slot, subscriber.public_key(), PayloadKind::Subscribe)
            .previous(root)
            .sign(Content::Subscribe(body.clone()), &subscriber)
            .unwrap();
        validate(&good).unwrap();

        let wrong_slot = MessageBuilder::new(
            root.with_sequence(1),
            subscriber.public_key(),
            PayloadKind::Subscribe,
        )
        .previous(root)
        .sign(Content::Subscribe(body.clone()), &subscriber)
        .unwrap();
        assert!(matches!(
            validate_structure(&wrong_slot),
            Err(ValidationError::WrongSubscriptionSlot)
        ));

        let detached = MessageBuilder::new(slot.with_sequence(2), subscriber.public_key(), PayloadKind::Subscribe)
            .previous(slot)
            .sign(Content::Subscribe(body), &subscriber)
            .unwrap();
        assert!(matches!(
            validate_structure(&detached),
            Err(ValidationError::DetachedSubscription)
        ));
    }

    #[test]
    fn test_tagged_packet_is_signed_by_its_publisher() {
        let keypair = make_test_keypair();
        let root = Address::for_author(&keypair.public_key());
        let builder = MessageBuilder::new(
            root.with_sequence(1),
            keypair.public_key(),
            PayloadKind::TaggedPacket,
        )
        .previous(root);
        let masked = builder
            .clone()
            .sign(
                Content::TaggedPacket(PacketBody {
                    public: Bytes::new(),
                    masked: Some(MaskedSegment {
                        key_id: KeyId::from_bytes([0; 32]),
                        nonce: EncryptionNonce::from_bytes([0; 12]),
                        ciphertext: Bytes::from_static(&[0; 16]),
                    }),
                }),
                &keypair,
            )
            .unwrap();
        validate(&masked).unwrap();

        let bare = builder
            .sign(
                Content::TaggedPacket(PacketBody {
                    public: Bytes::from_static(b"open"),
                    masked: None,
                }),
                &keypair,
            )
            .unwrap();
        validate(&bare).unwrap();

        let mut unsigned = masked.clone();
        unsigned.signature = None;
        assert!(matches!(
            validate_structure(&unsigned),
            Err(ValidationError::MissingSignature(PayloadKind::TaggedPacket))
        ));

        // Same header and body, signed by someone other than the named publisher.
        let mut forged = masked;
        let intruder = Keypair::from_seed(&[0x13; 32]);
        forged.signature = Some(intruder.sign(&message_signing_bytes(&forged).unwrap()));
        validate_structure(&forged).unwrap();
        assert!(matches!(
            verify_signature(&forged),
            Err(CoreError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_signed_by() {
        let keypair = make_test_keypair();
        let message = announcement(&keypair);
        verify_signed_by(&message, &keypair.public_key()).unwrap();
        assert!(matches!(
            verify_signed_by(&message, &Keypair::generate().public_key()),
            Err(CoreError::SignatureInvalid)
        ));
    }
}
