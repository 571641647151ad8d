//! Envelope encoding.
//!
//! An envelope is a CBOR array `[version, header, body, signature | null]`:
//!
//! - `header` is a map with small integer keys, written with deterministic
//!   encoding (shortest integers, definite lengths, ascending keys).
//! - `body` is a byte string holding the CBOR encoding of the kind-specific
//!   body struct.
//! - `signature` is a 64-byte string, or null for tagged packets.
//!
//! Signatures cover `SIGNING_DOMAIN || header || body`, so the header bytes
//! must come out identical on every platform.

use ciborium::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;

use crate::address::{Address, ADDRESS_LEN};
use crate::crypto::{Ed25519PublicKey, Ed25519Signature};
use crate::error::{CoreError, Result};
use crate::message::{Content, Message, MessageHeader, PayloadKind, PROTOCOL_VERSION};
use crate::types::{BranchId, ChannelId};

/// Domain tag prepended to the bytes covered by a signature.
pub const SIGNING_DOMAIN: &[u8] = b"strand-envelope-v1";

/// Header field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const VERSION: u64 = 0;
    pub const CHANNEL: u64 = 1;
    pub const BRANCH: u64 = 2;
    pub const SEQUENCE: u64 = 3;
    pub const PREVIOUS: u64 = 4;
    pub const PUBLISHER: u64 = 5;
    pub const KIND: u64 = 6;
}

const HEADER_FIELDS: u64 = 7;

/// Canonical bytes of a header.
pub fn header_bytes(header: &MessageHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(200);
    write_header(&mut buf, header);
    buf
}

/// CBOR bytes of a message body.
pub fn body_bytes(content: &Content) -> Result<Vec<u8>> {
    match content {
        Content::Announcement(body) => to_cbor(body),
        Content::Subscribe(body) => to_cbor(body),
        Content::Keyload(body) => to_cbor(body),
        Content::TaggedPacket(body) | Content::SignedPacket(body) => to_cbor(body),
    }
}

/// The bytes a publisher signs: domain tag, canonical header, body.
pub fn signing_bytes(header: &MessageHeader, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SIGNING_DOMAIN.len() + 200 + body.len());
    buf.extend_from_slice(SIGNING_DOMAIN);
    write_header(&mut buf, header);
    buf.extend_from_slice(body);
    buf
}

/// Signing bytes of an already built message.
pub fn message_signing_bytes(message: &Message) -> Result<Vec<u8>> {
    let body = body_bytes(&message.content)?;
    Ok(signing_bytes(&message.header, &body))
}

/// Encode a message to envelope bytes.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let body = body_bytes(&message.content)?;

    let mut buf = Vec::with_capacity(300 + body.len());
    encode_uint(&mut buf, 4, 4);
    encode_uint(&mut buf, 0, u64::from(message.header.version));
    write_header(&mut buf, &message.header);
    encode_bytes(&mut buf, &body);
    match &message.signature {
        Some(signature) => encode_bytes(&mut buf, signature.as_bytes()),
        None => buf.push(0xf6),
    }
    Ok(buf)
}

/// Encode and enforce a size limit.
pub fn encode_bounded(message: &Message, limit: usize) -> Result<Vec<u8>> {
    let bytes = encode(message)?;
    ensure_within(bytes.len(), limit)?;
    Ok(bytes)
}

/// Fail with `EnvelopeTooLarge` if `size` exceeds `limit`.
pub fn ensure_within(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(CoreError::EnvelopeTooLarge { size, limit });
    }
    Ok(())
}

/// Decode envelope bytes into a message.
///
/// Only structure is checked here. Signatures and layout rules are checked
/// by [`crate::validation`].
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let mut cursor = Cursor::new(bytes);
    let value: Value = ciborium::from_reader(&mut cursor).map_err(corrupt)?;
    if cursor.position() != bytes.len() as u64 {
        return Err(CoreError::CorruptEnvelope("trailing bytes".into()));
    }

    let items = match value {
        Value::Array(items) if items.len() == 4 => items,
        _ => {
            return Err(CoreError::CorruptEnvelope(
                "expected a 4-element array".into(),
            ))
        }
    };
    let mut items = items.into_iter();
    let (Some(version), Some(header), Some(body), Some(signature)) =
        (items.next(), items.next(), items.next(), items.next())
    else {
        return Err(CoreError::CorruptEnvelope("truncated envelope".into()));
    };

    let version = as_u64(&version, "version")?;
    if version != u64::from(PROTOCOL_VERSION) {
        return Err(CoreError::UnsupportedVersion(
            u8::try_from(version).unwrap_or(u8::MAX),
        ));
    }

    let header = header_from_value(&header)?;
    if u64::from(header.version) != version {
        return Err(CoreError::CorruptEnvelope(
            "header version disagrees with envelope version".into(),
        ));
    }

    let body = match body {
        Value::Bytes(b) => b,
        _ => return Err(CoreError::CorruptEnvelope("body must be a byte string".into())),
    };
    let content = content_from_bytes(header.kind, &body)?;

    let signature = match signature {
        Value::Null => None,
        Value::Bytes(b) => {
            let arr: [u8; 64] = b
                .as_slice()
                .try_into()
                .map_err(|_| CoreError::CorruptEnvelope("invalid signature length".into()))?;
            Some(Ed25519Signature(arr))
        }
        _ => return Err(CoreError::CorruptEnvelope("invalid signature".into())),
    };

    Ok(Message {
        header,
        content,
        signature,
    })
}

/// Enforce a size limit, then decode.
pub fn decode_bounded(bytes: &[u8], limit: usize) -> Result<Message> {
    ensure_within(bytes.len(), limit)?;
    decode(bytes)
}

fn content_from_bytes(kind: PayloadKind, body: &[u8]) -> Result<Content> {
    Ok(match kind {
        PayloadKind::Announcement => Content::Announcement(from_cbor(body)?),
        PayloadKind::Subscribe => Content::Subscribe(from_cbor(body)?),
        PayloadKind::Keyload => Content::Keyload(from_cbor(body)?),
        PayloadKind::TaggedPacket => Content::TaggedPacket(from_cbor(body)?),
        PayloadKind::SignedPacket => Content::SignedPacket(from_cbor(body)?),
    })
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::Encoding(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut cursor = Cursor::new(bytes);
    let value = ciborium::from_reader(&mut cursor).map_err(corrupt)?;
    if cursor.position() != bytes.len() as u64 {
        return Err(CoreError::CorruptEnvelope("trailing bytes in body".into()));
    }
    Ok(value)
}

fn corrupt(e: impl std::fmt::Display) -> CoreError {
    CoreError::CorruptEnvelope(e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────
// Header encoding
// ─────────────────────────────────────────────────────────────────────────

fn write_header(buf: &mut Vec<u8>, header: &MessageHeader) {
    write_header_fields(
        buf,
        header.version,
        &header.address,
        header.previous.as_ref(),
        &header.publisher,
        header.kind.to_u16(),
    );
}

fn write_header_fields(
    buf: &mut Vec<u8>,
    version: u8,
    address: &Address,
    previous: Option<&Address>,
    publisher: &Ed25519PublicKey,
    kind: u16,
) {
    // Keys are written in ascending order; all are below 24 so their
    // encoded bytes sort the same way.
    encode_uint(buf, 5, HEADER_FIELDS);

    encode_uint(buf, 0, keys::VERSION);
    encode_uint(buf, 0, u64::from(version));

    encode_uint(buf, 0, keys::CHANNEL);
    encode_bytes(buf, address.channel_id.as_bytes());

    encode_uint(buf, 0, keys::BRANCH);
    encode_bytes(buf, address.branch_id.as_bytes());

    encode_uint(buf, 0, keys::SEQUENCE);
    encode_uint(buf, 0, address.sequence);

    encode_uint(buf, 0, keys::PREVIOUS);
    match previous {
        Some(previous) => encode_bytes(buf, &previous.to_bytes()),
        None => buf.push(0xf6),
    }

    encode_uint(buf, 0, keys::PUBLISHER);
    encode_bytes(buf, publisher.as_bytes());

    encode_uint(buf, 0, keys::KIND);
    encode_uint(buf, 0, u64::from(kind));
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

// ─────────────────────────────────────────────────────────────────────────
// Header decoding
// ─────────────────────────────────────────────────────────────────────────

fn as_u64(value: &Value, field: &str) -> Result<u64> {
    match value {
        Value::Integer(i) => u64::try_from(*i)
            .map_err(|_| CoreError::CorruptEnvelope(format!("{} out of range", field))),
        _ => Err(CoreError::CorruptEnvelope(format!("{} must be an integer", field))),
    }
}

fn as_array<const N: usize>(value: Option<&Value>, field: &str) -> Result<[u8; N]> {
    match value {
        Some(Value::Bytes(b)) => b
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::CorruptEnvelope(format!("invalid {} length", field))),
        _ => Err(CoreError::CorruptEnvelope(format!("missing {}", field))),
    }
}

fn header_from_value(value: &Value) -> Result<MessageHeader> {
    let map = match value {
        Value::Map(m) => m,
        _ => return Err(CoreError::CorruptEnvelope("header must be a map".into())),
    };
    if map.len() as u64 != HEADER_FIELDS {
        return Err(CoreError::CorruptEnvelope(format!(
            "header has {} fields, expected {}",
            map.len(),
            HEADER_FIELDS
        )));
    }

    let get = |key: u64| -> Option<&Value> {
        map.iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if u64::try_from(*i).ok() == Some(key)))
            .map(|(_, v)| v)
    };

    let version = match get(keys::VERSION) {
        Some(v) => u8::try_from(as_u64(v, "version")?)
            .map_err(|_| CoreError::CorruptEnvelope("version out of range".into()))?,
        None => return Err(CoreError::CorruptEnvelope("missing version".into())),
    };

    let channel_id = ChannelId(as_array(get(keys::CHANNEL), "channel id")?);
    let branch_id = BranchId(as_array(get(keys::BRANCH), "branch id")?);

    let sequence = match get(keys::SEQUENCE) {
        Some(v) => as_u64(v, "sequence")?,
        None => return Err(CoreError::CorruptEnvelope("missing sequence".into())),
    };

    let previous = match get(keys::PREVIOUS) {
        Some(Value::Null) => None,
        Some(Value::Bytes(b)) if b.len() == ADDRESS_LEN => Some(
            Address::from_bytes(b).map_err(|e| CoreError::CorruptEnvelope(e.to_string()))?,
        ),
        _ => return Err(CoreError::CorruptEnvelope("invalid previous link".into())),
    };

    let publisher = Ed25519PublicKey(as_array(get(keys::PUBLISHER), "publisher")?);

    let kind = match get(keys::KIND) {
        Some(v) => {
            let raw = as_u64(v, "kind")?;
            let raw = u16::try_from(raw).unwrap_or(u16::MAX);
            PayloadKind::from_u16(raw).ok_or(CoreError::UnsupportedPayloadKind(raw))?
        }
        None => return Err(CoreError::CorruptEnvelope("missing kind".into())),
    };

    Ok(MessageHeader {
        version,
        address: Address::new(channel_id, branch_id, sequence),
        previous,
        publisher,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionNonce, Keypair, X25519StaticSecret};
    use crate::message::{
        AnnouncementBody, KeyloadBody, MaskedSegment, MessageBuilder, PacketBody, PskShare,
        RecipientShare, SubscribeBody,
    };
    use crate::types::{KeyId, PskId};
    use bytes::Bytes;

    fn author() -> Keypair {
        Keypair::from_seed(&[0x42; 32])
    }

    fn announcement() -> Message {
        let keypair = author();
        let address = Address::for_author(&keypair.public_key());
        MessageBuilder::new(address, keypair.public_key(), PayloadKind::Announcement)
            .sign(
                Content::Announcement(AnnouncementBody {
                    author_key: keypair.public_key(),
                    exchange_key: X25519StaticSecret::from_bytes([7; 32]).public_key(),
                    multi_branching: true,
                }),
                &keypair,
            )
            .unwrap()
    }

    fn linked(kind: PayloadKind, sequence: u64, content: Content) -> Message {
        let keypair = author();
        let root = Address::for_author(&keypair.public_key());
        MessageBuilder::new(root.with_sequence(sequence), keypair.public_key(), kind)
            .previous(root)
            .sign(content, &keypair)
            .unwrap()
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let keyload = KeyloadBody {
            key_id: KeyId::from_bytes([3; 32]),
            recipients: vec![RecipientShare {
                recipient: author().public_key(),
                ephemeral_key: X25519StaticSecret::from_bytes([9; 32]).public_key(),
                nonce: EncryptionNonce::from_bytes([1; 12]),
                wrapped_key: Bytes::from_static(&[0xaa; 48]),
            }],
            psk_shares: vec![PskShare {
                psk_id: PskId::from_bytes([5; 16]),
                nonce: EncryptionNonce::from_bytes([2; 12]),
                wrapped_key: Bytes::from_static(&[0xbb; 48]),
            }],
        };
        let masked = PacketBody {
            public: Bytes::from_static(b"P"),
            masked: Some(MaskedSegment {
                key_id: KeyId::from_bytes([3; 32]),
                nonce: EncryptionNonce::from_bytes([4; 12]),
                ciphertext: Bytes::from_static(&[0xcc; 17]),
            }),
        };
        let messages = [
            announcement(),
            linked(
                PayloadKind::Subscribe,
                1,
                Content::Subscribe(SubscribeBody {
                    subscriber_key: author().public_key(),
                    exchange_key: X25519StaticSecret::from_bytes([8; 32]).public_key(),
                }),
            ),
            linked(PayloadKind::Keyload, 2, Content::Keyload(keyload)),
            linked(
                PayloadKind::TaggedPacket,
                3,
                Content::TaggedPacket(masked.clone()),
            ),
            linked(PayloadKind::SignedPacket, 4, Content::SignedPacket(masked)),
        ];

        for message in messages {
            let bytes = encode(&message).unwrap();
            assert_eq!(decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let message = announcement();
        assert_eq!(encode(&message).unwrap(), encode(&message).unwrap());
        assert_eq!(
            header_bytes(&message.header),
            header_bytes(&message.header.clone())
        );
    }

    #[test]
    fn test_header_starts_with_sorted_keys() {
        let bytes = header_bytes(&announcement().header);
        // map(7), key 0, version 1, key 1, bstr(32)
        assert_eq!(&bytes[..5], &[0xa7, 0x00, 0x01, 0x01, 0x58]);
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = encode(&announcement()).unwrap();
        bytes.push(0x00);
        assert!(matches!(decode(&bytes), Err(CoreError::CorruptEnvelope(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        for bytes in [&b""[..], b"\xff\xff", b"\x83\x01\x02\x03", b"hello world"] {
            assert!(matches!(decode(bytes), Err(CoreError::CorruptEnvelope(_))));
        }
    }

    #[test]
    fn test_rejects_truncated() {
        let bytes = encode(&announcement()).unwrap();
        for len in [1, 10, bytes.len() / 2, bytes.len() - 1] {
            assert!(decode(&bytes[..len]).is_err());
        }
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let message = announcement();
        let mut buf = Vec::new();
        encode_uint(&mut buf, 4, 4);
        encode_uint(&mut buf, 0, u64::from(PROTOCOL_VERSION));
        write_header_fields(
            &mut buf,
            PROTOCOL_VERSION,
            message.address(),
            None,
            message.publisher(),
            0x0099,
        );
        encode_bytes(&mut buf, &[]);
        buf.push(0xf6);

        assert!(matches!(
            decode(&buf),
            Err(CoreError::UnsupportedPayloadKind(0x0099))
        ));
    }

    #[test]
    fn test_future_version_is_unsupported() {
        let mut bytes = encode(&announcement()).unwrap();
        // Second byte is the envelope version.
        bytes[1] = 0x02;
        assert!(matches!(
            decode(&bytes),
            Err(CoreError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_size_limit() {
        let bytes = encode(&announcement()).unwrap();
        assert!(decode_bounded(&bytes, bytes.len()).is_ok());
        assert!(matches!(
            decode_bounded(&bytes, bytes.len() - 1),
            Err(CoreError::EnvelopeTooLarge { .. })
        ));
        assert!(matches!(
            encode_bounded(&announcement(), 16),
            Err(CoreError::EnvelopeTooLarge { limit: 16, .. })
        ));
    }

    #[test]
    fn test_signing_bytes_are_domain_separated() {
        let message = announcement();
        let bytes = message_signing_bytes(&message).unwrap();
        assert!(bytes.starts_with(SIGNING_DOMAIN));
        message
            .publisher()
            .verify(&bytes, message.signature.as_ref().unwrap())
            .unwrap();
    }
}
