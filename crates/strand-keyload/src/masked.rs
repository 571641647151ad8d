//! Masked packet segments.
//!
//! The private part of a packet is sealed under the branch key with the
//! canonical header and the public part as associated data. Moving a masked
//! segment to another address, or editing the public part, breaks the tag.

use bytes::Bytes;

use strand_core::{header_bytes, EncryptionKey, EncryptionNonce, KeyId, MaskedSegment, MessageHeader};

use crate::error::{KeyloadError, Result};

fn associated_data(header: &MessageHeader, public: &[u8]) -> Vec<u8> {
    let mut aad = header_bytes(header);
    aad.extend_from_slice(public);
    aad
}

/// Seal `private` for the packet described by `header` and `public`.
pub fn mask(
    key_id: KeyId,
    key: &EncryptionKey,
    header: &MessageHeader,
    public: &[u8],
    private: &[u8],
) -> Result<MaskedSegment> {
    let nonce = EncryptionNonce::generate();
    let ciphertext = key.encrypt(private, &associated_data(header, public), &nonce)?;
    Ok(MaskedSegment {
        key_id,
        nonce,
        ciphertext: Bytes::from(ciphertext),
    })
}

/// Open a masked segment.
pub fn unmask(
    segment: &MaskedSegment,
    key: &EncryptionKey,
    header: &MessageHeader,
    public: &[u8],
) -> Result<Bytes> {
    key.decrypt(
        &segment.ciphertext,
        &associated_data(header, public),
        &segment.nonce,
    )
    .map(Bytes::from)
    .map_err(|_| KeyloadError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::{Address, Keypair, PayloadKind, PROTOCOL_VERSION};

    fn header(sequence: u64) -> MessageHeader {
        let publisher = Keypair::from_seed(&[1; 32]).public_key();
        let root = Address::for_author(&publisher);
        MessageHeader {
            version: PROTOCOL_VERSION,
            address: root.with_sequence(sequence),
            previous: Some(root),
            publisher,
            kind: PayloadKind::TaggedPacket,
        }
    }

    #[test]
    fn test_mask_unmask() {
        let key = EncryptionKey::generate();
        let key_id = crate::keyshare::key_id_for(&key);
        let segment = mask(key_id, &key, &header(1), b"P", b"S").unwrap();
        assert_eq!(segment.key_id, key_id);
        assert_eq!(unmask(&segment, &key, &header(1), b"P").unwrap().as_ref(), b"S");
    }

    #[test]
    fn test_public_part_is_authenticated() {
        let key = EncryptionKey::generate();
        let segment = mask(KeyId::ZERO, &key, &header(1), b"P", b"S").unwrap();
        assert!(matches!(
            unmask(&segment, &key, &header(1), b"Q"),
            Err(KeyloadError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_segment_bound_to_address() {
        let key = EncryptionKey::generate();
        let segment = mask(KeyId::ZERO, &key, &header(1), b"P", b"S").unwrap();
        assert!(unmask(&segment, &key, &header(2), b"P").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let segment = mask(KeyId::ZERO, &EncryptionKey::generate(), &header(1), b"", b"S").unwrap();
        assert!(unmask(&segment, &EncryptionKey::generate(), &header(1), b"").is_err());
    }
}

#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;
    use strand_core::{Address, Keypair, PayloadKind, PROTOCOL_VERSION};

    fn header() -> MessageHeader {
        let publisher = Keypair::from_seed(&[3; 32]).public_key();
        let root = Address::for_author(&publisher);
        MessageHeader {
            version: PROTOCOL_VERSION,
            address: root.with_sequence(7),
            previous: Some(root),
            publisher,
            kind: PayloadKind::TaggedPacket,
        }
    }

    proptest! {
        #[test]
        fn tampered_ciphertext_never_opens(
            private in prop::collection::vec(any::<u8>(), 0..128),
            index in any::<prop::sample::Index>(),
            flip in 1u8..,
        ) {
            let key = EncryptionKey::from_bytes([5; 32]);
            let mut segment = mask(KeyId::ZERO, &key, &header(), b"P", &private).unwrap();
            let mut ciphertext = segment.ciphertext.to_vec();
            let i = index.index(ciphertext.len());
            ciphertext[i] ^= flip;
            segment.ciphertext = Bytes::from(ciphertext);
            prop_assert!(unmask(&segment, &key, &header(), b"P").is_err());
        }
    }
}
