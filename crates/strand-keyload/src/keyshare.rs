//! Branch key wrapping.
//!
//! Each keyload carries one fresh branch key, wrapped once per recipient via
//! ephemeral X25519 agreement and once per pre-shared key. Both wrappings
//! use ChaCha20-Poly1305 with the key id as associated data, so a share
//! cannot be replayed into a keyload for a different key.

use bytes::Bytes;

use strand_core::crypto::{derive_key, EphemeralKeyPair, X25519StaticSecret};
use strand_core::{
    Ed25519PublicKey, EncryptionKey, EncryptionNonce, KeyId, PskShare, RecipientShare,
    X25519PublicKey,
};

use crate::error::{KeyloadError, Result};
use crate::psk::Psk;

/// A subscriber a branch key can be wrapped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Recipient {
    /// Ed25519 identity key, as named in the keyload.
    pub public_key: Ed25519PublicKey,

    /// X25519 key the branch key is wrapped to.
    pub exchange_key: X25519PublicKey,
}

/// Identify a branch key epoch.
pub fn key_id_for(key: &EncryptionKey) -> KeyId {
    KeyId::from_bytes(*blake3::keyed_hash(key.as_bytes(), b"strand v1 key id").as_bytes())
}

fn recipient_context(key_id: &KeyId, recipient: &Ed25519PublicKey) -> Vec<u8> {
    let mut context = Vec::with_capacity(64);
    context.extend_from_slice(key_id.as_bytes());
    context.extend_from_slice(recipient.as_bytes());
    context
}

fn psk_wrapping_key(psk: &Psk, key_id: &KeyId) -> EncryptionKey {
    EncryptionKey::from_bytes(derive_key(
        "strand v1 psk wrapping key",
        &[psk.as_bytes(), key_id.as_bytes()],
    ))
}

fn key_from_plaintext(key_id: &KeyId, plaintext: Vec<u8>) -> Result<EncryptionKey> {
    let bytes: [u8; 32] = plaintext.as_slice().try_into().map_err(|_| {
        KeyloadError::InvalidKey(format!(
            "expected 32 key bytes, got {}",
            plaintext.len()
        ))
    })?;
    let key = EncryptionKey::from_bytes(bytes);
    if key_id_for(&key) != *key_id {
        return Err(KeyloadError::InvalidKey("key does not match its key id".into()));
    }
    Ok(key)
}

/// Wrap `key` for one recipient.
pub fn share_with_recipient(
    key_id: &KeyId,
    key: &EncryptionKey,
    recipient: &Recipient,
) -> Result<RecipientShare> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_key = ephemeral.public_key();
    let wrap_key = ephemeral
        .diffie_hellman(&recipient.exchange_key)
        .derive_encryption_key(&recipient_context(key_id, &recipient.public_key));

    let nonce = EncryptionNonce::generate();
    let wrapped = wrap_key.encrypt(key.as_bytes(), key_id.as_bytes(), &nonce)?;

    Ok(RecipientShare {
        recipient: recipient.public_key,
        ephemeral_key,
        nonce,
        wrapped_key: Bytes::from(wrapped),
    })
}

/// Unwrap a recipient share with our exchange secret.
pub fn open_recipient_share(
    share: &RecipientShare,
    key_id: &KeyId,
    secret: &X25519StaticSecret,
) -> Result<EncryptionKey> {
    let wrap_key = secret
        .diffie_hellman(&share.ephemeral_key)
        .derive_encryption_key(&recipient_context(key_id, &share.recipient));
    let plaintext = wrap_key
        .decrypt(&share.wrapped_key, key_id.as_bytes(), &share.nonce)
        .map_err(|_| KeyloadError::DecryptionFailed)?;
    key_from_plaintext(key_id, plaintext)
}

/// Wrap `key` under a pre-shared key.
pub fn share_with_psk(key_id: &KeyId, key: &EncryptionKey, psk: &Psk) -> Result<PskShare> {
    let nonce = EncryptionNonce::generate();
    let wrapped = psk_wrapping_key(psk, key_id).encrypt(key.as_bytes(), key_id.as_bytes(), &nonce)?;

    Ok(PskShare {
        psk_id: psk.id(),
        nonce,
        wrapped_key: Bytes::from(wrapped),
    })
}

/// Unwrap a PSK share.
pub fn open_psk_share(share: &PskShare, key_id: &KeyId, psk: &Psk) -> Result<EncryptionKey> {
    let plaintext = psk_wrapping_key(psk, key_id)
        .decrypt(&share.wrapped_key, key_id.as_bytes(), &share.nonce)
        .map_err(|_| KeyloadError::DecryptionFailed)?;
    key_from_plaintext(key_id, plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::Identity;

    fn recipient(identity: &Identity) -> Recipient {
        Recipient {
            public_key: identity.public_key(),
            exchange_key: identity.exchange_public_key(),
        }
    }

    #[test]
    fn test_recipient_share_roundtrip() {
        let subscriber = Identity::derive("SUBSCRIBER", "utf-8").unwrap();
        let key = EncryptionKey::generate();
        let key_id = key_id_for(&key);

        let share = share_with_recipient(&key_id, &key, &recipient(&subscriber)).unwrap();
        let opened = open_recipient_share(&share, &key_id, subscriber.exchange_secret()).unwrap();
        assert_eq!(opened, key);
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let subscriber = Identity::derive("SUBSCRIBER", "utf-8").unwrap();
        let eve = Identity::derive("EVE", "utf-8").unwrap();
        let key = EncryptionKey::generate();
        let key_id = key_id_for(&key);

        let share = share_with_recipient(&key_id, &key, &recipient(&subscriber)).unwrap();
        assert!(matches!(
            open_recipient_share(&share, &key_id, eve.exchange_secret()),
            Err(KeyloadError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_share_bound_to_key_id() {
        let subscriber = Identity::derive("SUBSCRIBER", "utf-8").unwrap();
        let key = EncryptionKey::generate();
        let key_id = key_id_for(&key);
        let other_id = key_id_for(&EncryptionKey::generate());

        let share = share_with_recipient(&key_id, &key, &recipient(&subscriber)).unwrap();
        assert!(open_recipient_share(&share, &other_id, subscriber.exchange_secret()).is_err());
    }

    #[test]
    fn test_psk_share_roundtrip() {
        let psk = Psk::from_seed("book club");
        let key = EncryptionKey::generate();
        let key_id = key_id_for(&key);

        let share = share_with_psk(&key_id, &key, &psk).unwrap();
        assert_eq!(share.psk_id, psk.id());
        assert_eq!(open_psk_share(&share, &key_id, &psk).unwrap(), key);
        assert!(open_psk_share(&share, &key_id, &Psk::from_seed("wrong")).is_err());
    }

    #[test]
    fn test_key_id_is_stable() {
        let key = EncryptionKey::from_bytes([9; 32]);
        assert_eq!(key_id_for(&key), key_id_for(&key.clone()));
        assert_ne!(key_id_for(&key), key_id_for(&EncryptionKey::from_bytes([8; 32])));
    }
}
