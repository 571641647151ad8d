//! Cryptographic primitives.
//!
//! - Ed25519 signs envelopes
//! - X25519 wraps branch keys for their recipients
//! - ChaCha20-Poly1305 seals masked segments and key shares
//! - Blake3 derives every key from a purpose-specific context

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{CoreError, Result};

/// Derive 32 bytes of key material under a domain-separated Blake3 context.
///
/// Each part is length-prefixed, so splitting the same bytes differently
/// yields a different key.
pub fn derive_key(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

macro_rules! public_key {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "({})"), hex::encode(&self.0[..8]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(&self.0[..8]))
            }
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Signatures
// ─────────────────────────────────────────────────────────────────────────────

public_key!(
    /// Identifies a party. Channel ids and subscription slots derive from it.
    Ed25519PublicKey,
    "Ed25519Pub"
);

impl Ed25519PublicKey {
    /// Check `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        key.verify(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::SignatureInvalid)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}..)", hex::encode(&self.0[..8]))
    }
}

/// An Ed25519 signing keypair.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::thread_rng()))
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key agreement
// ─────────────────────────────────────────────────────────────────────────────

public_key!(
    /// The exchange key a party publishes in its announcement or
    /// subscription request.
    X25519PublicKey,
    "X25519Pub"
);

/// A party's long-lived exchange secret, derived from its seed.
#[derive(Clone)]
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        Self::from_bytes(random_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(PublicKey::from(&self.0).to_bytes())
    }

    pub fn diffie_hellman(&self, peer: &X25519PublicKey) -> SharedKey {
        SharedKey(self.0.diffie_hellman(&PublicKey::from(peer.0)).to_bytes())
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Secret({:?})", self.public_key())
    }
}

/// One-shot secret used to wrap a single key share.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey(PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Agree on a shared key. The secret is consumed.
    pub fn diffie_hellman(self, peer: &X25519PublicKey) -> SharedKey {
        SharedKey(self.secret.diffie_hellman(&PublicKey::from(peer.0)).to_bytes())
    }
}

/// Raw X25519 output. Only ever used through [`SharedKey::derive_encryption_key`].
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive a wrapping key bound to `context`.
    pub fn derive_encryption_key(&self, context: &[u8]) -> EncryptionKey {
        EncryptionKey(derive_key("strand v1 shared wrapping key", &[&self.0, context]))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Symmetric encryption
// ─────────────────────────────────────────────────────────────────────────────

/// A ChaCha20-Poly1305 key: a branch key or a share-wrapping key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        self.cipher()
            .encrypt(Nonce::from_slice(&nonce.0), Payload { msg: plaintext, aad })
            .map_err(|e| CoreError::EncryptionFailed(e.to_string()))
    }

    /// Decrypt `ciphertext`. Fails if the tag or `aad` do not match.
    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        self.cipher()
            .decrypt(Nonce::from_slice(&nonce.0), Payload { msg: ciphertext, aad })
            .map_err(|_| CoreError::DecryptionFailed)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// A random 96-bit nonce, carried next to the ciphertext it was used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; 12]);

impl EncryptionNonce {
    pub const LEN: usize = 12;

    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_binds_message() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let signature = keypair.sign(b"announce");

        assert!(keypair.public_key().verify(b"announce", &signature).is_ok());
        assert!(matches!(
            keypair.public_key().verify(b"Announce", &signature),
            Err(CoreError::SignatureInvalid)
        ));
        assert!(Keypair::generate()
            .public_key()
            .verify(b"announce", &signature)
            .is_err());
    }

    #[test]
    fn test_seeded_keypairs_match() {
        assert_eq!(
            Keypair::from_seed(&[7; 32]).public_key(),
            Keypair::from_seed(&[7; 32]).public_key()
        );
    }

    #[test]
    fn test_share_wrapping_key_agrees() {
        let recipient = X25519StaticSecret::from_bytes([3; 32]);
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let sender_key = ephemeral
            .diffie_hellman(&recipient.public_key())
            .derive_encryption_key(b"share");
        let recipient_key = recipient
            .diffie_hellman(&ephemeral_public)
            .derive_encryption_key(b"share");
        assert_eq!(sender_key, recipient_key);

        let other_context = recipient
            .diffie_hellman(&ephemeral_public)
            .derive_encryption_key(b"other share");
        assert_ne!(sender_key, other_context);
    }

    #[test]
    fn test_aad_is_authenticated() {
        let key = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();

        let ciphertext = key.encrypt(b"secret", b"header", &nonce).unwrap();
        assert_eq!(key.decrypt(&ciphertext, b"header", &nonce).unwrap(), b"secret");
        assert!(matches!(
            key.decrypt(&ciphertext, b"other header", &nonce),
            Err(CoreError::DecryptionFailed)
        ));
        assert!(EncryptionKey::generate()
            .decrypt(&ciphertext, b"header", &nonce)
            .is_err());
    }

    #[test]
    fn test_derive_key_separates_parts() {
        let a = derive_key("strand test", &[b"ab", b"c"]);
        assert_ne!(a, derive_key("strand test", &[b"a", b"bc"]));
        assert_ne!(a, derive_key("strand other", &[b"ab", b"c"]));
        assert_eq!(a, derive_key("strand test", &[b"ab", b"c"]));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = EncryptionKey::from_bytes([0xAB; 32]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
        let pk = Keypair::from_seed(&[1; 32]).public_key();
        assert_eq!(pk.to_string().len(), 16);
    }
}
