//! Identities derived from a seed string.
//!
//! The same `(seed, encoding)` pair always yields the same signing keypair
//! and key-exchange secret, so a seed alone recovers a participant.

use std::fmt;
use std::str::FromStr;

use crate::crypto::{
    derive_key, Ed25519PublicKey, Ed25519Signature, EncryptionKey, EncryptionNonce, Keypair,
    X25519PublicKey, X25519StaticSecret,
};
use crate::error::{CoreError, Result};

/// Longest accepted seed, in bytes.
pub const MAX_SEED_LEN: usize = 256;

const SIGNING_CONTEXT: &str = "strand v1 identity signing key";
const EXCHANGE_CONTEXT: &str = "strand v1 identity exchange key";

/// Named byte/text encoding a participant uses for its payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Ascii,
    Binary,
}

impl Encoding {
    /// Parse an encoding tag. Tags are case-insensitive.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            "binary" | "bytes" => Ok(Self::Binary),
            _ => Err(CoreError::UnsupportedEncoding(tag.to_string())),
        }
    }

    /// The normalized tag, as mixed into key derivation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Ascii => "ascii",
            Self::Binary => "binary",
        }
    }

    /// View a payload as text under this encoding.
    pub fn decode_text(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| CoreError::Encoding(e.to_string())),
            Self::Ascii if bytes.is_ascii() => Ok(bytes.iter().map(|&b| b as char).collect()),
            Self::Ascii => Err(CoreError::Encoding("payload is not ascii".into())),
            Self::Binary => Err(CoreError::Encoding(
                "binary payloads have no text view".into(),
            )),
        }
    }
}

impl FromStr for Encoding {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a seed against the accepted character set.
pub fn validate_seed(seed: &str) -> Result<()> {
    if seed.is_empty() {
        return Err(CoreError::InvalidSeed("seed is empty".into()));
    }
    if seed.len() > MAX_SEED_LEN {
        return Err(CoreError::InvalidSeed(format!(
            "seed is {} bytes, limit is {}",
            seed.len(),
            MAX_SEED_LEN
        )));
    }
    if let Some((pos, c)) = seed
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(CoreError::InvalidSeed(format!(
            "character {:?} at position {} is not allowed",
            c, pos
        )));
    }
    Ok(())
}

/// A participant's long-term key material.
#[derive(Clone)]
pub struct Identity {
    encoding: Encoding,
    keypair: Keypair,
    exchange: X25519StaticSecret,
}

impl Identity {
    /// Derive an identity from a seed and an encoding tag.
    pub fn derive(seed: &str, encoding: &str) -> Result<Self> {
        validate_seed(seed)?;
        let encoding = Encoding::parse(encoding)?;
        Ok(Self::from_validated(seed, encoding))
    }

    /// Derive an identity from a seed with an already parsed encoding.
    pub fn with_encoding(seed: &str, encoding: Encoding) -> Result<Self> {
        validate_seed(seed)?;
        Ok(Self::from_validated(seed, encoding))
    }

    fn from_validated(seed: &str, encoding: Encoding) -> Self {
        let parts: [&[u8]; 2] = [encoding.as_str().as_bytes(), seed.as_bytes()];
        let signing_seed = derive_key(SIGNING_CONTEXT, &parts);
        let exchange_seed = derive_key(EXCHANGE_CONTEXT, &parts);
        Self {
            encoding,
            keypair: Keypair::from_seed(&signing_seed),
            exchange: X25519StaticSecret::from_bytes(exchange_seed),
        }
    }

    /// The encoding this identity was derived with.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The Ed25519 public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// The X25519 public key other parties wrap keys to.
    pub fn exchange_public_key(&self) -> X25519PublicKey {
        self.exchange.public_key()
    }

    /// The signing keypair.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// The key-exchange secret.
    pub fn exchange_secret(&self) -> &X25519StaticSecret {
        &self.exchange
    }

    /// Sign bytes.
    pub fn sign(&self, bytes: &[u8]) -> Ed25519Signature {
        self.keypair.sign(bytes)
    }

    /// Check a signature made by `public_key`.
    pub fn verify(public_key: &Ed25519PublicKey, bytes: &[u8], signature: &Ed25519Signature) -> bool {
        public_key.verify(bytes, signature).is_ok()
    }

    /// Encrypt under `key`. The output is `nonce || ciphertext`.
    pub fn encrypt(key: &EncryptionKey, bytes: &[u8]) -> Result<Vec<u8>> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = key.encrypt(bytes, &[], &nonce)?;
        let mut out = Vec::with_capacity(EncryptionNonce::LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverse of [`Identity::encrypt`].
    pub fn decrypt(key: &EncryptionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < EncryptionNonce::LEN {
            return Err(CoreError::DecryptionFailed);
        }
        let (nonce, body) = ciphertext.split_at(EncryptionNonce::LEN);
        let nonce: [u8; 12] = nonce.try_into().map_err(|_| CoreError::DecryptionFailed)?;
        key.decrypt(body, &[], &EncryptionNonce::from_bytes(nonce))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key())
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}
