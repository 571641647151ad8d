//! Identity vectors.
//!
//! Known seeds and encodings. Every implementation must derive the same
//! keys from them, and distinct vectors must never share a key.

use std::collections::BTreeMap;

use strand_core::{channel_address, Encoding, Identity};

/// A seed and encoding pair to derive an identity from.
#[derive(Debug, Clone)]
pub struct IdentityVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub seed: &'static str,
    pub encoding: Encoding,
}

impl IdentityVector {
    /// Derive the identity. Vectors always hold valid seeds.
    pub fn identity(&self) -> Identity {
        Identity::with_encoding(self.seed, self.encoding).expect("vector seed is valid")
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.identity().public_key().as_bytes())
    }
}

/// Get all identity vectors.
pub fn all_vectors() -> Vec<IdentityVector> {
    vec![
        IdentityVector {
            name: "author, utf-8",
            seed: "AUTHOR_SEED",
            encoding: Encoding::Utf8,
        },
        IdentityVector {
            name: "author, ascii",
            seed: "AUTHOR_SEED",
            encoding: Encoding::Ascii,
        },
        IdentityVector {
            name: "subscriber, utf-8",
            seed: "SUBSCRIBER_SEED",
            encoding: Encoding::Utf8,
        },
        IdentityVector {
            name: "single character",
            seed: "a",
            encoding: Encoding::Utf8,
        },
        IdentityVector {
            name: "punctuation",
            seed: "node-01.backup_2",
            encoding: Encoding::Binary,
        },
        IdentityVector {
            name: "longest seed",
            seed: "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef\
                   0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef\
                   0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef\
                   0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            encoding: Encoding::Utf8,
        },
    ]
}

/// Check every vector. Returns one message per failure.
pub fn verify_all_vectors() -> Vec<String> {
    let mut failures = Vec::new();
    let mut seen: BTreeMap<String, &'static str> = BTreeMap::new();

    for vector in all_vectors() {
        let first = vector.identity();
        let second = vector.identity();
        if first.public_key() != second.public_key() {
            failures.push(format!("{}: signing key is not deterministic", vector.name));
        }
        if first.exchange_public_key() != second.exchange_public_key() {
            failures.push(format!("{}: exchange key is not deterministic", vector.name));
        }
        if channel_address(&first) != channel_address(&second) {
            failures.push(format!("{}: channel address is not deterministic", vector.name));
        }
        if !channel_address(&first).is_announcement() {
            failures.push(format!("{}: channel address is not an announcement", vector.name));
        }
        if let Some(other) = seen.insert(vector.public_key_hex(), vector.name) {
            failures.push(format!("{}: same key as {}", vector.name, other));
        }
    }
    failures
}
