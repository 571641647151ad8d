//! Pre-shared keys.
//!
//! A PSK grants branch access without a subscription: the author wraps the
//! branch key under the PSK and anyone holding it can unwrap.

use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;

use strand_core::crypto::derive_key;
use strand_core::PskId;

/// A 32-byte pre-shared key.
#[derive(Clone, PartialEq, Eq)]
pub struct Psk([u8; 32]);

impl Psk {
    /// Derive a PSK from a passphrase shared out of band.
    pub fn from_seed(passphrase: &str) -> Self {
        Self(derive_key("strand v1 pre-shared key", &[passphrase.as_bytes()]))
    }

    /// Generate a random PSK.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The public identifier published in keyloads.
    pub fn id(&self) -> PskId {
        let digest = derive_key("strand v1 psk id", &[&self.0]);
        let mut id = [0u8; PskId::LEN];
        id.copy_from_slice(&digest[..PskId::LEN]);
        PskId::from_bytes(id)
    }
}

impl fmt::Debug for Psk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Psk({:?})", self.id())
    }
}

/// The PSKs a party holds, by id.
#[derive(Debug, Clone, Default)]
pub struct PskStore {
    keys: BTreeMap<PskId, Psk>,
}

impl PskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a PSK, returning its id.
    pub fn insert(&mut self, psk: Psk) -> PskId {
        let id = psk.id();
        self.keys.insert(id, psk);
        id
    }

    /// Remove a PSK.
    pub fn remove(&mut self, id: &PskId) -> Option<Psk> {
        self.keys.remove(id)
    }

    /// Look up a PSK.
    pub fn get(&self, id: &PskId) -> Option<&Psk> {
        self.keys.get(id)
    }

    /// Whether the store holds `id`.
    pub fn contains(&self, id: &PskId) -> bool {
        self.keys.contains_key(id)
    }

    /// All stored PSKs.
    pub fn iter(&self) -> impl Iterator<Item = (&PskId, &Psk)> {
        self.keys.iter()
    }

    /// Number of stored PSKs.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_psk_from_seed_is_deterministic() {
        assert_eq!(Psk::from_seed("club"), Psk::from_seed("club"));
        assert_ne!(Psk::from_seed("club").id(), Psk::from_seed("other").id());
    }

    #[test]
    fn test_store_insert_remove() {
        let mut store = PskStore::new();
        let id = store.insert(Psk::generate());
        assert!(store.contains(&id));
        assert_eq!(store.len(), 1);
        assert!(store.remove(&id).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_debug_hides_key() {
        let psk = Psk::from_bytes([0xab; 32]);
        assert!(!format!("{:?}", psk).contains("abababababababababab"));
    }
}
