//! Channel addressing.
//!
//! An [`Address`] is `(channel_id, branch_id, sequence)`. Its text form is
//! `<channel hex>:<branch hex>:<sequence>` and its binary form is 72 bytes:
//! channel id, branch id, then the sequence as big-endian u64.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{derive_key, Ed25519PublicKey};
use crate::error::{CoreError, Result};
use crate::identity::Identity;
use crate::types::{BranchId, ChannelId};

/// Length of the binary address form.
pub const ADDRESS_LEN: usize = 72;

impl ChannelId {
    /// Derive the channel id owned by an author key.
    pub fn derive(author: &Ed25519PublicKey) -> Self {
        Self(derive_key("strand v1 channel id", &[author.as_bytes()]))
    }
}

impl BranchId {
    /// The implicit root branch of a channel.
    pub fn root(channel: &ChannelId) -> Self {
        Self(derive_key("strand v1 root branch", &[channel.as_bytes()]))
    }

    /// A keyload-scoped branch opened by the author under `label`.
    pub fn named(channel: &ChannelId, label: &str) -> Self {
        Self(derive_key(
            "strand v1 named branch",
            &[channel.as_bytes(), label.as_bytes()],
        ))
    }

    /// The slot a subscriber posts its subscription requests into.
    pub fn subscription(channel: &ChannelId, subscriber: &Ed25519PublicKey) -> Self {
        Self(derive_key(
            "strand v1 subscription slot",
            &[channel.as_bytes(), subscriber.as_bytes()],
        ))
    }
}

/// A ledger location inside a channel.
///
/// Ordering is `(channel, branch, sequence)`, so all addresses of one branch
/// are contiguous and sorted by sequence.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub channel_id: ChannelId,
    pub branch_id: BranchId,
    pub sequence: u64,
}

impl Address {
    pub const fn new(channel_id: ChannelId, branch_id: BranchId, sequence: u64) -> Self {
        Self {
            channel_id,
            branch_id,
            sequence,
        }
    }

    /// The announcement address of a channel: root branch, sequence 0.
    pub fn announcement(channel_id: ChannelId) -> Self {
        Self::new(channel_id, BranchId::root(&channel_id), 0)
    }

    /// The announcement address of the channel owned by `author`.
    pub fn for_author(author: &Ed25519PublicKey) -> Self {
        Self::announcement(ChannelId::derive(author))
    }

    /// Whether this is the announcement slot of its channel.
    pub fn is_announcement(&self) -> bool {
        self.sequence == 0 && self.branch_id == BranchId::root(&self.channel_id)
    }

    /// Same branch, different sequence.
    pub fn with_sequence(&self, sequence: u64) -> Self {
        Self::new(self.channel_id, self.branch_id, sequence)
    }

    /// Binary form.
    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        out[..32].copy_from_slice(self.channel_id.as_bytes());
        out[32..64].copy_from_slice(self.branch_id.as_bytes());
        out[64..].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    /// Parse the binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ADDRESS_LEN {
            return Err(CoreError::MalformedAddress(format!(
                "expected {} bytes, got {}",
                ADDRESS_LEN,
                bytes.len()
            )));
        }
        let malformed = |_| CoreError::MalformedAddress("truncated field".into());
        let channel_id = ChannelId::try_from(&bytes[..32]).map_err(malformed)?;
        let branch_id = BranchId::try_from(&bytes[32..64]).map_err(malformed)?;
        let sequence: [u8; 8] = bytes[64..].try_into().map_err(malformed)?;
        Ok(Self::new(channel_id, branch_id, u64::from_be_bytes(sequence)))
    }

    /// Parse the text form.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let (Some(channel), Some(branch), Some(sequence), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CoreError::MalformedAddress(format!(
                "expected channel:branch:sequence, got {:?}",
                s
            )));
        };

        let channel_id = ChannelId::from_hex(channel)
            .map_err(|e| CoreError::MalformedAddress(format!("channel id: {}", e)))?;
        let branch_id = BranchId::from_hex(branch)
            .map_err(|e| CoreError::MalformedAddress(format!("branch id: {}", e)))?;
        let sequence = sequence
            .parse::<u64>()
            .map_err(|e| CoreError::MalformedAddress(format!("sequence: {}", e)))?;

        Ok(Self::new(channel_id, branch_id, sequence))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.channel_id.to_hex(),
            self.branch_id.to_hex(),
            self.sequence
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Address({}:{}:{})",
            self.channel_id, self.branch_id, self.sequence
        )
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The announcement address of `author`'s channel. A pure function of the
/// author's public key.
pub fn channel_address(author: &Identity) -> Address {
    Address::for_author(&author.public_key())
}

/// Per-branch sequence allocator.
///
/// Sequences are consumed, never handed back: a publish that fails after
/// allocation leaves its sequence used, and a retry reposts at the same
/// address instead of allocating again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    /// A counter whose first allocation is `first`.
    pub const fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// The sequence the next allocation would return, ignoring any floor.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Allocate the next sequence, never lower than `floor`.
    pub fn allocate(&mut self, floor: u64) -> u64 {
        let sequence = self.next.max(floor);
        self.next = sequence.saturating_add(1);
        sequence
    }
}

/// Allocate the next address of a branch.
pub fn next_address(
    channel_id: ChannelId,
    branch_id: BranchId,
    counter: &mut SequenceCounter,
    floor: u64,
) -> Address {
    Address::new(channel_id, branch_id, counter.allocate(floor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn sample() -> Address {
        let author = Keypair::from_seed(&[0x11; 32]).public_key();
        let channel = ChannelId::derive(&author);
        Address::new(channel, BranchId::named(&channel, "news"), 42)
    }

    #[test]
    fn test_channel_address_is_pure() {
        let author = Identity::derive("AUTHOR", "utf-8").unwrap();
        let a = channel_address(&author);
        let b = channel_address(&Identity::derive("AUTHOR", "utf-8").unwrap());
        assert_eq!(a, b);
        assert!(a.is_announcement());
        assert_eq!(a.channel_id, ChannelId::derive(&author.public_key()));
    }

    #[test]
    fn test_text_roundtrip() {
        let address = sample();
        let parsed: Address = address.to_string().parse().unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_binary_roundtrip() {
        let address = sample();
        assert_eq!(Address::from_bytes(&address.to_bytes()).unwrap(), address);
    }

    #[test]
    fn test_malformed_addresses() {
        let good = sample().to_string();
        let cases = [
            String::new(),
            "zz:zz:1".to_string(),
            good.replace(":42", ":-1"),
            format!("{}:7", good),
            good.split(':').take(2).collect::<Vec<_>>().join(":"),
        ];
        for case in cases {
            assert!(
                matches!(Address::parse(&case), Err(CoreError::MalformedAddress(_))),
                "accepted {:?}",
                case
            );
        }
        assert!(matches!(
            Address::from_bytes(&[0u8; 71]),
            Err(CoreError::MalformedAddress(_))
        ));
    }

    #[test]
    fn test_branch_ids_are_distinct() {
        let author = Keypair::from_seed(&[0x22; 32]).public_key();
        let channel = ChannelId::derive(&author);
        assert_ne!(BranchId::root(&channel), BranchId::named(&channel, ""));
        assert_ne!(
            BranchId::named(&channel, "a"),
            BranchId::subscription(&channel, &author)
        );
    }

    #[test]
    fn test_counter_never_reuses() {
        let mut counter = SequenceCounter::starting_at(1);
        assert_eq!(counter.allocate(0), 1);
        assert_eq!(counter.allocate(0), 2);
        // Another publisher advanced the branch.
        assert_eq!(counter.allocate(10), 10);
        // A lower floor never rewinds.
        assert_eq!(counter.allocate(3), 11);
        assert_eq!(counter.peek(), 12);
    }

    #[test]
    fn test_ordering_groups_branches() {
        let a = sample();
        let b = a.with_sequence(43);
        assert!(a < b);
    }
}
