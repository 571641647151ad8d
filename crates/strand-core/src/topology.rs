//! Topology: the per-party view of a channel's message DAG.
//!
//! Messages live in an append-only arena; previous links are indices into
//! it, resolved through an `Address -> index` map. Every branch keeps a
//! cursor recording how far it is contiguous, the highest sequence seen and
//! the sequences still missing below it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::address::{Address, SequenceCounter};
use crate::crypto::{Ed25519PublicKey, X25519PublicKey};
use crate::error::{CoreError, Result, ValidationError};
use crate::message::{Content, Message};
use crate::types::{BranchId, ChannelId};

/// Largest forward jump a branch accepts in one message. Bounds the gap set.
pub const MAX_SEQUENCE_JUMP: u64 = 4096;

/// A channel as learned from its announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub announcement: Address,
    pub author_key: Ed25519PublicKey,
    pub author_exchange_key: X25519PublicKey,
    pub multi_branching: bool,
}

impl Channel {
    /// Read the channel out of an announcement message.
    pub fn from_announcement(message: &Message) -> Result<Self> {
        match &message.content {
            Content::Announcement(body) => Ok(Self {
                channel_id: message.address().channel_id,
                announcement: *message.address(),
                author_key: body.author_key,
                author_exchange_key: body.exchange_key,
                multi_branching: body.multi_branching,
            }),
            _ => Err(CoreError::NotAnAnnouncement(message.kind())),
        }
    }

    /// The channel's implicit root branch.
    pub fn root_branch(&self) -> BranchId {
        self.announcement.branch_id
    }
}

/// The health status of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchHealth {
    /// Every sequence up to the highest seen is present.
    Healthy,

    /// Some sequences below the highest seen are missing.
    HasGaps {
        /// The missing sequence numbers.
        missing: Vec<u64>,
    },
}

impl BranchHealth {
    /// Check if the branch is healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self, BranchHealth::Healthy)
    }

    /// Check if the branch has gaps.
    pub fn has_gaps(&self) -> bool {
        matches!(self, BranchHealth::HasGaps { .. })
    }
}

/// Result of recording a message into a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordResult {
    /// Message was accepted without leaving gaps behind it.
    Accepted,
    /// Message was accepted but skipped past sequences not seen yet.
    AcceptedWithGaps,
    /// Message filled a gap.
    GapFilled,
    /// Message is already known (replay).
    Duplicate,
}

/// Cursor and allocator for one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchState {
    /// The branch identifier.
    pub branch_id: BranchId,

    /// Lowest sequence a message in this branch may use.
    pub start: u64,

    /// First sequence not yet contiguous from `start`.
    pub next_expected: u64,

    /// Highest sequence seen, if any.
    pub known_max: Option<u64>,

    /// Missing sequence numbers below `known_max`.
    pub gaps: BTreeSet<u64>,

    /// Health status.
    pub health: BranchHealth,

    counter: SequenceCounter,
}

impl BranchState {
    /// Create an empty branch whose first message sits at `start`.
    pub fn new(branch_id: BranchId, start: u64) -> Self {
        Self {
            branch_id,
            start,
            next_expected: start,
            known_max: None,
            gaps: BTreeSet::new(),
            health: BranchHealth::Healthy,
            counter: SequenceCounter::starting_at(start),
        }
    }

    /// Check that recording `sequence` would not open an oversized gap.
    pub fn check(&self, sequence: u64) -> std::result::Result<(), ValidationError> {
        let from = self.known_max.map_or(self.start, |max| max.saturating_add(1));
        if sequence < self.start
            || (sequence > from && sequence - from > MAX_SEQUENCE_JUMP)
        {
            return Err(ValidationError::SequenceJump { from, to: sequence });
        }
        Ok(())
    }

    /// Record a message at the given sequence number.
    pub fn record(&mut self, sequence: u64) -> std::result::Result<RecordResult, ValidationError> {
        self.check(sequence)?;

        let result = match self.known_max {
            Some(max) if sequence <= max => {
                if self.gaps.remove(&sequence) {
                    RecordResult::GapFilled
                } else {
                    RecordResult::Duplicate
                }
            }
            _ => {
                let from = self.known_max.map_or(self.start, |max| max.saturating_add(1));
                self.gaps.extend(from..sequence);
                self.known_max = Some(sequence);
                if from < sequence {
                    RecordResult::AcceptedWithGaps
                } else {
                    RecordResult::Accepted
                }
            }
        };

        self.advance();
        self.update_health();
        Ok(result)
    }

    fn advance(&mut self) {
        if let Some(max) = self.known_max {
            while self.next_expected <= max && !self.gaps.contains(&self.next_expected) {
                self.next_expected += 1;
            }
        }
    }

    fn update_health(&mut self) {
        if self.gaps.is_empty() {
            self.health = BranchHealth::Healthy;
        } else {
            self.health = BranchHealth::HasGaps {
                missing: self.gaps.iter().copied().collect(),
            };
        }
    }

    /// Mark a recorded sequence as missing again. Allocation stays above it.
    pub fn forget(&mut self, sequence: u64) {
        if sequence < self.start || self.known_max.map_or(true, |max| sequence > max) {
            return;
        }
        self.gaps.insert(sequence);
        self.next_expected = self.next_expected.min(sequence);
        self.advance();
        self.update_health();
    }

    /// Allocate the sequence for our next publish in this branch.
    ///
    /// Never lower than one past the highest sequence seen, so publishers
    /// sharing a branch do not reuse each other's sequences.
    pub fn allocate(&mut self) -> u64 {
        let floor = self.known_max.map_or(self.start, |max| max.saturating_add(1));
        self.counter.allocate(floor)
    }

    /// Highest contiguous sequence, if any.
    pub fn head(&self) -> Option<u64> {
        (self.next_expected > self.start).then(|| self.next_expected - 1)
    }

    /// Highest sequence seen, if any.
    pub fn latest(&self) -> Option<u64> {
        self.known_max
    }

    /// Check if the branch is healthy.
    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// Get the list of missing sequence numbers.
    pub fn missing(&self) -> Vec<u64> {
        self.gaps.iter().copied().collect()
    }
}

/// Outcome of checking a message against the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Not seen before; its previous link is known.
    New,
    /// Identical message already recorded.
    Duplicate,
}

#[derive(Debug, Clone)]
struct Node {
    message: Message,
    previous: Option<usize>,
}

/// One party's view of one channel.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    channel: Option<Channel>,
    nodes: Vec<Node>,
    index: HashMap<Address, usize>,
    branches: BTreeMap<BranchId, BranchState>,
}

impl Topology {
    /// An empty topology that has not observed any channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// The observed channel, if any.
    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    /// The observed channel, or `UnknownChannel` for `channel_id`.
    pub fn require_channel(&self, channel_id: &ChannelId) -> Result<&Channel> {
        match &self.channel {
            Some(channel) if channel.channel_id == *channel_id => Ok(channel),
            _ => Err(CoreError::UnknownChannel(*channel_id)),
        }
    }

    /// Number of recorded messages. Forgotten messages are not counted.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether a message at `address` has been recorded.
    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    /// The message recorded at `address`.
    pub fn get(&self, address: &Address) -> Option<&Message> {
        self.index.get(address).map(|&i| &self.nodes[i].message)
    }

    /// Check a message without recording it.
    ///
    /// Fails with `AddressCollision` if a different message already sits at
    /// its address, `UnknownChannel` if it belongs to a channel we have not
    /// observed, and `OutOfOrder` if its previous link is unknown.
    pub fn admit(&self, message: &Message) -> Result<Admission> {
        let address = message.address();

        if let Some(&i) = self.index.get(address) {
            return if self.nodes[i].message == *message {
                Ok(Admission::Duplicate)
            } else {
                Err(CoreError::AddressCollision(*address))
            };
        }

        if message.is_announcement() {
            if let Some(channel) = &self.channel {
                if channel.channel_id != address.channel_id {
                    return Err(CoreError::ChannelMismatch {
                        expected: channel.channel_id,
                        found: address.channel_id,
                    });
                }
            }
            return Ok(Admission::New);
        }

        self.require_channel(&address.channel_id)?;

        if let Some(previous) = message.previous() {
            if !self.index.contains_key(previous) {
                return Err(CoreError::OutOfOrder {
                    address: *address,
                    missing: *previous,
                });
            }
        }

        if let Some(branch) = self.branches.get(&address.branch_id) {
            branch.check(address.sequence)?;
        } else {
            BranchState::new(address.branch_id, 1).check(address.sequence)?;
        }

        Ok(Admission::New)
    }

    /// Append a message to the DAG and advance its branch cursor.
    pub fn record(&mut self, message: Message) -> Result<RecordResult> {
        if self.admit(&message)? == Admission::Duplicate {
            return Ok(RecordResult::Duplicate);
        }

        let address = *message.address();
        if message.is_announcement() {
            self.channel = Some(Channel::from_announcement(&message)?);
        }

        let previous = message.previous().and_then(|p| self.index.get(p).copied());
        let start = if address.is_announcement() { 0 } else { 1 };
        let result = self
            .branches
            .entry(address.branch_id)
            .or_insert_with(|| BranchState::new(address.branch_id, start))
            .record(address.sequence)?;

        self.index.insert(address, self.nodes.len());
        self.nodes.push(Node { message, previous });
        Ok(result)
    }

    /// Drop a message that lost its address to another publisher.
    ///
    /// The message leaves the index and its sequence becomes a gap, so the
    /// winner can be recorded there. Messages already linking to it keep
    /// their links.
    pub fn forget(&mut self, address: &Address) -> Option<Message> {
        if address.is_announcement() {
            return None;
        }
        // The node stays in the arena, unindexed, as links already taken
        // to it hold its slot.
        let i = self.index.remove(address)?;
        if let Some(branch) = self.branches.get_mut(&address.branch_id) {
            branch.forget(address.sequence);
        }
        Some(self.nodes[i].message.clone())
    }

    /// Cursor state of the branch an address belongs to.
    pub fn branch_for(&self, address: &Address) -> Result<&BranchState> {
        self.require_channel(&address.channel_id)?;
        self.branches
            .get(&address.branch_id)
            .ok_or(CoreError::UnknownBranch(address.branch_id))
    }

    /// Cursor state of a branch, if known.
    pub fn branch(&self, branch_id: &BranchId) -> Option<&BranchState> {
        self.branches.get(branch_id)
    }

    /// All known branches.
    pub fn branches(&self) -> impl Iterator<Item = &BranchState> {
        self.branches.values()
    }

    /// Make a branch known locally before anything is recorded in it.
    pub fn open_branch(&mut self, branch_id: BranchId) -> &BranchState {
        self.branches
            .entry(branch_id)
            .or_insert_with(|| BranchState::new(branch_id, 1))
    }

    /// Allocate the next publish address in a branch.
    pub fn next_address(&mut self, branch_id: &BranchId) -> Result<Address> {
        let channel_id = self
            .channel
            .as_ref()
            .map(|c| c.channel_id)
            .ok_or(CoreError::UnknownChannel(ChannelId::ZERO))?;
        let branch = self
            .branches
            .get_mut(branch_id)
            .ok_or(CoreError::UnknownBranch(*branch_id))?;
        Ok(Address::new(channel_id, *branch_id, branch.allocate()))
    }

    /// The address a new message in `branch_id` should link to: the latest
    /// message of that branch, or the announcement for an empty branch.
    pub fn link_target(&self, branch_id: &BranchId) -> Result<Address> {
        let channel = self
            .channel
            .as_ref()
            .ok_or(CoreError::UnknownChannel(ChannelId::ZERO))?;
        let latest = self
            .branches
            .get(branch_id)
            .and_then(|b| b.latest())
            .map(|seq| Address::new(channel.channel_id, *branch_id, seq));
        Ok(latest.unwrap_or(channel.announcement))
    }

    /// Walk previous links from `address` back to the announcement.
    ///
    /// The result starts with the direct parent. Empty for unknown
    /// addresses and for the announcement itself.
    pub fn ancestors(&self, address: &Address) -> Vec<Address> {
        let mut out = Vec::new();
        let mut cursor = self.index.get(address).and_then(|&i| self.nodes[i].previous);
        while let Some(i) = cursor {
            let node = &self.nodes[i];
            out.push(*node.message.address());
            cursor = node.previous;
        }
        out
    }

    /// Next expected sequence per branch.
    pub fn cursors(&self) -> BTreeMap<BranchId, u64> {
        self.branches
            .iter()
            .map(|(id, state)| (*id, state.next_expected))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Keypair, X25519StaticSecret};
    use crate::message::{AnnouncementBody, MessageBuilder, PacketBody, PayloadKind};
    use bytes::Bytes;

    fn author() -> Keypair {
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

    fn packet(keypair: &Keypair, address: Address, previous: Address, text: &'static [u8]) -> Message {
        MessageBuilder::new(address, keypair.public_key(), PayloadKind::SignedPacket)
            .previous(previous)
            .sign(
                Content::SignedPacket(PacketBody {
                    public: Bytes::from_static(text),
                    masked: None,
                }),
                keypair,
            )
            .unwrap()
    }

    #[test]
    fn test_branch_contiguous_append() {
        let mut state = BranchState::new(BranchId::from_bytes([1; 32]), 1);
        assert_eq!(state.head(), None);
        assert_eq!(state.record(1).unwrap(), RecordResult::Accepted);
        assert_eq!(state.record(2).unwrap(), RecordResult::Accepted);
        assert_eq!(state.head(), Some(2));
        assert_eq!(state.next_expected, 3);
        assert!(state.is_healthy());
    }

    #[test]
    fn test_branch_gap_detection_and_filling() {
        let mut state = BranchState::new(BranchId::from_bytes([1; 32]), 1);
        state.record(1).unwrap();
        assert_eq!(state.record(5).unwrap(), RecordResult::AcceptedWithGaps);
        assert_eq!(state.head(), Some(1));
        assert_eq!(state.missing(), vec![2, 3, 4]);
        assert!(state.health.has_gaps());

        assert_eq!(state.record(3).unwrap(), RecordResult::GapFilled);
        assert_eq!(state.head(), Some(1));
        state.record(2).unwrap();
        assert_eq!(state.head(), Some(3));
        state.record(4).unwrap();
        assert_eq!(state.head(), Some(5));
        assert!(state.is_healthy());

        assert_eq!(state.record(4).unwrap(), RecordResult::Duplicate);
    }

    #[test]
    fn test_branch_rejects_huge_jump() {
        let mut state = BranchState::new(BranchId::from_bytes([1; 32]), 1);
        assert!(matches!(
            state.record(u64::MAX),
            Err(ValidationError::SequenceJump { .. })
        ));
        assert!(state.gaps.is_empty());
    }

    #[test]
    fn test_allocate_skips_past_seen() {
        let mut state = BranchState::new(BranchId::from_bytes([1; 32]), 1);
        assert_eq!(state.allocate(), 1);
        state.record(1).unwrap();
        // Someone else published at 2 and 3.
        state.record(3).unwrap();
        assert_eq!(state.allocate(), 4);
        assert_eq!(state.allocate(), 5);
    }

    #[test]
    fn test_record_requires_channel() {
        let keypair = author();
        let announcement = announcement(&keypair);
        let root = *announcement.address();
        let first = packet(&keypair, root.with_sequence(1), root, b"one");

        let mut topology = Topology::new();
        assert!(matches!(
            topology.record(first.clone()),
            Err(CoreError::UnknownChannel(_))
        ));
        topology.record(announcement).unwrap();
        assert_eq!(topology.record(first).unwrap(), RecordResult::Accepted);
        assert_eq!(topology.len(), 2);
    }

    #[test]
    fn test_out_of_order_then_recovered() {
        let keypair = author();
        let announcement = announcement(&keypair);
        let root = *announcement.address();
        let first = packet(&keypair, root.with_sequence(1), root, b"one");
        let second = packet(&keypair, root.with_sequence(2), root.with_sequence(1), b"two");

        let mut topology = Topology::new();
        topology.record(announcement).unwrap();

        match topology.record(second.clone()) {
            Err(CoreError::OutOfOrder { missing, .. }) => assert_eq!(missing, root.with_sequence(1)),
            other => panic!("expected OutOfOrder, got {:?}", other),
        }
        assert!(!topology.contains(&root.with_sequence(2)));

        topology.record(first).unwrap();
        topology.record(second).unwrap();
        assert_eq!(
            topology.ancestors(&root.with_sequence(2)),
            vec![root.with_sequence(1), root]
        );
    }

    #[test]
    fn test_duplicate_and_collision() {
        let keypair = author();
        let announcement = announcement(&keypair);
        let root = *announcement.address();
        let first = packet(&keypair, root.with_sequence(1), root, b"one");
        let forged = packet(&keypair, root.with_sequence(1), root, b"other");

        let mut topology = Topology::new();
        topology.record(announcement.clone()).unwrap();
        topology.record(first.clone()).unwrap();

        assert_eq!(topology.record(first).unwrap(), RecordResult::Duplicate);
        assert_eq!(topology.record(announcement).unwrap(), RecordResult::Duplicate);
        assert!(matches!(
            topology.record(forged),
            Err(CoreError::AddressCollision(_))
        ));
    }

    #[test]
    fn test_foreign_announcement_is_channel_mismatch() {
        let mut topology = Topology::new();
        topology.record(announcement(&author())).unwrap();
        assert!(matches!(
            topology.record(announcement(&Keypair::generate())),
            Err(CoreError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn test_forget_lets_another_message_take_the_address() {
        let author = author();
        let other = Keypair::from_seed(&[0x07; 32]);
        let announcement = announcement(&author);
        let root = announcement.address().branch_id;
        let channel = announcement.address().channel_id;

        let mut topology = Topology::new();
        topology.record(announcement.clone()).unwrap();
        let slot = Address::new(channel, root, 1);
        let ours = packet(&author, slot, *announcement.address(), b"ours");
        let theirs = packet(&other, slot, *announcement.address(), b"theirs");
        topology.record(ours.clone()).unwrap();

        assert_eq!(topology.len(), 2);
        assert_eq!(topology.forget(&slot), Some(ours));
        assert!(!topology.contains(&slot));
        assert_eq!(topology.len(), 1);
        assert_eq!(topology.branch(&root).unwrap().missing(), vec![1]);
        assert_eq!(topology.record(theirs).unwrap(), RecordResult::GapFilled);
        assert_eq!(topology.len(), 2);
        assert_eq!(topology.get(&slot).unwrap().packet().unwrap().public.as_ref(), b"theirs");
        assert_eq!(topology.next_address(&root).unwrap().sequence, 2);
        assert_eq!(topology.forget(announcement.address()), None);
    }

    #[test]
    fn test_branch_for_and_link_target() {
        let keypair = author();
        let announcement = announcement(&keypair);
        let root = *announcement.address();
        let channel = root.channel_id;
        let named = BranchId::named(&channel, "news");

        let mut topology = Topology::new();
        assert!(matches!(
            topology.branch_for(&root),
            Err(CoreError::UnknownChannel(_))
        ));
        topology.record(announcement).unwrap();
        assert_eq!(topology.branch_for(&root).unwrap().head(), Some(0));
        assert!(matches!(
            topology.branch_for(&Address::new(channel, named, 1)),
            Err(CoreError::UnknownBranch(_))
        ));

        assert_eq!(topology.link_target(&named).unwrap(), root);
        topology.open_branch(named);
        let address = topology.next_address(&named).unwrap();
        assert_eq!(address, Address::new(channel, named, 1));
        topology
            .record(packet(&keypair, address, root, b"x"))
            .unwrap();
        assert_eq!(topology.link_target(&named).unwrap(), address);
        assert_eq!(topology.next_address(&named).unwrap().sequence, 2);
        assert_eq!(topology.cursors()[&named], 2);
    }
}
