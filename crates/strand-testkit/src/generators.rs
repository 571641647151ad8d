//! Proptest generators for property-based testing.

use proptest::prelude::*;

use strand_core::{Address, BranchId, ChannelId, Encoding};

/// A valid identity seed.
pub fn seed() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.-]{1,64}".prop_map(String::from)
}

/// A supported encoding.
pub fn encoding() -> impl Strategy<Value = Encoding> {
    prop_oneof![
        Just(Encoding::Utf8),
        Just(Encoding::Ascii),
        Just(Encoding::Binary),
    ]
}

/// Payload bytes up to `max_len` long.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// A branch label.
pub fn branch_label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(String::from)
}

pub fn channel_id() -> impl Strategy<Value = ChannelId> {
    any::<[u8; 32]>().prop_map(ChannelId::from_bytes)
}

pub fn branch_id() -> impl Strategy<Value = BranchId> {
    any::<[u8; 32]>().prop_map(BranchId::from_bytes)
}

/// Any address, announcements included.
pub fn address() -> impl Strategy<Value = Address> {
    (channel_id(), branch_id(), any::<u64>())
        .prop_map(|(channel, branch, sequence)| Address::new(channel, branch, sequence))
}

/// One packet to publish.
#[derive(Debug, Clone)]
pub struct PacketParams {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
    pub signed: bool,
}

impl Arbitrary for PacketParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (payload(256), payload(256), any::<bool>())
            .prop_map(|(public, private, signed)| PacketParams {
                public,
                private,
                signed,
            })
            .boxed()
    }
}
