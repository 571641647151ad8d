//! Party configuration.

use std::fmt;

use strand_core::{Encoding, Identity};
use strand_sync::RetryPolicy;

use crate::error::Result;

/// Default upper bound for an encoded envelope.
pub const DEFAULT_MAX_ENVELOPE_SIZE: usize = 32 * 1024;

/// Configuration for an author or subscriber.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Seed the identity is derived from.
    pub seed: String,
    /// How the seed is interpreted.
    pub encoding: Encoding,
    /// Envelopes larger than this are neither published nor accepted.
    pub max_envelope_size: usize,
    /// Whether an author may open branches besides the root.
    pub multi_branching: bool,
    /// Retry policy for ledger calls made on this party's behalf.
    pub retry: RetryPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            seed: String::new(),
            encoding: Encoding::Utf8,
            max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
            multi_branching: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ChannelConfig {
    /// Defaults with the given seed.
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            ..Self::default()
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_max_envelope_size(mut self, max_envelope_size: usize) -> Self {
        self.max_envelope_size = max_envelope_size;
        self
    }

    pub fn with_multi_branching(mut self, multi_branching: bool) -> Self {
        self.multi_branching = multi_branching;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Derive the identity this configuration describes.
    pub fn identity(&self) -> Result<Identity> {
        Ok(Identity::with_encoding(&self.seed, self.encoding)?)
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("seed", &"<redacted>")
            .field("encoding", &self.encoding)
            .field("max_envelope_size", &self.max_envelope_size)
            .field("multi_branching", &self.multi_branching)
            .field("retry", &self.retry)
            .finish()
    }
}
