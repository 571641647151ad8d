//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use strand::sync::RetryPolicy;
use strand::{Author, ChannelConfig, Client, Outgoing, Subscriber};
use strand_core::{Address, BranchId};
use strand_ledger::MemoryLedger;

/// Configuration for tests: retries without sleeping.
pub fn config(seed: &str) -> ChannelConfig {
    ChannelConfig::new(seed).with_retry(RetryPolicy::immediate(3))
}

/// Distinct seeds for multi-party tests.
pub fn multi_party_seeds(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("PARTY_{:03}", i)).collect()
}

/// A shared in-memory ledger with an announced, active author.
pub struct TestChannel {
    pub ledger: Arc<MemoryLedger>,
    pub author: Client<Author, MemoryLedger>,
}

impl TestChannel {
    /// Announce a channel for `seed` on a fresh ledger.
    pub async fn announced(seed: &str) -> Self {
        Self::with_config(config(seed)).await
    }

    pub async fn with_config(config: ChannelConfig) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let author = Author::new(config).expect("valid author config");
        let mut author = Client::new(author, ledger.clone());
        let announcement = author.party_mut().announce().expect("announce");
        author.post(&announcement).await.expect("post announcement");
        Self { ledger, author }
    }

    /// Address of the announcement.
    pub fn announcement(&self) -> Address {
        self.author.party().channel_address()
    }

    pub fn root(&self) -> BranchId {
        self.author.party().root_branch()
    }

    /// A subscriber that has read the announcement but not subscribed.
    pub async fn reader(&self, seed: &str) -> Client<Subscriber, MemoryLedger> {
        let subscriber = Subscriber::new(config(seed)).expect("valid subscriber config");
        let mut client = Client::new(subscriber, self.ledger.clone());
        client
            .receive(&self.announcement())
            .await
            .expect("read announcement");
        client
    }

    /// A subscriber whose request the author has already accepted.
    pub async fn join(&mut self, seed: &str) -> Client<Subscriber, MemoryLedger> {
        let mut client = self.reader(seed).await;
        let request = client
            .party_mut()
            .subscribe(&self.announcement())
            .expect("subscribe");
        client.post(&request).await.expect("post subscription");
        self.author.sync().await.expect("author sync");
        client
    }

    /// Post something the author built.
    pub async fn post(&mut self, outgoing: &Outgoing) -> Address {
        self.author.post(outgoing).await.expect("post");
        outgoing.address
    }

    /// Key the root branch for every accepted subscriber.
    pub async fn key_root(&mut self) -> Address {
        let root = self.root();
        let keyload = self
            .author
            .party_mut()
            .share_keyload_for_everyone(&root)
            .expect("keyload");
        self.post(&keyload).await
    }
}
