//! Reconciliation controller
//!
//! Runs a bounded historical catch-up scan, then keeps a live log
//! subscription open for the life of the process:
//!
//! ```text
//! Init → Catchup → Subscribing ⇄ Subscribed
//! ```
//!
//! Both paths feed the same decoder and idempotent upsert, so a transaction
//! seen by catch-up and by the live feed is indexed once.

use pool_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, LogBatch, LogSubscription};
use crate::config::Config;
use crate::events::EventDecoder;
use crate::storage::{CommitmentStore, UpsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Init,
    Catchup,
    Subscribing,
    Subscribed,

    /// The resubscribe cap was reached. Only possible when a cap is set.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub catchup_signature_limit: usize,
    pub resubscribe_delay: Duration,
    pub max_resubscribe_attempts: Option<u32>,
}

impl ReconcilerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            catchup_signature_limit: config.catchup_signature_limit,
            resubscribe_delay: config.resubscribe_delay(),
            max_resubscribe_attempts: config.max_resubscribe_attempts,
        }
    }
}

/// Per-batch persistence tally
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub conflicts: usize,

    /// Records dropped because the store call failed.
    pub failed: usize,
}

impl IngestStats {
    fn add(&mut self, other: IngestStats) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
    }
}

/// Single writer to the commitment index
pub struct Reconciler {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn CommitmentStore>,
    decoder: EventDecoder,
    settings: ReconcilerSettings,
    state: watch::Sender<ControllerState>,
}

impl Reconciler {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn CommitmentStore>,
        decoder: EventDecoder,
        settings: ReconcilerSettings,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Init);
        Self {
            chain,
            store,
            decoder,
            settings,
            state,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ControllerState) {
        info!("Reconciler state: {:?} -> {:?}", *self.state.borrow(), next);
        self.state.send_replace(next);
    }

    /// Run catch-up, then the live subscription.
    ///
    /// Only returns when a resubscribe cap is configured and exhausted.
    pub async fn run(self) -> Result<()> {
        self.transition(ControllerState::Catchup);

        match self.catch_up().await {
            Ok(stats) => info!(
                "Catch-up complete: {} inserted, {} duplicate, {} conflicting, {} failed",
                stats.inserted, stats.duplicates, stats.conflicts, stats.failed
            ),
            Err(e) => error!("Catch-up failed, continuing to live subscription: {:#}", e),
        }

        let mut failures: u32 = 0;

        loop {
            self.transition(ControllerState::Subscribing);

            match self.chain.subscribe_logs().await {
                Ok(subscription) => {
                    self.transition(ControllerState::Subscribed);
                    failures = 0;
                    self.consume(subscription).await;
                    error!("Log subscription lost");
                }
                Err(e) => {
                    error!("Failed to subscribe to program logs: {:#}", e);
                }
            }

            failures += 1;
            if let Some(max) = self.settings.max_resubscribe_attempts {
                if failures >= max {
                    self.transition(ControllerState::Stopped);
                    return Err(Error::SubscriptionLost(format!(
                        "gave up after {} consecutive failures",
                        failures
                    )));
                }
            }

            warn!(
                "Resubscribing in {:?} (attempt {})",
                self.settings.resubscribe_delay, failures
            );
            sleep(self.settings.resubscribe_delay).await;
        }
    }

    /// Scan the most recent program transactions once.
    ///
    /// Individual transaction fetch failures are logged and skipped.
    pub async fn catch_up(&self) -> anyhow::Result<IngestStats> {
        let signatures = self
            .chain
            .recent_signatures(self.settings.catchup_signature_limit)
            .await?;

        info!("Catch-up scanning {} signature(s)", signatures.len());

        let mut total = IngestStats::default();

        // Oldest first so leaves land in program order.
        for signature in signatures.iter().rev() {
            match self.chain.transaction_logs(signature).await {
                Ok(Some(batch)) => total.add(self.ingest(&batch).await),
                Ok(None) => debug!("No logs for {}, skipping", signature),
                Err(e) => warn!("Failed to fetch transaction {}: {:#}", signature, e),
            }
        }

        Ok(total)
    }

    async fn consume(&self, mut subscription: LogSubscription) {
        while let Some(batch) = subscription.recv().await {
            let stats = self.ingest(&batch).await;
            if stats.inserted > 0 {
                debug!("Live batch {}: {} new commitment(s)", batch.signature, stats.inserted);
            }
        }
    }

    /// Decode and persist one transaction's logs.
    ///
    /// A store failure drops the rest of the batch; a later catch-up over the
    /// same signature recovers it.
    pub async fn ingest(&self, batch: &LogBatch) -> IngestStats {
        let mut stats = IngestStats::default();

        if batch.failed {
            debug!("Skipping failed transaction {}", batch.signature);
            return stats;
        }

        let records = self.decoder.decode_logs(&batch.logs, Some(&batch.signature));

        for (i, record) in records.iter().enumerate() {
            match self.store.upsert(record).await {
                Ok(UpsertOutcome::Inserted) => stats.inserted += 1,
                Ok(UpsertOutcome::Duplicate) => stats.duplicates += 1,
                Ok(UpsertOutcome::LeafConflict) => stats.conflicts += 1,
                Err(e) => {
                    stats.failed = records.len() - i;
                    error!(
                        "Failed to persist batch {} ({} record(s) dropped): {}",
                        batch.signature, stats.failed, e
                    );
                    break;
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_chain::MockChain;
    use crate::events::CommitmentEvent;
    use crate::storage::MemoryStore;
    use pool_common::{CommitmentRecord, FieldElement, Network, Token};
    use solana_sdk::pubkey::Pubkey;

    fn settings() -> ReconcilerSettings {
        ReconcilerSettings {
            catchup_signature_limit: 100,
            resubscribe_delay: Duration::from_millis(10),
            max_resubscribe_attempts: None,
        }
    }

    fn reconciler(chain: &Arc<MockChain>, store: &Arc<MemoryStore>) -> Reconciler {
        Reconciler::new(
            chain.clone(),
            store.clone(),
            EventDecoder::new(Network::Devnet, Some(chain.program_id())),
            settings(),
        )
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait::async_trait]
    impl CommitmentStore for BrokenStore {
        async fn upsert(&self, _: &CommitmentRecord) -> Result<UpsertOutcome> {
            Err(Error::StorePersistence("connection refused".into()))
        }
        async fn commitments_at(
            &self,
            _: Token,
            _: &[u64],
        ) -> Result<std::collections::HashMap<u64, String>> {
            Ok(Default::default())
        }
        async fn find_by_commitment(&self, _: &str) -> Result<Option<CommitmentRecord>> {
            Ok(None)
        }
        async fn find_by_encrypted_output(&self, _: &str) -> Result<Option<CommitmentRecord>> {
            Ok(None)
        }
        async fn leaves_in_range(&self, _: Token, _: u64, _: u64) -> Result<Vec<(u64, String)>> {
            Ok(Vec::new())
        }
        async fn count(&self, _: Token) -> Result<u64> {
            Ok(0)
        }
        async fn health_check(&self) -> Result<()> {
            Err(Error::StorePersistence("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_ingest_same_batch_twice_is_idempotent() {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let store = Arc::new(MemoryStore::new());
        let (signature, _) = chain.emit_deposit(None).await;
        let batch = chain.transaction_logs(&signature).await.unwrap().unwrap();

        let r = reconciler(&chain, &store);
        let first = r.ingest(&batch).await;
        let second = r.ingest(&batch).await;

        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_transactions_are_ignored() {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let store = Arc::new(MemoryStore::new());
        let (signature, _) = chain.emit_deposit(None).await;
        let mut batch = chain.transaction_logs(&signature).await.unwrap().unwrap();
        batch.failed = true;

        let stats = reconciler(&chain, &store).ingest(&batch).await;

        assert_eq!(stats, IngestStats::default());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_catch_up_indexes_history() {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let store = Arc::new(MemoryStore::new());
        for _ in 0..3 {
            chain.emit_deposit(None).await;
        }

        let stats = reconciler(&chain, &store).catch_up().await.unwrap();

        assert_eq!(stats.inserted, 3);
        let leaves = store.leaves_in_range(Token::Sol, 0, 10).await.unwrap();
        let indices: Vec<u64> = leaves.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unlisted_mint_and_base_event_share_leaf_index() {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let store = Arc::new(MemoryStore::new());
        let value = |n: u8| {
            let mut bytes = [0u8; 32];
            bytes[31] = n;
            FieldElement::new(bytes)
        };

        chain
            .emit_event(&CommitmentEvent::Token {
                leaf_index: 0,
                mint: Pubkey::new_unique(),
                commitment: value(11),
                encrypted_output: vec![11],
            })
            .await;
        chain
            .emit_event(&CommitmentEvent::Base {
                leaf_index: 0,
                commitment: value(22),
                encrypted_output: vec![22],
            })
            .await;

        let stats = reconciler(&chain, &store).catch_up().await.unwrap();

        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.conflicts, 0);
        let base = store.commitments_at(Token::Sol, &[0]).await.unwrap();
        assert_eq!(base.get(&0).map(String::as_str), Some("22"));
        assert_eq!(
            store.leaves_in_range(Token::Sol, 0, 10).await.unwrap(),
            vec![(0, "22".to_string())]
        );
    }

    #[tokio::test]
    async fn test_catch_up_respects_limit() {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let store = Arc::new(MemoryStore::new());
        for _ in 0..5 {
            chain.emit_deposit(None).await;
        }

        let mut r = reconciler(&chain, &store);
        r.settings.catchup_signature_limit = 2;
        let stats = r.catch_up().await.unwrap();

        // Newest two only.
        assert_eq!(stats.inserted, 2);
        let leaves = store.leaves_in_range(Token::Sol, 0, 10).await.unwrap();
        assert_eq!(leaves.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_store_failure_drops_batch_without_panicking() {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let (signature, _) = chain.emit_deposit(None).await;
        let batch = chain.transaction_logs(&signature).await.unwrap().unwrap();

        let r = Reconciler::new(
            chain.clone(),
            Arc::new(BrokenStore),
            EventDecoder::new(Network::Devnet, Some(chain.program_id())),
            settings(),
        );
        let stats = r.ingest(&batch).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.inserted, 0);
    }

    #[tokio::test]
    async fn test_resubscribe_cap_stops_controller() {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let store = Arc::new(MemoryStore::new());
        chain.fail_next_subscriptions(10).await;

        let mut r = reconciler(&chain, &store);
        r.settings.max_resubscribe_attempts = Some(3);
        let mut state = r.state();

        let result = r.run().await;

        assert!(matches!(result, Err(Error::SubscriptionLost(_))));
        assert_eq!(*state.borrow_and_update(), ControllerState::Stopped);
        assert_eq!(chain.subscribe_attempts().await, 3);
    }
}
