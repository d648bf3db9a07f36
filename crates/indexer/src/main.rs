//! Commitment Indexer
//!
//! Main entry point for the catch-up and live indexing service.

use anyhow::Result;
use commitment_indexer::chain::ChainClient;
use commitment_indexer::events::EventDecoder;
use commitment_indexer::mock_chain::MockChain;
use commitment_indexer::reconciler::{Reconciler, ReconcilerSettings};
use commitment_indexer::storage::{CommitmentStore, MemoryStore, RedisStore};
use commitment_indexer::{Config, ProofService, SolanaChainClient};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between simulated deposits in mock mode
const MOCK_BLOCK_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,commitment_indexer=debug,solana_pubsub_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Commitment Indexer");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Network: {}", config.network);
    info!("  Mock mode: {}", config.mock_mode);
    info!("  Catch-up limit: {} signatures", config.catchup_signature_limit);
    info!("  Resubscribe delay: {}s", config.resubscribe_delay_secs);

    let program_id = config.program_id.unwrap_or_else(Pubkey::new_unique);
    info!("  Program: {}", program_id);

    let chain: Arc<dyn ChainClient>;
    let store: Arc<dyn CommitmentStore>;
    let mut mock_task = None;

    if config.mock_mode {
        info!("Running with mock chain and in-memory store");
        let mock = Arc::new(MockChain::new(program_id));

        let producer = mock.clone();
        mock_task = Some(tokio::spawn(async move {
            loop {
                producer.advance_chain().await;
                tokio::time::sleep(MOCK_BLOCK_INTERVAL).await;
            }
        }));

        chain = mock;
        store = Arc::new(MemoryStore::new());
    } else {
        store = Arc::new(RedisStore::new(&config.redis_url).await?);
        info!("Connected to Redis");
        chain = Arc::new(SolanaChainClient::new(
            &config.rpc_url,
            &config.ws_url,
            program_id,
        ));
    }

    let queries = ProofService::new(chain.clone(), store.clone(), program_id, config.network);
    queries.health_check().await?;
    info!("Commitment store is healthy");

    let reconciler = Reconciler::new(
        chain,
        store,
        EventDecoder::new(config.network, Some(program_id)),
        ReconcilerSettings::from_config(&config),
    );

    let reconciler_task = tokio::spawn(async move {
        info!("Starting reconciler task");
        if let Err(e) = reconciler.run().await {
            error!("Reconciler error: {:#}", e);
        }
    });

    info!("Commitment Indexer is running");

    // Wait for the reconciler to stop (only with a resubscribe cap) or a signal
    tokio::select! {
        _ = reconciler_task => {
            error!("Reconciler task terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    if let Some(task) = mock_task {
        task.abort();
    }

    info!("Shutting down Commitment Indexer");

    Ok(())
}
