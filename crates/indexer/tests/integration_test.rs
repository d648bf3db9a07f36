//! Integration tests for the Commitment Indexer
//!
//! End-to-end runs of the reconciler against the mock chain and memory store.
//! The Redis test needs a live server.
//!
//! Requirements (ignored tests only):
//! - Redis running on localhost:6379
//! - Run with: cargo test --package commitment-indexer -- --ignored

use commitment_indexer::mock_chain::MockChain;
use commitment_indexer::pda::Asset;
use commitment_indexer::reconciler::{ControllerState, Reconciler, ReconcilerSettings};
use commitment_indexer::storage::{CommitmentStore, MemoryStore, RedisStore, UpsertOutcome};
use commitment_indexer::{EventDecoder, ProofService};
use pool_common::{CommitmentRecord, Error, FieldElement, Network, Token, TREE_DEPTH};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        catchup_signature_limit: 1000,
        resubscribe_delay: Duration::from_millis(20),
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

async fn wait_for_count(store: &MemoryStore, token: Token, expected: u64) {
    timeout(Duration::from_secs(5), async {
        while store.count(token).await.unwrap() < expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for commitments to be indexed");
}

#[tokio::test]
async fn test_catch_up_then_live_indexing() {
    let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
    let store = Arc::new(MemoryStore::new());

    // History before the indexer starts
    for _ in 0..3 {
        chain.emit_deposit(None).await;
    }

    let r = reconciler(&chain, &store);
    let mut state = r.state();
    let task = tokio::spawn(r.run());

    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ControllerState::Subscribed),
    )
    .await
    .expect("reconciler never subscribed")
    .unwrap();

    assert_eq!(store.count(Token::Sol).await.unwrap(), 3);

    // Live deposits
    for _ in 0..2 {
        chain.emit_deposit(None).await;
    }
    wait_for_count(&store, Token::Sol, 5).await;

    let leaves = store.leaves_in_range(Token::Sol, 0, 100).await.unwrap();
    assert_eq!(
        leaves.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );

    task.abort();
}

#[tokio::test]
async fn test_overlapping_catch_up_and_live_feed_index_once() {
    let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
    let store = Arc::new(MemoryStore::new());

    let r = reconciler(&chain, &store);
    let mut state = r.state();
    let task = tokio::spawn(r.run());
    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ControllerState::Subscribed),
    )
    .await
    .expect("reconciler never subscribed")
    .unwrap();

    for _ in 0..4 {
        chain.emit_deposit(None).await;
    }
    wait_for_count(&store, Token::Sol, 4).await;

    // A second scan over the same history sees only duplicates
    let stats = reconciler(&chain, &store).catch_up().await.unwrap();
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.duplicates, 4);
    assert_eq!(store.len().await, 4);

    task.abort();
}

#[tokio::test]
async fn test_resubscribes_after_dropped_subscription() {
    let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
    let store = Arc::new(MemoryStore::new());
    chain.fail_next_subscriptions(2).await;

    let task = tokio::spawn(reconciler(&chain, &store).run());

    timeout(Duration::from_secs(5), async {
        while chain.subscribe_attempts().await < 3 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reconciler did not retry the refused subscriptions");

    chain.emit_deposit(None).await;
    wait_for_count(&store, Token::Sol, 1).await;

    chain.drop_subscriptions().await;
    timeout(Duration::from_secs(5), async {
        while chain.subscribe_attempts().await < 4 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reconciler did not resubscribe");

    chain.emit_deposit(None).await;
    wait_for_count(&store, Token::Sol, 2).await;

    task.abort();
}

#[tokio::test]
async fn test_proof_inputs_from_live_index() {
    let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
    let store = Arc::new(MemoryStore::new());
    let mint: Pubkey = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU".parse().unwrap();

    chain.emit_deposit(None).await;
    chain.emit_deposit(Some(mint)).await;
    let (_, token_event) = chain.emit_deposit(Some(mint)).await;

    reconciler(&chain, &store).catch_up().await.unwrap();

    assert_eq!(store.count(Token::Sol).await.unwrap(), 1);
    assert_eq!(store.count(Token::Usdc).await.unwrap(), 2);

    let service = ProofService::new(
        chain.clone(),
        store.clone(),
        chain.program_id(),
        Network::Devnet,
    );

    let state = service
        .tree_state(Asset::Token(Token::Usdc))
        .await
        .unwrap()
        .ready()
        .expect("usdc tree initialized");
    assert_eq!(state.next_index, 2);
    assert_eq!(state.subtrees.len(), TREE_DEPTH);

    let commitment = token_event.commitment().to_decimal();
    let inputs = service.proof_inputs(Token::Usdc, &commitment).await.unwrap();
    assert_eq!(inputs.leaf_index, 1);
    assert_eq!(inputs.root, state.root);
    assert_eq!(inputs.path_indices[0], 1);

    let record = service.find_by_commitment(&commitment).await.unwrap().unwrap();
    assert_eq!(record.mint_address.as_deref(), Some(mint.to_string().as_str()));

    // Same commitment is not part of the SOL tree
    assert!(matches!(
        service.proof_inputs(Token::Sol, &commitment).await,
        Err(Error::CommitmentNotFound(_))
    ));
}

#[tokio::test]
async fn test_absent_tree_is_not_an_error() {
    let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
    let service = ProofService::new(
        chain.clone(),
        Arc::new(MemoryStore::new()),
        chain.program_id(),
        Network::Mainnet,
    );

    let outcome = service.tree_state(Asset::Token(Token::Usdt)).await.unwrap();
    assert!(outcome.ready().is_none());

    let leaf = service.sibling_path(Token::Sol, 0).await;
    assert!(matches!(leaf, Err(Error::LeafNotFound { leaf_index: 0, .. })));
}

#[tokio::test]
#[ignore] // Requires Redis to be running
async fn test_redis_store_operations() {
    let store = RedisStore::new("redis://localhost:6379")
        .await
        .expect("Failed to connect to Redis");

    store.health_check().await.expect("Redis health check failed");

    // Unique per run so repeated runs don't collide on the leaf slot
    let nonce = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    let leaf_index = nonce % (1 << TREE_DEPTH);
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&nonce.to_be_bytes());
    let commitment = FieldElement::new(bytes);

    let record = CommitmentRecord::new(
        Token::Ore,
        leaf_index,
        &commitment,
        &nonce.to_le_bytes(),
        None,
    )
    .with_signature("test_integration_tx");

    assert_eq!(
        store.upsert(&record).await.unwrap(),
        UpsertOutcome::Inserted
    );
    assert_eq!(
        store.upsert(&record).await.unwrap(),
        UpsertOutcome::Duplicate
    );

    let found = store
        .find_by_commitment(&commitment.to_decimal())
        .await
        .unwrap()
        .expect("commitment should exist");
    assert_eq!(found.leaf_index, leaf_index);

    let values = store.commitments_at(Token::Ore, &[leaf_index]).await.unwrap();
    assert_eq!(values.get(&leaf_index), Some(&commitment.to_decimal()));

    println!("Integration test: Redis store operations successful");
}
