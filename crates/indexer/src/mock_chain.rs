//! Mock Solana cluster for development and testing
//!
//! Emits commitment events the way the program logs them and keeps a matching
//! tree-state account per asset, without any network connection. Roots are
//! deterministic placeholders, not real Merkle hashes.

use anyhow::{bail, Result};
use async_trait::async_trait;
use pool_common::{FieldElement, ROOT_HISTORY_SIZE};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::chain::{ChainClient, LogBatch, LogSubscription};
use crate::events::{encode_event_line, CommitmentEvent};
use crate::pda;
use crate::tree_state::encode_tree_account;

const SUBSCRIPTION_BUFFER: usize = 1_024;

#[derive(Default)]
struct MockTree {
    next_index: u64,
    root_index: u64,
    root_history: Vec<FieldElement>,
}

#[derive(Default)]
struct MockState {
    /// Oldest first
    transactions: Vec<LogBatch>,
    accounts: HashMap<Pubkey, Vec<u8>>,
    trees: HashMap<Pubkey, MockTree>,
    subscribers: Vec<mpsc::Sender<LogBatch>>,
    failing_subscriptions: u32,
    subscribe_attempts: u32,
    sequence: u64,
}

/// Mock chain client
pub struct MockChain {
    program_id: Pubkey,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    /// Record a transaction and push it to live subscribers.
    pub async fn push_transaction(&self, logs: Vec<String>) -> String {
        let mut state = self.state.lock().await;
        state.sequence += 1;
        let batch = LogBatch {
            signature: format!("mock_tx_{:08x}", state.sequence),
            logs,
            failed: false,
        };

        state
            .subscribers
            .retain(|subscriber| subscriber.try_send(batch.clone()).is_ok());
        state.transactions.push(batch.clone());

        debug!("Mock chain: pushed {}", batch.signature);
        batch.signature
    }

    /// Wrap an event in the program's invoke/success frame and push it.
    pub async fn emit_event(&self, event: &CommitmentEvent) -> String {
        let logs = vec![
            format!("Program {} invoke [1]", self.program_id),
            "Program log: Instruction: Transact".to_string(),
            encode_event_line(event),
            format!("Program {} success", self.program_id),
        ];
        self.push_transaction(logs).await
    }

    /// Append a deposit to the tree for `mint` (base asset when `None`),
    /// advancing the tree-state account to match.
    pub async fn emit_deposit(&self, mint: Option<Pubkey>) -> (String, CommitmentEvent) {
        let tree_address = pda::tree_account_for_mint(&self.program_id, mint.as_ref());

        let event = {
            let mut state = self.state.lock().await;
            let sequence = state.sequence + 1;
            let tree = state.trees.entry(tree_address).or_default();
            let leaf_index = tree.next_index;

            tree.next_index += 1;
            tree.root_index += 1;
            let root = placeholder_hash(0xee, tree.root_index);
            let slot = (tree.root_index % ROOT_HISTORY_SIZE as u64) as usize;
            if tree.root_history.len() < ROOT_HISTORY_SIZE {
                tree.root_history.resize(ROOT_HISTORY_SIZE, FieldElement::ZERO);
            }
            tree.root_history[slot] = root;

            let image =
                encode_tree_account(tree.next_index, &[], &tree.root_history, tree.root_index);
            state.accounts.insert(tree_address, image);

            let commitment = placeholder_hash(0xc0, sequence);
            let encrypted_output = sequence.to_le_bytes().to_vec();

            match mint {
                Some(mint) => CommitmentEvent::Token {
                    leaf_index,
                    mint,
                    commitment,
                    encrypted_output,
                },
                None => CommitmentEvent::Base {
                    leaf_index,
                    commitment,
                    encrypted_output,
                },
            }
        };

        let signature = self.emit_event(&event).await;
        (signature, event)
    }

    /// Simulate a new block for the dev loop.
    pub async fn advance_chain(&self) {
        self.emit_deposit(None).await;
    }

    pub async fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        self.state.lock().await.accounts.insert(address, data);
    }

    /// Refuse the next `n` subscription attempts.
    pub async fn fail_next_subscriptions(&self, n: u32) {
        self.state.lock().await.failing_subscriptions = n;
    }

    /// Close every open subscription, as a dropped websocket would.
    pub async fn drop_subscriptions(&self) {
        self.state.lock().await.subscribers.clear();
    }

    pub async fn subscribe_attempts(&self) -> u32 {
        self.state.lock().await.subscribe_attempts
    }
}

/// Canonical, distinct placeholder value: `tag` in byte 1, `n` in the tail.
fn placeholder_hash(tag: u8, n: u64) -> FieldElement {
    let mut bytes = [0u8; 32];
    bytes[1] = tag;
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    FieldElement::new(bytes)
}

#[async_trait]
impl ChainClient for MockChain {
    async fn recent_signatures(&self, limit: usize) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .take(limit)
            .map(|tx| tx.signature.clone())
            .collect())
    }

    async fn transaction_logs(&self, signature: &str) -> Result<Option<LogBatch>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .find(|tx| tx.signature == signature)
            .cloned())
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().await.accounts.get(address).cloned())
    }

    async fn subscribe_logs(&self) -> Result<LogSubscription> {
        let mut state = self.state.lock().await;
        state.subscribe_attempts += 1;

        if state.failing_subscriptions > 0 {
            state.failing_subscriptions -= 1;
            bail!("mock subscription refused");
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        state.subscribers.push(tx);
        Ok(rx)
    }
}
