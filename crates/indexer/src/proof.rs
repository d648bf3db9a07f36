//! Read-side queries used to assemble withdrawal proof inputs
//!
//! The tree root and subtrees always come from the chain at request time;
//! leaf data comes from the commitment index. Nothing here hashes.

use pool_common::{CommitmentRecord, Error, Network, Result, Token, TREE_DEPTH};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::debug;

use crate::chain::ChainClient;
use crate::path::{PathBuilder, PathElement};
use crate::pda::{self, Asset};
use crate::storage::CommitmentStore;
use crate::tree_state::{decode_tree_account, TreeStateOutcome};

/// A page of indexed leaves plus the total for the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafPage {
    pub total: u64,
    pub leaves: Vec<(u64, String)>,
}

/// Everything a client needs to build an inclusion proof for one commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofInputs {
    pub root: String,
    pub next_index: u64,
    pub leaf_index: u64,
    pub commitment: String,
    pub path_elements: Vec<String>,
    pub path_indices: Vec<u8>,
}

/// Read-only view over the chain and the commitment index
pub struct ProofService {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn CommitmentStore>,
    paths: PathBuilder<dyn CommitmentStore>,
    program_id: Pubkey,
    network: Network,
}

impl ProofService {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn CommitmentStore>,
        program_id: Pubkey,
        network: Network,
    ) -> Self {
        Self {
            paths: PathBuilder::new(store.clone()),
            chain,
            store,
            program_id,
            network,
        }
    }

    /// Current tree state for `asset`, or `NotInitialized` when its tree
    /// account has not been created.
    pub async fn tree_state(&self, asset: Asset) -> Result<TreeStateOutcome> {
        let address = pda::tree_account(&self.program_id, asset, self.network)?;
        let image = self.chain.account_data(&address).await?;

        debug!(
            "Tree account {} for {}: {}",
            address,
            asset,
            image.as_ref().map_or("absent".to_string(), |d| format!("{} bytes", d.len()))
        );

        decode_tree_account(image.as_deref())
    }

    /// Sibling values and position bits for an indexed leaf.
    pub async fn sibling_path(&self, token: Token, leaf_index: u64) -> Result<Vec<PathElement>> {
        self.paths.sibling_path(token, leaf_index).await
    }

    /// Every indexed leaf for `token`, ordered by leaf index.
    pub async fn indexed_leaves(&self, token: Token) -> Result<Vec<(u64, String)>> {
        self.store.leaves_in_range(token, 0, 1u64 << TREE_DEPTH).await
    }

    pub async fn count_for_token(&self, token: Token) -> Result<u64> {
        self.store.count(token).await
    }

    /// Leaves in `[start, end)` with the token's total count. Both queries
    /// run concurrently.
    pub async fn indexed_leaves_page(&self, token: Token, start: u64, end: u64) -> Result<LeafPage> {
        let (total, leaves) = tokio::try_join!(
            self.store.count(token),
            self.store.leaves_in_range(token, start, end),
        )?;
        Ok(LeafPage { total, leaves })
    }

    pub async fn find_by_commitment(&self, commitment: &str) -> Result<Option<CommitmentRecord>> {
        self.store.find_by_commitment(commitment).await
    }

    pub async fn find_by_encrypted_output(
        &self,
        encrypted_output: &str,
    ) -> Result<Option<CommitmentRecord>> {
        let normalized = encrypted_output.trim_start_matches("0x").to_ascii_lowercase();
        self.store.find_by_encrypted_output(&normalized).await
    }

    /// Root, path and leaf position for `commitment` in `token`'s tree.
    ///
    /// The tree state and the sibling path are fetched concurrently.
    pub async fn proof_inputs(&self, token: Token, commitment: &str) -> Result<ProofInputs> {
        let record = self
            .store
            .find_by_commitment(commitment)
            .await?
            .filter(|r| r.tree_key() == token.symbol())
            .ok_or_else(|| Error::CommitmentNotFound(commitment.to_string()))?;

        let (outcome, path) = tokio::try_join!(
            self.tree_state(Asset::Token(token)),
            self.paths.sibling_path(token, record.leaf_index),
        )?;

        let state = match outcome {
            TreeStateOutcome::Ready(state) => state,
            TreeStateOutcome::NotInitialized => {
                return Err(Error::AccountAbsent(format!("{} tree", token)));
            }
        };

        Ok(ProofInputs {
            root: state.root,
            next_index: state.next_index,
            leaf_index: record.leaf_index,
            commitment: record.commitment,
            path_elements: path.iter().map(|p| p.value.clone()).collect(),
            path_indices: path.iter().map(|p| p.position_bit).collect(),
        })
    }

    /// Raw image of the global fee-config account.
    pub async fn fee_config_account(&self) -> Result<Vec<u8>> {
        let address = pda::fee_config_account(&self.program_id);
        self.chain
            .account_data(&address)
            .await?
            .ok_or_else(|| Error::AccountAbsent(format!("fee config {}", address)))
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CommitmentEvent, EventDecoder};
    use crate::mock_chain::MockChain;
    use crate::reconciler::{Reconciler, ReconcilerSettings};
    use crate::storage::MemoryStore;
    use pool_common::FieldElement;
    use std::str::FromStr;
    use std::time::Duration;

    async fn indexed(deposits: usize) -> (Arc<MockChain>, Arc<MemoryStore>, ProofService) {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let store = Arc::new(MemoryStore::new());
        for _ in 0..deposits {
            chain.emit_deposit(None).await;
        }

        let reconciler = Reconciler::new(
            chain.clone(),
            store.clone(),
            EventDecoder::new(Network::Devnet, Some(chain.program_id())),
            ReconcilerSettings {
                catchup_signature_limit: 100,
                resubscribe_delay: Duration::from_millis(10),
                max_resubscribe_attempts: None,
            },
        );
        reconciler.catch_up().await.unwrap();

        let service = ProofService::new(
            chain.clone(),
            store.clone(),
            chain.program_id(),
            Network::Devnet,
        );
        (chain, store, service)
    }

    #[tokio::test]
    async fn test_uninitialized_token_tree() {
        let (_, _, service) = indexed(1).await;

        let outcome = service.tree_state(Asset::Token(Token::Usdc)).await.unwrap();

        assert_eq!(outcome, TreeStateOutcome::NotInitialized);
    }

    #[tokio::test]
    async fn test_truncated_account_is_structural_error() {
        let (chain, _, service) = indexed(0).await;
        let address =
            pda::tree_account(&chain.program_id(), Asset::Token(Token::Sol), Network::Devnet)
                .unwrap();
        chain.set_account(address, vec![0u8; 64]).await;

        let result = service.tree_state(Asset::Token(Token::Sol)).await;

        assert!(matches!(result, Err(Error::StructuralDecode { actual: 64, .. })));
    }

    #[tokio::test]
    async fn test_proof_inputs_for_indexed_commitment() {
        let (_, store, service) = indexed(3).await;
        let leaves = store.leaves_in_range(Token::Sol, 0, 10).await.unwrap();
        let (leaf_index, commitment) = leaves[2].clone();

        let inputs = service.proof_inputs(Token::Sol, &commitment).await.unwrap();

        assert_eq!(inputs.leaf_index, leaf_index);
        assert_eq!(inputs.next_index, 3);
        assert_eq!(inputs.path_elements.len(), TREE_DEPTH);
        assert_eq!(inputs.path_indices[0], 0);
        assert_eq!(inputs.path_elements[0], "0");
        assert_eq!(inputs.path_elements[1], leaves[0].1);
    }

    #[tokio::test]
    async fn test_proof_inputs_unknown_commitment() {
        let (_, _, service) = indexed(1).await;

        let result = service.proof_inputs(Token::Sol, "12345").await;

        assert!(matches!(result, Err(Error::CommitmentNotFound(_))));
    }

    #[tokio::test]
    async fn test_unlisted_mint_commitment_is_not_in_base_tree() {
        let (chain, store, service) = indexed(1).await;
        let mut bytes = [0u8; 32];
        bytes[31] = 9;
        let commitment = FieldElement::new(bytes);
        let signature = chain
            .emit_event(&CommitmentEvent::Token {
                leaf_index: 0,
                mint: Pubkey::new_unique(),
                commitment,
                encrypted_output: vec![9],
            })
            .await;
        let batch = chain.transaction_logs(&signature).await.unwrap().unwrap();
        let decoder = EventDecoder::new(Network::Devnet, Some(chain.program_id()));
        for record in decoder.decode_logs(&batch.logs, Some(&batch.signature)) {
            store.upsert(&record).await.unwrap();
        }

        let record = service.find_by_commitment("9").await.unwrap().unwrap();
        assert_eq!(record.token, Token::Sol);
        assert!(matches!(
            service.proof_inputs(Token::Sol, "9").await,
            Err(Error::CommitmentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_leaf_page_reports_total() {
        let (_, _, service) = indexed(4).await;

        let page = service.indexed_leaves_page(Token::Sol, 1, 3).await.unwrap();

        assert_eq!(page.total, 4);
        assert_eq!(page.leaves.len(), 2);
        assert_eq!(page.leaves[0].0, 1);
        assert_eq!(service.indexed_leaves(Token::Sol).await.unwrap().len(), 4);
        assert_eq!(service.count_for_token(Token::Usdc).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookup_by_encrypted_output() {
        let (_, store, service) = indexed(1).await;
        let (_, commitment) = store.leaves_in_range(Token::Sol, 0, 1).await.unwrap()[0].clone();
        let record = service.find_by_commitment(&commitment).await.unwrap().unwrap();

        let by_output = service
            .find_by_encrypted_output(&format!("0x{}", record.encrypted_output.to_uppercase()))
            .await
            .unwrap();

        assert_eq!(by_output, Some(record));
    }

    #[tokio::test]
    async fn test_missing_fee_config() {
        let (_, _, service) = indexed(0).await;
        assert!(matches!(
            service.fee_config_account().await,
            Err(Error::AccountAbsent(_))
        ));
    }

    #[tokio::test]
    async fn test_token_tree_by_mint() {
        let chain = Arc::new(MockChain::new(Pubkey::new_unique()));
        let store = Arc::new(MemoryStore::new());
        let mint = Pubkey::from_str("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU").unwrap();
        chain.emit_deposit(Some(mint)).await;

        let service = ProofService::new(chain.clone(), store, chain.program_id(), Network::Devnet);
        let by_token = service.tree_state(Asset::Token(Token::Usdc)).await.unwrap();
        let by_mint = service.tree_state(Asset::Mint(mint)).await.unwrap();

        assert_eq!(by_token, by_mint);
        assert_eq!(by_token.ready().unwrap().next_index, 1);
    }
}
