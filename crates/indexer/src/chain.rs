//! Solana RPC access for the indexer
//!
//! [`ChainClient`] is the seam between the reconciler / read side and the
//! chain. [`SolanaChainClient`] talks to a real cluster over JSON-RPC and the
//! pubsub websocket; `MockChain` stands in for it in mock mode and tests.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{
    RpcTransactionConfig, RpcTransactionLogsConfig, RpcTransactionLogsFilter,
};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::UiTransactionEncoding;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Max signatures the RPC returns per page.
const SIGNATURE_PAGE_LIMIT: usize = 1_000;

/// Buffered batches between the websocket task and the consumer.
const SUBSCRIPTION_BUFFER: usize = 1_024;

/// Log lines of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub signature: String,
    pub logs: Vec<String>,

    /// The transaction failed; its events never took effect.
    pub failed: bool,
}

/// Live log feed. The sender side closes when the subscription drops.
pub type LogSubscription = mpsc::Receiver<LogBatch>;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Up to `limit` of the program's transaction signatures, newest first.
    async fn recent_signatures(&self, limit: usize) -> Result<Vec<String>>;

    /// Log lines of a confirmed transaction, or `None` if the node has none.
    async fn transaction_logs(&self, signature: &str) -> Result<Option<LogBatch>>;

    /// Raw account data, or `None` if the account does not exist.
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;

    /// Open a push subscription to the program's logs.
    async fn subscribe_logs(&self) -> Result<LogSubscription>;
}

/// Chain client backed by a Solana RPC node
pub struct SolanaChainClient {
    rpc: RpcClient,
    ws_url: String,
    program_id: Pubkey,
    commitment: CommitmentConfig,
}

impl SolanaChainClient {
    pub fn new(rpc_url: &str, ws_url: &str, program_id: Pubkey) -> Self {
        let commitment = CommitmentConfig::confirmed();
        info!("Using Solana RPC at {} (ws {})", rpc_url, ws_url);

        Self {
            rpc: RpcClient::new_with_commitment(rpc_url.to_string(), commitment),
            ws_url: ws_url.to_string(),
            program_id,
            commitment,
        }
    }
}

#[async_trait]
impl ChainClient for SolanaChainClient {
    async fn recent_signatures(&self, limit: usize) -> Result<Vec<String>> {
        let mut signatures = Vec::new();
        let mut before: Option<Signature> = None;

        while signatures.len() < limit {
            let cfg = GetConfirmedSignaturesForAddress2Config {
                limit: Some((limit - signatures.len()).min(SIGNATURE_PAGE_LIMIT)),
                before,
                until: None,
                commitment: Some(self.commitment),
            };

            let page = self
                .rpc
                .get_signatures_for_address_with_config(&self.program_id, cfg)
                .await
                .context("Failed to list program signatures")?;

            if page.is_empty() {
                break;
            }

            debug!("Fetched signature page of {}", page.len());

            before = page
                .last()
                .and_then(|info| Signature::from_str(&info.signature).ok());
            signatures.extend(page.into_iter().map(|info| info.signature));

            if before.is_none() {
                break;
            }
        }

        Ok(signatures)
    }

    async fn transaction_logs(&self, signature: &str) -> Result<Option<LogBatch>> {
        let sig = Signature::from_str(signature).context("Invalid transaction signature")?;
        let cfg = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            max_supported_transaction_version: Some(0),
            commitment: Some(self.commitment),
        };

        let tx = self
            .rpc
            .get_transaction_with_config(&sig, cfg)
            .await
            .with_context(|| format!("Failed to fetch transaction {}", signature))?;

        let Some(meta) = tx.transaction.meta else {
            return Ok(None);
        };

        let logs = match meta.log_messages {
            OptionSerializer::Some(logs) => logs,
            _ => return Ok(None),
        };

        Ok(Some(LogBatch {
            signature: signature.to_string(),
            logs,
            failed: meta.err.is_some(),
        }))
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await
            .with_context(|| format!("Failed to fetch account {}", address))?;

        Ok(response.value.map(|account| account.data))
    }

    async fn subscribe_logs(&self) -> Result<LogSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let ws_url = self.ws_url.clone();
        let program_id = self.program_id;
        let commitment = self.commitment;

        tokio::spawn(async move {
            let client = match PubsubClient::new(&ws_url).await {
                Ok(client) => client,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow!("pubsub connect failed: {e}")));
                    return;
                }
            };

            let subscription = client
                .logs_subscribe(
                    RpcTransactionLogsFilter::Mentions(vec![program_id.to_string()]),
                    RpcTransactionLogsConfig {
                        commitment: Some(commitment),
                    },
                )
                .await;

            let (mut stream, unsubscribe) = match subscription {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow!("logs_subscribe failed: {e}")));
                    return;
                }
            };

            let _ = ready_tx.send(Ok(()));

            while let Some(response) = stream.next().await {
                let batch = LogBatch {
                    signature: response.value.signature,
                    logs: response.value.logs,
                    failed: response.value.err.is_some(),
                };
                if tx.send(batch).await.is_err() {
                    debug!("Log subscription consumer gone, closing");
                    break;
                }
            }

            drop(stream);
            unsubscribe().await;
            warn!("Log subscription stream ended");
        });

        ready_rx
            .await
            .map_err(|_| anyhow!("subscription task exited before reporting status"))??;

        info!("Subscribed to logs of program {}", self.program_id);

        Ok(rx)
    }
}
