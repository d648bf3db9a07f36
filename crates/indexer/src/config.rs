//! Configuration management for the commitment indexer
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use pool_common::Network;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,

    /// Solana JSON-RPC endpoint
    pub rpc_url: String,

    /// Solana pubsub websocket endpoint
    pub ws_url: String,

    /// Privacy pool program (required unless in mock mode)
    pub program_id: Option<Pubkey>,

    /// Cluster, selects the mint → token table
    pub network: Network,

    /// Max signatures scanned during startup catch-up
    pub catchup_signature_limit: usize,

    /// Delay before re-opening a failed log subscription, in seconds
    pub resubscribe_delay_secs: u64,

    /// Give up after this many consecutive subscription failures; unbounded if unset
    pub max_resubscribe_attempts: Option<u32>,

    /// Whether to use the in-process mock chain and memory store
    pub mock_mode: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenv::dotenv().ok();

        let rpc_url = env::var("SOLANA_RPC_URL")
            .unwrap_or_else(|_| "https://api.devnet.solana.com".to_string());

        let config = Config {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            ws_url: env::var("SOLANA_WS_URL").unwrap_or_else(|_| ws_url_from_rpc(&rpc_url)),

            rpc_url,

            program_id: env::var("PROGRAM_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| Pubkey::from_str(s.trim()))
                .transpose()
                .context("Invalid PROGRAM_ID")?,

            network: env::var("NETWORK")
                .unwrap_or_else(|_| "devnet".to_string())
                .parse()
                .context("Invalid NETWORK (expected devnet/mainnet)")?,

            catchup_signature_limit: env::var("CATCHUP_SIGNATURE_LIMIT")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid CATCHUP_SIGNATURE_LIMIT")?,

            resubscribe_delay_secs: env::var("RESUBSCRIBE_DELAY_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid RESUBSCRIBE_DELAY_SECS")?,

            max_resubscribe_attempts: env::var("MAX_RESUBSCRIBE_ATTEMPTS")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse())
                .transpose()
                .context("Invalid MAX_RESUBSCRIBE_ATTEMPTS")?,

            mock_mode: env::var("MOCK_MODE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("Invalid MOCK_MODE (expected true/false)")?,
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.catchup_signature_limit == 0 {
            anyhow::bail!("CATCHUP_SIGNATURE_LIMIT must be greater than 0");
        }

        if self.resubscribe_delay_secs == 0 {
            anyhow::bail!("RESUBSCRIBE_DELAY_SECS must be greater than 0");
        }

        if !self.mock_mode && self.program_id.is_none() {
            anyhow::bail!("PROGRAM_ID is required when MOCK_MODE=false");
        }

        Ok(())
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_secs(self.resubscribe_delay_secs)
    }
}

/// `https://host` → `wss://host`, `http://host` → `ws://host`
fn ws_url_from_rpc(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        rpc_url.to_string()
    }
}
