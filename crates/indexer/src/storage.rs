//! Commitment index storage
//!
//! Redis data model:
//! - commitment:{decimal}          → JSON-encoded CommitmentRecord (global uniqueness)
//! - leaves:{tree}                 → Hash leaf_index → commitment (HSETNX: per-tree uniqueness)
//! - leaves:{tree}:by_index        → Sorted set (score=leaf_index, member=commitment)
//! - encrypted_output:{hex}        → commitment
//!
//! `{tree}` is [`CommitmentRecord::tree_key`]: the token symbol, or the mint
//! for mints outside the token table. Reads by [`Token`] use the symbol.
//!
//! Writes go through [`CommitmentStore::upsert`], which ignores duplicates, so
//! replayed or concurrently delivered events have no effect. The commitment
//! key is written last: a write interrupted before it leaves only idempotent
//! index entries behind, and a replay completes it.

use async_trait::async_trait;
use pool_common::{CommitmentRecord, Error, Result, Token};
use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,

    /// The commitment was already indexed; nothing changed.
    Duplicate,

    /// The commitment is new but its leaf slot in the same tree already holds
    /// another value. The record is rejected.
    LeafConflict,
}

/// Point/range reads and idempotent writes over the commitment index.
#[async_trait]
pub trait CommitmentStore: Send + Sync {
    /// Insert `record` unless its commitment is already indexed.
    async fn upsert(&self, record: &CommitmentRecord) -> Result<UpsertOutcome>;

    /// Batched lookup of commitments at `leaf_indices` in `token`'s tree.
    /// Missing leaves are absent from the returned map.
    async fn commitments_at(
        &self,
        token: Token,
        leaf_indices: &[u64],
    ) -> Result<HashMap<u64, String>>;

    async fn find_by_commitment(&self, commitment: &str) -> Result<Option<CommitmentRecord>>;

    async fn find_by_encrypted_output(
        &self,
        encrypted_output: &str,
    ) -> Result<Option<CommitmentRecord>>;

    /// Indexed leaves with `start <= leaf_index < end`, ordered by leaf index.
    async fn leaves_in_range(
        &self,
        token: Token,
        start: u64,
        end: u64,
    ) -> Result<Vec<(u64, String)>>;

    /// Number of indexed leaves in `token`'s tree.
    async fn count(&self, token: Token) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;
}

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::StorePersistence(e.to_string())
}

fn commitment_key(commitment: &str) -> String {
    format!("commitment:{}", commitment)
}

fn leaves_key(tree: &str) -> String {
    format!("leaves:{}", tree)
}

fn leaves_by_index_key(tree: &str) -> String {
    format!("leaves:{}:by_index", tree)
}

fn encrypted_output_key(encrypted_output: &str) -> String {
    format!("encrypted_output:{}", encrypted_output)
}

/// Redis-backed commitment index
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        info!("Connecting to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Successfully connected to Redis");

        Ok(Self { conn })
    }

    async fn load(&self, commitment: &str) -> Result<Option<CommitmentRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(commitment_key(commitment)).await.map_err(store_err)?;

        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CommitmentStore for RedisStore {
    async fn upsert(&self, record: &CommitmentRecord) -> Result<UpsertOutcome> {
        let mut conn = self.conn.clone();
        let key = commitment_key(&record.commitment);
        let tree = record.tree_key();

        let exists: bool = conn.exists(&key).await.map_err(store_err)?;
        if exists {
            debug!("Commitment {} already indexed, skipping", record.commitment);
            return Ok(UpsertOutcome::Duplicate);
        }

        // Claim the leaf slot. A slot already holding this commitment is a
        // write interrupted before the commitment key landed; finish it.
        let claimed: bool = conn
            .hset_nx(leaves_key(&tree), record.leaf_index, &record.commitment)
            .await
            .map_err(store_err)?;
        if !claimed {
            let holder: Option<String> = conn
                .hget(leaves_key(&tree), record.leaf_index)
                .await
                .map_err(store_err)?;
            if holder.as_deref() != Some(record.commitment.as_str()) {
                warn!(
                    "Leaf {} in {} already holds a different commitment, rejecting {}",
                    record.leaf_index, tree, record.commitment
                );
                return Ok(UpsertOutcome::LeafConflict);
            }
            debug!(
                "Completing partial write of {} at leaf {} in {}",
                record.commitment, record.leaf_index, tree
            );
        }

        let _: () = conn
            .zadd(
                leaves_by_index_key(&tree),
                &record.commitment,
                record.leaf_index,
            )
            .await
            .map_err(store_err)?;
        let _: () = conn
            .set_nx(
                encrypted_output_key(&record.encrypted_output),
                &record.commitment,
            )
            .await
            .map_err(store_err)?;

        let json = serde_json::to_string(record)?;
        let created: bool = conn.set_nx(&key, json).await.map_err(store_err)?;
        if !created {
            debug!("Commitment {} indexed concurrently, skipping", record.commitment);
            return Ok(UpsertOutcome::Duplicate);
        }

        info!(
            "Indexed commitment: tree={}, leaf_index={}, commitment={}",
            tree, record.leaf_index, record.commitment
        );

        Ok(UpsertOutcome::Inserted)
    }

    async fn commitments_at(
        &self,
        token: Token,
        leaf_indices: &[u64],
    ) -> Result<HashMap<u64, String>> {
        if leaf_indices.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(leaves_key(token.symbol()))
            .arg(leaf_indices)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(leaf_indices
            .iter()
            .zip(values)
            .filter_map(|(index, value)| value.map(|v| (*index, v)))
            .collect())
    }

    async fn find_by_commitment(&self, commitment: &str) -> Result<Option<CommitmentRecord>> {
        self.load(commitment).await
    }

    async fn find_by_encrypted_output(
        &self,
        encrypted_output: &str,
    ) -> Result<Option<CommitmentRecord>> {
        let mut conn = self.conn.clone();
        let commitment: Option<String> = conn
            .get(encrypted_output_key(encrypted_output))
            .await
            .map_err(store_err)?;

        match commitment {
            Some(c) => self.load(&c).await,
            None => Ok(None),
        }
    }

    async fn leaves_in_range(
        &self,
        token: Token,
        start: u64,
        end: u64,
    ) -> Result<Vec<(u64, String)>> {
        if end <= start {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let rows: Vec<(String, u64)> = conn
            .zrangebyscore_withscores(leaves_by_index_key(token.symbol()), start, end - 1)
            .await
            .map_err(store_err)?;

        Ok(rows.into_iter().map(|(c, index)| (index, c)).collect())
    }

    async fn count(&self, token: Token) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.zcard(leaves_by_index_key(token.symbol()))
            .await
            .map_err(store_err)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::StorePersistence(format!("Redis health check failed: {e}")))?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryIndex {
    by_commitment: HashMap<String, CommitmentRecord>,

    /// Keyed by [`CommitmentRecord::tree_key`]
    by_leaf: HashMap<String, BTreeMap<u64, String>>,
    by_encrypted_output: HashMap<String, String>,
}

impl MemoryIndex {
    fn tree(&self, token: Token) -> Option<&BTreeMap<u64, String>> {
        self.by_leaf.get(token.symbol())
    }
}

/// In-process commitment index with the same uniqueness rules as
/// [`RedisStore`]. Used in mock mode and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_commitment.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CommitmentStore for MemoryStore {
    async fn upsert(&self, record: &CommitmentRecord) -> Result<UpsertOutcome> {
        let mut index = self.inner.write().await;

        if index.by_commitment.contains_key(&record.commitment) {
            return Ok(UpsertOutcome::Duplicate);
        }

        let leaves = index.by_leaf.entry(record.tree_key()).or_default();
        if leaves.contains_key(&record.leaf_index) {
            return Ok(UpsertOutcome::LeafConflict);
        }
        leaves.insert(record.leaf_index, record.commitment.clone());

        index
            .by_encrypted_output
            .entry(record.encrypted_output.clone())
            .or_insert_with(|| record.commitment.clone());
        index
            .by_commitment
            .insert(record.commitment.clone(), record.clone());

        Ok(UpsertOutcome::Inserted)
    }

    async fn commitments_at(
        &self,
        token: Token,
        leaf_indices: &[u64],
    ) -> Result<HashMap<u64, String>> {
        let index = self.inner.read().await;
        let Some(leaves) = index.tree(token) else {
            return Ok(HashMap::new());
        };

        Ok(leaf_indices
            .iter()
            .filter_map(|i| leaves.get(i).map(|c| (*i, c.clone())))
            .collect())
    }

    async fn find_by_commitment(&self, commitment: &str) -> Result<Option<CommitmentRecord>> {
        Ok(self.inner.read().await.by_commitment.get(commitment).cloned())
    }

    async fn find_by_encrypted_output(
        &self,
        encrypted_output: &str,
    ) -> Result<Option<CommitmentRecord>> {
        let index = self.inner.read().await;
        Ok(index
            .by_encrypted_output
            .get(encrypted_output)
            .and_then(|c| index.by_commitment.get(c))
            .cloned())
    }

    async fn leaves_in_range(
        &self,
        token: Token,
        start: u64,
        end: u64,
    ) -> Result<Vec<(u64, String)>> {
        if end <= start {
            return Ok(Vec::new());
        }

        let index = self.inner.read().await;
        Ok(index
            .tree(token)
            .map(|leaves| {
                leaves
                    .range(start..end)
                    .map(|(i, c)| (*i, c.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, token: Token) -> Result<u64> {
        let index = self.inner.read().await;
        Ok(index.tree(token).map_or(0, |l| l.len() as u64))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
