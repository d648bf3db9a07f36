//! Sibling path construction
//!
//! The server never hashes. For a leaf it reports the leaf-level value at each
//! level's sibling position (`index ^ 1`, halving the index per level) and the
//! position bit; unindexed siblings come back as `"0"`. The client combines
//! these with the verifier's own zero-subtree convention to rebuild internal
//! nodes, so `"0"` is only meaningful as a leaf value.

use pool_common::{Error, Result, Token, TREE_DEPTH};
use serde::Serialize;
use std::sync::Arc;

use crate::storage::CommitmentStore;

/// Value reported for a sibling position with no indexed commitment.
pub const ZERO_LEAF: &str = "0";

/// Position of one sibling in the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingPosition {
    pub sibling_index: u64,

    /// `1` when the node on the path is a right child.
    pub position_bit: u8,
}

/// One resolved path entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathElement {
    pub sibling_index: u64,
    pub value: String,
    pub position_bit: u8,
}

/// Sibling positions for `leaf_index`, leaf level first.
pub fn sibling_positions(leaf_index: u64, depth: usize) -> Vec<SiblingPosition> {
    let mut index = leaf_index;
    let mut positions = Vec::with_capacity(depth);

    for _ in 0..depth {
        positions.push(SiblingPosition {
            sibling_index: index ^ 1,
            position_bit: (index % 2) as u8,
        });
        index /= 2;
    }

    positions
}

/// Resolves sibling paths against the commitment index
pub struct PathBuilder<S: ?Sized> {
    depth: usize,
    store: Arc<S>,
}

impl<S: CommitmentStore + ?Sized> PathBuilder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_depth(store, TREE_DEPTH)
    }

    pub fn with_depth(store: Arc<S>, depth: usize) -> Self {
        Self { depth, store }
    }

    /// Build the path for an indexed leaf.
    ///
    /// Fails with `LeafNotFound` if `leaf_index` itself has no commitment, so
    /// a missing leaf is never mistaken for a zeroed path.
    pub async fn sibling_path(&self, token: Token, leaf_index: u64) -> Result<Vec<PathElement>> {
        let (path, leaf_present) = self.resolve(token, leaf_index).await?;
        if !leaf_present {
            return Err(Error::LeafNotFound {
                token: token.to_string(),
                leaf_index,
            });
        }
        Ok(path)
    }

    /// Build the path without checking that the leaf itself is indexed.
    /// Callers must have confirmed the leaf exists.
    pub async fn resolve_path(&self, token: Token, leaf_index: u64) -> Result<Vec<PathElement>> {
        self.resolve(token, leaf_index).await.map(|(path, _)| path)
    }

    /// One batched store lookup covering the leaf and all its siblings.
    async fn resolve(&self, token: Token, leaf_index: u64) -> Result<(Vec<PathElement>, bool)> {
        let positions = sibling_positions(leaf_index, self.depth);

        let mut lookup: Vec<u64> = Vec::with_capacity(positions.len() + 1);
        lookup.push(leaf_index);
        lookup.extend(positions.iter().map(|p| p.sibling_index));
        lookup.sort_unstable();
        lookup.dedup();

        let found = self.store.commitments_at(token, &lookup).await?;

        let path = positions
            .into_iter()
            .map(|p| PathElement {
                sibling_index: p.sibling_index,
                value: found
                    .get(&p.sibling_index)
                    .cloned()
                    .unwrap_or_else(|| ZERO_LEAF.to_string()),
                position_bit: p.position_bit,
            })
            .collect();

        Ok((path, found.contains_key(&leaf_index)))
    }
}
