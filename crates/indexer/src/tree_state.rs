//! Tree-state account decoding
//!
//! Reads the program's Merkle tree account image at fixed offsets:
//!
//! ```text
//! [disc 8][authority 32][next_index u64 LE][subtrees 26 x 32][root 32]
//! [root_history 100 x 32][root_index u64 LE]
//! ```
//!
//! The root handed to clients is the ring-buffer entry at
//! `root_index % ROOT_HISTORY_SIZE`, the slot the verifier checks proofs
//! against. The standalone `root` field is not used.

use pool_common::{Error, FieldElement, Result, ROOT_HISTORY_SIZE, TREE_DEPTH};
use serde::Serialize;

const DISCRIMINATOR_OFFSET: usize = 0;
const AUTHORITY_OFFSET: usize = DISCRIMINATOR_OFFSET + 8;
const NEXT_INDEX_OFFSET: usize = AUTHORITY_OFFSET + 32;
const SUBTREES_OFFSET: usize = NEXT_INDEX_OFFSET + 8;
const CURRENT_ROOT_OFFSET: usize = SUBTREES_OFFSET + TREE_DEPTH * 32;
const ROOT_HISTORY_OFFSET: usize = CURRENT_ROOT_OFFSET + 32;
const ROOT_INDEX_OFFSET: usize = ROOT_HISTORY_OFFSET + ROOT_HISTORY_SIZE * 32;

/// Smallest account image that holds every field.
pub const TREE_ACCOUNT_MIN_LEN: usize = ROOT_INDEX_OFFSET + 8;

/// Snapshot of the on-chain tree, decoded fresh on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleTreeState {
    /// Root currently accepted by the verifier (decimal).
    pub root: String,

    /// Number of leaves committed so far.
    pub next_index: u64,

    /// One hash per level, leaf level first (decimal).
    pub subtrees: Vec<String>,
}

/// Result of reading a tree-state account that may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeStateOutcome {
    Ready(MerkleTreeState),
    NotInitialized,
}

impl TreeStateOutcome {
    pub fn ready(self) -> Option<MerkleTreeState> {
        match self {
            TreeStateOutcome::Ready(state) => Some(state),
            TreeStateOutcome::NotInitialized => None,
        }
    }
}

/// Decode an account image, or report the account as not initialized when
/// the chain has no account at that address.
pub fn decode_tree_account(image: Option<&[u8]>) -> Result<TreeStateOutcome> {
    match image {
        None => Ok(TreeStateOutcome::NotInitialized),
        Some(data) => decode_tree_state(data).map(TreeStateOutcome::Ready),
    }
}

/// Decode an existing account image.
pub fn decode_tree_state(data: &[u8]) -> Result<MerkleTreeState> {
    if data.len() < TREE_ACCOUNT_MIN_LEN {
        return Err(Error::StructuralDecode {
            expected: TREE_ACCOUNT_MIN_LEN,
            actual: data.len(),
        });
    }

    let next_index = read_u64(data, NEXT_INDEX_OFFSET);
    let root_index = read_u64(data, ROOT_INDEX_OFFSET);

    let subtrees = (0..TREE_DEPTH)
        .map(|level| read_hash(data, SUBTREES_OFFSET + level * 32).to_decimal())
        .collect();

    let slot = (root_index % ROOT_HISTORY_SIZE as u64) as usize;
    let root = read_hash(data, ROOT_HISTORY_OFFSET + slot * 32).to_decimal();

    Ok(MerkleTreeState {
        root,
        next_index,
        subtrees,
    })
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_hash(data: &[u8], offset: usize) -> FieldElement {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&data[offset..offset + 32]);
    FieldElement::new(bytes)
}

/// Build a synthetic account image. Used by the mock chain and tests.
pub fn encode_tree_account(
    next_index: u64,
    subtrees: &[FieldElement],
    root_history: &[FieldElement],
    root_index: u64,
) -> Vec<u8> {
    let mut data = vec![0u8; TREE_ACCOUNT_MIN_LEN];
    data[NEXT_INDEX_OFFSET..NEXT_INDEX_OFFSET + 8].copy_from_slice(&next_index.to_le_bytes());

    for (level, hash) in subtrees.iter().take(TREE_DEPTH).enumerate() {
        let at = SUBTREES_OFFSET + level * 32;
        data[at..at + 32].copy_from_slice(hash.as_bytes());
    }

    for (slot, hash) in root_history.iter().take(ROOT_HISTORY_SIZE).enumerate() {
        let at = ROOT_HISTORY_OFFSET + slot * 32;
        data[at..at + 32].copy_from_slice(hash.as_bytes());
    }

    let slot = (root_index % ROOT_HISTORY_SIZE as u64) as usize;
    if let Some(current) = root_history.get(slot) {
        data[CURRENT_ROOT_OFFSET..CURRENT_ROOT_OFFSET + 32].copy_from_slice(current.as_bytes());
    }

    data[ROOT_INDEX_OFFSET..ROOT_INDEX_OFFSET + 8].copy_from_slice(&root_index.to_le_bytes());
    data
}
