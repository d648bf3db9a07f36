//! Commitment Indexer
//!
//! Follows the shielded pool program on Solana and keeps an off-chain index of
//! every commitment it appends to its Merkle trees.
//!
//! ## Architecture
//!
//! **Components:**
//! - `events`: Decodes commitment events out of program log lines
//! - `reconciler`: Catch-up scan plus live log subscription, the only writer
//! - `storage`: Commitment index (Redis, or in-memory for tests and mock mode)
//! - `tree_state`: Decodes the on-chain tree account (root, next index, subtrees)
//! - `path`: Sibling path construction from indexed leaves
//! - `proof`: Read-side queries combining chain state with the index
//! - `chain`: Solana RPC and websocket access
//! - `mock_chain`: Mock cluster for development/testing
//! - `pda`: Program-derived account addresses
//! - `config`: Configuration management
//!
//! **Data Flow:**
//! 1. A deposit or transfer appends a leaf on chain and logs a commitment event
//! 2. The reconciler sees the transaction via catch-up or the live feed
//! 3. The decoder extracts the leaf index, commitment and ciphertext
//! 4. The store inserts it once, keyed by commitment and by (token, leaf)
//! 5. Clients read the live root from chain and sibling values from the index

pub mod chain;
pub mod config;
pub mod events;
pub mod mock_chain;
pub mod path;
pub mod pda;
pub mod proof;
pub mod reconciler;
pub mod storage;
pub mod tree_state;

pub use chain::{ChainClient, SolanaChainClient};
pub use config::Config;
pub use events::{CommitmentEvent, EventDecoder};
pub use proof::ProofService;
pub use reconciler::{ControllerState, Reconciler};
pub use storage::{CommitmentStore, MemoryStore, RedisStore};
