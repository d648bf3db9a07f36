pub mod commitment;
pub mod error;
pub mod field;
pub mod token;

pub use commitment::CommitmentRecord;
pub use error::{Error, Result};
pub use field::FieldElement;
pub use token::{Network, Token};

/// Depth of the on-chain commitment tree.
pub const TREE_DEPTH: usize = 26;

/// Number of historical roots the program keeps in its ring buffer.
pub const ROOT_HISTORY_SIZE: usize = 100;
