use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed event record: {0}")]
    MalformedEventRecord(String),

    #[error("Unrecognized event discriminator: {0}")]
    UnrecognizedDiscriminator(String),

    #[error("Account not found: {0}")]
    AccountAbsent(String),

    #[error("Account image too small: expected at least {expected} bytes, got {actual}")]
    StructuralDecode { expected: usize, actual: usize },

    #[error("Leaf {leaf_index} not found for {token} (not yet indexed or invalid index)")]
    LeafNotFound { token: String, leaf_index: u64 },

    #[error("Commitment {0} is not indexed")]
    CommitmentNotFound(String),

    #[error("Log subscription lost: {0}")]
    SubscriptionLost(String),

    #[error("Store error: {0}")]
    StorePersistence(String),

    #[error("Invalid field element: {0}")]
    InvalidFieldElement(String),

    #[error("Unknown token: {0}")]
    UnknownToken(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
