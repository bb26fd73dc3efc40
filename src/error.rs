use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("storage failure: {0}")]
    Storage(anyhow::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures at the RPC boundary. `RangeTooLarge` is retryable by shrinking
/// the requested span; everything else is transient and retried on the next
/// scheduled cycle.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("log query span rejected by provider: {0}")]
    RangeTooLarge(String),
    #[error("transient rpc failure: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A single transfer log that could not be decoded. Isolated per log: the
/// offending hash lands in the batch report and the batch keeps going.
#[derive(Debug, Error)]
#[error("malformed transfer log: {0}")]
pub struct LogDecodeError(pub String);
