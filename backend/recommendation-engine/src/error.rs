use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal: the embedding model or its tokenizer failed to load.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Per-call encoding failure, distinct from a failed model load.
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An event record without an `id` cannot be keyed or cached.
    #[error("Event is missing the required 'id' field")]
    MissingEventId,

    /// Fatal: the cluster catalog failed to parse. Loads are all-or-nothing.
    #[error("Cluster catalog error: {0}")]
    Catalog(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl From<vector_cache::CacheError> for EngineError {
    fn from(err: vector_cache::CacheError) -> Self {
        EngineError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidData(err.to_string())
    }
}
