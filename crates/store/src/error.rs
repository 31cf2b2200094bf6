use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Provider error: {0}")]
    Provider(#[from] sonance_embeddings::ProviderError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown metric '{0}' (expected 'cosine' or 'l2')")]
    UnknownMetric(String),

    #[error("Vector length mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Embedding has no segments")]
    EmptyEmbedding,

    #[error("Corrupt index file {path}: {reason}")]
    CorruptIndex { path: String, reason: String },

    #[error("Corrupt embedding blob for item {item_id}: {reason}")]
    CorruptBlob { item_id: i64, reason: String },

    #[error("Scheme mismatch at {dir}: directory holds {found}, requested {requested}")]
    SchemeMismatch {
        dir: String,
        found: String,
        requested: String,
    },
}
