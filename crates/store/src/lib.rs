//! # Sonance Store
//!
//! Durable embedding storage and nearest-neighbor indexing for audio
//! similarity.
//!
//! ## Architecture
//!
//! ```text
//! audio path
//!     │
//!     ├──> Embedding Provider
//!     │      └─> (segments, V) f32 tensor
//!     │
//!     ├──> Ledger (SQLite)
//!     │      └─> item_id -> embedding blob
//!     │
//!     └──> Scheme
//!            ├─> average index ── slot mapping table
//!            └─> segment index ── slot mapping table
//! ```
//!
//! A [`Store`] opens one directory and fixes one (provider, metric) scheme
//! identity. Ingestion is idempotent; all state persists on disk between
//! sessions. The model is single-threaded and synchronous, and the handle
//! is deliberately not `Send`.
//!
//! ## Example
//!
//! ```no_run
//! use sonance_store::{Store, StoreConfig};
//!
//! fn main() -> sonance_store::Result<()> {
//!     let mut store = Store::open("/var/lib/sonance", StoreConfig::default())?;
//!     store.add_embedding(42, std::path::Path::new("track.wav"), false)?;
//!     let hits = store.scheme().index_average().query(&[0.0; 128], 10)?;
//!     println!("{} neighbors", hits.len());
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod index;
mod ledger;
mod scheme;
mod store;

pub use config::{Metric, StoreConfig};
pub use error::{Result, StoreError};
pub use index::{l2_normalize, Role, VectorIndex, INDEX_FILE_EXT, INDEX_MAGIC, INDEX_VERSION};
pub use ledger::{ItemId, Ledger};
pub use scheme::Scheme;
pub use store::{EmbeddingSource, IngestOutcome, IngestStats, Store, STORE_DB_FILE};

// Re-export the provider surface for convenience.
pub use sonance_embeddings::{
    Device, Embedding, EmbeddingProvider, ProviderConfig, ProviderError, ProviderRegistry,
};
