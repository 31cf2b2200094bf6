//! Top-level handle for one store directory.

use crate::config::StoreConfig;
use crate::error::Result;
use crate::ledger::{ItemId, Ledger};
use crate::scheme::Scheme;
use rusqlite::Connection;
use sonance_embeddings::{Embedding, EmbeddingProvider, ProviderConfig, ProviderRegistry};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const STORE_DB_FILE: &str = "store.sqlite";

/// What to ingest: an audio file to run through the provider, or an already
/// computed embedding tensor.
pub enum EmbeddingSource {
    Audio(PathBuf),
    Tensor(Embedding),
}

impl From<PathBuf> for EmbeddingSource {
    fn from(path: PathBuf) -> Self {
        Self::Audio(path)
    }
}

impl From<&Path> for EmbeddingSource {
    fn from(path: &Path) -> Self {
        Self::Audio(path.to_path_buf())
    }
}

impl From<Embedding> for EmbeddingSource {
    fn from(tensor: Embedding) -> Self {
        Self::Tensor(tensor)
    }
}

/// What one `add_embedding` call did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Embedding computed (or accepted) and indexed.
    Inserted,
    /// Item already had an embedding and `force` was false; nothing changed.
    AlreadyPresent,
}

/// Counters for one batch ingestion run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub inserted: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

/// One open store directory: the provider, the ledger, and the scheme.
///
/// A store fixes one (provider, metric) scheme identity for its lifetime.
/// All state persists on disk; dropping the store and reopening the
/// directory restores it.
#[derive(Debug)]
pub struct Store {
    dir: PathBuf,
    config: StoreConfig,
    ledger: Ledger,
    scheme: Scheme,
    provider: Box<dyn EmbeddingProvider>,
}

impl Store {
    /// Open (or create) a store directory with the built-in providers.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        Self::open_with_registry(dir, config, &ProviderRegistry::builtin())
    }

    /// Open with a caller-supplied provider registry.
    ///
    /// Configuration is validated eagerly: an unknown provider or a scheme
    /// identity that disagrees with the directory's persisted state fails
    /// here. The provider's model itself stays unloaded until the first
    /// embedding is computed.
    pub fn open_with_registry(
        dir: impl AsRef<Path>,
        config: StoreConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let provider = registry.create(
            &config.provider,
            &ProviderConfig {
                device: config.device,
                model_dir: config.model_dir.clone(),
            },
        )?;
        let vector_length = provider.vector_length();

        let conn = Rc::new(Connection::open(dir.join(STORE_DB_FILE))?);
        let ledger = Ledger::open(Rc::clone(&conn), &config.provider, vector_length)?;
        let scheme = Scheme::open(&dir, conn, &config.provider, config.metric, vector_length)?;

        log::info!(
            "Opened store at {} ({}/{}, V={vector_length})",
            dir.display(),
            config.provider,
            config.metric
        );
        Ok(Self {
            dir,
            config,
            ledger,
            scheme,
            provider,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Load the provider's model now instead of on the first embed.
    pub fn ensure_model_ready(&mut self) -> Result<()> {
        self.provider.ensure_ready()?;
        Ok(())
    }

    /// Store an item's embedding and index its vectors.
    ///
    /// Idempotent: when the ledger already holds an embedding for `item_id`
    /// and `force` is false, nothing is computed or written. A forced
    /// re-ingestion replaces the ledger row and appends fresh index slots;
    /// the superseded slots stay behind (append-and-tolerate, see
    /// DESIGN.md).
    pub fn add_embedding(
        &mut self,
        item_id: ItemId,
        source: impl Into<EmbeddingSource>,
        force: bool,
    ) -> Result<IngestOutcome> {
        if !force && self.ledger.get(item_id)?.is_some() {
            log::debug!("already have embedding for item {item_id}");
            return Ok(IngestOutcome::AlreadyPresent);
        }

        let embedding = match source.into() {
            EmbeddingSource::Tensor(tensor) => tensor,
            EmbeddingSource::Audio(path) => self.provider.embed(&path)?,
        };

        self.ledger.put(item_id, &embedding, now_epoch_secs())?;
        // Forwarded unconditionally once the ledger row is written.
        self.scheme.add_embedding(item_id, &embedding)?;
        log::info!(
            "Ingested item {item_id} ({} segment(s))",
            embedding.nrows()
        );
        Ok(IngestOutcome::Inserted)
    }

    /// Ingest a batch of audio files, continuing past per-item failures.
    ///
    /// A failing item is skipped with a diagnostic naming the item and path;
    /// it contributes no ledger row and no vectors.
    pub fn add_audio_batch<I>(&mut self, items: I, force: bool) -> IngestStats
    where
        I: IntoIterator<Item = (ItemId, PathBuf)>,
    {
        let mut stats = IngestStats::default();
        for (item_id, path) in items {
            match self.add_embedding(item_id, EmbeddingSource::Audio(path.clone()), force) {
                Ok(IngestOutcome::Inserted) => stats.inserted += 1,
                Ok(IngestOutcome::AlreadyPresent) => stats.skipped_existing += 1,
                Err(err) => {
                    stats.failed += 1;
                    log::warn!(
                        "skipping item {item_id} ({}): {err}",
                        path.display()
                    );
                }
            }
        }
        log::info!(
            "Batch ingest: {} inserted, {} already present, {} failed",
            stats.inserted,
            stats.skipped_existing,
            stats.failed
        );
        stats
    }

    /// Return the item's embedding, or `None` if never ingested.
    pub fn get_embedding(&self, item_id: ItemId) -> Result<Option<Embedding>> {
        self.ledger.get(item_id)
    }

    /// Embeddings for `item_ids`, lazily, absent-preserving, in input order.
    pub fn get_many_embeddings<'a>(
        &'a self,
        item_ids: &'a [ItemId],
    ) -> impl Iterator<Item = Result<Option<Embedding>>> + 'a {
        self.ledger.get_many(item_ids)
    }
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
