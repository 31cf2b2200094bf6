//! Coordinator for the role indices of one (provider, metric) pair.

use crate::config::Metric;
use crate::error::{Result, StoreError};
use crate::index::{Role, VectorIndex};
use crate::ledger::ItemId;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sonance_embeddings::Embedding;
use std::path::Path;
use std::rc::Rc;

const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SchemeManifest {
    schema_version: u32,
    provider: String,
    metric: String,
    vector_length: usize,
}

/// The fixed pairing of (embedding provider, metric) and the vector indices
/// it owns: one `average` and one `segment` role index.
///
/// Ingestion fans out to every role with the same raw embedding. Each role's
/// durability is independent: there is no cross-index rollback, and a partial
/// fan-out is logged before the error propagates.
#[derive(Debug)]
pub struct Scheme {
    provider: String,
    metric: Metric,
    average: VectorIndex,
    segment: VectorIndex,
}

impl Scheme {
    pub(crate) fn open(
        dir: &Path,
        conn: Rc<Connection>,
        provider: &str,
        metric: Metric,
        vector_length: usize,
    ) -> Result<Self> {
        check_manifest(dir, provider, metric, vector_length)?;
        let average = VectorIndex::open(
            Role::Average,
            dir,
            Rc::clone(&conn),
            provider,
            metric,
            vector_length,
        )?;
        let segment =
            VectorIndex::open(Role::Segment, dir, conn, provider, metric, vector_length)?;
        Ok(Self {
            provider: provider.to_string(),
            metric,
            average,
            segment,
        })
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[must_use]
    pub fn index_average(&self) -> &VectorIndex {
        &self.average
    }

    #[must_use]
    pub fn index_segment(&self) -> &VectorIndex {
        &self.segment
    }

    /// Insert an embedding into every owned role index.
    pub fn add_embedding(&mut self, item_id: ItemId, embedding: &Embedding) -> Result<()> {
        self.average.add(item_id, embedding)?;
        if let Err(err) = self.segment.add(item_id, embedding) {
            log::error!(
                "segment index rejected item {item_id} after the average index accepted it; \
                 role indices now disagree for this item: {err}"
            );
            return Err(err);
        }
        Ok(())
    }

    /// Persist both role indices.
    pub fn save(&self) -> Result<()> {
        self.average.save()?;
        self.segment.save()?;
        Ok(())
    }
}

/// Validate or create the scheme identity manifest for this directory.
///
/// The manifest pins (provider, metric, vector_length) per scheme so a
/// directory reopened under a different configuration fails at construction
/// instead of feeding mismatched vectors into persisted indices. Manifests
/// are per scheme identity; multiple schemes can share one directory.
fn check_manifest(dir: &Path, provider: &str, metric: Metric, vector_length: usize) -> Result<()> {
    let path = dir.join(format!("scheme-{provider}-{}.json", metric.as_str()));
    if path.exists() {
        let manifest: SchemeManifest = serde_json::from_slice(&std::fs::read(&path)?)?;
        if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(StoreError::CorruptIndex {
                path: path.display().to_string(),
                reason: format!(
                    "unsupported manifest schema_version {}",
                    manifest.schema_version
                ),
            });
        }
        if manifest.provider != provider
            || manifest.metric != metric.as_str()
            || manifest.vector_length != vector_length
        {
            return Err(StoreError::SchemeMismatch {
                dir: dir.display().to_string(),
                found: format!(
                    "{}/{} (V={})",
                    manifest.provider, manifest.metric, manifest.vector_length
                ),
                requested: format!("{provider}/{metric} (V={vector_length})"),
            });
        }
        return Ok(());
    }

    let manifest = SchemeManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        provider: provider.to_string(),
        metric: metric.as_str().to_string(),
        vector_length,
    };
    let bytes = serde_json::to_vec_pretty(&manifest)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}
