//! Flat exact nearest-neighbor index, one per (role, provider, metric) triple.
//!
//! Vectors live in memory as one row-major `Vec<f32>` and are scanned
//! brute-force on every query. The whole structure is rewritten to its file
//! on every mutating update, so slot ids (the append-order positions) stay
//! stable for the lifetime of a store directory.
//!
//! File format (little-endian):
//!
//! Header:
//!   Magic: "SNVI" (4 bytes)
//!   Version: u16
//!   Metric: u8 (0=cosine, 1=l2)
//!   Dimension: u32
//!   Count: u32
//!   HeaderCRC32: u32 (CRC32 of header bytes before this field)
//!
//! Rows:
//!   Count × Dimension × f32, contiguous.

use crate::config::Metric;
use crate::error::{Result, StoreError};
use crate::ledger::{table_component, ItemId};
use ndarray::{Array2, ArrayViewMut1, Axis};
use rusqlite::{params, Connection};
use sonance_embeddings::Embedding;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const INDEX_MAGIC: [u8; 4] = *b"SNVI";
pub const INDEX_VERSION: u16 = 1;
pub const INDEX_FILE_EXT: &str = "svi";

/// Rule reducing an embedding to query vectors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// One vector per item: the mean over its segment rows.
    Average,
    /// One vector per time segment, unchanged.
    Segment,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Average => "average",
            Self::Segment => "segment",
        }
    }
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector {
        *value /= norm;
    }
}

fn normalize_row(mut row: ArrayViewMut1<'_, f32>) {
    let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    row.mapv_inplace(|v| v / norm);
}

/// One nearest-neighbor index plus its slot-mapping table.
#[derive(Debug)]
pub struct VectorIndex {
    role: Role,
    metric: Metric,
    vector_length: usize,
    filepath: PathBuf,
    table: String,
    conn: Rc<Connection>,
    // Row-major, len == count * vector_length. Slot N is row N.
    vectors: Vec<f32>,
}

impl VectorIndex {
    /// Open the index for one (role, provider, metric) triple.
    ///
    /// Creates the mapping table when absent and reads the index file when
    /// present; a persisted file whose metric or dimension disagrees with
    /// the requested configuration fails here.
    pub(crate) fn open(
        role: Role,
        dir: &Path,
        conn: Rc<Connection>,
        provider: &str,
        metric: Metric,
        vector_length: usize,
    ) -> Result<Self> {
        let filepath = dir.join(format!(
            "{}-{}-{}.{INDEX_FILE_EXT}",
            role.as_str(),
            provider,
            metric.as_str()
        ));
        let table = format!(
            "vectors_{}_{}_{}",
            role.as_str(),
            table_component(provider),
            metric.as_str()
        );
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                 id INTEGER PRIMARY KEY,
                 vector_id INTEGER NOT NULL,
                 item_id INTEGER NOT NULL,
                 segment INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_item_{table} ON {table} (item_id);"
        ))?;

        let vectors = if filepath.exists() {
            let vectors = read_index_file(&filepath, metric, vector_length)?;
            log::info!(
                "Loaded {} index from {} ({} vectors)",
                role.as_str(),
                filepath.display(),
                vectors.len() / vector_length.max(1)
            );
            vectors
        } else {
            Vec::new()
        };

        Ok(Self {
            role,
            metric,
            vector_length,
            filepath,
            table,
            conn,
            vectors,
        })
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[must_use]
    pub fn vector_length(&self) -> usize {
        self.vector_length
    }

    #[must_use]
    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    /// Number of vectors (equals the next slot id).
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len() / self.vector_length.max(1)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Apply this index's vectorization rule to a raw embedding.
    ///
    /// Pooling happens first; under the cosine metric every resulting row is
    /// then L2-normalized, so inner-product search equals cosine ordering.
    pub fn vectorize(&self, embedding: &Embedding) -> Result<Array2<f32>> {
        if embedding.ncols() != self.vector_length {
            return Err(StoreError::ShapeMismatch {
                expected: self.vector_length,
                actual: embedding.ncols(),
            });
        }
        let mut vectors = match self.role {
            Role::Segment => embedding.to_owned(),
            Role::Average => embedding
                .mean_axis(Axis(0))
                .ok_or(StoreError::EmptyEmbedding)?
                .insert_axis(Axis(0)),
        };
        if self.metric == Metric::Cosine {
            for row in vectors.axis_iter_mut(Axis(0)) {
                normalize_row(row);
            }
        }
        Ok(vectors)
    }

    /// Vectorize and insert one item's embedding.
    ///
    /// Slots for one call are contiguous: the mapping rows record
    /// `(slot, item_id, segment)` for segment 0..N-1 in temporal order.
    /// Sequence: in-memory append, mapping rows in one transaction, full
    /// index-file rewrite. A crash between the last two steps leaves mapping
    /// rows pointing one rewrite ahead of the file; that window is logged
    /// below and accepted under the single-writer assumption.
    pub fn add(&mut self, item_id: ItemId, embedding: &Embedding) -> Result<()> {
        let vectors = self.vectorize(embedding)?;
        let start = self.len();
        self.vectors.extend(vectors.iter().copied());
        let end = self.len();

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (vector_id, item_id, segment) VALUES (?1, ?2, ?3)",
                self.table
            ))?;
            for (segment, vector_id) in (start..end).enumerate() {
                stmt.execute(params![vector_id as i64, item_id, segment as i64])?;
            }
        }
        tx.commit()?;

        if let Err(err) = self.save() {
            log::error!(
                "{} index file not persisted after mapping commit for item {item_id}; \
                 slots {start}..{end} are mapped but not yet on disk: {err}",
                self.role.as_str()
            );
            return Err(err);
        }
        Ok(())
    }

    /// Rewrite the whole index structure to its file.
    pub fn save(&self) -> Result<()> {
        let mut header = Vec::with_capacity(15);
        header.extend_from_slice(&INDEX_MAGIC);
        header.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        header.push(self.metric.to_u8());
        header.extend_from_slice(&(self.vector_length as u32).to_le_bytes());
        header.extend_from_slice(&(self.len() as u32).to_le_bytes());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        let crc = hasher.finalize();

        let mut bytes = Vec::with_capacity(header.len() + 4 + self.vectors.len() * 4);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&crc.to_le_bytes());
        for value in &self.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let tmp = self.filepath.with_extension(format!("{INDEX_FILE_EXT}.tmp"));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.filepath)?;
        Ok(())
    }

    /// Return up to `k` nearest slots as `(slot_id, score)` in the index's
    /// native order: descending similarity for cosine, ascending squared
    /// distance for L2.
    ///
    /// An empty index yields an empty result, never an error; `k` is clamped
    /// to the index size.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        if vector.len() != self.vector_length {
            return Err(StoreError::ShapeMismatch {
                expected: self.vector_length,
                actual: vector.len(),
            });
        }
        let count = self.len();
        if count == 0 {
            log::debug!(
                "{} index at {} has no entries",
                self.role.as_str(),
                self.filepath.display()
            );
            return Ok(Vec::new());
        }

        let mut scored: Vec<(i64, f32)> = (0..count)
            .map(|slot| (slot as i64, self.score(slot, vector)))
            .collect();
        match self.metric {
            Metric::Cosine => {
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            }
            Metric::L2 => {
                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            }
        }
        scored.truncate(k.min(count));
        Ok(scored)
    }

    /// Like [`query`](Self::query) for a batch of query vectors; one result
    /// list per input row, in input order.
    pub fn query_many(&self, vectors: &Array2<f32>, k: usize) -> Result<Vec<Vec<(i64, f32)>>> {
        let mut results = Vec::with_capacity(vectors.nrows());
        for row in vectors.axis_iter(Axis(0)) {
            results.push(self.query(row.to_vec().as_slice(), k)?);
        }
        Ok(results)
    }

    /// Resolve slot ids to item ids, preserving order.
    ///
    /// A slot with no mapping row is skipped with a diagnostic: the index may
    /// hold slots that were never mapped if a past add was interrupted.
    pub fn resolve(&self, slot_ids: &[i64]) -> Result<Vec<ItemId>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT item_id FROM {} WHERE vector_id = ?1",
            self.table
        ))?;
        let mut item_ids = Vec::with_capacity(slot_ids.len());
        for &slot in slot_ids {
            match stmt.query_row(params![slot], |row| row.get::<_, i64>(0)) {
                Ok(item_id) => item_ids.push(item_id),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    log::warn!(
                        "No item mapped to {} slot {slot}; skipping",
                        self.role.as_str()
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(item_ids)
    }

    /// All `(slot_id, segment)` pairs recorded for an item, ordered by segment.
    pub fn item_slots(&self, item_id: ItemId) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT vector_id, segment FROM {} WHERE item_id = ?1 ORDER BY segment",
            self.table
        ))?;
        let rows = stmt.query_map(params![item_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut slots = Vec::new();
        for row in rows {
            slots.push(row?);
        }
        Ok(slots)
    }

    fn score(&self, slot: usize, query: &[f32]) -> f32 {
        let row = &self.vectors[slot * self.vector_length..(slot + 1) * self.vector_length];
        match self.metric {
            Metric::Cosine => row.iter().zip(query).map(|(a, b)| a * b).sum(),
            Metric::L2 => row
                .iter()
                .zip(query)
                .map(|(a, b)| {
                    let d = a - b;
                    d * d
                })
                .sum(),
        }
    }
}

fn read_index_file(path: &Path, metric: Metric, vector_length: usize) -> Result<Vec<f32>> {
    let corrupt = |reason: String| StoreError::CorruptIndex {
        path: path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(path)?;
    const HEADER_LEN: usize = 15;
    if bytes.len() < HEADER_LEN + 4 {
        return Err(corrupt(format!("{} bytes is shorter than the header", bytes.len())));
    }
    let (header, rest) = bytes.split_at(HEADER_LEN);

    if header[0..4] != INDEX_MAGIC {
        return Err(corrupt("bad magic".to_string()));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != INDEX_VERSION {
        return Err(corrupt(format!("unsupported version {version}")));
    }
    let file_metric = Metric::from_u8(header[6])
        .ok_or_else(|| corrupt(format!("unknown metric byte {}", header[6])))?;
    if file_metric != metric {
        return Err(corrupt(format!(
            "metric mismatch: file holds {file_metric}, requested {metric}"
        )));
    }
    let dimension = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
    if dimension != vector_length {
        return Err(StoreError::ShapeMismatch {
            expected: vector_length,
            actual: dimension,
        });
    }
    let count = u32::from_le_bytes([header[11], header[12], header[13], header[14]]) as usize;

    let crc_expected = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    let crc_actual = hasher.finalize();
    if crc_actual != crc_expected {
        return Err(corrupt(format!(
            "header CRC mismatch (expected {crc_expected:#010x}, got {crc_actual:#010x})"
        )));
    }

    let data = &rest[4..];
    let expected_len = count.saturating_mul(dimension).saturating_mul(4);
    if data.len() != expected_len {
        return Err(corrupt(format!(
            "expected {expected_len} data bytes for {count} vectors, found {}",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn test_index(role: Role, metric: Metric, vector_length: usize) -> (TempDir, VectorIndex) {
        let dir = TempDir::new().unwrap();
        let conn = Rc::new(Connection::open_in_memory().unwrap());
        let index =
            VectorIndex::open(role, dir.path(), conn, "stub", metric, vector_length).unwrap();
        (dir, index)
    }

    #[test]
    fn vectorize_average_pools_segments() {
        let (_dir, index) = test_index(Role::Average, Metric::L2, 2);
        let embedding = array![[1.0f32, 0.0], [0.0, 1.0], [2.0, 2.0]];
        let vectors = index.vectorize(&embedding).unwrap();
        assert_eq!(vectors, array![[1.0f32, 1.0]]);
    }

    #[test]
    fn vectorize_segment_keeps_rows() {
        let (_dir, index) = test_index(Role::Segment, Metric::L2, 2);
        let embedding = array![[1.0f32, 0.0], [0.0, 1.0]];
        let vectors = index.vectorize(&embedding).unwrap();
        assert_eq!(vectors, embedding);
    }

    #[test]
    fn cosine_vectorize_normalizes_after_pooling() {
        let (_dir, index) = test_index(Role::Average, Metric::Cosine, 2);
        let embedding = array![[3.0f32, 0.0], [0.0, 3.0]];
        let vectors = index.vectorize(&embedding).unwrap();
        let norm: f32 = vectors.row(0).iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        // Mean of the raw rows is (1.5, 1.5); normalized direction (√2/2, √2/2).
        assert!((vectors[[0, 0]] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn cosine_segment_rows_have_unit_norm() {
        let (_dir, mut index) = test_index(Role::Segment, Metric::Cosine, 3);
        index
            .add(1, &array![[3.0f32, 4.0, 0.0], [0.0, 5.0, 12.0]])
            .unwrap();
        for slot in 0..index.len() {
            let row = &index.vectors[slot * 3..(slot + 1) * 3];
            let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn vectorize_rejects_wrong_width() {
        let (_dir, index) = test_index(Role::Average, Metric::Cosine, 4);
        let err = index
            .vectorize(&array![[1.0f32, 2.0]])
            .expect_err("width 2 into dim 4");
        assert!(matches!(
            err,
            StoreError::ShapeMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn empty_index_query_returns_empty_not_error() {
        let (_dir, index) = test_index(Role::Average, Metric::Cosine, 2);
        let hits = index.query(&[1.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn k_is_clamped_to_index_size() {
        let (_dir, mut index) = test_index(Role::Average, Metric::Cosine, 2);
        index.add(1, &array![[1.0f32, 0.0]]).unwrap();
        index.add(2, &array![[0.0f32, 1.0]]).unwrap();
        let hits = index.query(&[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn cosine_scores_descend_l2_scores_ascend() {
        let (_dir, mut cosine) = test_index(Role::Average, Metric::Cosine, 2);
        cosine.add(1, &array![[1.0f32, 0.0]]).unwrap();
        cosine.add(2, &array![[1.0f32, 1.0]]).unwrap();
        cosine.add(3, &array![[0.0f32, 1.0]]).unwrap();
        let hits = cosine.query(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 >= hits[1].1 && hits[1].1 >= hits[2].1);

        let (_dir2, mut l2) = test_index(Role::Average, Metric::L2, 2);
        l2.add(1, &array![[1.0f32, 0.0]]).unwrap();
        l2.add(2, &array![[5.0f32, 0.0]]).unwrap();
        let hits = l2.query(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 <= hits[1].1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6, "squared distance");
    }

    #[test]
    fn add_assigns_contiguous_slots_and_segments() {
        let (_dir, mut index) = test_index(Role::Segment, Metric::L2, 2);
        index
            .add(7, &array![[1.0f32, 0.0], [0.0, 1.0], [1.0, 1.0]])
            .unwrap();
        index.add(8, &array![[2.0f32, 2.0]]).unwrap();

        assert_eq!(index.item_slots(7).unwrap(), vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(index.item_slots(8).unwrap(), vec![(3, 0)]);
    }

    #[test]
    fn resolve_skips_unmapped_slots() {
        let (_dir, mut index) = test_index(Role::Average, Metric::L2, 2);
        index.add(7, &array![[1.0f32, 0.0]]).unwrap();
        let item_ids = index.resolve(&[0, 99]).unwrap();
        assert_eq!(item_ids, vec![7]);
    }

    #[test]
    fn save_and_reopen_round_trips_vectors() {
        let dir = TempDir::new().unwrap();
        let conn = Rc::new(Connection::open_in_memory().unwrap());
        let mut index = VectorIndex::open(
            Role::Average,
            dir.path(),
            Rc::clone(&conn),
            "stub",
            Metric::L2,
            2,
        )
        .unwrap();
        index.add(1, &array![[1.5f32, -2.5]]).unwrap();
        index.add(2, &array![[0.5f32, 0.25]]).unwrap();
        let saved = index.vectors.clone();

        let reopened =
            VectorIndex::open(Role::Average, dir.path(), conn, "stub", Metric::L2, 2).unwrap();
        assert_eq!(reopened.vectors, saved);
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn reopen_with_other_dimension_fails() {
        let dir = TempDir::new().unwrap();
        let conn = Rc::new(Connection::open_in_memory().unwrap());
        let mut index = VectorIndex::open(
            Role::Average,
            dir.path(),
            Rc::clone(&conn),
            "stub",
            Metric::L2,
            2,
        )
        .unwrap();
        index.add(1, &array![[1.0f32, 0.0]]).unwrap();

        let err = VectorIndex::open(Role::Average, dir.path(), conn, "stub", Metric::L2, 3)
            .expect_err("dimension changed");
        assert!(matches!(
            err,
            StoreError::ShapeMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn truncated_index_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let conn = Rc::new(Connection::open_in_memory().unwrap());
        let mut index = VectorIndex::open(
            Role::Average,
            dir.path(),
            Rc::clone(&conn),
            "stub",
            Metric::L2,
            2,
        )
        .unwrap();
        index.add(1, &array![[1.0f32, 0.0]]).unwrap();

        let bytes = std::fs::read(index.filepath()).unwrap();
        std::fs::write(index.filepath(), &bytes[..bytes.len() - 2]).unwrap();

        let err = VectorIndex::open(Role::Average, dir.path(), conn, "stub", Metric::L2, 2)
            .expect_err("truncated file");
        assert!(matches!(err, StoreError::CorruptIndex { .. }));
    }
}
