//! Durable item → embedding cache, one table per embedding provider.
//!
//! Embedding tensors are stored as raw little-endian f32 blobs. The segment
//! count is not stored: it is recovered on read as `len / 4 / vector_length`,
//! which is sound because provider embeddings are always rectangular.

use crate::error::{Result, StoreError};
use rusqlite::{params, Connection};
use sonance_embeddings::Embedding;
use std::rc::Rc;

pub type ItemId = i64;

pub(crate) fn embedding_to_bytes(embedding: &Embedding) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub(crate) fn embedding_from_bytes(
    bytes: &[u8],
    vector_length: usize,
    item_id: ItemId,
) -> Result<Embedding> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::CorruptBlob {
            item_id,
            reason: format!("{} bytes is not a whole number of f32 values", bytes.len()),
        });
    }
    let floats: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if vector_length == 0 || floats.len() % vector_length != 0 {
        return Err(StoreError::CorruptBlob {
            item_id,
            reason: format!(
                "{} values do not divide into rows of length {vector_length}",
                floats.len()
            ),
        });
    }
    let segments = floats.len() / vector_length;
    Embedding::from_shape_vec((segments, vector_length), floats).map_err(|e| {
        StoreError::CorruptBlob {
            item_id,
            reason: e.to_string(),
        }
    })
}

/// Keep only characters that are safe inside a SQL identifier.
pub(crate) fn table_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

/// The durable `item_id -> embedding` mapping for one provider.
#[derive(Debug)]
pub struct Ledger {
    conn: Rc<Connection>,
    table: String,
    vector_length: usize,
}

impl Ledger {
    pub(crate) fn open(
        conn: Rc<Connection>,
        provider: &str,
        vector_length: usize,
    ) -> Result<Self> {
        let table = format!("embedding_{}", table_component(provider));
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                 id INTEGER PRIMARY KEY,
                 item_id INTEGER NOT NULL UNIQUE,
                 embedding BLOB NOT NULL,
                 created INTEGER NOT NULL
             );"
        ))?;
        Ok(Self {
            conn,
            table,
            vector_length,
        })
    }

    /// Return the item's embedding, or `None` if the item was never ingested.
    pub fn get(&self, item_id: ItemId) -> Result<Option<Embedding>> {
        let query = format!("SELECT embedding FROM {} WHERE item_id = ?1", self.table);
        match self
            .conn
            .query_row(&query, params![item_id], |row| row.get::<_, Vec<u8>>(0))
        {
            Ok(blob) => Ok(Some(embedding_from_bytes(&blob, self.vector_length, item_id)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Upsert the item's embedding. Replaces any prior row for `item_id`.
    pub fn put(&self, item_id: ItemId, embedding: &Embedding, created: i64) -> Result<()> {
        let blob = embedding_to_bytes(embedding);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (item_id, embedding, created) VALUES (?1, ?2, ?3)",
                self.table
            ),
            params![item_id, blob, created],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Embeddings for `item_ids`, lazily, absent-preserving, in input order.
    pub fn get_many<'a>(
        &'a self,
        item_ids: &'a [ItemId],
    ) -> impl Iterator<Item = Result<Option<Embedding>>> + 'a {
        item_ids.iter().map(move |item_id| self.get(*item_id))
    }

    #[must_use]
    pub fn vector_length(&self) -> usize {
        self.vector_length
    }
}
