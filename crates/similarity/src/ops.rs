//! The two user-facing similarity queries over an open store.
//!
//! Both operate on the `average` role index and resolve slot ids back to
//! item ids in the index's result order. Self-matches are not excluded: a
//! seed item that is indexed will usually lead its own result list.
//!
//! Empty conditions (an empty index, or no seed item with an embedding)
//! yield empty results, never errors; callers report them as a "no results"
//! outcome.

use crate::error::Result;
use ndarray::Array1;
use sonance_store::{l2_normalize, ItemId, Metric, Store, VectorIndex};

/// Item ids most similar to one seed item, best first, at most `k`.
pub fn similar_to_item(store: &Store, item_id: ItemId, k: usize) -> Result<Vec<ItemId>> {
    Ok(similar_to_item_scored(store, item_id, k)?
        .into_iter()
        .map(|(item_id, _)| item_id)
        .collect())
}

/// Like [`similar_to_item`] with the index-native score for each hit:
/// descending similarity under cosine, ascending squared distance under L2.
pub fn similar_to_item_scored(
    store: &Store,
    item_id: ItemId,
    k: usize,
) -> Result<Vec<(ItemId, f32)>> {
    let Some(embedding) = store.get_embedding(item_id)? else {
        log::warn!("no embedding for seed item {item_id}");
        return Ok(Vec::new());
    };

    let index = store.scheme().index_average();
    let vectors = index.vectorize(&embedding)?;
    let query = vectors.row(0).to_vec();
    let hits = index.query(&query, k)?;
    resolve_scored(index, &hits)
}

/// Item ids most similar to the aggregate of several seed items.
///
/// Each seed is reduced to its own average vector first; only then is the
/// cross-item elementwise mean taken. Segment-level detail is discarded
/// before cross-item averaging, so seeds with many segments do not outweigh
/// seeds with few.
pub fn similar_to_many(store: &Store, item_ids: &[ItemId], k: usize) -> Result<Vec<ItemId>> {
    Ok(similar_to_many_scored(store, item_ids, k)?
        .into_iter()
        .map(|(item_id, _)| item_id)
        .collect())
}

/// Like [`similar_to_many`] with scores.
pub fn similar_to_many_scored(
    store: &Store,
    item_ids: &[ItemId],
    k: usize,
) -> Result<Vec<(ItemId, f32)>> {
    let index = store.scheme().index_average();

    let mut pooled: Vec<Array1<f32>> = Vec::with_capacity(item_ids.len());
    for (item_id, embedding) in item_ids.iter().zip(store.get_many_embeddings(item_ids)) {
        match embedding? {
            Some(embedding) => {
                let vectors = index.vectorize(&embedding)?;
                pooled.push(vectors.row(0).to_owned());
            }
            None => log::warn!("no embedding for seed item {item_id}; skipping"),
        }
    }
    if pooled.is_empty() {
        log::warn!("no seed items with embeddings");
        return Ok(Vec::new());
    }

    let mut combined = Array1::<f32>::zeros(index.vector_length());
    for vector in &pooled {
        combined += vector;
    }
    combined /= pooled.len() as f32;

    let mut query = combined.to_vec();
    if store.config().metric == Metric::Cosine {
        l2_normalize(&mut query);
    }

    let hits = index.query(&query, k)?;
    resolve_scored(index, &hits)
}

/// Pair each hit with its resolved item id, dropping hits whose slot has no
/// mapping row (the index logs those).
fn resolve_scored(index: &VectorIndex, hits: &[(i64, f32)]) -> Result<Vec<(ItemId, f32)>> {
    let mut results = Vec::with_capacity(hits.len());
    for &(slot, score) in hits {
        for item_id in index.resolve(&[slot])? {
            results.push((item_id, score));
        }
    }
    Ok(results)
}
