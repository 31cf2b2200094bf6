//! # Sonance Similarity
//!
//! User-facing similarity queries over a [`sonance_store::Store`]:
//!
//! - [`similar_to_item`]: nearest neighbors of one seed item.
//! - [`similar_to_many`]: nearest neighbors of the aggregate of several
//!   seeds (each pooled to its own average vector before the cross-item
//!   mean is taken).
//!
//! Callers ingest first; these operations only read. Empty outcomes are
//! empty vectors, never errors.

mod error;
mod ops;

pub use error::{Result, SimilarityError};
pub use ops::{
    similar_to_item, similar_to_item_scored, similar_to_many, similar_to_many_scored,
};
