//! # Sonance Embeddings
//!
//! Audio embedding providers for perceptual similarity indexing.
//!
//! An embedding provider turns one audio file into a 2-D tensor of shape
//! `(segments, vector_length)`: one fixed-length feature vector per time
//! segment. Providers are selected by name through [`ProviderRegistry`];
//! unknown names are rejected at construction time.
//!
//! ## Providers
//!
//! - `"vggish"`: VGGish features via ONNX Runtime (V=128, ~0.96 s segments
//!   with 50% overlap). Requires an ONNX export of the model on disk.
//! - `"stub"`: deterministic, model-free vectors derived from the source
//!   path. Used by tests and offline smoke runs.
//!
//! ## Example
//!
//! ```no_run
//! use sonance_embeddings::{ProviderConfig, ProviderRegistry};
//!
//! fn main() -> Result<(), sonance_embeddings::ProviderError> {
//!     let registry = ProviderRegistry::builtin();
//!     let mut provider = registry.create("vggish", &ProviderConfig::default())?;
//!     let embedding = provider.embed("track.wav".as_ref())?;
//!     println!("{} segments of length {}", embedding.nrows(), embedding.ncols());
//!     Ok(())
//! }
//! ```

mod error;
mod provider;
mod stub;
mod vggish;

pub use error::{ProviderError, Result};
pub use provider::{Device, Embedding, EmbeddingProvider, ProviderConfig, ProviderRegistry};
pub use stub::{StubProvider, STUB_VECTOR_LENGTH};
pub use vggish::{VggishProvider, VGGISH_VECTOR_LENGTH};
