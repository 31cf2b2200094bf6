use crate::error::{ProviderError, Result};
use crate::stub::StubProvider;
use crate::vggish::VggishProvider;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Raw per-segment feature tensor for one item: shape `(segments, vector_length)`.
pub type Embedding = ndarray::Array2<f32>;

/// Compute device hint for inference backends.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl Device {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            other => Err(ProviderError::UnknownDevice(other.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

/// Explicit provider configuration. No environment lookups, no global state.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub device: Device,
    /// Directory holding model assets, one subdirectory per provider name.
    pub model_dir: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            model_dir: PathBuf::from("models"),
        }
    }
}

/// One audio embedding capability.
///
/// Construction is two-phase: `new` configures, [`ensure_ready`] performs the
/// expensive one-time setup (model load) and stores the result as an owned
/// field. [`embed`] calls `ensure_ready` itself, so the first embed on a
/// fresh provider pays the load cost.
///
/// [`ensure_ready`]: EmbeddingProvider::ensure_ready
/// [`embed`]: EmbeddingProvider::embed
pub trait EmbeddingProvider: std::fmt::Debug {
    /// Registry name this provider answers to.
    fn name(&self) -> &'static str;

    /// Fixed length of one segment vector.
    fn vector_length(&self) -> usize;

    /// Perform one-time setup. Idempotent; cheap once ready.
    fn ensure_ready(&mut self) -> Result<()>;

    /// Compute the `(segments, vector_length)` embedding for one audio file.
    fn embed(&mut self, audio: &Path) -> Result<Embedding>;
}

type ProviderFactory = fn(&ProviderConfig) -> Result<Box<dyn EmbeddingProvider>>;

/// Explicit factory registry keyed by provider name.
///
/// Replaces by-name module lookup with a closed-but-registrable set: unknown
/// names fail at construction time with the list of known providers.
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Empty registry. Most callers want [`ProviderRegistry::builtin`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in providers: `"vggish"` and `"stub"`.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("vggish", make_vggish);
        registry.register("stub", make_stub);
        registry
    }

    pub fn register(&mut self, name: &str, factory: ProviderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str, config: &ProviderConfig) -> Result<Box<dyn EmbeddingProvider>> {
        match self.factories.get(name) {
            Some(factory) => factory(config),
            None => Err(ProviderError::UnknownProvider {
                name: name.to_string(),
                known: self.names().join(", "),
            }),
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn make_vggish(config: &ProviderConfig) -> Result<Box<dyn EmbeddingProvider>> {
    Ok(Box::new(VggishProvider::new(config.clone())))
}

fn make_stub(_config: &ProviderConfig) -> Result<Box<dyn EmbeddingProvider>> {
    Ok(Box::new(StubProvider::new()))
}
