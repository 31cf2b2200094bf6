use crate::error::{Result, StoreError};
use sonance_embeddings::Device;
use std::fmt;
use std::path::PathBuf;

/// Distance metric baked into a scheme's vector indices.
///
/// The metric decides both vector preprocessing (cosine L2-normalizes every
/// derived row) and the score ordering an index returns: descending
/// similarity for cosine, ascending squared distance for L2.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Metric {
    #[default]
    Cosine,
    L2,
}

impl Metric {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "cosine" => Ok(Self::Cosine),
            "l2" => Ok(Self::L2),
            other => Err(StoreError::UnknownMetric(other.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Cosine => 0,
            Self::L2 => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Cosine),
            1 => Some(Self::L2),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a [`Store`](crate::Store) needs besides its directory.
///
/// Passed explicitly to construction; there is no process-wide configuration
/// state.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub metric: Metric,
    /// Embedding provider name, resolved through the provider registry.
    pub provider: String,
    pub device: Device,
    /// Directory holding provider model assets.
    pub model_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            provider: "vggish".to_string(),
            device: Device::Cpu,
            model_dir: PathBuf::from("models"),
        }
    }
}
