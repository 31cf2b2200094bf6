mod frontend;

use crate::error::{ProviderError, Result};
use crate::provider::{Device, Embedding, EmbeddingProvider, ProviderConfig};
use ndarray::{Axis, Ix2};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputs};
use ort::value::{DynTensor, Tensor};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use frontend::{load_waveform, log_mel_examples};

/// Length of one VGGish segment vector.
pub const VGGISH_VECTOR_LENGTH: usize = 128;

const MODEL_SUBDIR: &str = "vggish";
const MODEL_FILE: &str = "vggish.onnx";

/// VGGish audio embeddings via ONNX Runtime.
///
/// `new` only records configuration; the session is created once by
/// `ensure_ready`, so opening a store stays cheap until the first real
/// embedding is needed.
#[derive(Debug)]
pub struct VggishProvider {
    config: ProviderConfig,
    session: Option<Session>,
}

impl VggishProvider {
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn model_path(&self) -> PathBuf {
        self.config.model_dir.join(MODEL_SUBDIR).join(MODEL_FILE)
    }
}

impl EmbeddingProvider for VggishProvider {
    fn name(&self) -> &'static str {
        "vggish"
    }

    fn vector_length(&self) -> usize {
        VGGISH_VECTOR_LENGTH
    }

    fn ensure_ready(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let model_path = self.model_path();
        if !model_path.exists() {
            return Err(ProviderError::InferenceError(format!(
                "VGGish model missing at {}. Place an ONNX export there or point ProviderConfig::model_dir at the directory that holds it.",
                model_path.display()
            )));
        }

        let providers = execution_providers(self.config.device)?;
        let session = Session::builder()
            .map_err(|e| ProviderError::InferenceError(format!("{e}")))?
            .with_execution_providers(providers)
            .map_err(|e| {
                ProviderError::InferenceError(format!(
                    "Failed to register execution providers: {e}"
                ))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                ProviderError::InferenceError(format!("Failed to set optimization level: {e}"))
            })?
            .commit_from_file(&model_path)
            .map_err(|e| {
                ProviderError::InferenceError(format!("Failed to load ONNX model: {e}"))
            })?;

        log::info!(
            "Loaded VGGish ONNX model from {} (dim {VGGISH_VECTOR_LENGTH}, device {})",
            model_path.display(),
            self.config.device.as_str()
        );
        self.session = Some(session);
        Ok(())
    }

    fn embed(&mut self, audio: &Path) -> Result<Embedding> {
        self.ensure_ready()?;

        let waveform = frontend::load_waveform(audio)?;
        let examples = frontend::log_mel_examples(&waveform)?;
        let num_examples = examples.len_of(Axis(0));

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ProviderError::InferenceError("session not ready".to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| {
                ProviderError::InferenceError("VGGish model exposes no inputs".to_string())
            })?;

        let tensor = Tensor::from_array(examples.into_dyn())
            .map_err(|e| ProviderError::InferenceError(format!("Input tensor error: {e}")))?
            .upcast();
        let mut feed: HashMap<String, DynTensor> = HashMap::new();
        feed.insert(input_name, tensor);

        let outputs = session
            .run(SessionInputs::from(feed))
            .map_err(|e| ProviderError::InferenceError(format!("ONNX forward failed: {e}")))?;
        if outputs.len() == 0 {
            return Err(ProviderError::InferenceError(
                "ONNX returned no outputs".to_string(),
            ));
        }

        let array = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| {
                ProviderError::InferenceError(format!("Failed to decode ONNX output: {e}"))
            })?
            .to_owned();

        let embedding = array.into_dimensionality::<Ix2>().map_err(|e| {
            ProviderError::InferenceError(format!("Unexpected VGGish output shape: {e}"))
        })?;
        if embedding.nrows() != num_examples || embedding.ncols() != VGGISH_VECTOR_LENGTH {
            return Err(ProviderError::InferenceError(format!(
                "Unexpected VGGish output shape ({}, {}), expected ({num_examples}, {VGGISH_VECTOR_LENGTH})",
                embedding.nrows(),
                embedding.ncols()
            )));
        }

        log::debug!(
            "Embedded {} into {num_examples} segment(s)",
            audio.display()
        );
        Ok(embedding)
    }
}

fn execution_providers(device: Device) -> Result<Vec<ExecutionProviderDispatch>> {
    match device {
        Device::Cpu => Ok(vec![CPUExecutionProvider::default().build()]),
        Device::Cuda => {
            let cuda = CUDAExecutionProvider::default();
            match cuda.is_available() {
                Ok(true) => {}
                Ok(false) => {
                    return Err(ProviderError::InferenceError(
                        "CUDA execution provider is not available; pass Device::Cpu or install the CUDA runtime".to_string(),
                    ));
                }
                Err(err) => {
                    return Err(ProviderError::InferenceError(format!(
                        "CUDA execution provider check failed: {err}"
                    )));
                }
            }
            // CPU stays registered as the fallback for unsupported graph nodes.
            Ok(vec![cuda.build(), CPUExecutionProvider::default().build()])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_without_model_file_is_an_inference_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ProviderConfig {
            device: Device::Cpu,
            model_dir: dir.path().join("models"),
        };
        let mut provider = VggishProvider::new(config);
        assert_eq!(provider.vector_length(), VGGISH_VECTOR_LENGTH);

        let err = provider
            .embed(dir.path().join("missing.wav").as_path())
            .expect_err("no model on disk");
        assert!(err.to_string().contains("VGGish model missing"));
    }
}
