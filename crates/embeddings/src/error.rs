use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unknown embedding provider '{name}' (known: {known})")]
    UnknownProvider { name: String, known: String },

    #[error("Unknown device '{0}' (expected 'cpu' or 'cuda')")]
    UnknownDevice(String),

    #[error("Audio error: {0}")]
    AudioError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
