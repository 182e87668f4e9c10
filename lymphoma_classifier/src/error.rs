use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Failed to decode image {path:?}: {reason}")]
    ImageDecode { path: PathBuf, reason: String },
    #[error("Failed to load model weights: {0}")]
    WeightLoad(String),
    #[error("Model is not loaded")]
    ModelNotLoaded,
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },
}

impl ClassifierError {
    /// Errors raised while turning one image into a prediction. Only these are
    /// eligible for the fallback prediction.
    pub fn is_per_request(&self) -> bool {
        matches!(
            self,
            ClassifierError::ImageDecode { .. } | ClassifierError::Inference(_)
        )
    }
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;
