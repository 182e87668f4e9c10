//! Load-once, predict-many inference pipeline.
//!
//! An [`Orchestrator`] is either unloaded or ready. A ready orchestrator holds
//! the encoder, the head and the preprocessor for the lifetime of the process
//! and is only ever read, so one instance can be shared across requests.

use crate::{
    config::ModelConfig,
    encoder::{ImageEncoder, OrtImageEncoder},
    error::{ClassifierError, ClassifierResult},
    head::{ClassificationHead, HeadShape},
    labels::{self, CLASS_CODES},
    prediction::Prediction,
    preprocess::Preprocessor,
    scoring::{argmax, format_confidence, l2_normalize_rows, softmax},
};
use std::path::Path;

struct ReadyModel {
    preprocessor: Preprocessor,
    encoder: Box<dyn ImageEncoder>,
    head: ClassificationHead,
}

enum ModelState {
    Unloaded,
    Ready(Box<ReadyModel>),
}

pub struct Orchestrator {
    state: ModelState,
}

impl Orchestrator {
    pub fn unloaded() -> Self {
        Self {
            state: ModelState::Unloaded,
        }
    }

    /// Loads the ONNX encoder and the head checkpoint named by `config`.
    /// Any failure leaves nothing half-loaded behind.
    pub fn load(config: &ModelConfig) -> ClassifierResult<Self> {
        config.validate()?;

        let encoder_path = config.encoder_path();
        let checkpoint_path = config.checkpoint_path();
        tracing::info!(
            "Loading model: encoder {:?}, checkpoint {:?}",
            encoder_path,
            checkpoint_path
        );

        let head = ClassificationHead::load(&checkpoint_path, HeadShape::lymphoma(config.embedding_dim))?;
        let encoder = OrtImageEncoder::new(&encoder_path, config.num_instances, config.device)?;

        Ok(Self::from_parts(Preprocessor::default(), encoder, head))
    }

    pub fn from_parts(
        preprocessor: Preprocessor,
        encoder: impl ImageEncoder,
        head: ClassificationHead,
    ) -> Self {
        Self {
            state: ModelState::Ready(Box::new(ReadyModel {
                preprocessor,
                encoder: Box::new(encoder),
                head,
            })),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn predict(&self, image_path: &Path) -> ClassifierResult<Prediction> {
        let model = match &self.state {
            ModelState::Ready(model) => model,
            ModelState::Unloaded => return Err(ClassifierError::ModelNotLoaded),
        };

        let pixel_values = model.preprocessor.preprocess(image_path)?;

        let mut embeddings = model.encoder.encode(&pixel_values)?;
        l2_normalize_rows(&mut embeddings)?;

        let logits = model.head.classify(embeddings.view())?;
        let logits: Vec<f32> = logits.row(0).to_vec();
        if logits.is_empty() || logits.iter().any(|l| !l.is_finite()) {
            return Err(ClassifierError::Inference(format!(
                "invalid logits {:?}",
                logits
            )));
        }

        let probabilities = softmax(&logits);
        let index = argmax(&probabilities)
            .ok_or_else(|| ClassifierError::Inference("empty probability vector".into()))?;
        let code = CLASS_CODES.get(index).copied().ok_or_else(|| {
            ClassifierError::Inference(format!("class index {} out of range", index))
        })?;

        tracing::debug!(
            "Predicted {} with probabilities {:?}",
            code,
            probabilities
        );

        Ok(Prediction {
            label: labels::display_name(code).to_string(),
            confidence: format_confidence(probabilities[index] * 100.0),
            description: labels::description(code).to_string(),
        })
    }
}
