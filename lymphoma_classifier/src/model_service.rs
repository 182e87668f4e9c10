use crate::{
    config::{FallbackPolicy, ModelConfig, ModelMode},
    error::{ClassifierError, ClassifierResult},
    fallback::fallback_prediction,
    orchestrator::Orchestrator,
    prediction::{Classification, PredictionSource},
    weights,
};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn classify(&self, image_path: &Path) -> ClassifierResult<Classification>;

    fn mode(&self) -> ModelMode;
}

/// Demo stand-in that never looks at the image.
#[derive(Debug, Clone, Default)]
pub struct DummyModelService;

#[async_trait]
impl ModelService for DummyModelService {
    async fn classify(&self, image_path: &Path) -> ClassifierResult<Classification> {
        tracing::debug!("Dummy classification for {:?}", image_path);
        Ok(Classification {
            prediction: fallback_prediction(),
            source: PredictionSource::Dummy,
        })
    }

    fn mode(&self) -> ModelMode {
        ModelMode::Dummy
    }
}

#[derive(Clone)]
pub struct InferenceModelService {
    orchestrator: Arc<Orchestrator>,
    policy: FallbackPolicy,
}

impl InferenceModelService {
    pub fn new(orchestrator: Orchestrator, policy: FallbackPolicy) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            policy,
        }
    }
}

#[async_trait]
impl ModelService for InferenceModelService {
    async fn classify(&self, image_path: &Path) -> ClassifierResult<Classification> {
        let orchestrator = self.orchestrator.clone();
        let path: PathBuf = image_path.to_path_buf();

        let result = tokio::task::spawn_blocking(move || orchestrator.predict(&path))
            .await
            .map_err(|e| ClassifierError::Inference(format!("inference task failed: {}", e)))
            .and_then(|prediction| prediction);

        match result {
            Ok(prediction) => Ok(Classification {
                prediction,
                source: PredictionSource::Model,
            }),
            Err(err) if err.is_per_request() && self.policy == FallbackPolicy::Lenient => {
                tracing::warn!(
                    fallback = true,
                    "Model failed on {:?}, answering with fallback prediction: {}",
                    image_path,
                    err
                );
                Ok(Classification {
                    prediction: fallback_prediction(),
                    source: PredictionSource::Fallback,
                })
            }
            Err(err) => {
                tracing::error!("Classification of {:?} failed: {}", image_path, err);
                Err(err)
            }
        }
    }

    fn mode(&self) -> ModelMode {
        ModelMode::Real
    }
}

/// Builds the service for the configured mode. In real mode the model files
/// are resolved and loaded before this returns; a load failure is returned as
/// an error and no service is built.
pub async fn build_model_service(config: &ModelConfig) -> ClassifierResult<Arc<dyn ModelService>> {
    match config.mode {
        ModelMode::Dummy => {
            tracing::warn!("Model mode is dummy: predictions are not computed from images");
            Ok(Arc::new(DummyModelService))
        }
        ModelMode::Real => {
            weights::ensure_local(config).await?;

            let load_config = config.clone();
            let orchestrator = tokio::task::spawn_blocking(move || Orchestrator::load(&load_config))
                .await
                .map_err(|e| ClassifierError::WeightLoad(format!("model loading task failed: {}", e)))??;

            tracing::info!(
                "Model loaded, fallback policy is {}",
                config.fallback.as_str()
            );
            Ok(Arc::new(InferenceModelService::new(
                orchestrator,
                config.fallback,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        orchestrator::tests::{biased_head, FixedEncoder},
        preprocess::Preprocessor,
    };
    use image::{ImageBuffer, Rgb};

    fn service(policy: FallbackPolicy) -> InferenceModelService {
        let orchestrator = Orchestrator::from_parts(
            Preprocessor::default(),
            FixedEncoder(vec![1.0, 0.0, 0.0]),
            biased_head(3, 1),
        );
        InferenceModelService::new(orchestrator, policy)
    }

    #[tokio::test]
    async fn test_model_prediction_is_marked_as_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(8, 8, Rgb([1, 2, 3]))
            .save(&path)
            .unwrap();

        let classification = service(FallbackPolicy::Lenient).classify(&path).await.unwrap();
        assert_eq!(classification.source, PredictionSource::Model);
        assert_eq!(classification.prediction.label, "Follicular Lymphoma");
        assert!(!classification.is_fabricated());
    }

    #[tokio::test]
    async fn test_lenient_policy_falls_back_on_corrupted_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupted.jpg");
        std::fs::write(&path, b"\xFF\xD8\xFF garbage").unwrap();

        let classification = service(FallbackPolicy::Lenient).classify(&path).await.unwrap();
        assert_eq!(classification.source, PredictionSource::Fallback);
        assert_eq!(classification.prediction.label, "Diffuse Large B-Cell Lymphoma");
        assert!(classification.is_fabricated());
    }

    #[tokio::test]
    async fn test_strict_policy_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupted.jpg");
        std::fs::write(&path, b"\xFF\xD8\xFF garbage").unwrap();

        let err = service(FallbackPolicy::Strict).classify(&path).await.unwrap_err();
        assert!(matches!(err, ClassifierError::ImageDecode { .. }));
    }

    #[tokio::test]
    async fn test_unloaded_model_is_never_masked() {
        let service = InferenceModelService::new(Orchestrator::unloaded(), FallbackPolicy::Lenient);
        let err = service.classify(Path::new("x.png")).await.unwrap_err();
        assert!(matches!(err, ClassifierError::ModelNotLoaded));
    }

    #[tokio::test]
    async fn test_dummy_service() {
        let service = DummyModelService;
        let classification = service.classify(Path::new("ignored.png")).await.unwrap();
        assert_eq!(classification.source, PredictionSource::Dummy);
        assert_eq!(service.mode(), ModelMode::Dummy);
    }

    #[tokio::test]
    async fn test_build_fails_when_weights_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            mode: ModelMode::Real,
            fallback: FallbackPolicy::Lenient,
            model_dir: dir.path().to_path_buf(),
            encoder_file: "clip_vision.onnx".into(),
            checkpoint_file: "head.safetensors".into(),
            embedding_dim: 768,
            num_instances: 1,
            device: crate::config::ExecutionDevice::Cpu,
            source: crate::config::ModelSource::Local,
        };
        assert!(build_model_service(&config).await.is_err());

        let dummy = ModelConfig {
            mode: ModelMode::Dummy,
            ..config
        };
        let service = build_model_service(&dummy).await.ok().unwrap();
        assert_eq!(service.mode(), ModelMode::Dummy);
    }
}
