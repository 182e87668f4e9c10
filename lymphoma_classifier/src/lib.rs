pub mod config;
pub mod encoder;
pub mod error;
pub mod fallback;
pub mod head;
pub mod labels;
pub mod model_service;
pub mod orchestrator;
pub mod prediction;
pub mod preprocess;
pub mod scoring;
pub mod weights;

pub use error::{ClassifierError, ClassifierResult};
pub use model_service::{build_model_service, DummyModelService, InferenceModelService, ModelService};
pub use orchestrator::Orchestrator;
pub use prediction::{Classification, Prediction, PredictionSource};
