use serde::Serialize;

/// A labelled result ready for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: String,
    pub description: String,
}

/// Where a prediction came from. Anything other than `Model` was not computed
/// from the uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Model,
    Fallback,
    Dummy,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionSource::Model => "model",
            PredictionSource::Fallback => "fallback",
            PredictionSource::Dummy => "dummy",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub prediction: Prediction,
    pub source: PredictionSource,
}

impl Classification {
    pub fn is_fabricated(&self) -> bool {
        self.source != PredictionSource::Model
    }
}
