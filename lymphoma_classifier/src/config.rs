use crate::error::{ClassifierError, ClassifierResult};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default, deserialize_with = "deserialize_model_mode")]
    pub mode: ModelMode,
    #[serde(default, deserialize_with = "deserialize_fallback_policy")]
    pub fallback: FallbackPolicy,
    pub model_dir: PathBuf,
    pub encoder_file: String,
    pub checkpoint_file: String,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Encoder sessions to create. Each one holds its own copy of the
    /// encoder weights, so more than one is an explicit opt-in.
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default, deserialize_with = "deserialize_execution_device")]
    pub device: ExecutionDevice,
    #[serde(default)]
    pub source: ModelSource,
}

fn default_embedding_dim() -> usize {
    768
}

fn default_model_instances() -> usize {
    1
}

impl ModelConfig {
    pub fn encoder_path(&self) -> PathBuf {
        self.model_dir.join(&self.encoder_file)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.model_dir.join(&self.checkpoint_file)
    }

    pub fn validate(&self) -> ClassifierResult<()> {
        for path in [self.encoder_path(), self.checkpoint_path()] {
            if !path.exists() {
                return Err(ClassifierError::WeightLoad(format!(
                    "Model file not found: {:?}",
                    path
                )));
            }
        }
        Ok(())
    }
}

/// Where model files come from before they are loaded from `model_dir`.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelSource {
    #[default]
    Local,
    Remote {
        repo_id: String,
        #[serde(default = "default_revision")]
        revision: String,
        #[serde(default = "default_endpoint")]
        endpoint: String,
    },
}

fn default_revision() -> String {
    "main".into()
}

fn default_endpoint() -> String {
    "https://huggingface.co".into()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelMode {
    #[default]
    Real,
    Dummy,
}

impl ModelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelMode::Real => "real",
            ModelMode::Dummy => "dummy",
        }
    }
}

impl TryFrom<String> for ModelMode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "real" => Ok(Self::Real),
            "dummy" => Ok(Self::Dummy),
            other => Err(format!(
                "{} is not a supported model mode. Use either `real` or `dummy`.",
                other
            )),
        }
    }
}

/// Where the encoder runs. `Cuda` registers the CUDA execution provider and
/// ONNX Runtime keeps using the CPU when no GPU is usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionDevice {
    #[default]
    Cuda,
    Cpu,
}

impl ExecutionDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionDevice::Cuda => "cuda",
            ExecutionDevice::Cpu => "cpu",
        }
    }
}

impl TryFrom<String> for ExecutionDevice {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "cpu" => Ok(Self::Cpu),
            other => Err(format!(
                "{} is not a supported device. Use either `cuda` or `cpu`.",
                other
            )),
        }
    }
}

/// What to do when the model cannot classify an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Answer with the flagged stand-in prediction.
    #[default]
    Lenient,
    /// Report the failure to the caller.
    Strict,
}

impl FallbackPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackPolicy::Lenient => "lenient",
            FallbackPolicy::Strict => "strict",
        }
    }
}

impl TryFrom<String> for FallbackPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!(
                "{} is not a supported fallback policy. Use either `lenient` or `strict`.",
                other
            )),
        }
    }
}

fn deserialize_model_mode<'de, D>(deserializer: D) -> Result<ModelMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

fn deserialize_execution_device<'de, D>(deserializer: D) -> Result<ExecutionDevice, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

fn deserialize_fallback_policy<'de, D>(deserializer: D) -> Result<FallbackPolicy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(ModelMode::try_from("REAL".to_string()), Ok(ModelMode::Real));
        assert_eq!(ModelMode::try_from("dummy".to_string()), Ok(ModelMode::Dummy));
        assert!(ModelMode::try_from("mock".to_string()).is_err());
        assert_eq!(
            FallbackPolicy::try_from("Strict".to_string()),
            Ok(FallbackPolicy::Strict)
        );
        assert!(FallbackPolicy::try_from("silent".to_string()).is_err());
        assert_eq!(
            ExecutionDevice::try_from("CPU".to_string()),
            Ok(ExecutionDevice::Cpu)
        );
        assert!(ExecutionDevice::try_from("tpu".to_string()).is_err());
    }

    #[test]
    fn test_defaults_load_a_single_encoder() {
        assert_eq!(default_model_instances(), 1);
        assert_eq!(ExecutionDevice::default(), ExecutionDevice::Cuda);
    }

    #[test]
    fn test_validate_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            mode: ModelMode::Real,
            fallback: FallbackPolicy::Strict,
            model_dir: dir.path().to_path_buf(),
            encoder_file: "clip_vision.onnx".into(),
            checkpoint_file: "head.safetensors".into(),
            embedding_dim: 768,
            num_instances: 1,
            device: ExecutionDevice::Cpu,
            source: ModelSource::Local,
        };
        assert!(matches!(config.validate(), Err(ClassifierError::WeightLoad(_))));

        std::fs::write(config.encoder_path(), b"onnx").unwrap();
        std::fs::write(config.checkpoint_path(), b"weights").unwrap();
        assert!(config.validate().is_ok());
    }
}
