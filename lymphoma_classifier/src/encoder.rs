use crate::{
    config::ExecutionDevice,
    error::{ClassifierError, ClassifierResult},
};
use ndarray::{Array, Array2, ArrayD, Ix2, Ix4};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProviderDispatch},
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Input and output names of a CLIP vision-with-projection ONNX export.
pub const PIXEL_VALUES_INPUT: &str = "pixel_values";
pub const IMAGE_EMBEDS_OUTPUT: &str = "image_embeds";

/// Frozen image encoder: `[batch, 3, H, W]` pixels to `[batch, dim]` embeddings.
pub trait ImageEncoder: Send + Sync + 'static {
    fn encode(&self, pixel_values: &Array<f32, Ix4>) -> ClassifierResult<Array2<f32>>;
}

/// Runs the encoder with ONNX Runtime. Sessions are pooled and picked round
/// robin, each guarded by its own lock.
#[derive(Clone)]
pub struct OrtImageEncoder {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
}

impl OrtImageEncoder {
    pub fn new(
        model_path: &Path,
        num_instances: usize,
        device: ExecutionDevice,
    ) -> ClassifierResult<Self> {
        let num_instances = num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()
                    .map_err(|e| load_error(model_path, e))?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(|e| load_error(model_path, e))?
                    .with_execution_providers(execution_providers(device))
                    .map_err(|e| load_error(model_path, e))?
                    .commit_from_file(model_path)
                    .map_err(|e| load_error(model_path, e))?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<ClassifierResult<Vec<_>>>()?;

        tracing::info!(
            "Created {} ONNX encoder sessions, device {}",
            num_instances,
            device.as_str()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl ImageEncoder for OrtImageEncoder {
    fn encode(&self, pixel_values: &Array<f32, Ix4>) -> ClassifierResult<Array2<f32>> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ClassifierError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Encoding image with session {}", index);
        let owned_buffer;
        let input_view = if pixel_values.view().is_standard_layout() {
            pixel_values.view()
        } else {
            owned_buffer = pixel_values.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![PIXEL_VALUES_INPUT => tensor_ref])
            .map_err(|e| ClassifierError::Inference(format!("encoder failed: {}", e)))?;

        let (shape, data) = outputs[IMAGE_EMBEDS_OUTPUT]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {}", e)))?;

        let embeddings = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ClassifierError::Inference(format!("invalid tensor shape: {}", e)))?;

        embeddings.into_dimensionality::<Ix2>().map_err(|e| {
            ClassifierError::Inference(format!("expected a [batch, dim] embedding: {}", e))
        })
    }
}

/// Providers registered ahead of the CPU one. A provider that cannot be
/// registered is skipped by ONNX Runtime with a warning.
fn execution_providers(device: ExecutionDevice) -> Vec<ExecutionProviderDispatch> {
    match device {
        ExecutionDevice::Cuda => vec![CUDAExecutionProvider::default().build()],
        ExecutionDevice::Cpu => Vec::new(),
    }
}

fn load_error(model_path: &Path, err: impl std::fmt::Display) -> ClassifierError {
    ClassifierError::WeightLoad(format!(
        "failed to load encoder {:?}: {}",
        model_path, err
    ))
}
