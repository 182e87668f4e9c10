//! Classification head stacked on the frozen encoder.
//!
//! The head is a sequence of hidden blocks `Linear -> BatchNorm1d -> ReLU ->
//! Dropout` followed by a final `Linear` to the class logits. Only the
//! evaluation-mode forward pass exists here: dropout is the identity and batch
//! normalization uses the running statistics stored in the checkpoint, so the
//! output for a sample never depends on the rest of its batch.
//!
//! Checkpoints are safetensors files keyed like a PyTorch `nn.Sequential`
//! named `classifier`: the linear of block `i` is `classifier.{4i}`, its batch
//! norm `classifier.{4i + 1}`, and the output linear `classifier.{4n}`.

use crate::error::{ClassifierError, ClassifierResult};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use safetensors::{Dtype, SafeTensors};
use std::{collections::HashSet, path::Path};

pub const KEY_PREFIX: &str = "classifier.";
const BATCH_NORM_EPS: f32 = 1e-5;

/// Layer widths of a head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadShape {
    pub input_dim: usize,
    pub hidden: Vec<usize>,
    pub num_classes: usize,
}

impl HeadShape {
    /// 1024 -> 512 -> 256 -> 3, trained with dropout 0.3 / 0.3 / 0.2.
    pub fn lymphoma(embedding_dim: usize) -> Self {
        Self {
            input_dim: embedding_dim,
            hidden: vec![1024, 512, 256],
            num_classes: 3,
        }
    }

    fn linear_index(&self, block: usize) -> usize {
        block * 4
    }

    /// Every parameter key the checkpoint must contain, with its shape.
    pub fn expected_parameters(&self) -> Vec<(String, Vec<usize>)> {
        let mut params = Vec::new();
        let mut in_dim = self.input_dim;
        for (block, &width) in self.hidden.iter().enumerate() {
            let linear = self.linear_index(block);
            let norm = linear + 1;
            params.push((format!("{KEY_PREFIX}{linear}.weight"), vec![width, in_dim]));
            params.push((format!("{KEY_PREFIX}{linear}.bias"), vec![width]));
            for field in ["weight", "bias", "running_mean", "running_var"] {
                params.push((format!("{KEY_PREFIX}{norm}.{field}"), vec![width]));
            }
            in_dim = width;
        }
        let output = self.linear_index(self.hidden.len());
        params.push((
            format!("{KEY_PREFIX}{output}.weight"),
            vec![self.num_classes, in_dim],
        ));
        params.push((format!("{KEY_PREFIX}{output}.bias"), vec![self.num_classes]));
        params
    }
}

#[derive(Debug, Clone)]
struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    fn forward(&self, input: ArrayView2<f32>) -> Array2<f32> {
        input.dot(&self.weight.t()) + &self.bias
    }
}

/// Batch norm folded into a per-feature affine transform.
#[derive(Debug, Clone)]
struct FrozenBatchNorm {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl FrozenBatchNorm {
    fn new(
        weight: Array1<f32>,
        bias: Array1<f32>,
        running_mean: Array1<f32>,
        running_var: Array1<f32>,
    ) -> Self {
        let scale = &weight / &running_var.mapv(|v| (v + BATCH_NORM_EPS).sqrt());
        let shift = &bias - &(&running_mean * &scale);
        Self { scale, shift }
    }

    fn forward(&self, input: Array2<f32>) -> Array2<f32> {
        input * &self.scale + &self.shift
    }
}

#[derive(Debug, Clone)]
struct HiddenBlock {
    linear: Linear,
    norm: FrozenBatchNorm,
}

#[derive(Debug, Clone)]
pub struct ClassificationHead {
    shape: HeadShape,
    blocks: Vec<HiddenBlock>,
    output: Linear,
}

impl ClassificationHead {
    pub fn load(path: &Path, shape: HeadShape) -> ClassifierResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            ClassifierError::WeightLoad(format!("cannot read checkpoint {:?}: {}", path, e))
        })?;
        let head = Self::from_safetensors(&bytes, shape)?;
        tracing::info!(
            "Loaded classification head from {:?} ({} hidden blocks)",
            path,
            head.blocks.len()
        );
        Ok(head)
    }

    pub fn from_safetensors(bytes: &[u8], shape: HeadShape) -> ClassifierResult<Self> {
        let tensors = SafeTensors::deserialize(bytes)
            .map_err(|e| ClassifierError::WeightLoad(format!("invalid checkpoint: {}", e)))?;

        let expected = shape.expected_parameters();
        check_keys(&tensors, &expected)?;

        let vector = |key: String| -> ClassifierResult<Array1<f32>> {
            let (dims, data) = read_f32(&tensors, &key)?;
            Array1::from_shape_vec(dims[0], data)
                .map_err(|e| ClassifierError::WeightLoad(format!("{}: {}", key, e)))
        };
        let matrix = |key: String| -> ClassifierResult<Array2<f32>> {
            let (dims, data) = read_f32(&tensors, &key)?;
            Array2::from_shape_vec((dims[0], dims[1]), data)
                .map_err(|e| ClassifierError::WeightLoad(format!("{}: {}", key, e)))
        };

        // Shapes were validated above, so only the values are read here.
        let mut blocks = Vec::with_capacity(shape.hidden.len());
        for block in 0..shape.hidden.len() {
            let linear = shape.linear_index(block);
            let norm = linear + 1;
            blocks.push(HiddenBlock {
                linear: Linear {
                    weight: matrix(format!("{KEY_PREFIX}{linear}.weight"))?,
                    bias: vector(format!("{KEY_PREFIX}{linear}.bias"))?,
                },
                norm: FrozenBatchNorm::new(
                    vector(format!("{KEY_PREFIX}{norm}.weight"))?,
                    vector(format!("{KEY_PREFIX}{norm}.bias"))?,
                    vector(format!("{KEY_PREFIX}{norm}.running_mean"))?,
                    vector(format!("{KEY_PREFIX}{norm}.running_var"))?,
                ),
            });
        }
        let output_index = shape.linear_index(shape.hidden.len());
        let output = Linear {
            weight: matrix(format!("{KEY_PREFIX}{output_index}.weight"))?,
            bias: vector(format!("{KEY_PREFIX}{output_index}.bias"))?,
        };

        Ok(Self {
            shape,
            blocks,
            output,
        })
    }

    /// Maps a `[batch, input_dim]` embedding matrix to `[batch, num_classes]` logits.
    pub fn classify(&self, embeddings: ArrayView2<f32>) -> ClassifierResult<Array2<f32>> {
        if embeddings.len_of(Axis(1)) != self.shape.input_dim {
            return Err(ClassifierError::Inference(format!(
                "embedding width {} does not match head input {}",
                embeddings.len_of(Axis(1)),
                self.shape.input_dim
            )));
        }

        let mut hidden = embeddings.to_owned();
        for block in &self.blocks {
            let projected = block.linear.forward(hidden.view());
            hidden = block.norm.forward(projected).mapv(|v| v.max(0.0));
        }
        Ok(self.output.forward(hidden.view()))
    }
}

fn is_ignored_key(key: &str) -> bool {
    key.ends_with(".num_batches_tracked")
}

fn check_keys(tensors: &SafeTensors, expected: &[(String, Vec<usize>)]) -> ClassifierResult<()> {
    let present: HashSet<&str> = tensors
        .names()
        .into_iter()
        .map(|name| name.as_str())
        .filter(|name| name.starts_with(KEY_PREFIX) && !is_ignored_key(name))
        .collect();
    let wanted: HashSet<&str> = expected.iter().map(|(key, _)| key.as_str()).collect();

    let mut missing: Vec<&str> = wanted.difference(&present).copied().collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(ClassifierError::WeightLoad(format!(
            "missing keys: {}",
            missing.join(", ")
        )));
    }

    let mut unexpected: Vec<&str> = present.difference(&wanted).copied().collect();
    if !unexpected.is_empty() {
        unexpected.sort_unstable();
        return Err(ClassifierError::WeightLoad(format!(
            "unexpected keys: {}",
            unexpected.join(", ")
        )));
    }

    for (key, shape) in expected {
        let view = tensors
            .tensor(key)
            .map_err(|e| ClassifierError::WeightLoad(format!("{}: {}", key, e)))?;
        if view.shape() != shape.as_slice() {
            return Err(ClassifierError::WeightLoad(format!(
                "shape mismatch for {}: expected {:?}, found {:?}",
                key,
                shape,
                view.shape()
            )));
        }
        if view.dtype() != Dtype::F32 {
            return Err(ClassifierError::WeightLoad(format!(
                "unsupported dtype {:?} for {}, expected F32",
                view.dtype(),
                key
            )));
        }
    }
    Ok(())
}

fn read_f32(tensors: &SafeTensors, key: &str) -> ClassifierResult<(Vec<usize>, Vec<f32>)> {
    let view = tensors
        .tensor(key)
        .map_err(|e| ClassifierError::WeightLoad(format!("{}: {}", key, e)))?;
    let data = view
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((view.shape().to_vec(), data))
}

/// Serializes parameters into a safetensors checkpoint.
#[cfg(test)]
pub(crate) fn checkpoint_bytes(params: &[(String, Vec<usize>, Vec<f32>)]) -> Vec<u8> {
    use safetensors::tensor::TensorView;

    let raw: Vec<(String, Vec<usize>, Vec<u8>)> = params
        .iter()
        .map(|(key, shape, values)| {
            let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            (key.clone(), shape.clone(), bytes)
        })
        .collect();
    let views: Vec<(String, TensorView)> = raw
        .iter()
        .map(|(key, shape, bytes)| {
            let view = TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap();
            (key.clone(), view)
        })
        .collect();
    safetensors::serialize(views, &None).unwrap()
}

/// Parameters for `shape` where every linear computes `sum(inputs) * scale`
/// per output and every batch norm is the identity.
#[cfg(test)]
pub(crate) fn uniform_parameters(
    shape: &HeadShape,
    scale: f32,
) -> Vec<(String, Vec<usize>, Vec<f32>)> {
    shape
        .expected_parameters()
        .into_iter()
        .map(|(key, dims)| {
            let len = dims.iter().product();
            let value = if key.ends_with("running_var") {
                1.0 - BATCH_NORM_EPS
            } else if key.ends_with(".weight") && dims.len() == 1 {
                1.0
            } else if key.ends_with(".weight") {
                scale
            } else {
                0.0
            };
            (key, dims, vec![value; len])
        })
        .collect()
}
