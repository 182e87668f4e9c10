use crate::error::{ClassifierError, ClassifierResult};
use ndarray::{ArrayViewMut1, Axis};

/// Numerically stable softmax over a logit vector.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value. Ties resolve to the first occurrence.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .copied()
        .enumerate()
        .reduce(|best, item| if item.1 > best.1 { item } else { best })
        .map(|(index, _)| index)
}

pub fn format_confidence(percent: f32) -> String {
    format!("{:.2}%", percent)
}

/// Scales the embedding to unit length in place.
pub fn l2_normalize(mut embedding: ArrayViewMut1<f32>) -> ClassifierResult<()> {
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(ClassifierError::Inference(format!(
            "cannot normalize embedding with norm {}",
            norm
        )));
    }
    embedding.mapv_inplace(|v| v / norm);
    Ok(())
}

pub fn l2_normalize_rows(embeddings: &mut ndarray::Array2<f32>) -> ClassifierResult<()> {
    for row in embeddings.axis_iter_mut(Axis(0)) {
        l2_normalize(row)?;
    }
    Ok(())
}
