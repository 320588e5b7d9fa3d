//! Trained classifier backends.
//!
//! A classifier maps a batch of feature rows to the first output element of
//! each row. The backend is chosen by the artifact's file extension.

mod dense;
#[cfg(feature = "onnx")]
mod onnx;

pub use dense::{Activation, DenseClassifier};
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

use crate::error::PredictionError;
use anyhow::bail;
use ndarray::ArrayView2;
use std::path::Path;
use std::sync::Arc;

/// Default decision threshold applied to the model's first output.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

pub trait Classifier: Send + Sync {
    /// Input column names, when the artifact declares them.
    fn columns(&self) -> Option<&[String]>;

    fn threshold(&self) -> f32 {
        DEFAULT_THRESHOLD
    }

    /// Output element 0 for every input row.
    fn predict(&self, rows: ArrayView2<'_, f32>) -> Result<Vec<f32>, PredictionError>;

    fn backend(&self) -> &'static str;
}

pub fn load_classifier(path: &Path) -> anyhow::Result<Arc<dyn Classifier>> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Arc::new(DenseClassifier::load(path)?)),
        #[cfg(feature = "onnx")]
        Some("onnx") => Ok(Arc::new(OnnxClassifier::load(path)?)),
        #[cfg(not(feature = "onnx"))]
        Some("onnx") => bail!("ONNX models need the service built with the `onnx` feature"),
        Some(ext) => bail!("unsupported model format '.{}'", ext),
        None => bail!("model path has no file extension"),
    }
}

/// Turn the raw first output into the binary class label.
pub fn classify(raw: f32, threshold: f32) -> Result<bool, PredictionError> {
    if !raw.is_finite() {
        return Err(PredictionError::Inference(format!(
            "model produced a non-finite output ({})",
            raw
        )));
    }
    Ok(raw >= threshold)
}
