//! ONNX Runtime backend for graphs exported from Keras (`tf2onnx`).

use super::{Classifier, DEFAULT_THRESHOLD};
use crate::error::PredictionError;
use anyhow::Context;
use ndarray::{Array2, ArrayView2};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;

pub struct OnnxClassifier {
    // `Session::run` needs exclusive access.
    session: Mutex<Session>,
    output_name: String,
}

impl OnnxClassifier {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        tracing::info!(path = %path.display(), "Loading ONNX model");

        let session = Session::builder()
            .context("failed to create session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set optimization level")?
            .commit_from_file(path)
            .with_context(|| format!("failed to load ONNX model {}", path.display()))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("ONNX model defines no outputs")?;

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn columns(&self) -> Option<&[String]> {
        None
    }

    fn threshold(&self) -> f32 {
        DEFAULT_THRESHOLD
    }

    fn predict(&self, rows: ArrayView2<'_, f32>) -> Result<Vec<f32>, PredictionError> {
        let n_rows = rows.nrows();
        let input: Array2<f32> = rows.to_owned();

        let input_tensor = Value::from_array(input)
            .map_err(|e| PredictionError::Inference(format!("tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| PredictionError::Inference(format!("inference failed: {}", e)))?;

        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| PredictionError::Inference("model returned no output".to_string()))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictionError::Inference(format!("extract error: {}", e)))?;

        if n_rows == 0 || data.len() < n_rows {
            return Err(PredictionError::Inference(format!(
                "model returned {} values for {} rows",
                data.len(),
                n_rows
            )));
        }

        let stride = data.len() / n_rows;
        Ok((0..n_rows).map(|i| data[i * stride]).collect())
    }

    fn backend(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(all(test, feature = "onnx"))]
mod tests {
    use super::*;
    use crate::services::classifier::load_classifier;
    use std::path::PathBuf;

    /// `input[batch, 8]` times weights whose first column is 0.1..0.8, plus
    /// bias `[0.5, 2.0]`. Each row yields two outputs.
    fn fixture() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/linear_two_outputs.onnx")
    }

    #[test]
    fn test_predict_takes_first_output_of_each_row() {
        let classifier = OnnxClassifier::load(&fixture()).unwrap();

        let mut rows = Array2::<f32>::zeros((3, 8));
        rows.row_mut(0).fill(1.0);
        rows[[2, 0]] = 2.0;

        let outputs = classifier.predict(rows.view()).unwrap();

        assert_eq!(outputs.len(), 3);
        for (got, want) in outputs.iter().zip([4.1f32, 0.5, 0.7]) {
            assert!((got - want).abs() < 1e-5, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_onnx_extension_selects_backend() {
        let classifier = load_classifier(&fixture()).unwrap();
        assert_eq!(classifier.backend(), "onnx");
        assert!(classifier.columns().is_none());
    }
}
