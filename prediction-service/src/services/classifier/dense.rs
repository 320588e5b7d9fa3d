//! Dense feed-forward networks exported as JSON.
//!
//! Layout matches a Keras `Dense` stack: each layer carries a kernel of shape
//! `[inputs, units]`, a bias of `units` and an activation.

use super::{Classifier, DEFAULT_THRESHOLD};
use crate::error::PredictionError;
use anyhow::{bail, ensure, Context};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    fn apply(self, x: &mut Array2<f32>) {
        match self {
            Activation::Linear => {}
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Sigmoid => x.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => x.mapv_inplace(f32::tanh),
            Activation::Softmax => {
                for mut row in x.axis_iter_mut(Axis(0)) {
                    let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct DenseDocument {
    format: String,
    #[serde(default)]
    inputs: Option<Vec<String>>,
    #[serde(default)]
    threshold: Option<f32>,
    layers: Vec<LayerDocument>,
}

#[derive(Debug, Deserialize)]
struct LayerDocument {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    #[serde(default)]
    activation: Activation,
}

#[derive(Debug)]
struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

#[derive(Debug)]
pub struct DenseClassifier {
    inputs: Option<Vec<String>>,
    input_width: usize,
    threshold: f32,
    layers: Vec<DenseLayer>,
}

impl DenseClassifier {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read model file {}", path.display()))?;
        Self::from_slice(&bytes)
            .with_context(|| format!("invalid dense model {}", path.display()))
    }

    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let doc: DenseDocument =
            serde_json::from_slice(bytes).context("model document is not valid JSON")?;

        ensure!(
            doc.format == "dense",
            "unsupported model format '{}', expected 'dense'",
            doc.format
        );
        ensure!(!doc.layers.is_empty(), "model has no layers");

        let mut layers = Vec::with_capacity(doc.layers.len());
        let mut width: Option<usize> = None;

        for (idx, layer) in doc.layers.into_iter().enumerate() {
            let rows = layer.weights.len();
            let cols = layer.weights.first().map(Vec::len).unwrap_or(0);
            ensure!(rows > 0 && cols > 0, "layer {} has an empty kernel", idx);
            ensure!(
                layer.weights.iter().all(|r| r.len() == cols),
                "layer {} kernel rows have different lengths",
                idx
            );
            ensure!(
                layer.bias.len() == cols,
                "layer {} bias has {} entries, kernel has {} units",
                idx,
                layer.bias.len(),
                cols
            );
            if let Some(prev) = width {
                ensure!(
                    prev == rows,
                    "layer {} expects {} inputs but the previous layer has {} units",
                    idx,
                    rows,
                    prev
                );
            }
            let values: Vec<f32> = layer.weights.into_iter().flatten().collect();
            if values.iter().chain(&layer.bias).any(|v| !v.is_finite()) {
                bail!("layer {} contains non-finite parameters", idx);
            }

            layers.push(DenseLayer {
                weights: Array2::from_shape_vec((rows, cols), values)?,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
            width = Some(cols);
        }

        let input_width = layers[0].weights.nrows();
        if let Some(inputs) = &doc.inputs {
            ensure!(
                inputs.len() == input_width,
                "model declares {} input names for {} inputs",
                inputs.len(),
                input_width
            );
        }

        let threshold = doc.threshold.unwrap_or(DEFAULT_THRESHOLD);
        ensure!(threshold.is_finite(), "decision threshold must be finite");

        Ok(Self {
            inputs: doc.inputs,
            input_width,
            threshold,
            layers,
        })
    }

    fn forward(&self, rows: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut x = rows.to_owned();
        for layer in &self.layers {
            x = x.dot(&layer.weights) + &layer.bias;
            layer.activation.apply(&mut x);
        }
        x
    }
}

impl Classifier for DenseClassifier {
    fn columns(&self) -> Option<&[String]> {
        self.inputs.as_deref()
    }

    fn threshold(&self) -> f32 {
        self.threshold
    }

    fn predict(&self, rows: ArrayView2<'_, f32>) -> Result<Vec<f32>, PredictionError> {
        if rows.ncols() != self.input_width {
            return Err(PredictionError::Inference(format!(
                "model expects {} features per row, got {}",
                self.input_width,
                rows.ncols()
            )));
        }

        let output = self.forward(rows);
        Ok(output.column(0).to_vec())
    }

    fn backend(&self) -> &'static str {
        "dense"
    }
}
