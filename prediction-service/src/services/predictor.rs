use crate::error::PredictionError;
use crate::models::{FeatureRecord, PredictionResponse, Variant};
use crate::services::artifacts::ArtifactStore;
use crate::services::classifier::classify;
use crate::services::render::ForcePlotRenderer;
use base64::{engine::general_purpose, Engine as _};
use ndarray::Array2;
use std::sync::Arc;

/// Runs the full request pipeline: artifacts, inference, attribution and
/// plot rendering. Blocking; call it from a blocking task.
#[derive(Clone)]
pub struct Predictor {
    artifacts: Arc<ArtifactStore>,
    renderer: Arc<ForcePlotRenderer>,
}

impl Predictor {
    pub fn new(artifacts: Arc<ArtifactStore>, renderer: Arc<ForcePlotRenderer>) -> Self {
        Self {
            artifacts,
            renderer,
        }
    }

    pub fn predict_and_explain(
        &self,
        variant: Variant,
        record: &FeatureRecord,
    ) -> Result<PredictionResponse, PredictionError> {
        let pair = self.artifacts.get(variant)?;
        self.artifacts.emit_diagnostics(variant, &pair);

        let classifier = pair.classifier.as_ref();
        let row: Vec<f32> = match classifier.columns() {
            Some(columns) => record.project(columns).map_err(PredictionError::Inference)?,
            None => record.values().to_vec(),
        }
        .into_iter()
        .map(|v| v as f32)
        .collect();

        let input = Array2::from_shape_vec((1, row.len()), row)
            .map_err(|e| PredictionError::Internal(format!("input shape: {}", e)))?;
        let raw = classifier
            .predict(input.view())?
            .first()
            .copied()
            .ok_or_else(|| PredictionError::Inference("model returned no output".to_string()))?;
        let diabetes = classify(raw, classifier.threshold())?;

        let explanation = pair.explainer.explain(record, classifier)?;
        tracing::debug!(
            %variant,
            raw,
            diabetes,
            base_value = explanation.base_value,
            "Prediction computed"
        );

        let png = self.renderer.render(&explanation)?;

        Ok(PredictionResponse {
            diabetes,
            image_base64: general_purpose::STANDARD.encode(png),
        })
    }
}
