use crate::error::PredictionError;
use crate::models::{FeatureRecord, PredictionResponse, Variant};
use crate::services::metrics::record_prediction;
use crate::startup::AppState;
use axum::{body::Bytes, extract::State, Extension, Json};
use service_core::middleware::RequestId;
use std::time::Instant;
use tracing::Span;

pub async fn predict_good(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> Result<Json<PredictionResponse>, PredictionError> {
    predict(state, Variant::Good, request_id, body).await
}

pub async fn predict_bad(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> Result<Json<PredictionResponse>, PredictionError> {
    predict(state, Variant::Bad, request_id, body).await
}

#[tracing::instrument(
    name = "predict",
    skip_all,
    fields(variant = %variant, request_id = tracing::field::Empty)
)]
async fn predict(
    state: AppState,
    variant: Variant,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> Result<Json<PredictionResponse>, PredictionError> {
    if let Some(Extension(RequestId(id))) = &request_id {
        Span::current().record("request_id", id.as_str());
    }

    let start = Instant::now();
    let result = run(&state, variant, &body).await;

    let outcome = match &result {
        Ok(response) => {
            tracing::info!(diabetes = response.diabetes, "Prediction served");
            "ok"
        }
        Err(e) => e.kind(),
    };
    record_prediction(variant, outcome, start.elapsed());

    result.map(Json)
}

/// Validation runs before any artifact is touched; everything after it is
/// CPU-bound and moves to the blocking pool.
async fn run(
    state: &AppState,
    variant: Variant,
    body: &[u8],
) -> Result<PredictionResponse, PredictionError> {
    let record = FeatureRecord::from_slice(body)?;

    let predictor = state.predictor.clone();
    let span = Span::current();
    tokio::task::spawn_blocking(move || {
        span.in_scope(|| predictor.predict_and_explain(variant, &record))
    })
    .await
    .map_err(|e| PredictionError::Internal(format!("prediction task failed: {}", e)))?
}
