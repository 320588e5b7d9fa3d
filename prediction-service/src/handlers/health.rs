use crate::models::Variant;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "prediction-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready once every variant's artifact files exist. Files are not parsed
/// here; a corrupt artifact still surfaces as a load error per request.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let missing: Vec<&str> = Variant::ALL
        .iter()
        .filter(|v| !state.artifacts.is_ready(**v))
        .map(|v| v.as_str())
        .collect();

    if missing.is_empty() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "missing_artifacts": missing })),
        )
    }
}
