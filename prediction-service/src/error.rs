//! Request-level errors of the prediction pipeline.
//!
//! Every failure is turned into a JSON body naming its kind. Internal causes
//! are logged and never returned to the caller.

use crate::models::Variant;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("missing required field(s): {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("field '{field}' {reason}")]
    InvalidField { field: String, reason: String },

    #[error("failed to load {variant} model: {reason:#}")]
    ModelLoad {
        variant: Variant,
        reason: anyhow::Error,
    },

    #[error("failed to load {variant} explainer: {reason:#}")]
    ExplainerLoad {
        variant: Variant,
        reason: anyhow::Error,
    },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("rendering failed: {0}")]
    Render(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PredictionError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionError::MalformedBody(_) => "MalformedBodyError",
            PredictionError::MissingFields(_) => "MissingFieldError",
            PredictionError::InvalidField { .. } => "InvalidFieldError",
            PredictionError::ModelLoad { .. } => "ModelLoadError",
            PredictionError::ExplainerLoad { .. } => "ExplainerLoadError",
            PredictionError::Inference(_) => "InferenceError",
            PredictionError::Render(_) => "RenderError",
            PredictionError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PredictionError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            PredictionError::MissingFields(_) | PredictionError::InvalidField { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show to callers. Client errors echo the validation
    /// message; server errors only name the failing stage.
    fn public_message(&self) -> String {
        match self {
            PredictionError::MalformedBody(_)
            | PredictionError::MissingFields(_)
            | PredictionError::InvalidField { .. } => self.to_string(),
            PredictionError::ModelLoad { variant, .. } => {
                format!("the {} model could not be loaded", variant)
            }
            PredictionError::ExplainerLoad { variant, .. } => {
                format!("the {} explainer could not be loaded", variant)
            }
            PredictionError::Inference(_) => "model inference failed".to_string(),
            PredictionError::Render(_) => "explanation plot could not be rendered".to_string(),
            PredictionError::Internal(_) => "internal server error".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_fields: Option<Vec<String>>,
}

impl IntoResponse for PredictionError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Prediction failed");
        } else {
            tracing::info!(kind = self.kind(), error = %self, "Rejected prediction request");
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.public_message(),
            missing_fields: match self {
                PredictionError::MissingFields(fields) => Some(fields),
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}
