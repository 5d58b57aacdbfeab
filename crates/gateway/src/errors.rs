use crate::decoder::DecodeError;
use crate::normalizer::NormalizeError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inference::ModelError;
use serde_json::json;
use thiserror::Error;

/// Failures of a detection request, each mapped to one HTTP status.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Model not loaded. Please ensure your model file exists at {model_path}")]
    ServiceUnavailable { model_path: String },

    #[error("{0}")]
    Validation(String),

    #[error("Error processing image: {0}")]
    Processing(String),
}

impl DetectError {
    pub fn service_unavailable(model_path: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            model_path: model_path.into(),
        }
    }

    pub fn invalid_content_type() -> Self {
        Self::Validation("File must be an image (jpg, jpeg, png)".to_string())
    }

    pub fn from_model_error(err: ModelError, model_path: &str) -> Self {
        match err {
            ModelError::NotLoaded => Self::service_unavailable(model_path),
            ModelError::Inference(e) => Self::Processing(format!("{e:#}")),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used on the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Validation(_) => "validation",
            Self::Processing(_) => "processing",
        }
    }
}

impl From<DecodeError> for DetectError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnsupportedContentType(_) => Self::invalid_content_type(),
            other => Self::Processing(other.to_string()),
        }
    }
}

impl From<NormalizeError> for DetectError {
    fn from(err: NormalizeError) -> Self {
        Self::Processing(err.to_string())
    }
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
