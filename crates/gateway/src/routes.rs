use crate::{
    errors::DetectError,
    schema::{DetectionResult, HealthResponse},
    state::AppState,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    routing::{get, post},
};
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const UPLOAD_FIELD: &str = "file";

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/detect", post(detect))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Object Detection API".to_string(),
        model_loaded: state.handler.model_loaded(),
        model_path: state.handler.model_path().to_string(),
    })
}

async fn detect(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionResult>, DetectError> {
    let handler = &state.handler;
    let started = Instant::now();

    // Model availability is reported before anything about the upload.
    if !handler.model_loaded() {
        return Err(handler.reject(handler.unavailable(), started));
    }

    let (bytes, content_type) = read_upload(multipart)
        .await
        .map_err(|err| handler.reject(err, started))?;

    handler.handle(bytes, &content_type).await.map(Json)
}

/// Bytes and declared content type of the `file` part.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(Vec<u8>, String), DetectError> {
    let mut multipart = multipart.map_err(|e| DetectError::Validation(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectError::Validation(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DetectError::Validation(e.body_text()))?;

        return Ok((bytes.to_vec(), content_type));
    }

    Err(DetectError::Validation(format!(
        "Missing multipart field `{UPLOAD_FIELD}`"
    )))
}
