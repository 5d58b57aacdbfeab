use crate::{
    decoder::{self, DecodedImage},
    errors::DetectError,
    metrics::GatewayMetrics,
    normalizer,
    schema::{DetectionResult, ImageSize},
};
use common::{span, span_debug};
use inference::ModelHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Serves detection requests against a shared model.
///
/// Concurrent requests are allowed. Inference runs on the blocking pool, and
/// the model serializes access to its session internally.
#[derive(Clone)]
pub struct RequestHandler {
    model: Arc<ModelHandle>,
    model_path: String,
    timeout: Option<Duration>,
    metrics: GatewayMetrics,
}

impl RequestHandler {
    pub fn new(model: Arc<ModelHandle>, model_path: impl Into<String>) -> Self {
        Self {
            model,
            model_path: model_path.into(),
            timeout: None,
            metrics: GatewayMetrics::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn unavailable(&self) -> DetectError {
        DetectError::service_unavailable(self.model_path.clone())
    }

    /// Record a request that failed before reaching [`RequestHandler::handle`]
    /// and hand the error back for the response.
    pub fn reject(&self, err: DetectError, started: Instant) -> DetectError {
        self.record_failure(started.elapsed(), &err);
        err
    }

    /// Detect objects in one uploaded image.
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn handle(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<DetectionResult, DetectError> {
        let started = Instant::now();
        let result = self.run(bytes, content_type).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(detection) => {
                self.metrics
                    .record_success(elapsed, detection.num_detections());
                tracing::info!(
                    num_detections = detection.num_detections(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Detection request served"
                );
            }
            Err(err) => self.record_failure(elapsed, err),
        }

        result
    }

    fn record_failure(&self, elapsed: Duration, err: &DetectError) {
        self.metrics.record_failure(elapsed, err);
        match err {
            DetectError::Processing(_) => {
                tracing::error!(error = %err, kind = err.kind(), "Detection request failed")
            }
            _ => tracing::warn!(error = %err, kind = err.kind(), "Detection request rejected"),
        }
    }

    async fn run(&self, bytes: Vec<u8>, content_type: &str) -> Result<DetectionResult, DetectError> {
        if !self.model.is_loaded() {
            return Err(self.unavailable());
        }
        if !decoder::is_image_content_type(content_type) {
            return Err(DetectError::invalid_content_type());
        }

        let model = Arc::clone(&self.model);
        let model_path = self.model_path.clone();
        let content_type = content_type.to_string();
        let task = tokio::task::spawn_blocking(move || {
            detect_blocking(&model, &model_path, &bytes, &content_type)
        });

        let joined = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                DetectError::Processing(format!(
                    "inference timed out after {} ms",
                    limit.as_millis()
                ))
            })?,
            None => task.await,
        };

        joined.map_err(|e| DetectError::Processing(format!("detection task failed: {e}")))?
    }
}

fn detect_blocking(
    model: &ModelHandle,
    model_path: &str,
    bytes: &[u8],
    content_type: &str,
) -> Result<DetectionResult, DetectError> {
    let decoded: DecodedImage = {
        let _s = span!("decode");
        decoder::decode(bytes, content_type)?
    };
    let image_size = ImageSize {
        width: decoded.width(),
        height: decoded.height(),
    };

    let boxes = model
        .infer(&decoded.image)
        .map_err(|e| DetectError::from_model_error(e, model_path))?;

    let classes = model
        .class_names()
        .ok_or_else(|| DetectError::service_unavailable(model_path))?;
    let detections = {
        let _s = span_debug!("normalize_detections");
        normalizer::normalize(&boxes, classes)?
    };

    Ok(DetectionResult::new(detections, image_size))
}
