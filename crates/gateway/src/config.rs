use inference::InferenceConfig;
use std::env;
use std::time::Duration;

pub use common::Environment;

pub const DEFAULT_MODEL_PATH: &str = "model.pt";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub model_path: String,
    pub bind_addr: String,
    pub otel_endpoint: Option<String>,
    pub max_upload_bytes: usize,
    pub inference_timeout: Option<Duration>,
    pub inference: InferenceConfig,
}

impl GatewayConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let model_path =
            env::var("MODEL_PATH").unwrap_or_else(|_| DEFAULT_MODEL_PATH.to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let otel_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|s| !s.is_empty());

        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let inference_timeout = env::var("INFERENCE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let inference = InferenceConfig::from_env()?;

        Ok(Self {
            environment,
            model_path,
            bind_addr,
            otel_endpoint,
            max_upload_bytes,
            inference_timeout,
            inference,
        })
    }
}
