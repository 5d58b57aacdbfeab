use std::env;
use std::str::FromStr;

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);

/// Hardware the ONNX Runtime session executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

impl FromStr for ExecutionProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(ExecutionProvider::Cpu),
            "cuda" | "gpu" => Ok(ExecutionProvider::Cuda),
            other => anyhow::bail!(
                "{} is not a supported execution provider. Use either `cpu` or `cuda`.",
                other
            ),
        }
    }
}

/// Model input geometry and the detector's native post-processing knobs.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub input_size: (u32, u32),
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub intra_threads: usize,
    pub execution_provider: ExecutionProvider,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
            intra_threads: 4,
            execution_provider: ExecutionProvider::Cpu,
        }
    }
}

impl InferenceConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let input_width = parse_var("INPUT_WIDTH").unwrap_or(defaults.input_size.0);
        let input_height = parse_var("INPUT_HEIGHT").unwrap_or(defaults.input_size.1);

        let confidence_threshold =
            parse_var("CONFIDENCE_THRESHOLD").unwrap_or(defaults.confidence_threshold);
        let iou_threshold = parse_var("IOU_THRESHOLD").unwrap_or(defaults.iou_threshold);
        let max_detections = parse_var("MAX_DETECTIONS").unwrap_or(defaults.max_detections);
        let intra_threads = parse_var("INTRA_THREADS").unwrap_or(defaults.intra_threads);

        let execution_provider = match env::var("EXECUTION_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.execution_provider,
        };

        if input_width == 0 || input_height == 0 {
            anyhow::bail!("Model input size must be non-zero, got {input_width}x{input_height}");
        }

        Ok(Self {
            input_size: (input_width, input_height),
            confidence_threshold,
            iou_threshold,
            max_detections,
            intra_threads,
            execution_provider,
        })
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}
