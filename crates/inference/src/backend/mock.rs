use super::{InferenceBackend, InferenceOutput};
use crate::{classes::ClassNameTable, config::InferenceConfig};
use ndarray::{Array, ArrayD, IxDyn};
use std::path::Path;
use std::time::Duration;

/// Backend that replays a fixed prediction tensor.
///
/// Used by tests and benchmarks to exercise the request pipeline without a
/// model artifact or ONNX Runtime.
#[derive(Debug, Clone)]
pub struct MockBackend {
    predictions: ArrayD<f32>,
    class_names: Option<ClassNameTable>,
    failure: Option<String>,
    panic_on_call: Option<usize>,
    delay: Option<Duration>,
    calls: usize,
}

impl MockBackend {
    pub fn new(predictions: ArrayD<f32>, class_names: Option<ClassNameTable>) -> Self {
        Self {
            predictions,
            class_names,
            failure: None,
            panic_on_call: None,
            delay: None,
            calls: 0,
        }
    }

    /// End-to-end layout: one `[x1, y1, x2, y2, score, class]` row per detection,
    /// in model input pixel space.
    pub fn end_to_end(rows: &[[f32; 6]], class_names: Option<ClassNameTable>) -> Self {
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        let predictions = Array::from_shape_vec(IxDyn(&[1, rows.len(), 6]), data)
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[1, 0, 6])));
        Self::new(predictions, class_names)
    }

    /// Fail every inference after the load-time warm-up run.
    pub fn failing_after_warmup(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Panic on the `call`-th inference (the warm-up run is call 1) and
    /// behave normally on every other call.
    pub fn panicking_on_call(mut self, call: usize) -> Self {
        self.panic_on_call = Some(call);
        self
    }

    /// Sleep before every inference after the warm-up run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl InferenceBackend for MockBackend {
    fn load_model(path: &Path, _config: &InferenceConfig) -> anyhow::Result<Self> {
        anyhow::bail!(
            "MockBackend cannot load {}; construct it directly",
            path.display()
        )
    }

    fn class_names(&self) -> anyhow::Result<Option<ClassNameTable>> {
        Ok(self.class_names.clone())
    }

    fn infer(&mut self, _images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        self.calls += 1;
        if self.panic_on_call == Some(self.calls) {
            panic!("MockBackend panicked on call {}", self.calls);
        }
        if let Some(delay) = self.delay.filter(|_| self.calls > 1) {
            std::thread::sleep(delay);
        }
        if let Some(message) = self.failure.as_ref().filter(|_| self.calls > 1) {
            anyhow::bail!("{message}");
        }

        Ok(InferenceOutput {
            predictions: self.predictions.clone(),
        })
    }
}
