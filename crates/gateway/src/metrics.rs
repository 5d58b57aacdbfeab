use crate::errors::DetectError;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, Meter},
};
use std::time::Duration;

/// Request instruments on the `gateway` meter.
///
/// Without a configured meter provider the global no-op meter is used and
/// recording costs nothing.
#[derive(Clone)]
pub struct GatewayMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    detections: Counter<u64>,
    errors: Counter<u64>,
}

impl GatewayMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        Self::from_meter(&global::meter(meter_name))
    }

    pub fn from_meter(meter: &Meter) -> Self {
        let latency_buckets = [
            0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0,
        ];

        let duration = meter
            .f64_histogram("detect_request_duration_seconds")
            .with_description("Time to serve a detection request (decode + infer + normalize)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build();
        let requests = meter
            .u64_counter("detect_requests_total")
            .with_description("Total detection requests")
            .build();
        let detections = meter
            .u64_counter("detect_detections_total")
            .with_description("Total detections returned")
            .build();
        let errors = meter
            .u64_counter("detect_errors_total")
            .with_description("Failed detection requests by kind")
            .build();

        Self {
            duration,
            requests,
            detections,
            errors,
        }
    }

    pub fn record_success(&self, elapsed: Duration, num_detections: usize) {
        self.requests.add(1, &[]);
        self.duration.record(elapsed.as_secs_f64(), &[]);
        self.detections.add(num_detections as u64, &[]);
    }

    pub fn record_failure(&self, elapsed: Duration, error: &DetectError) {
        self.requests.add(1, &[]);
        self.duration.record(elapsed.as_secs_f64(), &[]);
        self.errors.add(1, &[KeyValue::new("kind", error.kind())]);
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new("gateway")
    }
}
