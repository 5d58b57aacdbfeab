//! Client-facing response payloads.

use serde::{Deserialize, Serialize};

/// Top-left corner plus extent, in decoded-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: DetectionBox,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Response of `POST /detect`. `num_detections` is derived from `detections`.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    detections: Vec<Detection>,
    image_size: ImageSize,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>, image_size: ImageSize) -> Self {
        Self {
            detections,
            image_size,
        }
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn num_detections(&self) -> usize {
        self.detections.len()
    }
}

#[derive(Serialize)]
struct DetectionResultWire<'a> {
    detections: &'a [Detection],
    image_size: ImageSize,
    num_detections: usize,
}

impl Serialize for DetectionResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DetectionResultWire {
            detections: &self.detections,
            image_size: self.image_size,
            num_detections: self.num_detections(),
        }
        .serialize(serializer)
    }
}

/// Response of `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
    pub model_loaded: bool,
    pub model_path: String,
}
