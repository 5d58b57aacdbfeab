use crate::schema::{Detection, DetectionBox};
use inference::{ClassNameTable, RawBox};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("model produced class id {0} which has no name")]
    UnknownClass(usize),
}

/// Convert corner boxes into client detections, preserving order.
///
/// No filtering or clamping happens here. Confidence is passed through as-is.
pub fn normalize(
    boxes: &[RawBox],
    classes: &ClassNameTable,
) -> Result<Vec<Detection>, NormalizeError> {
    boxes
        .iter()
        .map(|raw| {
            let class_name = classes
                .get(raw.class_id)
                .ok_or(NormalizeError::UnknownClass(raw.class_id))?;

            Ok(Detection {
                bbox: DetectionBox {
                    x: raw.x1,
                    y: raw.y1,
                    width: raw.x2 - raw.x1,
                    height: raw.y2 - raw.y1,
                },
                class_name: class_name.to_string(),
                confidence: raw.confidence,
            })
        })
        .collect()
}
