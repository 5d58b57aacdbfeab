use crate::{config::InferenceConfig, model::RawBox};
use ndarray::{ArrayView3, ArrayViewD, Ix3};

/// Inverse of the letterbox applied during preprocessing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl TransformParams {
    /// Map an xyxy box from model input space onto the original image, clipped
    /// to its bounds.
    fn to_image_space(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> (f32, f32, f32, f32) {
        let width = self.orig_width as f32;
        let height = self.orig_height as f32;
        (
            ((x1 - self.offset_x) / self.scale).clamp(0.0, width),
            ((y1 - self.offset_y) / self.scale).clamp(0.0, height),
            ((x2 - self.offset_x) / self.scale).clamp(0.0, width),
            ((y2 - self.offset_y) / self.scale).clamp(0.0, height),
        )
    }
}

/// Shape of the detector's `output0` tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `[1, 4 + num_classes, anchors]`: cxcywh followed by per-class scores.
    Anchors { num_classes: usize },
    /// `[1, detections, 6]`: xyxy, score, class id. Already NMS-free.
    EndToEnd,
}

impl OutputLayout {
    pub fn detect(shape: &[usize]) -> anyhow::Result<Self> {
        match shape {
            [1, rows, 6] if *rows != 6 => Ok(OutputLayout::EndToEnd),
            [1, channels, _] if *channels > 4 => Ok(OutputLayout::Anchors {
                num_classes: channels - 4,
            }),
            other => anyhow::bail!("Unsupported model output shape {:?}", other),
        }
    }
}

/// Turns raw detector output into [`RawBox`] records in image pixel space.
///
/// The score floor, NMS and cap are the detector's own post-processing; no
/// further filtering happens downstream.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        }
    }

    #[tracing::instrument(skip(self, predictions, transform))]
    pub fn parse_detections(
        &self,
        predictions: &ArrayViewD<f32>,
        transform: &TransformParams,
    ) -> anyhow::Result<Vec<RawBox>> {
        let layout = OutputLayout::detect(predictions.shape())?;
        let predictions = predictions.view().into_dimensionality::<Ix3>()?;

        let detections = match layout {
            OutputLayout::Anchors { num_classes } => {
                self.parse_anchor_predictions(&predictions, num_classes, transform)
            }
            OutputLayout::EndToEnd => self.parse_end_to_end(&predictions, transform)?,
        };

        tracing::trace!(count = detections.len(), ?layout, "Parsed detections");
        Ok(detections)
    }

    fn parse_anchor_predictions(
        &self,
        predictions: &ArrayView3<f32>,
        num_classes: usize,
        transform: &TransformParams,
    ) -> Vec<RawBox> {
        let num_anchors = predictions.dim().2;
        let mut candidates = Vec::new();

        for i in 0..num_anchors {
            // argmax over class scores
            let mut confidence = f32::NEG_INFINITY;
            let mut class_id = 0usize;
            for c in 0..num_classes {
                let score = predictions[[0, 4 + c, i]];
                if score > confidence {
                    confidence = score;
                    class_id = c;
                }
            }

            if confidence < self.confidence_threshold {
                continue;
            }

            let (x1, y1, x2, y2) = cxcywh_to_xyxy(
                predictions[[0, 0, i]],
                predictions[[0, 1, i]],
                predictions[[0, 2, i]],
                predictions[[0, 3, i]],
            );
            let (x1, y1, x2, y2) = transform.to_image_space(x1, y1, x2, y2);

            candidates.push(RawBox {
                x1,
                y1,
                x2,
                y2,
                class_id,
                confidence,
            });
        }

        non_max_suppression(candidates, self.iou_threshold, self.max_detections)
    }

    fn parse_end_to_end(
        &self,
        predictions: &ArrayView3<f32>,
        transform: &TransformParams,
    ) -> anyhow::Result<Vec<RawBox>> {
        let num_rows = predictions.dim().1;
        let mut detections = Vec::new();

        for i in 0..num_rows {
            if detections.len() >= self.max_detections {
                break;
            }

            let confidence = predictions[[0, i, 4]];
            if confidence < self.confidence_threshold {
                continue;
            }

            let class_value = predictions[[0, i, 5]].round();
            if !class_value.is_finite() || class_value < 0.0 {
                anyhow::bail!("Invalid class id {} in model output row {}", class_value, i);
            }

            let (x1, y1, x2, y2) = transform.to_image_space(
                predictions[[0, i, 0]],
                predictions[[0, i, 1]],
                predictions[[0, i, 2]],
                predictions[[0, i, 3]],
            );

            detections.push(RawBox {
                x1,
                y1,
                x2,
                y2,
                class_id: class_value as usize,
                confidence,
            });
        }

        Ok(detections)
    }
}

/// Class-aware greedy NMS. Output is sorted by descending confidence.
fn non_max_suppression(
    mut candidates: Vec<RawBox>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawBox> = Vec::with_capacity(max_detections.min(candidates.len()));
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }

        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);

        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

#[inline]
fn iou(a: &RawBox, b: &RawBox) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = inter_w * inter_h;

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;

    if union <= 0.0 { 0.0 } else { intersection / union }
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn test_postprocessor() -> PostProcessor {
        PostProcessor::new(&InferenceConfig::default())
    }

    /// Identity transform for a 640x640 image
    fn identity_transform() -> TransformParams {
        TransformParams {
            orig_width: 640,
            orig_height: 640,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Creates an anchor-layout tensor `[1, 4 + num_classes, n]`.
    /// Every class score starts at 0.0; `class_scores[i]` sets one score for anchor i.
    fn create_anchor_test_data(
        boxes_cxcywh: Vec<[f32; 4]>,
        class_scores: Vec<(usize, f32)>,
        num_classes: usize,
    ) -> Array<f32, IxDyn> {
        let n = boxes_cxcywh.len();
        let channels = 4 + num_classes;
        let mut data = vec![0.0f32; channels * n];

        for (i, coords) in boxes_cxcywh.iter().enumerate() {
            for (k, value) in coords.iter().enumerate() {
                data[k * n + i] = *value;
            }
        }
        for (i, (class_id, score)) in class_scores.iter().enumerate() {
            data[(4 + class_id) * n + i] = *score;
        }

        Array::from_shape_vec(IxDyn(&[1, channels, n]), data).unwrap()
    }

    fn create_end_to_end_test_data(rows: Vec<[f32; 6]>) -> Array<f32, IxDyn> {
        let n = rows.len();
        let data: Vec<f32> = rows.into_iter().flatten().collect();
        Array::from_shape_vec(IxDyn(&[1, n, 6]), data).unwrap()
    }

    #[test]
    fn test_cxcywh_to_xyxy() {
        let (x1, y1, x2, y2) = cxcywh_to_xyxy(50.0, 50.0, 40.0, 20.0);
        assert_eq!((x1, y1, x2, y2), (30.0, 40.0, 70.0, 60.0));
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(
            OutputLayout::detect(&[1, 84, 8400]).unwrap(),
            OutputLayout::Anchors { num_classes: 80 }
        );
        assert_eq!(
            OutputLayout::detect(&[1, 300, 6]).unwrap(),
            OutputLayout::EndToEnd
        );
        assert_eq!(OutputLayout::detect(&[1, 0, 6]).unwrap(), OutputLayout::EndToEnd);
        // Two-class anchor head that happens to be square
        assert_eq!(
            OutputLayout::detect(&[1, 6, 6]).unwrap(),
            OutputLayout::Anchors { num_classes: 2 }
        );
        assert!(OutputLayout::detect(&[1, 4, 8400]).is_err());
        assert!(OutputLayout::detect(&[2, 84, 8400]).is_err());
        assert!(OutputLayout::detect(&[84, 8400]).is_err());
    }

    #[test]
    fn test_confidence_threshold_filtering() {
        let boxes = vec![
            [100.0, 100.0, 20.0, 20.0],
            [200.0, 200.0, 20.0, 20.0],
            [300.0, 300.0, 20.0, 20.0],
        ];
        let class_scores = vec![(0, 0.10), (1, 0.25), (2, 0.80)];
        let predictions = create_anchor_test_data(boxes, class_scores, 3);

        let detections = test_postprocessor()
            .parse_detections(&predictions.view(), &identity_transform())
            .unwrap();

        // 0.25 sits on the floor and is kept
        assert_eq!(detections.len(), 2, "Should filter out confidence < 0.25");
        assert_eq!(detections[0].class_id, 2);
        assert_eq!(detections[1].class_id, 1);
    }

    #[test]
    fn test_class_id_argmax() {
        let boxes = vec![[100.0, 100.0, 20.0, 20.0]];
        let mut predictions = create_anchor_test_data(boxes, vec![(7, 0.9)], 80);
        predictions[[0, 4 + 3, 0]] = 0.6;

        let detections = test_postprocessor()
            .parse_detections(&predictions.view(), &identity_transform())
            .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 7);
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_same_class_overlaps_only() {
        let boxes = vec![
            [100.0, 100.0, 50.0, 50.0], // person, 0.9
            [102.0, 101.0, 50.0, 50.0], // person, 0.8 -> overlaps the first
            [101.0, 100.0, 50.0, 50.0], // dog, 0.7 -> overlaps but other class
            [400.0, 400.0, 50.0, 50.0], // person, 0.6 -> far away
        ];
        let class_scores = vec![(0, 0.9), (0, 0.8), (1, 0.7), (0, 0.6)];
        let predictions = create_anchor_test_data(boxes, class_scores, 2);

        let detections = test_postprocessor()
            .parse_detections(&predictions.view(), &identity_transform())
            .unwrap();

        assert_eq!(detections.len(), 3);
        let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7, 0.6], "Sorted by confidence");
        assert_eq!(detections[1].class_id, 1);
    }

    #[test]
    fn test_max_detections_cap() {
        let boxes: Vec<[f32; 4]> = (0..10)
            .map(|i| [30.0 + 60.0 * i as f32, 30.0, 20.0, 20.0])
            .collect();
        let class_scores = (0..10).map(|i| (0, 0.5 + i as f32 * 0.01)).collect();
        let predictions = create_anchor_test_data(boxes, class_scores, 1);

        let mut post_processor = test_postprocessor();
        post_processor.max_detections = 4;
        let detections = post_processor
            .parse_detections(&predictions.view(), &identity_transform())
            .unwrap();

        assert_eq!(detections.len(), 4);
        assert!((detections[0].confidence - 0.59).abs() < 1e-6);
    }

    /// Original image: 800x600, input 640x640
    /// Scale = 0.8, resized 640x480, offset (0, 80)
    #[test]
    fn test_coordinate_inverse_transformation() {
        // cxcywh (320, 320, 160, 160) -> xyxy (240, 240, 400, 400) in input space
        // x1 = 240 / 0.8 = 300, y1 = (240 - 80) / 0.8 = 200
        // x2 = 400 / 0.8 = 500, y2 = (400 - 80) / 0.8 = 400
        let predictions =
            create_anchor_test_data(vec![[320.0, 320.0, 160.0, 160.0]], vec![(0, 0.9)], 1);
        let transform = TransformParams {
            orig_width: 800,
            orig_height: 600,
            scale: 0.8,
            offset_x: 0.0,
            offset_y: 80.0,
        };

        let detections = test_postprocessor()
            .parse_detections(&predictions.view(), &transform)
            .unwrap();

        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert!((det.x1 - 300.0).abs() < 0.01, "x1 incorrect: {}", det.x1);
        assert!((det.y1 - 200.0).abs() < 0.01, "y1 incorrect: {}", det.y1);
        assert!((det.x2 - 500.0).abs() < 0.01, "x2 incorrect: {}", det.x2);
        assert!((det.y2 - 400.0).abs() < 0.01, "y2 incorrect: {}", det.y2);
    }

    #[test]
    fn test_coordinates_clamped_to_image_bounds() {
        let rows = vec![
            [-20.0, -10.0, 50.0, 60.0, 0.9, 0.0],
            [600.0, 600.0, 700.0, 720.0, 0.9, 1.0],
        ];
        let predictions = create_end_to_end_test_data(rows);

        let detections = test_postprocessor()
            .parse_detections(&predictions.view(), &identity_transform())
            .unwrap();

        assert_eq!(detections[0].x1, 0.0, "Negative x1 should be clamped to 0");
        assert_eq!(detections[0].y1, 0.0, "Negative y1 should be clamped to 0");
        assert_eq!(detections[1].x2, 640.0, "x2 exceeding width should be clamped");
        assert_eq!(detections[1].y2, 640.0, "y2 exceeding height should be clamped");
    }

    #[test]
    fn test_end_to_end_rows_keep_model_order() {
        let rows = vec![
            [10.0, 20.0, 110.0, 70.0, 0.62, 3.0],
            [200.0, 100.0, 260.0, 300.0, 0.95, 0.0],
            [0.0, 0.0, 5.0, 5.0, 0.01, 1.0],
        ];
        let predictions = create_end_to_end_test_data(rows);

        let detections = test_postprocessor()
            .parse_detections(&predictions.view(), &identity_transform())
            .unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(
            detections[0],
            RawBox {
                x1: 10.0,
                y1: 20.0,
                x2: 110.0,
                y2: 70.0,
                class_id: 3,
                confidence: 0.62,
            }
        );
        assert_eq!(detections[1].class_id, 0);
    }

    #[test]
    fn test_end_to_end_rejects_negative_class() {
        let predictions = create_end_to_end_test_data(vec![[0.0, 0.0, 5.0, 5.0, 0.9, -1.0]]);

        let result = test_postprocessor().parse_detections(&predictions.view(), &identity_transform());
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_input() {
        let predictions = Array::from_shape_vec(IxDyn(&[1, 84, 0]), vec![]).unwrap();

        let detections = test_postprocessor()
            .parse_detections(&predictions.view(), &identity_transform())
            .unwrap();

        assert!(detections.is_empty(), "Empty input should return no detections");
    }

    #[test]
    fn test_iou() {
        let a = RawBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0, class_id: 0, confidence: 1.0 };
        let b = RawBox { x1: 5.0, y1: 0.0, x2: 15.0, y2: 10.0, class_id: 0, confidence: 1.0 };
        let c = RawBox { x1: 20.0, y1: 20.0, x2: 30.0, y2: 30.0, class_id: 0, confidence: 1.0 };

        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &c), 0.0);
    }
}
