use crate::{
    backend::{InferenceBackend, InferenceOutput},
    classes::ClassNameTable,
    config::InferenceConfig,
    processing::{
        post::{OutputLayout, PostProcessor},
        pre::PreProcessor,
    },
};
use anyhow::Context;
use common::span;
use image::RgbImage;
use ndarray::{Array, IxDyn};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use thiserror::Error;

/// One detected object as produced by the model, in absolute pixel corner
/// coordinates of the decoded image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: usize,
    pub confidence: f32,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model not loaded")]
    NotLoaded,

    #[error("{0:#}")]
    Inference(anyhow::Error),
}

/// Mutable per-run state. The backend session needs exclusive access.
struct Pipeline {
    backend: Box<dyn InferenceBackend>,
    preprocessor: PreProcessor,
}

struct LoadedModel {
    pipeline: Mutex<Pipeline>,
    classes: ClassNameTable,
    postprocessor: PostProcessor,
}

/// Owns zero or one loaded detection model and its class table.
///
/// An empty handle is a valid state: the service starts without a model and
/// reports it through [`ModelHandle::is_loaded`].
pub struct ModelHandle {
    model: Option<LoadedModel>,
}

impl ModelHandle {
    pub fn empty() -> Self {
        Self { model: None }
    }

    /// Load the artifact at `path` with backend `B`.
    pub fn load<B>(path: &Path, config: &InferenceConfig) -> anyhow::Result<Self>
    where
        B: InferenceBackend + 'static,
    {
        let backend = B::load_model(path, config)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;
        Self::from_backend(backend, config)
    }

    /// Wrap an already constructed backend.
    ///
    /// Runs one warm-up inference on a blank tensor, which also validates the
    /// output layout and sizes the fallback class table when the model carries
    /// no `names` metadata.
    pub fn from_backend<B>(mut backend: B, config: &InferenceConfig) -> anyhow::Result<Self>
    where
        B: InferenceBackend + 'static,
    {
        let (input_width, input_height) = config.input_size;
        let warmup_input = Array::<f32, _>::zeros(IxDyn(&[
            1,
            3,
            input_height as usize,
            input_width as usize,
        ]));

        let started = Instant::now();
        let InferenceOutput { predictions } = backend
            .infer(&warmup_input)
            .context("Warm-up inference failed")?;
        let layout = OutputLayout::detect(predictions.shape())?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            output_shape = ?predictions.shape(),
            ?layout,
            "Warm-up inference complete"
        );

        let classes = match (backend.class_names()?, layout) {
            (Some(classes), _) => classes,
            (None, OutputLayout::Anchors { num_classes }) => {
                tracing::warn!(
                    num_classes,
                    "Model carries no class names, using numbered placeholders"
                );
                ClassNameTable::numbered(num_classes)
            }
            (None, OutputLayout::EndToEnd) => {
                anyhow::bail!("End-to-end model output requires class names metadata")
            }
        };

        Ok(Self {
            model: Some(LoadedModel {
                pipeline: Mutex::new(Pipeline {
                    backend: Box::new(backend),
                    preprocessor: PreProcessor::new(config.input_size),
                }),
                classes,
                postprocessor: PostProcessor::new(config),
            }),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn class_names(&self) -> Option<&ClassNameTable> {
        self.model.as_ref().map(|model| &model.classes)
    }

    /// Run the model once over the whole image.
    ///
    /// Boxes come back in the order the detector emits them.
    pub fn infer(&self, image: &RgbImage) -> Result<Vec<RawBox>, ModelError> {
        let model = self.model.as_ref().ok_or(ModelError::NotLoaded)?;

        let (output, transform) = {
            // Pipeline only holds scratch buffers that every run rewrites.
            let mut pipeline = model.pipeline.lock().unwrap_or_else(|poisoned| {
                tracing::warn!("Recovering model pipeline after a panic in an earlier request");
                model.pipeline.clear_poison();
                poisoned.into_inner()
            });
            let Pipeline {
                backend,
                preprocessor,
            } = &mut *pipeline;

            let (input, transform) = preprocessor
                .preprocess(image)
                .map_err(ModelError::Inference)?;

            let output = {
                let _s = span!("model_inference");
                backend.infer(&input).map_err(ModelError::Inference)?
            };

            (output, transform)
        };

        let _s = span!("postprocess");
        model
            .postprocessor
            .parse_detections(&output.predictions.view(), &transform)
            .map_err(ModelError::Inference)
    }

    /// Drop the model and its runtime resources. Later calls to
    /// [`ModelHandle::infer`] fail with [`ModelError::NotLoaded`].
    pub fn release(&mut self) {
        if self.model.take().is_some() {
            tracing::info!("Model released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use image::Rgb;

    fn person_car_table() -> ClassNameTable {
        ClassNameTable::new([(0, "person"), (1, "car")])
    }

    #[test]
    fn test_empty_handle_reports_not_loaded() {
        let handle = ModelHandle::empty();
        let image = RgbImage::new(4, 4);

        assert!(!handle.is_loaded());
        assert!(handle.class_names().is_none());
        assert!(matches!(handle.infer(&image), Err(ModelError::NotLoaded)));
    }

    #[test]
    fn test_infer_maps_boxes_back_to_image_space() {
        // 640x480 image into 640x640 input: scale 1.0, offset_y 80
        let backend = MockBackend::end_to_end(
            &[[10.0, 100.0, 110.0, 150.0, 0.9, 0.0]],
            Some(person_car_table()),
        );
        let handle = ModelHandle::from_backend(backend, &InferenceConfig::default()).unwrap();
        let image = RgbImage::from_pixel(640, 480, Rgb([0, 0, 0]));

        let boxes = handle.infer(&image).unwrap();

        assert_eq!(
            boxes,
            vec![RawBox {
                x1: 10.0,
                y1: 20.0,
                x2: 110.0,
                y2: 70.0,
                class_id: 0,
                confidence: 0.9,
            }]
        );
        assert_eq!(handle.class_names().unwrap().get(0), Some("person"));
    }

    #[test]
    fn test_missing_names_falls_back_to_numbered_classes() {
        let predictions = Array::<f32, _>::zeros(IxDyn(&[1, 4 + 3, 10]));
        let backend = MockBackend::new(predictions, None);

        let handle = ModelHandle::from_backend(backend, &InferenceConfig::default()).unwrap();

        let classes = handle.class_names().unwrap();
        assert_eq!(classes.len(), 3);
        assert_eq!(classes.get(2), Some("class2"));
    }

    #[test]
    fn test_end_to_end_without_names_is_rejected() {
        let backend = MockBackend::end_to_end(&[], None);
        assert!(ModelHandle::from_backend(backend, &InferenceConfig::default()).is_err());
    }

    #[test]
    fn test_unsupported_output_is_rejected_at_load() {
        let predictions = Array::<f32, _>::zeros(IxDyn(&[1, 3]));
        let backend = MockBackend::new(predictions, Some(person_car_table()));
        assert!(ModelHandle::from_backend(backend, &InferenceConfig::default()).is_err());
    }

    #[test]
    fn test_backend_failure_is_reported_as_inference_error() {
        let backend = MockBackend::end_to_end(&[], Some(person_car_table()))
            .failing_after_warmup("device lost");
        let handle = ModelHandle::from_backend(backend, &InferenceConfig::default()).unwrap();

        let err = handle.infer(&RgbImage::new(8, 8)).unwrap_err();
        assert!(matches!(err, ModelError::Inference(_)));
        assert!(err.to_string().contains("device lost"));
    }

    #[test]
    fn test_inference_recovers_after_backend_panic() {
        // call 1 is the warm-up, call 2 is the first request
        let backend = MockBackend::end_to_end(
            &[[10.0, 100.0, 110.0, 150.0, 0.9, 0.0]],
            Some(person_car_table()),
        )
        .panicking_on_call(2);
        let handle = ModelHandle::from_backend(backend, &InferenceConfig::default()).unwrap();
        let image = RgbImage::new(640, 480);

        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.infer(&image)));
        assert!(first.is_err());

        let boxes = handle.infer(&image).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 0);
    }

    #[test]
    fn test_release_empties_handle() {
        let backend = MockBackend::end_to_end(&[], Some(person_car_table()));
        let mut handle = ModelHandle::from_backend(backend, &InferenceConfig::default()).unwrap();
        assert!(handle.is_loaded());

        handle.release();

        assert!(!handle.is_loaded());
        assert!(matches!(
            handle.infer(&RgbImage::new(8, 8)),
            Err(ModelError::NotLoaded)
        ));
    }

    #[test]
    fn test_load_propagates_backend_error() {
        let result = ModelHandle::load::<MockBackend>(
            Path::new("missing.onnx"),
            &InferenceConfig::default(),
        );
        let err = result.err().unwrap();
        assert!(err.to_string().contains("missing.onnx"));
    }

    #[test]
    fn test_handle_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ModelHandle>();
    }
}
