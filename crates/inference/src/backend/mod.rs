use crate::{classes::ClassNameTable, config::InferenceConfig};
use ndarray::{Array, IxDyn};
use std::path::Path;

pub mod mock;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// A loaded detection network.
///
/// `infer` takes `&mut self` because runtime sessions need exclusive access per
/// run; [`crate::ModelHandle`] serializes callers.
pub trait InferenceBackend: Send {
    fn load_model(path: &Path, config: &InferenceConfig) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Class table embedded in the model artifact, if the export carried one.
    fn class_names(&self) -> anyhow::Result<Option<ClassNameTable>>;

    /// Run the network on a `[1, 3, H, W]` letterboxed RGB tensor.
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput>;
}

pub struct InferenceOutput {
    /// `[1, 4 + num_classes, anchors]` (cxcywh + class scores) or
    /// `[1, detections, 6]` (xyxy, score, class) for end-to-end exports,
    /// in model input pixel space.
    pub predictions: ndarray::ArrayD<f32>,
}
