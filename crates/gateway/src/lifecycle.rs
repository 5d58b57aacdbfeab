use anyhow::Context;
use inference::ModelHandle;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns the model for the lifetime of the service.
///
/// A missing artifact is not fatal: the service comes up with an empty handle
/// and reports it through the health endpoint. An artifact that exists but
/// fails to load is.
pub struct ServiceLifecycle {
    model: Arc<ModelHandle>,
    model_path: PathBuf,
}

impl ServiceLifecycle {
    pub fn start<F>(model_path: impl Into<PathBuf>, loader: F) -> anyhow::Result<Self>
    where
        F: FnOnce(&Path) -> anyhow::Result<ModelHandle>,
    {
        let model_path = model_path.into();

        let model = if model_path.exists() {
            let handle = loader(&model_path)
                .with_context(|| format!("Model at {} could not be loaded", model_path.display()))?;
            tracing::info!(model_path = %model_path.display(), "Model loaded");
            handle
        } else {
            tracing::warn!(
                model_path = %model_path.display(),
                "Model file not found, starting without a model"
            );
            ModelHandle::empty()
        };

        Ok(Self {
            model: Arc::new(model),
            model_path,
        })
    }

    pub fn model(&self) -> Arc<ModelHandle> {
        Arc::clone(&self.model)
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    /// Release the model. Handles still held elsewhere keep it alive until
    /// they are dropped.
    pub fn stop(self) {
        match Arc::try_unwrap(self.model) {
            Ok(mut model) => model.release(),
            Err(shared) => tracing::warn!(
                outstanding = Arc::strong_count(&shared) - 1,
                "Model still referenced at shutdown, releasing on last drop"
            ),
        }
        tracing::info!("Service stopped");
    }
}
