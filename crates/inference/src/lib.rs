pub mod backend;
pub mod classes;
pub mod config;
pub mod model;
pub mod processing;

// Re-export commonly used types for convenience
pub use backend::{InferenceBackend, InferenceOutput};
pub use classes::ClassNameTable;
pub use config::{ExecutionProvider, InferenceConfig};
pub use model::{ModelError, ModelHandle, RawBox};
