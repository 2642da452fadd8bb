//! Model artifacts: manifest, location, and the inference backend
//!
//! The pipeline only depends on `ModelLoader`; this module turns a model
//! directory into loaders for each stem.

pub mod manifest;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod resolve;

pub use manifest::{ArtifactSpec, ModelManifest, MANIFEST_FILENAME};
pub use resolve::{find_model_dir, MODEL_DIR_ENV};

use crate::error::Result;
use crate::separation::ModelLoader;
use std::path::Path;

/// Build a loader for one artifact in `model_dir`
///
/// The artifact must exist and pass its hash check before a loader is handed out.
pub fn artifact_loader(
    model_dir: &Path,
    artifact: &ArtifactSpec,
    manifest: &ModelManifest,
) -> Result<Box<dyn ModelLoader>> {
    let path = resolve::artifact_path(model_dir, artifact)?;

    #[cfg(feature = "onnx")]
    {
        Ok(Box::new(onnx::OnnxLoader::new(path, manifest.input_name.as_str())))
    }

    #[cfg(not(feature = "onnx"))]
    {
        let _ = (path, manifest);
        Err(crate::error::DemixError::backend_disabled())
    }
}
