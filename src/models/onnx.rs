//! ONNX Runtime backend for stem models

use crate::error::{DemixError, Result};
use crate::separation::{ModelLoader, StemModel, Tensor};
use ndarray::{ArrayD, IxDyn};
use ort::session::Session;
use ort::value::Tensor as OrtTensor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One ORT session wrapping a serialized model
pub struct OnnxModel {
    session: Session,
    input_name: String,
    name: String,
}

impl StemModel for OnnxModel {
    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        let input_tensor = OrtTensor::from_array(input.clone()).map_err(|e| {
            DemixError::inference(&self.name, format!("failed to create input tensor: {}", e))
        })?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| DemixError::inference(&self.name, e.to_string()))?;

        let output = outputs
            .iter()
            .next()
            .map(|(_, v)| v)
            .ok_or_else(|| DemixError::inference(&self.name, "no output tensor from model"))?;

        let (output_shape, output_data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DemixError::inference(&self.name, format!("failed to extract output: {}", e)))?;

        // Negative dimensions would wrap to huge values when cast
        let shape = output_shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<std::result::Result<Vec<usize>, _>>()
            .map_err(|_| {
                DemixError::shape(format!("invalid dimension in output shape {:?}", output_shape))
            })?;

        ArrayD::from_shape_vec(IxDyn(&shape), output_data.to_vec())
            .map_err(|e| DemixError::shape(format!("output buffer does not match {:?}: {}", shape, e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Builds ORT sessions for one artifact on demand
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    path: PathBuf,
    input_name: String,
    execution_provider: &'static str,
}

impl OnnxLoader {
    pub fn new(path: PathBuf, input_name: impl Into<String>) -> Self {
        Self {
            path,
            input_name: input_name.into(),
            execution_provider: detect_best_provider(),
        }
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self) -> Result<Box<dyn StemModel>> {
        let session = create_session(&self.path, self.execution_provider)?;
        let name = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();
        debug!("Loaded {} with {} provider", self.path.display(), self.execution_provider);
        Ok(Box::new(OnnxModel {
            session,
            input_name: self.input_name.clone(),
            name,
        }))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.path.display(), self.execution_provider)
    }
}

/// Create ORT session with the specified execution provider
fn create_session(model_path: &Path, ep: &str) -> Result<Session> {
    use ort::execution_providers::CPUExecutionProvider;

    let unavailable = |what: &str, e: &dyn std::fmt::Display| DemixError::ModelUnavailable {
        reason: format!("{} '{}': {}", what, model_path.display(), e),
    };

    let builder = Session::builder().map_err(|e| unavailable("failed to create session for", &e))?;

    let session = match ep {
        #[cfg(target_os = "macos")]
        "CoreML" => {
            use ort::execution_providers::CoreMLExecutionProvider;
            builder
                .with_execution_providers([
                    CoreMLExecutionProvider::default().build(),
                    CPUExecutionProvider::default().build(),
                ])
                .map_err(|e| unavailable("failed to configure CoreML for", &e))?
                .commit_from_file(model_path)
                .map_err(|e| unavailable("failed to load", &e))?
        }
        #[cfg(target_os = "windows")]
        "DirectML" => {
            use ort::execution_providers::DirectMLExecutionProvider;
            builder
                .with_execution_providers([
                    DirectMLExecutionProvider::default().build(),
                    CPUExecutionProvider::default().build(),
                ])
                .map_err(|e| unavailable("failed to configure DirectML for", &e))?
                .commit_from_file(model_path)
                .map_err(|e| unavailable("failed to load", &e))?
        }
        _ => builder
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| unavailable("failed to configure CPU provider for", &e))?
            .commit_from_file(model_path)
            .map_err(|e| unavailable("failed to load", &e))?,
    };

    Ok(session)
}

/// Detect the best available execution provider
#[allow(clippy::needless_return)] // Returns needed due to cfg conditional compilation
fn detect_best_provider() -> &'static str {
    // CoreML (Apple Silicon)
    #[cfg(target_os = "macos")]
    {
        return "CoreML";
    }

    // DirectML (Windows)
    #[cfg(target_os = "windows")]
    {
        return "DirectML";
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        tracing::info!("Using CPU execution provider");
        "CPU"
    }
}
