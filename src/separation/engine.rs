//! Per-stem inference engines
//!
//! A model is an opaque `tensor -> tensor` callable. `StemEngine` owns one
//! loaded model plus the loader that produced it, and applies the reload
//! policy once per request batch.

use crate::error::{DemixError, Result};
use crate::types::StemKind;
use clap::ValueEnum;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Dynamic-rank f32 tensor exchanged with models
pub type Tensor = ArrayD<f32>;

/// A loaded inference model
pub trait StemModel: Send {
    /// Run a forward pass
    fn infer(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Get the name of this model (for logging)
    fn name(&self) -> &str;
}

/// Produces fresh model handles from a serialized artifact
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn StemModel>>;

    /// Human-readable origin of the model (for logging)
    fn describe(&self) -> String;
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Box<dyn StemModel>> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn StemModel>> {
        self()
    }

    fn describe(&self) -> String {
        "in-process loader".to_string()
    }
}

/// When an engine discards its model handle and loads a fresh one
///
/// `AfterEachUse` is the default: reusing a model across consecutive
/// separations has been seen to crash some runtimes. It may be masking a
/// lifecycle bug in the runtime rather than being inherently required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    Never,
    #[default]
    AfterEachUse,
    OnFailure,
}

/// One model per stem, with reload bookkeeping
pub struct StemEngine {
    kind: StemKind,
    loader: Box<dyn ModelLoader>,
    model: Option<Box<dyn StemModel>>,
    policy: ReloadPolicy,
    batch_failed: bool,
    inferences: u64,
    reloads: u64,
}

impl std::fmt::Debug for StemEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StemEngine")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .field("loaded", &self.model.is_some())
            .field("inferences", &self.inferences)
            .field("reloads", &self.reloads)
            .finish()
    }
}

impl StemEngine {
    /// Load the model once up front
    pub fn load(kind: StemKind, loader: Box<dyn ModelLoader>, policy: ReloadPolicy) -> Result<Self> {
        debug!("Loading {} model from {}", kind, loader.describe());
        let model = loader.load()?;
        debug!("Loaded {} model '{}'", kind, model.name());
        Ok(Self {
            kind,
            loader,
            model: Some(model),
            policy,
            batch_failed: false,
            inferences: 0,
            reloads: 0,
        })
    }

    pub fn kind(&self) -> StemKind {
        self.kind
    }

    pub fn policy(&self) -> ReloadPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ReloadPolicy) {
        self.policy = policy;
    }

    /// Name reported by the current model handle, if one is loaded
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().map(|m| m.name())
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Total forward passes attempted
    pub fn inferences(&self) -> u64 {
        self.inferences
    }

    /// Total reloads performed by the policy
    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    /// Run one forward pass; invalid results are reported as inference failures
    pub fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        let result = self.infer_inner(input);
        if let Err(e) = &result {
            error!(
                "{} ({}) inference failed: {}",
                self.kind,
                self.model_name().unwrap_or("unloaded"),
                e
            );
            self.batch_failed = true;
        }
        result
    }

    fn infer_inner(&mut self, input: &Tensor) -> Result<Tensor> {
        if self.model.is_none() {
            debug!("{} model not loaded, loading lazily", self.kind);
            self.model = Some(self.loader.load()?);
        }
        let stem = self.kind.short_name();
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| DemixError::inference(stem, "model handle missing"))?;

        self.inferences += 1;
        let output = model.infer(input).map_err(|e| match e {
            DemixError::InferenceFailure { reason, .. } => DemixError::inference(stem, reason),
            other => DemixError::inference(stem, other.to_string()),
        })?;

        if output.is_empty() {
            return Err(DemixError::inference(stem, "model returned an empty tensor"));
        }
        if output.iter().any(|v| !v.is_finite()) {
            return Err(DemixError::inference(stem, "model output contains NaN or infinite values"));
        }

        Ok(output)
    }

    /// End of one request's use of this engine; applies the reload policy
    pub fn complete_batch(&mut self) {
        let failed = std::mem::take(&mut self.batch_failed);
        let reload = match self.policy {
            ReloadPolicy::Never => false,
            ReloadPolicy::AfterEachUse => true,
            ReloadPolicy::OnFailure => failed,
        };
        if !reload {
            return;
        }

        // Release the old handle before loading its replacement
        self.model = None;
        match self.loader.load() {
            Ok(model) => {
                self.model = Some(model);
                self.reloads += 1;
                if failed {
                    warn!("Reloaded {} model after failed inference", self.kind);
                } else {
                    debug!("Reloaded {} model ({:?})", self.kind, self.policy);
                }
            }
            Err(e) => {
                warn!(
                    "Failed to reload {} model, will retry on next use: {}",
                    self.kind, e
                );
            }
        }
    }
}
