//! Model directory manifest
//!
//! `drumdemix.json` sits next to the model artifacts and carries the
//! constants the models were trained with: sample rate, time-domain window
//! length, and the STFT configuration of the spectral bank. These must match
//! between forward and inverse passes, so they are read once here and never
//! hard-coded in the pipeline stages.

use crate::error::{DemixError, Result};
use crate::separation::{ReloadPolicy, StftConfig, WindowFunction, WindowSegmenter};
use crate::types::{StemKind, DEFAULT_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// File name of the manifest inside a model directory
pub const MANIFEST_FILENAME: &str = "drumdemix.json";

/// Window length the time-domain model was trained with (11s at 44.1kHz)
pub const DEFAULT_WINDOW_SIZE: usize = 485_100;

/// A serialized model file plus optional integrity hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Path relative to the model directory
    pub file: String,
    /// Lowercase hex SHA-256 of the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ArtifactSpec {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            sha256: None,
        }
    }
}

/// Time-domain (full mix -> drums) model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeDomainSpec {
    pub model: ArtifactSpec,
    pub window_size: usize,
    pub stride: usize,
    /// Index of the drums stem along the model's stem axis
    pub stem_index: usize,
}

impl Default for TimeDomainSpec {
    fn default() -> Self {
        Self {
            model: ArtifactSpec::new("drums.onnx"),
            window_size: DEFAULT_WINDOW_SIZE,
            stride: DEFAULT_WINDOW_SIZE,
            stem_index: 0,
        }
    }
}

/// One model of the spectral bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemArtifact {
    pub stem: StemKind,
    #[serde(flatten)]
    pub artifact: ArtifactSpec,
}

/// Spectral (drums -> kit pieces) model bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralSpec {
    pub fft_size: usize,
    pub hop_size: usize,
    pub window: WindowFunction,
    pub stems: Vec<StemArtifact>,
}

impl Default for SpectralSpec {
    fn default() -> Self {
        let stft = StftConfig::default();
        Self {
            fft_size: stft.fft_size,
            hop_size: stft.hop_size,
            window: stft.window,
            stems: StemKind::KIT
                .iter()
                .map(|&stem| StemArtifact {
                    stem,
                    artifact: ArtifactSpec::new(format!("{}.onnx", stem.short_name())),
                })
                .collect(),
        }
    }
}

/// Contents of `drumdemix.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelManifest {
    /// Sample rate every model expects
    pub sample_rate: u32,
    /// Name of the model input tensor
    pub input_name: String,
    pub reload_policy: ReloadPolicy,
    pub time_domain: TimeDomainSpec,
    pub spectral: SpectralSpec,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            input_name: "input".to_string(),
            reload_policy: ReloadPolicy::default(),
            time_domain: TimeDomainSpec::default(),
            spectral: SpectralSpec::default(),
        }
    }
}

impl ModelManifest {
    /// Parse and validate a manifest from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: ModelManifest = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load the manifest from a model directory, using defaults when it has none
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            debug!(
                "No {} in {}, using default model layout",
                MANIFEST_FILENAME,
                model_dir.display()
            );
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(&path)?;
        Self::from_json(&json).map_err(|e| {
            DemixError::ConfigError(format!("{}: {}", path.display(), e))
        })
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(DemixError::ConfigError("sample_rate must be > 0".to_string()));
        }
        if self.input_name.is_empty() {
            return Err(DemixError::ConfigError("input_name must not be empty".to_string()));
        }

        self.segmenter()?;
        self.stft_config().validate()?;

        for kind in StemKind::KIT {
            let count = self.spectral.stems.iter().filter(|s| s.stem == kind).count();
            if count != 1 {
                return Err(DemixError::ConfigError(format!(
                    "spectral bank must list '{}' exactly once (found {})",
                    kind, count
                )));
            }
        }
        if let Some(extra) = self.spectral.stems.iter().find(|s| s.stem == StemKind::Drums) {
            return Err(DemixError::ConfigError(format!(
                "spectral bank cannot contain a '{}' model",
                extra.stem
            )));
        }

        Ok(())
    }

    /// Segmenter for the time-domain model
    pub fn segmenter(&self) -> Result<WindowSegmenter> {
        WindowSegmenter::new(self.time_domain.window_size, self.time_domain.stride)
    }

    /// STFT configuration shared by the forward and inverse transforms
    pub fn stft_config(&self) -> StftConfig {
        StftConfig {
            fft_size: self.spectral.fft_size,
            hop_size: self.spectral.hop_size,
            window: self.spectral.window,
        }
    }

    /// Artifact for one kit piece
    pub fn spectral_artifact(&self, kind: StemKind) -> Option<&ArtifactSpec> {
        self.spectral
            .stems
            .iter()
            .find(|s| s.stem == kind)
            .map(|s| &s.artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let m = ModelManifest::default();
        assert_eq!(m.sample_rate, 44100);
        assert_eq!(m.time_domain.window_size, 485_100);
        assert_eq!(m.time_domain.stride, 485_100);
        assert_eq!(m.spectral.fft_size, 4096);
        assert_eq!(m.spectral.hop_size, 1024);
        assert_eq!(m.reload_policy, ReloadPolicy::AfterEachUse);
        assert_eq!(m.spectral_artifact(StemKind::HiHat).unwrap().file, "hihat.onnx");
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let m = ModelManifest::from_json("{}").unwrap();
        assert_eq!(m, ModelManifest::default());
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "reload_policy": "on_failure",
            "time_domain": { "window_size": 1024, "stride": 512, "stem_index": 1 },
            "spectral": {
                "fft_size": 2048,
                "hop_size": 512,
                "window": "hamming",
                "stems": [
                    { "stem": "kick", "file": "k.onnx", "sha256": "abc" },
                    { "stem": "snare", "file": "s.onnx" },
                    { "stem": "toms", "file": "t.onnx" },
                    { "stem": "hihat", "file": "h.onnx" },
                    { "stem": "cymbals", "file": "c.onnx" }
                ]
            }
        }"#;
        let m = ModelManifest::from_json(json).unwrap();
        assert_eq!(m.reload_policy, ReloadPolicy::OnFailure);
        assert_eq!(m.time_domain.window_size, 1024);
        assert_eq!(m.time_domain.model.file, "drums.onnx");
        assert_eq!(m.segmenter().unwrap().stride(), 512);
        assert_eq!(m.stft_config().window, WindowFunction::Hamming);
        let kick = m.spectral_artifact(StemKind::Kick).unwrap();
        assert_eq!(kick.sha256.as_deref(), Some("abc"));
        assert_eq!(m.input_name, "input");
    }

    #[test]
    fn test_rejects_zero_window() {
        let json = r#"{ "time_domain": { "window_size": 0 } }"#;
        assert!(matches!(
            ModelManifest::from_json(json),
            Err(DemixError::InvalidWindowParams { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_kit_piece() {
        let json = r#"{ "spectral": { "stems": [ { "stem": "kick", "file": "k.onnx" } ] } }"#;
        assert!(matches!(
            ModelManifest::from_json(json),
            Err(DemixError::ConfigError(_))
        ));
    }

    #[test]
    fn test_rejects_bad_stft() {
        let json = r#"{ "spectral": { "fft_size": 1024, "hop_size": 1024 } }"#;
        assert!(ModelManifest::from_json(json).is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let m = ModelManifest::load(dir.path()).unwrap();
        assert_eq!(m, ModelManifest::default());
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILENAME), "{ not json").unwrap();
        let err = ModelManifest::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains(MANIFEST_FILENAME));
    }
}
