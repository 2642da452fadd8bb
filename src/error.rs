//! Unified error types for drumdemix
//!
//! Error strategy:
//! - Request errors (windowing, shapes, inference, rendering): the separation
//!   request fails as a whole, no stems are produced for it
//! - Per-file errors (decode, unsupported format): skip file, continue batch
//! - System errors (model loading, output): fatal, abort batch

use std::path::PathBuf;
use thiserror::Error;

/// Supported audio formats for helpful error messages
pub const SUPPORTED_FORMATS: &str = "WAV, AIFF, FLAC, MP3";

/// Top-level error type for drumdemix operations
#[derive(Debug, Error)]
pub enum DemixError {
    // =========================================================================
    // Request errors - the separation request fails atomically
    // =========================================================================
    #[error("Invalid window parameters: window_size={window_size}, stride={stride} (both must be > 0)")]
    InvalidWindowParams { window_size: usize, stride: usize },

    #[error("Tensor shape mismatch: {context}")]
    ShapeMismatch { context: String },

    #[error("Model inference failed for stem '{stem}': {reason}\n  Tip: This may indicate insufficient memory or an incompatible model file")]
    InferenceFailure { stem: String, reason: String },

    #[error("Cannot stitch an empty window sequence")]
    EmptyWindowSequence,

    #[error("Expected {expected} channels, got {found}\n  Tip: Mono input must be upmixed to stereo before separation")]
    ChannelCountMismatch { expected: usize, found: usize },

    // =========================================================================
    // Per-file errors - skip file, continue batch
    // =========================================================================
    #[error("Failed to decode audio file '{path}': {reason}\n  Supported formats: {SUPPORTED_FORMATS}")]
    DecodeError { path: PathBuf, reason: String },

    #[error("Unsupported audio format for '{path}': {format}\n  Supported formats: {SUPPORTED_FORMATS}")]
    UnsupportedFormat { path: PathBuf, format: String },

    #[error("File not found: '{0}'\n  Tip: Check the path exists and is accessible")]
    FileNotFound(PathBuf),

    // =========================================================================
    // Fatal errors - abort entire batch
    // =========================================================================
    #[error("Model unavailable: {reason}\n\n  To enable separation:\n  1. Place the model artifacts and drumdemix.json in a directory\n  2. Pass --models <DIR> or set DRUMDEMIX_MODEL_DIR=<DIR>\n  3. Build with the ONNX backend: cargo build --release --features onnx")]
    ModelUnavailable { reason: String },

    #[error("Model file '{path}' failed integrity check: expected sha256 {expected}, got {actual}\n  Tip: Try re-copying the model artifact")]
    ModelHashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Cannot write output to '{path}': {reason}\n  Tip: Check write permissions for the output directory")]
    OutputError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for drumdemix operations
pub type Result<T> = std::result::Result<T, DemixError>;

impl DemixError {
    /// Returns true if this error is recoverable (should skip file, continue batch)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DemixError::DecodeError { .. }
                | DemixError::UnsupportedFormat { .. }
                | DemixError::FileNotFound(_)
        )
    }

    /// Returns true if this error is a failure of a single separation request
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            DemixError::InvalidWindowParams { .. }
                | DemixError::ShapeMismatch { .. }
                | DemixError::InferenceFailure { .. }
                | DemixError::EmptyWindowSequence
                | DemixError::ChannelCountMismatch { .. }
        )
    }

    /// Returns true if this error comes from locating, verifying, or loading a model
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            DemixError::ModelUnavailable { .. } | DemixError::ModelHashMismatch { .. }
        )
    }

    /// Create a shape mismatch error
    pub fn shape(context: impl Into<String>) -> Self {
        DemixError::ShapeMismatch {
            context: context.into(),
        }
    }

    /// Create an inference failure for a stem
    pub fn inference(stem: impl Into<String>, reason: impl Into<String>) -> Self {
        DemixError::InferenceFailure {
            stem: stem.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode error with context about the issue
    pub fn decode_error(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DemixError::DecodeError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an output error, checking for common issues
    pub fn output_error(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        let reason = match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                format!("Permission denied. Check that you have write access to {}", path.display())
            }
            std::io::ErrorKind::NotFound => {
                format!("Directory does not exist: {}", path.parent().map(|p| p.display().to_string()).unwrap_or_default())
            }
            _ => err.to_string(),
        };
        DemixError::OutputError { path, reason }
    }

    /// Create a model unavailable error when the ONNX backend is not compiled in
    pub fn backend_disabled() -> Self {
        DemixError::ModelUnavailable {
            reason: "ONNX backend not compiled in".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_failures_are_not_recoverable() {
        let err = DemixError::EmptyWindowSequence;
        assert!(err.is_request_failure());
        assert!(!err.is_recoverable());

        let err = DemixError::inference("kick", "boom");
        assert!(err.is_request_failure());
        assert!(err.to_string().contains("kick"));
    }

    #[test]
    fn test_decode_errors_are_recoverable() {
        let err = DemixError::decode_error("/tmp/x.wav", "bad header");
        assert!(err.is_recoverable());
        assert!(!err.is_request_failure());
    }

    #[test]
    fn test_model_errors() {
        assert!(DemixError::backend_disabled().is_model_error());
        let err = DemixError::ModelHashMismatch {
            path: PathBuf::from("kick.onnx"),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.is_model_error());
        assert!(!err.is_request_failure());
    }

    #[test]
    fn test_output_error_permission_message() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = DemixError::output_error("/root/out/a.wav", io);
        assert!(err.to_string().contains("Permission denied"));
    }
}
