//! Locating the model directory and checking artifacts before load

use super::manifest::ArtifactSpec;
use crate::error::{DemixError, Result};
use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming a model directory
pub const MODEL_DIR_ENV: &str = "DRUMDEMIX_MODEL_DIR";

/// Find the model directory by checking multiple common locations
///
/// Search order:
/// 1. `--models` flag
/// 2. DRUMDEMIX_MODEL_DIR environment variable
/// 3. ProjectDirs data: ~/.local/share/drumdemix/models (Linux XDG)
///    or ~/Library/Application Support/com.drumdemix.drumdemix/models (macOS)
/// 4. Current directory: ./models
///
/// Returns the first existing directory, or an error listing all checked locations.
pub fn find_model_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let env_dir = std::env::var(MODEL_DIR_ENV).ok().map(PathBuf::from);
    let data_dir = ProjectDirs::from("com", "drumdemix", "drumdemix")
        .map(|dirs| dirs.data_dir().join("models"));
    find_model_dir_in(explicit, env_dir, data_dir)
}

fn find_model_dir_in(
    explicit: Option<&Path>,
    env_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<PathBuf> {
    // An explicit flag is never silently replaced by another location
    if let Some(dir) = explicit {
        if dir.is_dir() {
            return Ok(dir.to_path_buf());
        }
        return Err(DemixError::ModelUnavailable {
            reason: format!("model directory '{}' does not exist", dir.display()),
        });
    }

    let mut checked_locations: Vec<String> = Vec::new();

    if let Some(dir) = env_dir {
        if dir.is_dir() {
            return Ok(dir);
        }
        checked_locations.push(format!("{}={}", MODEL_DIR_ENV, dir.display()));
    }

    if let Some(dir) = data_dir {
        if dir.is_dir() {
            return Ok(dir);
        }
        checked_locations.push(dir.display().to_string());
    }

    let cwd_dir = PathBuf::from("./models");
    if cwd_dir.is_dir() {
        return Ok(cwd_dir.canonicalize().unwrap_or(cwd_dir));
    }
    checked_locations.push(cwd_dir.display().to_string());

    let locations_list = checked_locations
        .iter()
        .map(|loc| format!("  - {}", loc))
        .collect::<Vec<_>>()
        .join("\n");

    Err(DemixError::ModelUnavailable {
        reason: format!("model directory not found.\n\n  Locations checked:\n{}", locations_list),
    })
}

/// Resolve an artifact inside the model directory and verify its hash if one is given
pub fn artifact_path(model_dir: &Path, artifact: &ArtifactSpec) -> Result<PathBuf> {
    let path = model_dir.join(&artifact.file);
    if !path.is_file() {
        return Err(DemixError::ModelUnavailable {
            reason: format!("model artifact '{}' not found", path.display()),
        });
    }

    match &artifact.sha256 {
        Some(expected) => verify_sha256(&path, expected)?,
        None => debug!("No hash listed for {}, skipping verification", path.display()),
    }

    Ok(path)
}

/// Verify the SHA-256 hash of a model file
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let mut file = fs::File::open(path).map_err(|e| DemixError::ModelUnavailable {
        reason: format!("failed to open '{}' for verification: {}", path.display(), e),
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let actual = hex::encode(hasher.finalize());
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        warn!("Model hash mismatch for {}", path.display());
        return Err(DemixError::ModelHashMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Verified {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("abc")
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_explicit_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let found = find_model_dir_in(
            Some(dir.path()),
            Some(other.path().to_path_buf()),
            None,
        )
        .unwrap();
        assert_eq!(found, dir.path());
    }

    #[test]
    fn test_missing_explicit_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let other = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_model_dir_in(Some(&missing), Some(other.path().to_path_buf()), None),
            Err(DemixError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn test_env_dir_before_data_dir() {
        let env = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let found = find_model_dir_in(
            None,
            Some(env.path().to_path_buf()),
            Some(data.path().to_path_buf()),
        )
        .unwrap();
        assert_eq!(found, env.path());

        let found = find_model_dir_in(
            None,
            Some(env.path().join("missing")),
            Some(data.path().to_path_buf()),
        )
        .unwrap();
        assert_eq!(found, data.path());
    }

    #[test]
    fn test_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ArtifactSpec::new("kick.onnx");
        assert!(matches!(
            artifact_path(dir.path(), &spec),
            Err(DemixError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn test_artifact_hash_checked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("kick.onnx"), b"abc").unwrap();

        let good = ArtifactSpec {
            file: "kick.onnx".into(),
            sha256: Some(ABC_SHA256.to_uppercase()),
        };
        assert_eq!(
            artifact_path(dir.path(), &good).unwrap(),
            dir.path().join("kick.onnx")
        );

        let bad = ArtifactSpec {
            file: "kick.onnx".into(),
            sha256: Some("00".repeat(32)),
        };
        match artifact_path(dir.path(), &bad) {
            Err(DemixError::ModelHashMismatch { actual, .. }) => assert_eq!(actual, ABC_SHA256),
            other => panic!("expected hash mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_artifact_without_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("snare.onnx"), b"weights").unwrap();
        assert!(artifact_path(dir.path(), &ArtifactSpec::new("snare.onnx")).is_ok());
    }
}
