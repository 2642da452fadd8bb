//! JSON run manifest listing every separated track and its stems

use crate::error::{DemixError, Result};
use crate::pipeline::ModeKind;
use crate::types::{Separation, StemKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the run manifest inside the output directory
pub const RUN_MANIFEST_FILENAME: &str = "separations.json";

/// JSON output schema version
const SCHEMA_VERSION: &str = "1.0";

/// Top-level JSON output structure
#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    /// Schema version for forward compatibility
    pub version: String,
    pub metadata: RunMetadata,
    pub tracks: Vec<TrackRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    /// drumdemix version that generated this file
    pub generator_version: String,
    pub exported_at: String,
    pub track_count: usize,
}

/// One separated input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Source file path
    pub path: String,
    pub mode: ModeKind,
    pub num_samples: usize,
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub separated_at: String,
    pub stems: Vec<StemRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemRecord {
    pub stem: StemKind,
    pub path: String,
}

impl TrackRecord {
    pub fn new(
        source: &Path,
        mode: ModeKind,
        separation: &Separation,
        stem_paths: &[(StemKind, PathBuf)],
    ) -> Self {
        let duration_seconds = if separation.sample_rate > 0 {
            separation.num_samples as f64 / separation.sample_rate as f64
        } else {
            0.0
        };

        Self {
            path: source.to_string_lossy().to_string(),
            mode,
            num_samples: separation.num_samples,
            sample_rate: separation.sample_rate,
            duration_seconds,
            separated_at: chrono::Utc::now().to_rfc3339(),
            stems: stem_paths
                .iter()
                .map(|(stem, path)| StemRecord {
                    stem: *stem,
                    path: path.to_string_lossy().to_string(),
                })
                .collect(),
        }
    }
}

/// Write track records to a JSON file
///
/// Uses atomic write pattern: writes to a temp file first, then renames.
pub fn write_run_manifest(tracks: &[TrackRecord], output_path: &Path) -> Result<()> {
    let temp_path = output_path.with_extension("json.tmp");

    let file = File::create(&temp_path).map_err(|e| DemixError::OutputError {
        path: output_path.to_path_buf(),
        reason: format!("Failed to create temp file: {}", e),
    })?;

    let output = RunManifest {
        version: SCHEMA_VERSION.to_string(),
        metadata: RunMetadata {
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            track_count: tracks.len(),
        },
        tracks: tracks.to_vec(),
    };

    serde_json::to_writer_pretty(BufWriter::new(file), &output).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        DemixError::OutputError {
            path: output_path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    std::fs::rename(&temp_path, output_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        DemixError::OutputError {
            path: output_path.to_path_buf(),
            reason: format!("Failed to finalize file: {}", e),
        }
    })?;

    info!("Wrote {} tracks to {}", tracks.len(), output_path.display());

    Ok(())
}

/// Tracks recorded by a previous run
///
/// A missing or unreadable manifest yields no tracks.
pub fn read_existing_tracks(json_path: &Path) -> Vec<TrackRecord> {
    if !json_path.exists() {
        debug!("No existing run manifest at {}", json_path.display());
        return Vec::new();
    }

    let file = match File::open(json_path) {
        Ok(f) => f,
        Err(e) => {
            debug!("Could not open existing run manifest: {}", e);
            return Vec::new();
        }
    };

    match serde_json::from_reader::<_, RunManifest>(BufReader::new(file)) {
        Ok(json) => {
            debug!(
                "Loaded {} previously separated tracks from {}",
                json.tracks.len(),
                json_path.display()
            );
            json.tracks
        }
        Err(e) => {
            debug!("Could not parse existing run manifest: {}", e);
            Vec::new()
        }
    }
}

/// Source paths of tracks a previous run separated in `mode`
pub fn read_existing_separations(json_path: &Path, mode: ModeKind) -> HashSet<String> {
    read_existing_tracks(json_path)
        .into_iter()
        .filter(|t| t.mode == mode)
        .map(|t| t.path)
        .collect()
}
