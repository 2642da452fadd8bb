//! Stem WAV writer
//!
//! A request's stems are written as a unit: every stem goes to a temp file
//! first and is only renamed into place once all of them were written. On
//! any failure the request's files are removed again.

use crate::error::{DemixError, Result};
use crate::types::{Separation, StemKind, StereoBuffer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// PCM bit depth of written stems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitDepth {
    #[default]
    Sixteen,
    TwentyFour,
}

impl BitDepth {
    pub fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            16 => Ok(BitDepth::Sixteen),
            24 => Ok(BitDepth::TwentyFour),
            other => Err(DemixError::ConfigError(format!(
                "unsupported bit depth {} (expected 16 or 24)",
                other
            ))),
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            BitDepth::Sixteen => 16,
            BitDepth::TwentyFour => 24,
        }
    }

    /// Largest positive integer sample value
    fn full_scale(self) -> f32 {
        ((1i32 << (self.bits() - 1)) - 1) as f32
    }
}

/// `<track>_<stem>.wav`
pub fn stem_file_name(track: &str, kind: StemKind) -> String {
    format!("{}_{}.wav", track, kind.short_name())
}

/// Write stereo audio to a WAV file
pub fn write_stem(path: &Path, audio: &StereoBuffer, bit_depth: BitDepth) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: audio.sample_rate,
        bits_per_sample: bit_depth.bits(),
        sample_format: hound::SampleFormat::Int,
    };

    let output_error = |reason: String| DemixError::OutputError {
        path: path.to_path_buf(),
        reason,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| output_error(format!("Failed to create WAV file: {}", e)))?;

    let scale = bit_depth.full_scale();
    for (l, r) in audio.left.iter().zip(audio.right.iter()) {
        for sample in [*l, *r] {
            let quantized = (sample * scale).round().clamp(-scale - 1.0, scale) as i32;
            writer
                .write_sample(quantized)
                .map_err(|e| output_error(format!("Failed to write sample: {}", e)))?;
        }
    }

    writer
        .finalize()
        .map_err(|e| output_error(format!("Failed to finalize WAV: {}", e)))?;

    debug!("Wrote {} samples to {}", audio.len(), path.display());
    Ok(())
}

/// Write every stem of a separation into `output_dir`, all or nothing
///
/// Returns the final path of each stem in separation order.
pub fn write_stems(
    output_dir: &Path,
    track: &str,
    separation: &Separation,
    bit_depth: BitDepth,
) -> Result<Vec<(StemKind, PathBuf)>> {
    std::fs::create_dir_all(output_dir)
        .map_err(|e| DemixError::output_error(output_dir, e))?;

    let targets: Vec<(StemKind, PathBuf, PathBuf)> = separation
        .stems
        .iter()
        .map(|stem| {
            let path = output_dir.join(stem_file_name(track, stem.kind));
            let temp = path.with_extension("wav.tmp");
            (stem.kind, path, temp)
        })
        .collect();

    // Stage 1: temp files
    for (stem, (_, _, temp)) in separation.stems.iter().zip(&targets) {
        if let Err(e) = write_stem(temp, &stem.audio, bit_depth) {
            remove_all(targets.iter().map(|(_, _, t)| t));
            return Err(e);
        }
    }

    // Stage 2: rename into place
    for (i, (_, path, temp)) in targets.iter().enumerate() {
        if let Err(e) = std::fs::rename(temp, path) {
            warn!("Failed to finalize {}, removing this track's stems", path.display());
            remove_all(targets[..i].iter().map(|(_, p, _)| p));
            remove_all(targets[i..].iter().map(|(_, _, t)| t));
            return Err(DemixError::OutputError {
                path: path.clone(),
                reason: format!("Failed to finalize file: {}", e),
            });
        }
    }

    info!("Wrote {} stems for {} to {}", targets.len(), track, output_dir.display());

    Ok(targets.into_iter().map(|(kind, path, _)| (kind, path)).collect())
}

fn remove_all<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        if path.is_file() {
            let _ = std::fs::remove_file(path);
        }
    }
}
