//! Core data types for drumdemix
//!
//! These types represent the domain model and flow through the pipeline.

use crate::error::{DemixError, Result};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Sample rate the separation models were trained at
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

// =============================================================================
// Stems
// =============================================================================

/// An isolated instrument output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    /// Combined drum bus (time-domain model)
    Drums,
    Kick,
    Snare,
    Toms,
    #[serde(rename = "hihat")]
    HiHat,
    Cymbals,
}

impl StemKind {
    /// The five kit pieces produced by the spectral model bank, in output order
    pub const KIT: [StemKind; 5] = [
        StemKind::Kick,
        StemKind::Snare,
        StemKind::Toms,
        StemKind::HiHat,
        StemKind::Cymbals,
    ];

    /// Short name used in file names and manifests
    pub fn short_name(self) -> &'static str {
        match self {
            StemKind::Drums => "drums",
            StemKind::Kick => "kick",
            StemKind::Snare => "snare",
            StemKind::Toms => "toms",
            StemKind::HiHat => "hihat",
            StemKind::Cymbals => "cymbals",
        }
    }

    /// Parse a short name
    pub fn from_short_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "drums" => Some(StemKind::Drums),
            "kick" => Some(StemKind::Kick),
            "snare" => Some(StemKind::Snare),
            "toms" => Some(StemKind::Toms),
            "hihat" | "hi-hat" => Some(StemKind::HiHat),
            "cymbals" => Some(StemKind::Cymbals),
            _ => None,
        }
    }
}

impl std::fmt::Display for StemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

// =============================================================================
// Waveform
// =============================================================================

/// A fully loaded multichannel recording, shape `[channels, samples]`
///
/// The pipeline never mutates a waveform in place; every stage produces new buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Array2<f32>,
    sample_rate: u32,
}

impl Waveform {
    /// Wrap a `[channels, samples]` array
    pub fn new(samples: Array2<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Build from per-channel sample vectors; all channels must have equal length
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        let num_channels = channels.len();
        let num_samples = channels.first().map(Vec::len).unwrap_or(0);

        if let Some((idx, ch)) = channels
            .iter()
            .enumerate()
            .find(|(_, ch)| ch.len() != num_samples)
        {
            return Err(DemixError::shape(format!(
                "channel {} has {} samples, channel 0 has {}",
                idx,
                ch.len(),
                num_samples
            )));
        }

        let flat: Vec<f32> = channels.into_iter().flatten().collect();
        let samples = Array2::from_shape_vec((num_channels, num_samples), flat)
            .map_err(|e| DemixError::shape(e.to_string()))?;

        Ok(Self::new(samples, sample_rate))
    }

    /// Normalize to exactly two channels
    ///
    /// Mono is duplicated into both channels, stereo is returned as-is, and
    /// anything wider keeps its first two channels.
    pub fn to_stereo(&self) -> Result<Waveform> {
        let samples = match self.num_channels() {
            0 => return Err(DemixError::ChannelCountMismatch { expected: 2, found: 0 }),
            1 => {
                let mono = self.samples.row(0);
                ndarray::stack(Axis(0), &[mono, mono])
                    .map_err(|e| DemixError::shape(e.to_string()))?
            }
            2 => self.samples.clone(),
            _ => self.samples.slice(ndarray::s![0..2, ..]).to_owned(),
        };
        Ok(Waveform::new(samples, self.sample_rate))
    }

    pub fn num_channels(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0 {
            self.len() as f64 / self.sample_rate as f64
        } else {
            0.0
        }
    }

    pub fn samples(&self) -> ArrayView2<'_, f32> {
        self.samples.view()
    }

    pub fn into_samples(self) -> Array2<f32> {
        self.samples
    }
}

// =============================================================================
// Rendered output
// =============================================================================

/// Stereo audio buffer ready for PCM encoding or playback
#[derive(Debug, Clone, PartialEq)]
pub struct StereoBuffer {
    /// Left channel samples
    pub left: Vec<f32>,
    /// Right channel samples
    pub right: Vec<f32>,
    /// Sample rate in Hz (typically 44100)
    pub sample_rate: u32,
}

impl StereoBuffer {
    pub fn new(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            left,
            right,
            sample_rate,
        }
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Get interleaved samples [L, R, L, R, ...]
    pub fn interleaved(&self) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.left.len() * 2);
        for (l, r) in self.left.iter().zip(self.right.iter()) {
            result.push(*l);
            result.push(*r);
        }
        result
    }
}

/// One rendered stem of a finished separation
#[derive(Debug, Clone)]
pub struct SeparatedStem {
    pub kind: StemKind,
    pub audio: StereoBuffer,
}

/// The complete stem set of one separation request
#[derive(Debug, Clone)]
pub struct Separation {
    /// Sample count of the input, and of every stem
    pub num_samples: usize,
    pub sample_rate: u32,
    pub stems: Vec<SeparatedStem>,
}

impl Separation {
    /// Look up a stem by kind
    pub fn get(&self, kind: StemKind) -> Option<&StereoBuffer> {
        self.stems.iter().find(|s| s.kind == kind).map(|s| &s.audio)
    }

    pub fn kinds(&self) -> Vec<StemKind> {
        self.stems.iter().map(|s| s.kind).collect()
    }
}

// =============================================================================
// Supported formats
// =============================================================================

/// Audio formats accepted at ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Flac,
    Aiff,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "aiff" | "aif" => Some(AudioFormat::Aiff),
            _ => None,
        }
    }

    /// Check if a path has a supported extension
    pub fn is_supported_path(path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .is_some()
    }
}
