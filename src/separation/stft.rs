//! STFT / ISTFT with magnitude and phase split
//!
//! The spectral model bank predicts magnitudes only. Phase is captured on the
//! forward pass and handed back unchanged to the inverse, so the pair must be
//! produced and consumed with the same `StftConfig`.
//!
//! # Framing
//!
//! Frames are centered: the signal is offset by `fft_size / 2` zeros before
//! framing and `num_frames = n / hop_size + 1`, matching the centered STFT
//! the models were trained on. The inverse uses weighted overlap-add with
//! per-sample window-square normalization, which reconstructs the input
//! exactly (up to float error) for any window with `hop_size <= fft_size / 2`.

use crate::error::{DemixError, Result};
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Analysis/synthesis window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[default]
    Hann,
    Hamming,
    Rectangular,
}

impl WindowFunction {
    /// Periodic window of the given length
    pub fn coefficients(self, size: usize) -> Vec<f32> {
        use std::f32::consts::PI;
        (0..size)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / size as f32;
                match self {
                    WindowFunction::Hann => 0.5 * (1.0 - phase.cos()),
                    WindowFunction::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowFunction::Rectangular => 1.0,
                }
            })
            .collect()
    }
}

/// STFT parameters shared by the forward and inverse transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StftConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    #[serde(default)]
    pub window: WindowFunction,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            hop_size: 1024,
            window: WindowFunction::Hann,
        }
    }
}

impl StftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fft_size < 2 || self.hop_size == 0 {
            return Err(DemixError::ConfigError(format!(
                "STFT needs fft_size >= 2 and hop_size > 0 (got fft_size={}, hop_size={})",
                self.fft_size, self.hop_size
            )));
        }
        if self.hop_size > self.fft_size / 2 {
            return Err(DemixError::ConfigError(format!(
                "hop_size {} exceeds half of fft_size {}; frames would not overlap enough to invert",
                self.hop_size, self.fft_size
            )));
        }
        Ok(())
    }

    /// Positive-frequency bins per frame (DC through Nyquist)
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Frames produced for a signal of `num_samples`
    pub fn num_frames(&self, num_samples: usize) -> usize {
        num_samples / self.hop_size + 1
    }

    fn center_pad(&self) -> usize {
        self.fft_size / 2
    }

    /// Length of the zero-extended, centered signal that all frames fit in
    fn padded_len(&self, num_samples: usize) -> usize {
        let framed = (self.num_frames(num_samples) - 1) * self.hop_size + self.fft_size;
        framed.max(self.center_pad() + num_samples)
    }
}

/// Magnitude and phase of a multichannel signal, both `[channels, bins, frames]`
#[derive(Debug, Clone)]
pub struct SpectralFrame {
    pub magnitude: Array3<f32>,
    pub phase: Array3<f32>,
}

impl SpectralFrame {
    pub fn num_channels(&self) -> usize {
        self.magnitude.dim().0
    }

    pub fn num_frames(&self) -> usize {
        self.magnitude.dim().2
    }
}

/// Forward/inverse STFT with planned FFTs and a precomputed window
pub struct SpectralTransform {
    config: StftConfig,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("config", &self.config)
            .finish()
    }
}

impl SpectralTransform {
    pub fn new(config: StftConfig) -> Result<Self> {
        config.validate()?;

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(config.fft_size);
        let inverse = planner.plan_fft_inverse(config.fft_size);

        Ok(Self {
            window: config.window.coefficients(config.fft_size),
            config,
            forward,
            inverse,
        })
    }

    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    /// Compute magnitude and phase for every channel of `[channels, samples]`
    pub fn forward(&self, signal: ArrayView2<'_, f32>) -> SpectralFrame {
        let (channels, num_samples) = signal.dim();
        let bins = self.config.num_bins();
        let frames = self.config.num_frames(num_samples);

        let mut magnitude = Array3::<f32>::zeros((channels, bins, frames));
        let mut phase = Array3::<f32>::zeros((channels, bins, frames));

        for (ch, samples) in signal.axis_iter(Axis(0)).enumerate() {
            let spectrum = self.stft_channel(samples);
            for (t, frame) in spectrum.iter().enumerate() {
                for (k, c) in frame.iter().enumerate() {
                    magnitude[[ch, k, t]] = c.norm();
                    phase[[ch, k, t]] = c.arg();
                }
            }
        }

        SpectralFrame { magnitude, phase }
    }

    /// Rebuild `[channels, size]` samples from a magnitude and the forward-pass phase
    pub fn inverse(
        &self,
        magnitude: ArrayView3<'_, f32>,
        phase: ArrayView3<'_, f32>,
        size: usize,
    ) -> Result<Array2<f32>> {
        if magnitude.dim() != phase.dim() {
            return Err(DemixError::shape(format!(
                "magnitude {:?} does not match phase {:?}",
                magnitude.shape(),
                phase.shape()
            )));
        }
        let (channels, bins, frames) = magnitude.dim();
        if bins != self.config.num_bins() {
            return Err(DemixError::shape(format!(
                "expected {} frequency bins for fft_size {}, got {}",
                self.config.num_bins(),
                self.config.fft_size,
                bins
            )));
        }

        let mut output = Array2::<f32>::zeros((channels, size));
        for ch in 0..channels {
            let spectrum: Vec<Vec<Complex<f32>>> = (0..frames)
                .map(|t| {
                    (0..bins)
                        .map(|k| Complex::from_polar(magnitude[[ch, k, t]], phase[[ch, k, t]]))
                        .collect()
                })
                .collect();
            let samples = self.istft_channel(&spectrum, size);
            output.row_mut(ch).assign(&ArrayView1::from(&samples));
        }

        Ok(output)
    }

    /// Centered STFT of a single channel, `[frames][bins]`
    fn stft_channel(&self, samples: ArrayView1<'_, f32>) -> Vec<Vec<Complex<f32>>> {
        let fft_size = self.config.fft_size;
        let hop = self.config.hop_size;
        let pad = self.config.center_pad();
        let num_samples = samples.len();
        let num_frames = self.config.num_frames(num_samples);

        let mut padded = vec![0.0f32; self.config.padded_len(num_samples)];
        for (i, &x) in samples.iter().enumerate() {
            padded[pad + i] = x;
        }

        let mut spectrogram = Vec::with_capacity(num_frames);
        for frame_idx in 0..num_frames {
            let start = frame_idx * hop;

            let mut buffer: Vec<Complex<f32>> = padded[start..start + fft_size]
                .iter()
                .zip(self.window.iter())
                .map(|(&x, &w)| Complex::new(x * w, 0.0))
                .collect();

            self.forward.process(&mut buffer);

            // Positive frequencies only (DC through Nyquist)
            buffer.truncate(self.config.num_bins());
            spectrogram.push(buffer);
        }

        spectrogram
    }

    /// Weighted overlap-add inverse of a single channel, trimmed to `size`
    fn istft_channel(&self, spectrogram: &[Vec<Complex<f32>>], size: usize) -> Vec<f32> {
        let fft_size = self.config.fft_size;
        let hop = self.config.hop_size;
        let bins = self.config.num_bins();
        let pad = self.config.center_pad();

        let span = (spectrogram.len().saturating_sub(1)) * hop + fft_size;
        let mut output = vec![0.0f32; span.max(pad + size)];
        let mut window_sum = vec![0.0f32; output.len()];

        let scale = 1.0 / fft_size as f32;
        for (frame_idx, frame) in spectrogram.iter().enumerate() {
            let start = frame_idx * hop;

            let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_size];
            buffer[..bins].copy_from_slice(frame);

            // Mirror negative frequencies (conjugate symmetric)
            for i in 1..fft_size - bins + 1 {
                buffer[fft_size - i] = frame[i].conj();
            }

            self.inverse.process(&mut buffer);

            for (i, &w) in self.window.iter().enumerate() {
                output[start + i] += buffer[i].re * scale * w;
                window_sum[start + i] += w * w;
            }
        }

        (pad..pad + size)
            .map(|i| {
                if window_sum[i] > 1e-8 {
                    output[i] / window_sum[i]
                } else {
                    0.0
                }
            })
            .collect()
    }
}
