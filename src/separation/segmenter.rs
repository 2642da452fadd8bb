//! Fixed-length windowing for the time-domain model
//!
//! The time-domain model only accepts inputs of exactly its trained window
//! length, so a recording is carved into `[channels, window_size]` windows.
//! The final window is zero-padded on the right.

use crate::error::{DemixError, Result};
use crate::types::Waveform;
use ndarray::{s, Array2};

/// Window length and hop between window starts, in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSegmenter {
    window_size: usize,
    stride: usize,
}

/// A single fixed-shape window carved from a waveform
#[derive(Debug, Clone)]
pub struct Window {
    /// Position in the window sequence (0-based)
    pub index: usize,
    /// First sample of the window in the source waveform
    pub start_sample: usize,
    /// Number of real (non-padding) samples at the front of the window
    pub valid_samples: usize,
    /// `[channels, window_size]`
    pub samples: Array2<f32>,
}

impl Window {
    /// Zero samples appended per channel
    pub fn padding(&self) -> usize {
        self.samples.ncols() - self.valid_samples
    }
}

impl WindowSegmenter {
    /// `stride == window_size` gives non-overlapping windows; `stride < window_size` overlaps
    pub fn new(window_size: usize, stride: usize) -> Result<Self> {
        if window_size == 0 || stride == 0 {
            return Err(DemixError::InvalidWindowParams {
                window_size,
                stride,
            });
        }
        Ok(Self {
            window_size,
            stride,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of windows for a waveform of `num_samples`
    ///
    /// An empty waveform still yields one (all-zero) window.
    pub fn num_windows(&self, num_samples: usize) -> usize {
        num_samples.div_ceil(self.stride).max(1)
    }

    /// Split a waveform into ordered, zero-padded windows
    pub fn segment(&self, waveform: &Waveform) -> Vec<Window> {
        let total_samples = waveform.len();
        let channels = waveform.num_channels();
        let source = waveform.samples();
        let count = self.num_windows(total_samples);

        let mut windows = Vec::with_capacity(count);
        for index in 0..count {
            let start = (index * self.stride).min(total_samples);
            let end = (start + self.window_size).min(total_samples);
            let valid = end - start;

            let mut samples = Array2::<f32>::zeros((channels, self.window_size));
            if valid > 0 {
                samples
                    .slice_mut(s![.., ..valid])
                    .assign(&source.slice(s![.., start..end]));
            }

            windows.push(Window {
                index,
                start_sample: start,
                valid_samples: valid,
                samples,
            });
        }

        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(channels: usize, len: usize) -> Waveform {
        let data = (0..channels)
            .map(|c| (0..len).map(|i| (c * 1000 + i) as f32).collect())
            .collect();
        Waveform::from_channels(data, 44100).unwrap()
    }

    #[test]
    fn test_rejects_zero_params() {
        assert!(matches!(
            WindowSegmenter::new(0, 10),
            Err(DemixError::InvalidWindowParams { .. })
        ));
        assert!(matches!(
            WindowSegmenter::new(10, 0),
            Err(DemixError::InvalidWindowParams { .. })
        ));
    }

    #[test]
    fn test_window_count_is_ceil() {
        let seg = WindowSegmenter::new(4, 4).unwrap();
        assert_eq!(seg.num_windows(8), 2);
        assert_eq!(seg.num_windows(9), 3);
        assert_eq!(seg.num_windows(1), 1);
        assert_eq!(seg.segment(&ramp(2, 9)).len(), 3);
    }

    #[test]
    fn test_every_window_has_full_shape() {
        let seg = WindowSegmenter::new(5, 5).unwrap();
        for w in seg.segment(&ramp(2, 13)) {
            assert_eq!(w.samples.dim(), (2, 5));
        }
    }

    #[test]
    fn test_last_window_padded_per_channel() {
        let seg = WindowSegmenter::new(4, 4).unwrap();
        let windows = seg.segment(&ramp(2, 6));
        let last = &windows[1];
        assert_eq!(last.start_sample, 4);
        assert_eq!(last.valid_samples, 2);
        assert_eq!(last.padding(), 2);
        assert_eq!(last.samples.row(0).to_vec(), vec![4.0, 5.0, 0.0, 0.0]);
        assert_eq!(last.samples.row(1).to_vec(), vec![1004.0, 1005.0, 0.0, 0.0]);
    }

    #[test]
    fn test_concatenation_reproduces_input_for_exact_multiple() {
        let wav = ramp(2, 12);
        let seg = WindowSegmenter::new(4, 4).unwrap();
        let windows = seg.segment(&wav);
        assert_eq!(windows.len(), 3);

        for ch in 0..2 {
            let joined: Vec<f32> = windows
                .iter()
                .flat_map(|w| w.samples.row(ch).to_vec())
                .collect();
            assert_eq!(joined, wav.samples().row(ch).to_vec());
        }
    }

    #[test]
    fn test_overlapping_windows() {
        let seg = WindowSegmenter::new(4, 2).unwrap();
        let windows = seg.segment(&ramp(1, 6));
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].samples.row(0).to_vec(), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(windows[2].samples.row(0).to_vec(), vec![4.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_waveform_yields_single_zero_window() {
        let seg = WindowSegmenter::new(8, 8).unwrap();
        let empty = Waveform::new(Array2::zeros((2, 0)), 44100);
        let windows = seg.segment(&empty);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].valid_samples, 0);
        assert_eq!(windows[0].samples.dim(), (2, 8));
        assert!(windows[0].samples.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_indices_are_sequential() {
        let seg = WindowSegmenter::new(3, 3).unwrap();
        let windows = seg.segment(&ramp(2, 10));
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.index, i);
            assert_eq!(w.start_sample, i * 3);
        }
    }
}
