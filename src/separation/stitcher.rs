//! Reassembly of per-window model outputs into one length-exact stem
//!
//! Windows are taken strictly in index order. Each window contributes its
//! first `stride` samples (the last window contributes all of it), and the
//! result is truncated to the original sample count. For non-overlapping
//! windows this is plain concatenation followed by a trim.

use crate::error::{DemixError, Result};
use ndarray::{s, Array2, ArrayView2};

/// Model output for one window, `[channels, window_size]`
#[derive(Debug, Clone)]
pub struct WindowOutput {
    pub index: usize,
    pub samples: Array2<f32>,
}

/// Concatenate ordered window outputs along time and trim to `num_samples`
pub fn stitch_windows(
    outputs: &[WindowOutput],
    stride: usize,
    num_samples: usize,
) -> Result<Array2<f32>> {
    let first = outputs.first().ok_or(DemixError::EmptyWindowSequence)?;
    let channels = first.samples.nrows();

    let mut stitched = Array2::<f32>::zeros((channels, num_samples));
    let mut cursor = 0;

    for (position, output) in outputs.iter().enumerate() {
        if output.index != position {
            return Err(DemixError::shape(format!(
                "window at position {} carries index {}; windows must arrive in order",
                position, output.index
            )));
        }
        if output.samples.nrows() != channels {
            return Err(DemixError::shape(format!(
                "window {} has {} channels, expected {}",
                position,
                output.samples.nrows(),
                channels
            )));
        }

        let is_last = position + 1 == outputs.len();
        let take = if is_last {
            output.samples.ncols()
        } else {
            if output.samples.ncols() < stride {
                return Err(DemixError::shape(format!(
                    "window {} has {} samples, shorter than stride {}",
                    position,
                    output.samples.ncols(),
                    stride
                )));
            }
            stride
        };

        let copy = take.min(num_samples - cursor);
        if copy > 0 {
            stitched
                .slice_mut(s![.., cursor..cursor + copy])
                .assign(&output.samples.slice(s![.., ..copy]));
            cursor += copy;
        }
    }

    if cursor < num_samples {
        return Err(DemixError::shape(format!(
            "stitched windows cover {} samples, need {}",
            cursor, num_samples
        )));
    }

    Ok(stitched)
}

/// Trim a full-length signal to exactly `num_samples`
pub fn trim_to_length(samples: ArrayView2<'_, f32>, num_samples: usize) -> Result<Array2<f32>> {
    if samples.ncols() < num_samples {
        return Err(DemixError::shape(format!(
            "signal has {} samples, cannot trim to {}",
            samples.ncols(),
            num_samples
        )));
    }
    Ok(samples.slice(s![.., ..num_samples]).to_owned())
}
