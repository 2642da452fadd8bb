//! Adapting pipeline arrays to model tensors and back
//!
//! Models take a leading batch axis of 1. The time-domain model returns
//! `[1, stems, channels, window]` and the drums channel is picked out by
//! index; spectral models return a magnitude with the batch axis still
//! attached, which is squeezed back to `[channels, bins, frames]`.

use super::engine::Tensor;
use crate::error::{DemixError, Result};
use ndarray::{Array2, Array3, Axis, Ix2, Ix3};

/// `[C, W]` window to a `[1, C, W]` model input
pub fn window_input(samples: &Array2<f32>) -> Tensor {
    samples.clone().insert_axis(Axis(0)).into_dyn()
}

/// `[C, F, T]` magnitude to a `[1, C, F, T]` model input
pub fn magnitude_input(magnitude: &Array3<f32>) -> Tensor {
    magnitude.clone().insert_axis(Axis(0)).into_dyn()
}

/// Pick one stem out of a time-domain model output and check it against the window layout
///
/// Accepts `[1, S, C, W]`, `[S, C, W]`, or a bare `[C, W]` when `stem_index` is 0.
pub fn select_stem(
    output: Tensor,
    stem_index: usize,
    channels: usize,
    window_size: usize,
) -> Result<Array2<f32>> {
    let shape = output.shape().to_vec();
    let mut stems = output;

    if stems.ndim() == 4 {
        if shape[0] != 1 {
            return Err(DemixError::shape(format!(
                "time-domain output {:?} has batch size {}, expected 1",
                shape, shape[0]
            )));
        }
        stems = stems.index_axis_move(Axis(0), 0);
    }

    let selected = match stems.ndim() {
        3 => {
            let available = stems.shape()[0];
            if stem_index >= available {
                return Err(DemixError::shape(format!(
                    "stem index {} out of range for output {:?} ({} stems)",
                    stem_index, shape, available
                )));
            }
            stems.index_axis_move(Axis(0), stem_index)
        }
        2 if stem_index == 0 => stems,
        _ => {
            return Err(DemixError::shape(format!(
                "unexpected time-domain output rank {} ({:?})",
                shape.len(),
                shape
            )))
        }
    };

    let selected = selected
        .into_dimensionality::<Ix2>()
        .map_err(|e| DemixError::shape(format!("time-domain output {:?}: {}", shape, e)))?;

    if selected.dim() != (channels, window_size) {
        return Err(DemixError::shape(format!(
            "stem output is {:?}, expected [{}, {}]",
            selected.shape(),
            channels,
            window_size
        )));
    }

    Ok(selected)
}

/// Drop leading unit axes from a spectral model output until it is `[C, F, T]`
///
/// The result must match the phase shape exactly.
pub fn squeeze_magnitude(output: Tensor, expected: (usize, usize, usize)) -> Result<Array3<f32>> {
    let shape = output.shape().to_vec();
    let mut magnitude = output;

    while magnitude.ndim() > 3 && magnitude.shape()[0] == 1 {
        magnitude = magnitude.index_axis_move(Axis(0), 0);
    }

    let magnitude = magnitude
        .into_dimensionality::<Ix3>()
        .map_err(|_| DemixError::shape(format!("spectral output {:?} is not [C, F, T]", shape)))?;

    if magnitude.dim() != expected {
        return Err(DemixError::shape(format!(
            "spectral output {:?} does not match phase [{}, {}, {}]",
            shape, expected.0, expected.1, expected.2
        )));
    }

    Ok(magnitude)
}
