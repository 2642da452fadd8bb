//! Splits a stitched `[2, N]` stem into independent left/right buffers

use crate::error::{DemixError, Result};
use crate::types::StereoBuffer;
use ndarray::ArrayView2;

/// Render a stereo stem into owned, contiguous channel buffers
pub fn render_stereo(stem: ArrayView2<'_, f32>, sample_rate: u32) -> Result<StereoBuffer> {
    if stem.nrows() != 2 {
        return Err(DemixError::ChannelCountMismatch {
            expected: 2,
            found: stem.nrows(),
        });
    }

    let left = stem.row(0).to_vec();
    let right = stem.row(1).to_vec();

    Ok(StereoBuffer::new(left, right, sample_rate))
}
