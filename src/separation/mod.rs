//! Core separation pipeline components
//!
//! Leaf stages used by the orchestrator:
//! - `segmenter`: fixed-length, zero-padded windowing
//! - `stft`: magnitude/phase transform and its inverse
//! - `engine`: per-stem model handles and reload policy
//! - `tensor`: model input/output layout adaptation
//! - `stitcher`: ordered reassembly and trim to the input length
//! - `render`: stereo split into owned channel buffers

pub mod engine;
pub mod render;
pub mod segmenter;
pub mod stft;
pub mod stitcher;
pub mod tensor;

pub use engine::{ModelLoader, ReloadPolicy, StemEngine, StemModel, Tensor};
pub use render::render_stereo;
pub use segmenter::{Window, WindowSegmenter};
pub use stft::{SpectralFrame, SpectralTransform, StftConfig, WindowFunction};
pub use stitcher::{stitch_windows, trim_to_length, WindowOutput};
