//! drumdemix - Drum stem separation
//!
//! Separates audio into drum stems with pre-trained neural models. Two model
//! families are supported: a windowed time-domain model that pulls the drum
//! bus out of a full mix, and a bank of magnitude-spectrogram models that
//! split a drum recording into kick, snare, toms, hi-hat and cymbals.
//!
//! # Architecture
//!
//! - `config`: CLI argument parsing and runtime settings
//! - `discovery`: input file scanning
//! - `audio`: decoding with symphonia and resampling with rubato
//! - `separation`: segmenter, STFT, model engines, stitcher, renderer
//! - `models`: model manifest, directory resolution, ONNX backend
//! - `pipeline`: per-request state machine and the batch front-end
//! - `export`: stem WAV files and the JSON run manifest
//!
//! # Example
//!
//! ```no_run
//! use drumdemix::{config::Settings, pipeline};
//!
//! let settings = Settings::default();
//! let result = pipeline::run(&settings).expect("Separation failed");
//! println!("Separated {} tracks", result.successful);
//! ```

pub mod audio;
pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod separation;
pub mod types;

// Re-export key types at crate root
pub use error::{DemixError, Result};
pub use pipeline::{ModeKind, SeparationMode, SeparationOrchestrator};
pub use types::{Separation, StemKind, StereoBuffer, Waveform};
