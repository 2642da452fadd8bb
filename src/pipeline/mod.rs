//! Separation pipeline
//!
//! `orchestrator` runs one request through the state machine; `batch`
//! drives it over a set of input files.

pub mod batch;
pub mod orchestrator;

pub use batch::{run, run_with, BatchResult};
pub use orchestrator::{
    ModeKind, NoProgress, PipelineState, ProgressSink, SeparationMode, SeparationOrchestrator,
    SpectralModelBank, TimeDomainModel,
};
