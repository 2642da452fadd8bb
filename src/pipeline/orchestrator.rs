//! Separation orchestration
//!
//! Sequences segmentation, transform, inference, reconstruction, stitching
//! and rendering for one request. The mode is chosen per request and borrows
//! the engines it needs mutably, so a request has exclusive use of them for
//! its whole lifetime.
//!
//! A request either returns the complete stem set for its mode or fails;
//! nothing partial escapes.

use crate::error::{DemixError, Result};
use crate::separation::tensor::{magnitude_input, select_stem, squeeze_magnitude, window_input};
use crate::separation::{
    render_stereo, stitch_windows, trim_to_length, ModelLoader, ReloadPolicy, SpectralTransform,
    StemEngine, StftConfig, WindowOutput, WindowSegmenter,
};
use crate::types::{SeparatedStem, Separation, StemKind, Waveform};
use clap::ValueEnum;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

// =============================================================================
// State machine
// =============================================================================

/// Per-request pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Segmenting,
    Transforming,
    Inferring,
    Reconstructing,
    Stitching,
    Rendering,
    Done,
    Failed,
}

impl PipelineState {
    /// Whether `next` may follow `self`
    ///
    /// `Stitching -> Segmenting` starts the second stage of a cascade.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Segmenting)
            | (Segmenting, Transforming)
            | (Transforming, Inferring)
            | (Inferring, Reconstructing)
            | (Reconstructing, Stitching)
            | (Stitching, Segmenting)
            | (Stitching, Rendering)
            | (Rendering, Done) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Receives progress notifications from a running request
///
/// Inference notifications may arrive from worker threads.
pub trait ProgressSink: Sync {
    fn on_state(&self, _state: PipelineState) {}

    /// `completed` of `total` inferences finished for `stem`
    fn on_inference(&self, _stem: StemKind, _completed: usize, _total: usize) {}
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

// =============================================================================
// Models per mode
// =============================================================================

/// Windowed full-mix to drums model
#[derive(Debug)]
pub struct TimeDomainModel {
    engine: StemEngine,
    segmenter: WindowSegmenter,
    stem_index: usize,
}

impl TimeDomainModel {
    pub fn new(engine: StemEngine, segmenter: WindowSegmenter, stem_index: usize) -> Self {
        Self {
            engine,
            segmenter,
            stem_index,
        }
    }

    /// Load the drums model; `stem_index` selects the drums channel of its output
    pub fn load(
        loader: Box<dyn ModelLoader>,
        segmenter: WindowSegmenter,
        stem_index: usize,
        policy: ReloadPolicy,
    ) -> Result<Self> {
        let engine = StemEngine::load(StemKind::Drums, loader, policy)?;
        Ok(Self::new(engine, segmenter, stem_index))
    }

    pub fn engine(&self) -> &StemEngine {
        &self.engine
    }

    pub fn segmenter(&self) -> &WindowSegmenter {
        &self.segmenter
    }
}

/// One spectral model per kit piece, sharing a single transform configuration
#[derive(Debug)]
pub struct SpectralModelBank {
    transform: SpectralTransform,
    engines: Vec<StemEngine>,
}

impl SpectralModelBank {
    /// Engines must be non-empty with distinct stem kinds; output order follows them
    pub fn new(transform: SpectralTransform, engines: Vec<StemEngine>) -> Result<Self> {
        if engines.is_empty() {
            return Err(DemixError::ConfigError(
                "spectral bank needs at least one stem model".to_string(),
            ));
        }
        for (i, engine) in engines.iter().enumerate() {
            if engines[..i].iter().any(|e| e.kind() == engine.kind()) {
                return Err(DemixError::ConfigError(format!(
                    "spectral bank lists '{}' more than once",
                    engine.kind()
                )));
            }
        }
        Ok(Self { transform, engines })
    }

    /// Load one engine per `(stem, loader)` pair
    pub fn load(
        config: StftConfig,
        loaders: Vec<(StemKind, Box<dyn ModelLoader>)>,
        policy: ReloadPolicy,
    ) -> Result<Self> {
        let transform = SpectralTransform::new(config)?;
        let engines = loaders
            .into_iter()
            .map(|(kind, loader)| StemEngine::load(kind, loader, policy))
            .collect::<Result<Vec<_>>>()?;
        Self::new(transform, engines)
    }

    pub fn engines(&self) -> &[StemEngine] {
        &self.engines
    }

    pub fn kinds(&self) -> Vec<StemKind> {
        self.engines.iter().map(StemEngine::kind).collect()
    }

    pub fn transform(&self) -> &SpectralTransform {
        &self.transform
    }
}

/// Which pipeline a request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModeKind {
    /// Full mix to a single drums stem
    TimeDomain,
    /// Drum recording to kick/snare/toms/hi-hat/cymbals
    #[default]
    Spectral,
    /// Full mix to drums, then drums to kit pieces
    Cascade,
}

impl ModeKind {
    /// Stems a request in this mode produces with the standard kit bank
    pub fn stems(self) -> Vec<StemKind> {
        match self {
            ModeKind::TimeDomain => vec![StemKind::Drums],
            ModeKind::Spectral => StemKind::KIT.to_vec(),
            ModeKind::Cascade => std::iter::once(StemKind::Drums)
                .chain(StemKind::KIT)
                .collect(),
        }
    }

    pub fn uses_time_domain(self) -> bool {
        matches!(self, ModeKind::TimeDomain | ModeKind::Cascade)
    }

    pub fn uses_spectral(self) -> bool {
        matches!(self, ModeKind::Spectral | ModeKind::Cascade)
    }
}

impl std::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ModeKind::TimeDomain => "time-domain",
            ModeKind::Spectral => "spectral",
            ModeKind::Cascade => "cascade",
        })
    }
}

/// A request's mode together with exclusive access to its engines
pub enum SeparationMode<'a> {
    TimeDomain(&'a mut TimeDomainModel),
    Spectral(&'a mut SpectralModelBank),
    Cascade {
        drums: &'a mut TimeDomainModel,
        kit: &'a mut SpectralModelBank,
    },
}

impl SeparationMode<'_> {
    pub fn kind(&self) -> ModeKind {
        match self {
            SeparationMode::TimeDomain(_) => ModeKind::TimeDomain,
            SeparationMode::Spectral(_) => ModeKind::Spectral,
            SeparationMode::Cascade { .. } => ModeKind::Cascade,
        }
    }

    /// End the request's use of every engine in this mode
    fn complete_batch(&mut self) {
        match self {
            SeparationMode::TimeDomain(model) => model.engine.complete_batch(),
            SeparationMode::Spectral(bank) => {
                bank.engines.iter_mut().for_each(StemEngine::complete_batch)
            }
            SeparationMode::Cascade { drums, kit } => {
                drums.engine.complete_batch();
                kit.engines.iter_mut().for_each(StemEngine::complete_batch);
            }
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs separation requests and tracks their state
#[derive(Debug)]
pub struct SeparationOrchestrator {
    state: PipelineState,
    transitions: Vec<PipelineState>,
    parallel_stems: bool,
    sample_rate: u32,
}

impl SeparationOrchestrator {
    /// `sample_rate` is the rate the models expect; other rates are processed with a warning
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: PipelineState::Idle,
            transitions: vec![PipelineState::Idle],
            parallel_stems: true,
            sample_rate,
        }
    }

    /// Run spectral stem inferences concurrently (default) or one after another
    pub fn with_parallel_stems(mut self, parallel: bool) -> Self {
        self.parallel_stems = parallel;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// States visited by the most recent request, starting at `Idle`
    pub fn transitions(&self) -> &[PipelineState] {
        &self.transitions
    }

    /// Separate one stereo waveform
    ///
    /// The input must already be upmixed to two channels. Engines see one
    /// batch per call, so their reload policy applies once per request
    /// whether it succeeds or fails.
    pub fn separate(
        &mut self,
        waveform: &Waveform,
        mut mode: SeparationMode<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<Separation> {
        self.state = PipelineState::Idle;
        self.transitions = vec![PipelineState::Idle];
        progress.on_state(PipelineState::Idle);

        let start = Instant::now();
        let kind = mode.kind();
        let result = self.run(waveform, &mut mode, progress);
        mode.complete_batch();

        match result {
            Ok(separation) => {
                self.transition(PipelineState::Done, progress);
                info!(
                    "Separated {} samples into {} stems ({} mode) in {:.2}s",
                    separation.num_samples,
                    separation.stems.len(),
                    kind,
                    start.elapsed().as_secs_f64()
                );
                Ok(separation)
            }
            Err(e) => {
                error!("Separation failed in {:?}: {}", self.state, e);
                self.transition(PipelineState::Failed, progress);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: PipelineState, progress: &dyn ProgressSink) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.transitions.push(next);
        progress.on_state(next);
    }

    fn run(
        &mut self,
        waveform: &Waveform,
        mode: &mut SeparationMode<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<Separation> {
        if waveform.num_channels() != 2 {
            return Err(DemixError::ChannelCountMismatch {
                expected: 2,
                found: waveform.num_channels(),
            });
        }
        if waveform.sample_rate() != self.sample_rate {
            warn!(
                "Input is {}Hz but models expect {}Hz; results may be degraded",
                waveform.sample_rate(),
                self.sample_rate
            );
        }

        let num_samples = waveform.len();
        let stitched: Vec<(StemKind, Array2<f32>)> = match mode {
            SeparationMode::TimeDomain(model) => {
                let drums = self.run_time_domain(waveform, model, progress)?;
                vec![(StemKind::Drums, drums)]
            }
            SeparationMode::Spectral(bank) => {
                self.run_spectral(waveform.samples(), bank, progress)?
            }
            SeparationMode::Cascade { drums, kit } => {
                let bus = self.run_time_domain(waveform, drums, progress)?;
                let mut stems = self.run_spectral(bus.view(), kit, progress)?;
                stems.insert(0, (StemKind::Drums, bus));
                stems
            }
        };

        self.transition(PipelineState::Rendering, progress);
        let stems = stitched
            .iter()
            .map(|(kind, samples)| {
                Ok(SeparatedStem {
                    kind: *kind,
                    audio: render_stereo(samples.view(), waveform.sample_rate())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Separation {
            num_samples,
            sample_rate: waveform.sample_rate(),
            stems,
        })
    }

    /// Windowed inference; returns the stitched `[C, N]` drums stem
    fn run_time_domain(
        &mut self,
        waveform: &Waveform,
        model: &mut TimeDomainModel,
        progress: &dyn ProgressSink,
    ) -> Result<Array2<f32>> {
        let num_samples = waveform.len();
        let channels = waveform.num_channels();
        let window_size = model.segmenter.window_size();

        self.transition(PipelineState::Segmenting, progress);
        let windows = model.segmenter.segment(waveform);
        let padding = windows.last().map(|w| w.padding()).unwrap_or(0);
        debug!(
            "{} windows of {} samples, {} padding samples in last window",
            windows.len(),
            window_size,
            padding
        );

        // Raw waveform model: no transform
        self.transition(PipelineState::Transforming, progress);

        self.transition(PipelineState::Inferring, progress);
        let total = windows.len();
        let mut outputs = Vec::with_capacity(total);
        for window in &windows {
            let output = model.engine.infer(&window_input(&window.samples))?;
            let samples = select_stem(output, model.stem_index, channels, window_size)?;
            outputs.push(WindowOutput {
                index: window.index,
                samples,
            });
            debug!("Window {}/{} done", window.index + 1, total);
            progress.on_inference(StemKind::Drums, window.index + 1, total);
        }

        self.transition(PipelineState::Reconstructing, progress);

        self.transition(PipelineState::Stitching, progress);
        stitch_windows(&outputs, model.segmenter.stride(), num_samples)
    }

    /// One full-length spectral pass; returns one `[C, N]` stem per engine, in bank order
    fn run_spectral(
        &mut self,
        samples: ArrayView2<'_, f32>,
        bank: &mut SpectralModelBank,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<(StemKind, Array2<f32>)>> {
        let num_samples = samples.ncols();

        // The whole signal is one window
        self.transition(PipelineState::Segmenting, progress);

        self.transition(PipelineState::Transforming, progress);
        let frame = bank.transform.forward(samples);
        let expected = frame.magnitude.dim();
        debug!(
            "Spectrogram: {} channels, {} bins, {} frames",
            expected.0, expected.1, expected.2
        );

        self.transition(PipelineState::Inferring, progress);
        let input = magnitude_input(&frame.magnitude);
        let total = bank.engines.len();
        let completed = AtomicUsize::new(0);
        let infer_one = |engine: &mut StemEngine| -> Result<(StemKind, ndarray::Array3<f32>)> {
            let output = engine.infer(&input)?;
            let magnitude = squeeze_magnitude(output, expected)?;
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("{} inference done ({}/{})", engine.kind(), done, total);
            progress.on_inference(engine.kind(), done, total);
            Ok((engine.kind(), magnitude))
        };
        let magnitudes: Vec<(StemKind, ndarray::Array3<f32>)> = if self.parallel_stems {
            bank.engines.par_iter_mut().map(infer_one).collect::<Result<_>>()?
        } else {
            bank.engines.iter_mut().map(infer_one).collect::<Result<_>>()?
        };

        self.transition(PipelineState::Reconstructing, progress);
        let transform = &bank.transform;
        let phase = frame.phase.view();
        let rebuild = |(kind, magnitude): &(StemKind, ndarray::Array3<f32>)| {
            transform
                .inverse(magnitude.view(), phase, num_samples)
                .map(|signal| (*kind, signal))
        };
        let signals: Vec<(StemKind, Array2<f32>)> = if self.parallel_stems {
            magnitudes.par_iter().map(rebuild).collect::<Result<_>>()?
        } else {
            magnitudes.iter().map(rebuild).collect::<Result<_>>()?
        };

        self.transition(PipelineState::Stitching, progress);
        signals
            .into_iter()
            .map(|(kind, signal)| Ok((kind, trim_to_length(signal.view(), num_samples)?)))
            .collect()
    }
}
