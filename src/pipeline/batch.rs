//! Batch front-end
//!
//! Discovers input files, then decodes, separates, and exports them one at a
//! time. Each request has exclusive use of the loaded engines, so files are
//! processed sequentially; parallelism lives inside a request.

use super::orchestrator::{
    ModeKind, PipelineState, ProgressSink, SeparationMode, SeparationOrchestrator,
    SpectralModelBank, TimeDomainModel,
};
use crate::audio;
use crate::config::Settings;
use crate::discovery::{self, DiscoveredFile};
use crate::error::{DemixError, Result};
use crate::export::{self, TrackRecord, RUN_MANIFEST_FILENAME};
use crate::models::{self, ArtifactSpec, ModelManifest};
use crate::separation::ModelLoader;
use crate::types::StemKind;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Batch result summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchResult {
    fn empty(total_files: usize, skipped: usize) -> Self {
        Self {
            total_files,
            successful: 0,
            failed: 0,
            skipped,
        }
    }
}

/// Run a batch with the models found in the configured model directory
pub fn run(settings: &Settings) -> Result<BatchResult> {
    let model_dir = models::find_model_dir(settings.model_dir.as_deref())?;
    let manifest = ModelManifest::load(&model_dir)?;
    info!("Using models from {}", model_dir.display());

    run_with(settings, &manifest, |_, artifact| {
        models::artifact_loader(&model_dir, artifact, &manifest)
    })
}

/// Run a batch, building each engine's loader with `make_loader`
pub fn run_with<F>(settings: &Settings, manifest: &ModelManifest, make_loader: F) -> Result<BatchResult>
where
    F: Fn(StemKind, &ArtifactSpec) -> Result<Box<dyn ModelLoader>>,
{
    let batch_start = Instant::now();

    configure_thread_pool(settings.threads)?;

    info!("Scanning for audio files...");
    let files = discovery::scan(&settings.input, settings.recursive)?;
    if files.is_empty() {
        return Ok(BatchResult::empty(0, 0));
    }
    info!("Found {} audio files", files.len());

    if settings.dry_run {
        return Ok(run_dry_run(&files, settings, manifest));
    }

    let manifest_path = settings.output.join(RUN_MANIFEST_FILENAME);
    let existing = if settings.force {
        debug!("Force mode enabled, will re-separate all files");
        Default::default()
    } else {
        export::read_existing_separations(&manifest_path, settings.mode)
    };

    let (pending, already_done): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| {
        let separated = existing.contains(&*f.path.to_string_lossy());
        if separated {
            debug!("Skipping {} (already separated)", f.path.display());
        }
        !separated
    });

    let total_files = pending.len() + already_done.len();
    if !already_done.is_empty() {
        info!(
            "Skipping {} already-separated files (use --force to re-separate)",
            already_done.len()
        );
    }
    if pending.is_empty() {
        info!("All files already separated, nothing to do");
        return Ok(BatchResult::empty(total_files, already_done.len()));
    }

    let (records, stats, fatal) = separate_files(&pending, settings, manifest, &make_loader)?;

    if !records.is_empty() {
        let mut tracks = export::read_existing_tracks(&manifest_path);
        tracks.retain(|t| {
            !records
                .iter()
                .any(|r| r.path == t.path && r.mode == t.mode)
        });
        tracks.extend(records);
        export::write_run_manifest(&tracks, &manifest_path)?;
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    info!(
        "Batch finished in {:.2}s",
        batch_start.elapsed().as_secs_f64()
    );

    Ok(BatchResult {
        total_files,
        successful: stats.successful,
        failed: stats.failed,
        skipped: stats.skipped + already_done.len(),
    })
}

#[derive(Default)]
struct BatchStats {
    successful: usize,
    failed: usize,
    skipped: usize,
}

/// Engines for the configured mode, loaded once for the whole batch
struct LoadedModels {
    drums: Option<TimeDomainModel>,
    kit: Option<SpectralModelBank>,
}

impl LoadedModels {
    fn load<F>(mode: ModeKind, settings: &Settings, manifest: &ModelManifest, make_loader: &F) -> Result<Self>
    where
        F: Fn(StemKind, &ArtifactSpec) -> Result<Box<dyn ModelLoader>>,
    {
        let policy = settings.reload_policy.unwrap_or(manifest.reload_policy);
        debug!("Reload policy: {:?}", policy);

        let drums = if mode.uses_time_domain() {
            let spec = &manifest.time_domain;
            let loader = make_loader(StemKind::Drums, &spec.model)?;
            Some(TimeDomainModel::load(
                loader,
                manifest.segmenter()?,
                spec.stem_index,
                policy,
            )?)
        } else {
            None
        };

        let kit = if mode.uses_spectral() {
            let loaders = manifest
                .spectral
                .stems
                .iter()
                .map(|s| Ok((s.stem, make_loader(s.stem, &s.artifact)?)))
                .collect::<Result<Vec<_>>>()?;
            Some(SpectralModelBank::load(manifest.stft_config(), loaders, policy)?)
        } else {
            None
        };

        Ok(Self { drums, kit })
    }

    fn mode(&mut self, kind: ModeKind) -> Result<SeparationMode<'_>> {
        match (kind, self.drums.as_mut(), self.kit.as_mut()) {
            (ModeKind::TimeDomain, Some(drums), _) => Ok(SeparationMode::TimeDomain(drums)),
            (ModeKind::Spectral, _, Some(kit)) => Ok(SeparationMode::Spectral(kit)),
            (ModeKind::Cascade, Some(drums), Some(kit)) => Ok(SeparationMode::Cascade { drums, kit }),
            _ => Err(DemixError::ConfigError(format!(
                "models for {} mode are not loaded",
                kind
            ))),
        }
    }
}

/// Reports request progress on the batch progress bar
struct BarProgress<'a> {
    bar: &'a ProgressBar,
    track: &'a str,
}

impl ProgressSink for BarProgress<'_> {
    fn on_state(&self, state: PipelineState) {
        self.bar.set_message(format!("{} ({:?})", self.track, state));
    }

    fn on_inference(&self, stem: StemKind, completed: usize, total: usize) {
        self.bar
            .set_message(format!("{} ({} {}/{})", self.track, stem, completed, total));
    }
}

/// Separate files in order, stopping at the first fatal error
///
/// A fatal error is returned alongside the records gathered before it, so
/// finished tracks still reach the run manifest.
fn separate_files<F>(
    files: &[DiscoveredFile],
    settings: &Settings,
    manifest: &ModelManifest,
    make_loader: &F,
) -> Result<(Vec<TrackRecord>, BatchStats, Option<DemixError>)>
where
    F: Fn(StemKind, &ArtifactSpec) -> Result<Box<dyn ModelLoader>>,
{
    let mut loaded = LoadedModels::load(settings.mode, settings, manifest, make_loader)?;
    let mut orchestrator = SeparationOrchestrator::new(manifest.sample_rate)
        .with_parallel_stems(settings.parallel_stems);

    let progress_bar = if settings.show_progress {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    info!("Separating {} files in {} mode", files.len(), settings.mode);

    let mut records = Vec::new();
    let mut stats = BatchStats::default();
    let mut fatal = None;

    for file in files {
        let track = file.track_name();
        let sink = BarProgress {
            bar: &progress_bar,
            track: &track,
        };

        let outcome = audio::decode_stereo(&file.path, manifest.sample_rate)
            .and_then(|waveform| orchestrator.separate(&waveform, loaded.mode(settings.mode)?, &sink))
            .and_then(|separation| {
                let stems = export::write_stems(&settings.output, &track, &separation, settings.bit_depth)?;
                Ok(TrackRecord::new(&file.path, settings.mode, &separation, &stems))
            });

        progress_bar.inc(1);

        match outcome {
            Ok(record) => {
                debug!("Separated {} into {} stems", file.path.display(), record.stems.len());
                stats.successful += 1;
                records.push(record);
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping {}: {}", file.path.display(), e);
                stats.skipped += 1;
            }
            Err(e) if e.is_request_failure() => {
                error!("Failed {}: {}", file.path.display(), e);
                stats.failed += 1;
            }
            Err(e) => {
                error!("Stopping batch at {}: {}", file.path.display(), e);
                fatal = Some(e);
                break;
            }
        }
    }

    progress_bar.finish_with_message("Separation complete");

    Ok((records, stats, fatal))
}

/// Dry run mode - show files and stems that would be produced without processing
fn run_dry_run(files: &[DiscoveredFile], settings: &Settings, manifest: &ModelManifest) -> BatchResult {
    println!();
    println!("=== DRY RUN MODE ===");
    println!();

    let mut by_directory: HashMap<PathBuf, Vec<&DiscoveredFile>> = HashMap::new();
    for file in files {
        let dir = file.path.parent().unwrap_or(&file.path).to_path_buf();
        by_directory.entry(dir).or_default().push(file);
    }

    let mut directories: Vec<_> = by_directory.keys().cloned().collect();
    directories.sort();

    for dir in &directories {
        let dir_files = &by_directory[dir];
        println!("{}/ ({} files)", dir.display(), dir_files.len());
        for file in dir_files {
            let filename = file
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("?");
            println!("  {}", filename);
        }
        println!();
    }

    let stems = settings.mode.stems();

    println!("─────────────────────────────────────────");
    println!();
    println!(
        "Would separate {} files in {} mode ({} stems each):",
        files.len(),
        settings.mode,
        stems.len()
    );
    for stem in &stems {
        let artifact = match stem {
            StemKind::Drums => Some(&manifest.time_domain.model),
            kind => manifest.spectral_artifact(*kind),
        };
        match artifact {
            Some(a) => println!("  {:<8} {}", stem.short_name(), a.file),
            None => println!("  {:<8} (no model listed)", stem.short_name()),
        }
    }
    println!();

    println!("Would create:");
    if let Some(first) = files.first() {
        let track = first.track_name();
        for stem in &stems {
            println!(
                "  {}",
                settings
                    .output
                    .join(export::stem_file_name(&track, *stem))
                    .display()
            );
        }
        if files.len() > 1 {
            println!("  ... and {} more tracks", files.len() - 1);
        }
    }
    println!("  {}", settings.output.join(RUN_MANIFEST_FILENAME).display());
    println!();

    BatchResult::empty(files.len(), files.len())
}

/// Configure the Rayon thread pool
fn configure_thread_pool(num_threads: usize) -> Result<()> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        Ok(()) => {
            debug!("Configured thread pool with {} threads", num_threads);
        }
        Err(e) => {
            // Already initialized (e.g. in tests)
            if e.to_string().contains("already been initialized") {
                debug!("Thread pool already initialized, using existing pool");
            } else {
                return Err(DemixError::ConfigError(format!(
                    "Failed to configure thread pool: {}",
                    e
                )));
            }
        }
    }
    Ok(())
}
