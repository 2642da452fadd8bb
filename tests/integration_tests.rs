//! Integration tests for the drumdemix batch pipeline
//!
//! These tests drive the full decode -> separate -> export path with
//! in-process models standing in for the ONNX backend.

use drumdemix::config::Settings;
use drumdemix::error::{DemixError, Result};
use drumdemix::export::BitDepth;
use drumdemix::models::{ArtifactSpec, ModelManifest};
use drumdemix::pipeline::{self, ModeKind};
use drumdemix::separation::{ModelLoader, ReloadPolicy, StemModel, Tensor};
use drumdemix::StemKind;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Generate a decaying click pattern WAV file for testing
fn generate_drum_wav(path: &Path, channels: u16, duration_secs: f32, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV file");

    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let hit_every = (sample_rate / 8) as usize;

    for i in 0..num_samples {
        let since_hit = (i % hit_every) as f32 / sample_rate as f32;
        let tone = (2.0 * std::f32::consts::PI * 180.0 * i as f32 / sample_rate as f32).sin();
        let sample = 0.6 * tone * (-40.0 * since_hit).exp();
        for _ in 0..channels {
            writer
                .write_sample((sample * 32767.0) as i16)
                .expect("Failed to write sample");
        }
    }

    writer.finalize().expect("Failed to finalize WAV");
}

/// Passes its input through unchanged
struct Identity;

impl StemModel for Identity {
    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        Ok(input.clone())
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// Always fails
struct Broken;

impl StemModel for Broken {
    fn infer(&mut self, _input: &Tensor) -> Result<Tensor> {
        Err(DemixError::inference("snare", "runtime error"))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

/// Small windows and FFT so tests run quickly
fn test_manifest() -> ModelManifest {
    let mut manifest = ModelManifest::default();
    manifest.time_domain.window_size = 2048;
    manifest.time_domain.stride = 2048;
    manifest.spectral.fft_size = 256;
    manifest.spectral.hop_size = 64;
    manifest
}

fn create_test_settings(input: &Path, output: &Path, mode: ModeKind) -> Settings {
    Settings {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        model_dir: None,
        mode,
        reload_policy: None,
        bit_depth: BitDepth::Sixteen,
        threads: 2,
        recursive: true,
        force: false,
        parallel_stems: true,
        show_progress: false, // Disable progress bars in tests
        dry_run: false,
    }
}

/// Loader factory handing out identity models and counting loads
fn identity_loaders(
    loads: Arc<AtomicUsize>,
) -> impl Fn(StemKind, &ArtifactSpec) -> Result<Box<dyn ModelLoader>> {
    move |_, _| {
        let loads = loads.clone();
        let loader = move || -> Result<Box<dyn StemModel>> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Identity))
        };
        Ok(Box::new(loader) as Box<dyn ModelLoader>)
    }
}

fn stem_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|n| n.ends_with(".wav") || n.ends_with(".tmp"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn test_cascade_batch_writes_all_stems() {
    let input_dir = TempDir::new().expect("Failed to create input temp dir");
    let output_dir = TempDir::new().expect("Failed to create output temp dir");

    generate_drum_wav(&input_dir.path().join("groove.wav"), 2, 0.25, 44100);
    generate_drum_wav(&input_dir.path().join("fill.wav"), 2, 0.1, 44100);

    let settings = create_test_settings(input_dir.path(), output_dir.path(), ModeKind::Cascade);
    let loads = Arc::new(AtomicUsize::new(0));
    let result = pipeline::run_with(&settings, &test_manifest(), identity_loaders(loads))
        .expect("Pipeline should succeed");

    assert_eq!(result.total_files, 2);
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 0);

    let names = stem_files(output_dir.path());
    assert_eq!(names.len(), 12, "six stems per track: {:?}", names);
    for stem in ["drums", "kick", "snare", "toms", "hihat", "cymbals"] {
        assert!(names.contains(&format!("groove_{}.wav", stem)));
        assert!(names.contains(&format!("fill_{}.wav", stem)));
    }

    let reader = hound::WavReader::open(output_dir.path().join("groove_kick.wav"))
        .expect("Stem should be a readable WAV");
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 44100);
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert_eq!(reader.duration(), 11025, "stem length equals input length");

    let json = fs::read_to_string(output_dir.path().join("separations.json"))
        .expect("Run manifest should exist");
    let parsed: serde_json::Value = serde_json::from_str(&json).expect("Valid JSON");
    let tracks = parsed["tracks"].as_array().expect("tracks array");
    assert_eq!(tracks.len(), 2);
    assert!(tracks.iter().all(|t| t["mode"] == "cascade"));
    assert!(tracks
        .iter()
        .all(|t| t["stems"].as_array().map(Vec::len) == Some(6)));
}

#[test]
fn test_time_domain_identity_reproduces_input() {
    let input_dir = TempDir::new().expect("Failed to create input temp dir");
    let output_dir = TempDir::new().expect("Failed to create output temp dir");

    let source = input_dir.path().join("mix.wav");
    generate_drum_wav(&source, 2, 0.2, 44100);

    let mut settings =
        create_test_settings(input_dir.path(), output_dir.path(), ModeKind::TimeDomain);
    settings.bit_depth = BitDepth::TwentyFour;

    let result = pipeline::run_with(
        &settings,
        &test_manifest(),
        identity_loaders(Arc::new(AtomicUsize::new(0))),
    )
    .expect("Pipeline should succeed");
    assert_eq!(result.successful, 1);

    let original: Vec<i32> = hound::WavReader::open(&source)
        .unwrap()
        .samples::<i16>()
        .map(|s| s.unwrap() as i32)
        .collect();
    let mut reader = hound::WavReader::open(output_dir.path().join("mix_drums.wav")).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 24);
    let separated: Vec<i32> = reader.samples::<i32>().map(|s| s.unwrap()).collect();

    assert_eq!(separated.len(), original.len());
    for (a, b) in original.iter().zip(&separated) {
        // 24-bit output of a 16-bit source: shift back and allow rounding
        assert!((a - (b >> 8)).abs() <= 1, "{} vs {}", a, b >> 8);
    }
}

#[test]
fn test_mono_low_rate_input_is_upmixed_and_resampled() {
    let input_dir = TempDir::new().expect("Failed to create input temp dir");
    let output_dir = TempDir::new().expect("Failed to create output temp dir");

    generate_drum_wav(&input_dir.path().join("mono.wav"), 1, 0.1, 22050);

    let settings = create_test_settings(input_dir.path(), output_dir.path(), ModeKind::Spectral);
    let result = pipeline::run_with(
        &settings,
        &test_manifest(),
        identity_loaders(Arc::new(AtomicUsize::new(0))),
    )
    .expect("Pipeline should succeed");
    assert_eq!(result.successful, 1);

    let reader = hound::WavReader::open(output_dir.path().join("mono_snare.wav")).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 44100);
    assert_eq!(reader.duration(), 4410);
}

#[test]
fn test_second_run_skips_existing_unless_forced() {
    let input_dir = TempDir::new().expect("Failed to create input temp dir");
    let output_dir = TempDir::new().expect("Failed to create output temp dir");

    generate_drum_wav(&input_dir.path().join("loop.wav"), 2, 0.1, 44100);

    let mut settings = create_test_settings(input_dir.path(), output_dir.path(), ModeKind::Spectral);
    let manifest = test_manifest();
    let loaders = || identity_loaders(Arc::new(AtomicUsize::new(0)));

    let first = pipeline::run_with(&settings, &manifest, loaders()).unwrap();
    assert_eq!(first.successful, 1);

    let second = pipeline::run_with(&settings, &manifest, loaders()).unwrap();
    assert_eq!(second.total_files, 1);
    assert_eq!(second.successful, 0);
    assert_eq!(second.skipped, 1);

    // A different mode is not covered by the earlier run
    settings.mode = ModeKind::TimeDomain;
    let other_mode = pipeline::run_with(&settings, &manifest, loaders()).unwrap();
    assert_eq!(other_mode.successful, 1);

    settings.mode = ModeKind::Spectral;
    settings.force = true;
    let forced = pipeline::run_with(&settings, &manifest, loaders()).unwrap();
    assert_eq!(forced.successful, 1);

    let json = fs::read_to_string(output_dir.path().join("separations.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(
        parsed["tracks"].as_array().map(Vec::len),
        Some(2),
        "one record per (track, mode)"
    );
}

#[test]
fn test_inference_failure_writes_no_stems() {
    let input_dir = TempDir::new().expect("Failed to create input temp dir");
    let output_dir = TempDir::new().expect("Failed to create output temp dir");

    generate_drum_wav(&input_dir.path().join("break.wav"), 2, 0.1, 44100);

    let settings = create_test_settings(input_dir.path(), output_dir.path(), ModeKind::Cascade);
    let make_loader = |kind: StemKind, _: &ArtifactSpec| -> Result<Box<dyn ModelLoader>> {
        let loader = move || -> Result<Box<dyn StemModel>> {
            if kind == StemKind::Snare {
                Ok(Box::new(Broken))
            } else {
                Ok(Box::new(Identity))
            }
        };
        Ok(Box::new(loader))
    };

    let result = pipeline::run_with(&settings, &test_manifest(), make_loader)
        .expect("A failed request does not abort the batch");

    assert_eq!(result.total_files, 1);
    assert_eq!(result.successful, 0);
    assert_eq!(result.failed, 1);
    assert!(stem_files(output_dir.path()).is_empty());
    assert!(!output_dir.path().join("separations.json").exists());
}

#[test]
fn test_undecodable_file_is_skipped() {
    let input_dir = TempDir::new().expect("Failed to create input temp dir");
    let output_dir = TempDir::new().expect("Failed to create output temp dir");

    fs::write(input_dir.path().join("corrupt.wav"), b"not really a wav file").unwrap();
    generate_drum_wav(&input_dir.path().join("good.wav"), 2, 0.1, 44100);

    let settings = create_test_settings(input_dir.path(), output_dir.path(), ModeKind::TimeDomain);
    let result = pipeline::run_with(
        &settings,
        &test_manifest(),
        identity_loaders(Arc::new(AtomicUsize::new(0))),
    )
    .unwrap();

    assert_eq!(result.total_files, 2);
    assert_eq!(result.successful, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(stem_files(output_dir.path()), vec!["good_drums.wav".to_string()]);
}

#[test]
fn test_reload_policy_controls_model_loads() {
    let manifest = test_manifest();

    for (policy, expected_loads) in [
        (ReloadPolicy::AfterEachUse, 5 + 2 * 5),
        (ReloadPolicy::Never, 5),
        (ReloadPolicy::OnFailure, 5),
    ] {
        let input_dir = TempDir::new().unwrap();
        let output_dir = TempDir::new().unwrap();
        generate_drum_wav(&input_dir.path().join("a.wav"), 2, 0.05, 44100);
        generate_drum_wav(&input_dir.path().join("b.wav"), 2, 0.05, 44100);

        let mut settings =
            create_test_settings(input_dir.path(), output_dir.path(), ModeKind::Spectral);
        settings.reload_policy = Some(policy);

        let loads = Arc::new(AtomicUsize::new(0));
        let result = pipeline::run_with(&settings, &manifest, identity_loaders(loads.clone()))
            .unwrap();

        assert_eq!(result.successful, 2);
        assert_eq!(
            loads.load(Ordering::SeqCst),
            expected_loads,
            "loads with {:?}",
            policy
        );
    }
}

#[test]
fn test_missing_model_is_fatal() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    generate_drum_wav(&input_dir.path().join("a.wav"), 2, 0.05, 44100);

    let settings = create_test_settings(input_dir.path(), output_dir.path(), ModeKind::Spectral);
    let err = pipeline::run_with(&settings, &test_manifest(), |_, artifact| {
        Err(DemixError::ModelUnavailable {
            reason: format!("{} not found", artifact.file),
        })
    })
    .expect_err("A missing model stops the batch");

    assert!(err.is_model_error());
    assert!(stem_files(output_dir.path()).is_empty());
}

#[test]
fn test_dry_run_writes_nothing() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    generate_drum_wav(&input_dir.path().join("a.wav"), 2, 0.05, 44100);
    generate_drum_wav(&input_dir.path().join("b.wav"), 2, 0.05, 44100);

    let mut settings = create_test_settings(input_dir.path(), output_dir.path(), ModeKind::Cascade);
    settings.dry_run = true;

    let loads = Arc::new(AtomicUsize::new(0));
    let result = pipeline::run_with(&settings, &test_manifest(), identity_loaders(loads.clone()))
        .unwrap();

    assert_eq!(result.total_files, 2);
    assert_eq!(result.skipped, 2);
    assert_eq!(loads.load(Ordering::SeqCst), 0, "dry run loads no models");
    assert!(stem_files(output_dir.path()).is_empty());
    assert!(!output_dir.path().join("separations.json").exists());
}

#[test]
fn test_pipeline_handles_empty_directory() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();

    let settings = create_test_settings(input_dir.path(), output_dir.path(), ModeKind::Spectral);
    let result = pipeline::run_with(
        &settings,
        &test_manifest(),
        identity_loaders(Arc::new(AtomicUsize::new(0))),
    )
    .unwrap();

    assert_eq!(result.total_files, 0);
    assert_eq!(result.successful, 0);
}
