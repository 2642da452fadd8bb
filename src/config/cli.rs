//! CLI argument parsing and configuration

use crate::pipeline::ModeKind;
use crate::separation::ReloadPolicy;
use clap::Parser;
use std::path::PathBuf;

/// drumdemix - Drum stem separation
///
/// Splits recordings into drum stems with pre-trained models. Time-domain
/// mode extracts the drum bus from a full mix, spectral mode splits a drum
/// recording into kick, snare, toms, hi-hat and cymbals, and cascade mode
/// does both.
#[derive(Parser, Debug)]
#[command(name = "drumdemix")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Input path (file or directory)
    #[arg(short, long, value_name = "PATH")]
    pub input: PathBuf,

    /// Output directory for stem WAV files and the run manifest
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Model directory (defaults to DRUMDEMIX_MODEL_DIR, then the data dir, then ./models)
    #[arg(long, value_name = "DIR")]
    pub models: Option<PathBuf>,

    /// Separation mode
    #[arg(long, value_enum, default_value_t = ModeKind::Spectral)]
    pub mode: ModeKind,

    /// When to reload models (overrides the model manifest)
    #[arg(long, value_enum, value_name = "POLICY")]
    pub reload_policy: Option<ReloadPolicy>,

    /// PCM bit depth of written stems
    #[arg(long, default_value_t = 16, value_parser = parse_bit_depth)]
    pub bit_depth: u16,

    /// Number of worker threads (defaults to CPU count - 1)
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Scan subdirectories recursively
    #[arg(short, long, default_value = "false")]
    pub recursive: bool,

    /// Re-separate files already listed in the run manifest
    #[arg(long, default_value = "false")]
    pub force: bool,

    /// Run stem models one after another instead of in parallel
    #[arg(long, default_value = "false")]
    pub sequential: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress progress bars)
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,

    /// Dry run - show files and stems that would be produced without processing
    #[arg(long, default_value = "false")]
    pub dry_run: bool,
}

fn parse_bit_depth(s: &str) -> Result<u16, String> {
    match s {
        "16" => Ok(16),
        "24" => Ok(24),
        _ => Err(format!("bit depth must be 16 or 24, got '{}'", s)),
    }
}

impl Cli {
    /// Log filter directive for the verbosity flags
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
