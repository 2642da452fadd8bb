//! Runtime configuration settings

use crate::error::Result;
use crate::export::BitDepth;
use crate::pipeline::ModeKind;
use crate::separation::ReloadPolicy;
use std::path::PathBuf;

/// Runtime settings for a separation run
#[derive(Debug, Clone)]
pub struct Settings {
    /// Input path (file or directory)
    pub input: PathBuf,
    /// Output directory for stems and the run manifest
    pub output: PathBuf,
    /// Explicit model directory; `None` searches the default locations
    pub model_dir: Option<PathBuf>,
    pub mode: ModeKind,
    /// Overrides the manifest's reload policy when set
    pub reload_policy: Option<ReloadPolicy>,
    pub bit_depth: BitDepth,
    /// Worker threads for parallel stem inference
    pub threads: usize,
    /// Scan recursively
    pub recursive: bool,
    /// Re-separate tracks already in the run manifest
    pub force: bool,
    /// Run spectral stem models concurrently
    pub parallel_stems: bool,
    /// Show progress bars
    pub show_progress: bool,
    /// Dry run mode - show files without processing
    pub dry_run: bool,
}

impl Settings {
    /// Create settings from CLI arguments
    pub fn from_cli(cli: &super::cli::Cli) -> Result<Self> {
        let default_threads = num_cpus::get().saturating_sub(1).max(1);

        Ok(Self {
            input: cli.input.clone(),
            output: cli.output.clone(),
            model_dir: cli.models.clone(),
            mode: cli.mode,
            reload_policy: cli.reload_policy,
            bit_depth: BitDepth::from_bits(cli.bit_depth)?,
            threads: cli.threads.unwrap_or(default_threads).max(1),
            recursive: cli.recursive,
            force: cli.force,
            parallel_stems: !cli.sequential,
            show_progress: !cli.quiet,
            dry_run: cli.dry_run,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: PathBuf::from("."),
            output: PathBuf::from("./stems"),
            model_dir: None,
            mode: ModeKind::default(),
            reload_policy: None,
            bit_depth: BitDepth::default(),
            threads: num_cpus::get().saturating_sub(1).max(1),
            recursive: false,
            force: false,
            parallel_stems: true,
            show_progress: true,
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;

    #[test]
    fn test_from_cli() {
        let cli = Cli::try_parse_from([
            "drumdemix",
            "-i",
            "in",
            "-o",
            "out",
            "--mode",
            "time-domain",
            "--reload-policy",
            "never",
            "--bit-depth",
            "24",
            "-j",
            "0",
            "--sequential",
            "-q",
        ])
        .unwrap();
        let settings = Settings::from_cli(&cli).unwrap();
        assert_eq!(settings.mode, ModeKind::TimeDomain);
        assert_eq!(settings.reload_policy, Some(ReloadPolicy::Never));
        assert_eq!(settings.bit_depth, BitDepth::TwentyFour);
        assert_eq!(settings.threads, 1);
        assert!(!settings.parallel_stems);
        assert!(!settings.show_progress);
    }

    #[test]
    fn test_defaults_keep_manifest_policy() {
        let cli = Cli::try_parse_from(["drumdemix", "-i", "in", "-o", "out"]).unwrap();
        let settings = Settings::from_cli(&cli).unwrap();
        assert_eq!(settings.mode, ModeKind::Spectral);
        assert!(settings.reload_policy.is_none());
        assert!(settings.threads >= 1);
    }
}
