// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `correct` and `validate`, and
// their flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → PathBuf, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::config::CorrectionConfig;

/// The top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Correct a .docx document, preserving its formatting
    Correct(CorrectArgs),

    /// Check a .docx document's structure and print any issues
    Validate(ValidateArgs),
}

/// All arguments for the `correct` command.
#[derive(Args, Debug)]
pub struct CorrectArgs {
    /// Document to correct
    #[arg(long)]
    pub input: PathBuf,

    /// Where the corrected document is written
    #[arg(long)]
    pub output: PathBuf,

    /// JSON configuration file; defaults apply to anything missing
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for input snapshots
    #[arg(long, default_value = "backups")]
    pub backup_dir: PathBuf,

    /// Similarity-cache store (JSON); overrides the config file
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Replacement rules (JSON map); overrides the config file
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Directory for modifications.csv, stats.json and glossary.json
    #[arg(long)]
    pub report_dir: Option<PathBuf>,
}

impl CorrectArgs {
    /// The file configuration with CLI overrides applied.
    /// This is the boundary between Layer 1 and Layer 2: the
    /// application layer never sees clap types.
    pub fn apply_overrides(&self, mut cfg: CorrectionConfig) -> CorrectionConfig {
        if let Some(cache) = &self.cache {
            cfg.cache.path = Some(cache.clone());
        }
        if let Some(rules) = &self.rules {
            cfg.providers.rules_path = Some(rules.clone());
        }
        cfg
    }
}

/// All arguments for the `validate` command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Document to check
    #[arg(long)]
    pub input: PathBuf,
}
