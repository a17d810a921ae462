// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `correct`  — corrects a .docx and writes run reports
//   2. `validate` — prints structural issues of a .docx
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use anyhow::{bail, Context, Result};
use clap::Parser;
use commands::{Commands, CorrectArgs, ValidateArgs};

use crate::application::{config::CorrectionConfig, correct_use_case::CorrectUseCase};
use crate::data::validator::DocxValidator;
use crate::domain::traits::DocumentValidator;
use crate::infra::metrics::ReportWriter;

/// The main CLI struct. clap reads the fields and generates
/// argument parsing code via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "word-doc-corrector",
    version = "0.1.0",
    about = "Correct grammar, spelling and style in .docx files without touching their formatting."
)]
pub struct Cli {
    /// The subcommand to run (correct or validate)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    /// This keeps the CLI layer thin: it only routes, never computes.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Correct(args)  => run_correct(args).await,
            Commands::Validate(args) => run_validate(args),
        }
    }
}

/// Handles the `correct` subcommand.
async fn run_correct(args: CorrectArgs) -> Result<()> {
    let file_cfg = match &args.config {
        Some(path) => CorrectionConfig::load(path)?,
        None       => CorrectionConfig::default(),
    };
    let cfg = args.apply_overrides(file_cfg);

    tracing::info!("Correcting '{}' → '{}'", args.input.display(), args.output.display());

    let use_case = CorrectUseCase::from_config(cfg, &args.backup_dir)?;
    let report   = use_case.execute(&args.input, &args.output).await?;

    if let Some(dir) = &args.report_dir {
        let writer = ReportWriter::new(dir)?;
        writer.write_modifications(&report.modifications)?;
        writer.write_stats(&report.stats)?;
        writer.write_glossary(&report.glossary)?;
        println!("Reports written to '{}'", dir.display());
    }

    if report.restored {
        println!("Corrected output failed validation; the original document was restored to '{}'.", report.output.display());
        println!("{} correction(s) were discarded.", report.reverted);
    } else {
        println!("Wrote '{}'.", report.output.display());
    }
    println!(
        "{} units, {} changed, {} modifications ({:.1}% cache hits, {:.1}% rolled back).",
        report.units,
        report.units_changed,
        report.modifications.len(),
        report.stats.cache_hit_rate * 100.0,
        report.stats.rollback_rate * 100.0,
    );
    for (stage, count) in &report.stats.modifications {
        println!("  {:<15} {count}", stage.as_str());
    }
    Ok(())
}

/// Handles the `validate` subcommand.
fn run_validate(args: ValidateArgs) -> Result<()> {
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("Cannot read '{}'", args.input.display()))?;
    let report = DocxValidator::new().validate(&bytes);

    if report.ok {
        println!("'{}' is valid.", args.input.display());
        return Ok(());
    }
    for issue in &report.issues {
        println!("  - {issue}");
    }
    bail!("'{}' has {} validation issue(s)", args.input.display(), report.issues.len())
}
