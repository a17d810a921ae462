// ============================================================
// Layer 2 — CorrectUseCase (Document Assembler)
// ============================================================
// Orchestrates one correction run, start to finish:
//
//   Step 1: Validate the input             (Layer 4 - data)
//   Step 2: Back it up                     (Layer 6 - infra)
//   Step 3: Enumerate body/header/footer   (Layer 4 - data)
//   Step 4: Correct them                   (Layer 5 - engine)
//   Step 5: Footnotes/endnotes, second pass
//   Step 6: Duplicate trailing paragraph cleanup
//   Step 7: Write back, validate the output
//   Step 8: On failure, restore the backup
//   Step 9: Persist the cache
//
// A run ends in exactly one of:
//   Ok(report)               validated corrected document
//   Ok(report.restored)      output failed validation, original
//                            restored and validated; the report
//                            lists no modifications and the cache
//                            is back to its state before the run
//   Err(InvalidInput)        input rejected, nothing written
//   Err(Unrecoverable)       output invalid AND restore failed
//
// Reference: Rust Book §9 (Error Handling)
//            thiserror documentation

use anyhow::Context;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;

use crate::application::config::CorrectionConfig;
use crate::data::{
    cleanup::{remove_duplicate_trailing_paragraph, CleanupOutcome},
    loader::DocxLoader,
    package::{DocxPackage, DOCUMENT_PART},
    validator::DocxValidator,
};
use crate::domain::modification::{sort_log, Modification};
use crate::domain::traits::{BackupHandle, BackupStore, DocumentValidator, GrammarProvider, LanguageModel};
use crate::engine::{
    cache::SimilarityCache,
    glossary::Glossary,
    grammar_pool::{default_workers, GrammarPool},
    pipeline::{Providers, SafePipeline},
    rules::RuleSet,
    scheduler::{Scheduler, SchedulerOutput},
    stats::PipelineStats,
};
use crate::infra::{
    backup::FileBackupStore,
    cache_store::CacheStore,
    providers::{
        CommandGrammar, CommandLanguageModel, PassThroughGrammar, PassThroughLanguageModel, RetryPolicy,
    },
};

// ─── Errors ───────────────────────────────────────────────────────────────────
#[derive(Debug, Error)]
pub enum RunError {
    #[error("input document failed validation: {}", issues.join("; "))]
    InvalidInput { issues: Vec<String> },

    #[error("output failed validation and the original could not be restored: {reason}")]
    Unrecoverable { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Report ───────────────────────────────────────────────────────────────────
/// What a finished run hands back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output:        PathBuf,
    pub units:         usize,
    pub units_changed: usize,
    /// Sorted by unit id; empty when the original was restored
    pub modifications: Vec<Modification>,
    /// Corrections made but discarded by the restore
    pub reverted:      usize,
    pub glossary:      Vec<String>,
    pub stats:         PipelineStats,
    pub cleanup:       String,
    /// The output failed validation and holds the original instead
    pub restored:      bool,
    pub backup:        BackupHandle,
}

// ─── CorrectUseCase ───────────────────────────────────────────────────────────
pub struct CorrectUseCase {
    config:      CorrectionConfig,
    scheduler:   Scheduler,
    backups:     Arc<dyn BackupStore>,
    validator:   Arc<dyn DocumentValidator>,
    cache_store: Option<CacheStore>,
}

impl CorrectUseCase {
    /// Wire every collaborator from configuration.
    pub fn from_config(config: CorrectionConfig, backup_dir: &Path) -> anyhow::Result<Self> {
        config.validate()?;
        let p = &config.providers;

        let rules = match &p.rules_path {
            Some(path) => RuleSet::load(path)?,
            None       => RuleSet::new(),
        };

        let grammar_timeout = Duration::from_secs(p.grammar_timeout_secs);
        let grammar: Arc<dyn GrammarProvider> = match &p.grammar_command {
            Some(argv) => Arc::new(CommandGrammar::new(argv.clone(), grammar_timeout)?),
            None       => Arc::new(PassThroughGrammar),
        };
        let workers = config.scheduler.grammar_workers.unwrap_or_else(default_workers);
        let pool    = GrammarPool::new(grammar, workers, grammar_timeout)?;

        let language_model: Arc<dyn LanguageModel> = match &p.language_model_command {
            Some(argv) => Arc::new(CommandLanguageModel::new(
                argv.clone(),
                Duration::from_secs(p.language_model_timeout_secs),
                RetryPolicy { max_attempts: p.max_attempts, backoff_base: Duration::from_millis(p.backoff_base_ms) },
            )?),
            None => Arc::new(PassThroughLanguageModel),
        };

        let cache_store = config.cache.path.clone().map(CacheStore::new);
        let entries     = cache_store.as_ref().map(CacheStore::load).unwrap_or_default();
        let cache       = SimilarityCache::with_entries(config.cache.clone(), config.quality.admission_threshold, entries);

        let pipeline = SafePipeline::new(
            config.quality.clone(),
            config.shield.clone(),
            Arc::new(cache),
            Arc::new(Glossary::new()),
            Providers { rules: Arc::new(rules), grammar: Arc::new(pool), language_model },
        );

        tracing::info!(
            grammar_workers = workers,
            max_concurrent = config.scheduler.max_concurrent_chunks,
            "Correction pipeline ready"
        );

        let mut use_case = Self::with_parts(
            config,
            Arc::new(pipeline),
            Arc::new(FileBackupStore::new(backup_dir)?),
            Arc::new(DocxValidator::new()),
        );
        use_case.cache_store = cache_store;
        Ok(use_case)
    }

    /// Assemble from ready-made parts.
    pub fn with_parts(
        config:    CorrectionConfig,
        pipeline:  Arc<SafePipeline>,
        backups:   Arc<dyn BackupStore>,
        validator: Arc<dyn DocumentValidator>,
    ) -> Self {
        let scheduler = Scheduler::new(config.scheduler.clone(), pipeline);
        Self { config, scheduler, backups, validator, cache_store: None }
    }

    pub async fn execute(&self, input: &Path, output: &Path) -> Result<RunReport, RunError> {
        // ── Step 1: validate the input ────────────────────────────────────────
        let bytes = fs::read(input).with_context(|| format!("Cannot read '{}'", input.display()))?;
        let pre   = self.validator.validate(&bytes);
        if !pre.ok {
            tracing::error!(issues = ?pre.issues, "Input document failed validation");
            return Err(RunError::InvalidInput { issues: pre.issues });
        }

        // ── Step 2: back up ───────────────────────────────────────────────────
        let backup = self.backups.create_backup(input)?;

        // ── Step 3–4: main pass ───────────────────────────────────────────────
        let pipeline     = self.scheduler.pipeline();
        let cache_before = pipeline.cache().entries();
        let mut package  = DocxPackage::from_bytes(&bytes)?;
        let mut loader  = DocxLoader::new(self.config.min_unit_chars);

        let units = loader.load(&package, &DocxLoader::main_parts(&package))?;
        tracing::info!(units = units.len(), "Units enumerated");
        let main = self.scheduler.run(units).await?;
        let mut units_changed = loader.apply(&main.units);

        // ── Step 5: footnotes and endnotes ────────────────────────────────────
        let note_parts = DocxLoader::note_parts(&package);
        let notes: Option<SchedulerOutput> = if note_parts.is_empty() {
            None
        } else {
            let units = loader.load(&package, &note_parts)?;
            tracing::info!(units = units.len(), "Note units enumerated");
            let out = self.scheduler.run(units).await?;
            units_changed += loader.apply(&out.units);
            Some(out)
        };

        // ── Step 6: cleanup ───────────────────────────────────────────────────
        let cleanup = match loader.part_mut(DOCUMENT_PART) {
            Some(document) => remove_duplicate_trailing_paragraph(document),
            None           => CleanupOutcome::NothingToDo,
        };

        // ── Step 7: write back and validate ───────────────────────────────────
        loader.write_back(&mut package)?;
        let corrected = package.to_bytes()?;
        let post      = self.validator.validate(&corrected);

        let restored = if post.ok {
            write_output(output, &corrected)?;
            false
        } else {
            // ── Step 8: restore ───────────────────────────────────────────────
            tracing::error!(issues = ?post.issues, "Corrected document failed validation; restoring backup");
            self.restore(&backup, output)?;
            true
        };

        let total_units = main.units.len() + notes.as_ref().map_or(0, |n| n.units.len());
        let mut modifications = main.modifications;
        let mut stats = match notes {
            Some(notes) => {
                modifications.extend(notes.modifications);
                sort_log(&mut modifications);
                PipelineStats::merge(&main.stats, &notes.stats, &modifications)
            }
            None => main.stats,
        };

        // ── Step 9: persist the cache ─────────────────────────────────────────
        let mut reverted = 0;
        if restored {
            // Nothing of this run reached the output
            reverted = modifications.len();
            modifications.clear();
            units_changed = 0;
            stats.mark_reverted();
            pipeline.cache().replace_entries(cache_before);
            tracing::warn!(reverted, "Corrections discarded with the restore");
        } else if let Some(store) = &self.cache_store {
            if let Err(e) = store.save(pipeline.cache().entries()) {
                tracing::warn!(error = %e, "Cannot save cache store");
            }
        }

        tracing::info!(
            units = total_units,
            changed = units_changed,
            modifications = modifications.len(),
            restored,
            "Run finished"
        );

        Ok(RunReport {
            output: output.to_path_buf(),
            units: total_units,
            units_changed,
            modifications,
            reverted,
            glossary: pipeline.glossary().snapshot(),
            stats,
            cleanup: format!("{cleanup:?}"),
            restored,
            backup,
        })
    }

    fn restore(&self, backup: &BackupHandle, output: &Path) -> Result<(), RunError> {
        let original = self
            .backups
            .restore(backup)
            .map_err(|e| RunError::Unrecoverable { reason: format!("{e:#}") })?;

        let check = self.validator.validate(&original);
        if !check.ok {
            return Err(RunError::Unrecoverable {
                reason: format!("restored document is invalid too: {}", check.issues.join("; ")),
            });
        }

        write_output(output, &original).map_err(|e| RunError::Unrecoverable { reason: format!("{e:#}") })?;
        tracing::info!(output = %output.display(), "Original document restored");
        Ok(())
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Cannot create '{}'", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("Cannot write '{}'", path.display()))
}
