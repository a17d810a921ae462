// ============================================================
// Layer 5 — Safe Correction Pipeline
// ============================================================
// Runs every unit through a fixed sequence of stages. Each stage
// either commits a change or leaves the unit exactly as it was.
//
//   Unprocessed
//     │ cache lookup ── qualifying hit ──────────────────┐
//     ▼                                                  │
//   CacheChecked                                         │
//     │ local rules   (validate, else keep pre-stage)    │
//     ▼                                                  │
//   LocalRulesApplied                                    │
//     │ grammar pool  (validate, else keep pre-stage)    │
//     ▼                                                  │
//   GrammarChecked                                       │
//     │ still materially unchanged?                      │
//     ▼                                                  │
//   AiPending ── one batched call per chunk              │
//     ▼                                                  │
//   AiCorrected                                          │
//     ▼                                                  ▼
//   Committed  (or RolledBack when a stage was rejected and
//               the unit ended up with its original text)
//
// Validation of a candidate, in order:
//   1. harmonize it against the current text (undo quote/line
//      break artefacts); identical → Unchanged
//   2. safety shield → Rejected(CatastrophicEdit)
//   3. every proper noun of the unit's original text must
//      survive → Rejected(ProperNounAltered)
//   4. quality score ≥ rollback threshold → else
//      Rejected(BelowThreshold)
//   5. reconstruct into the unit's own runs and log one
//      Modification for the stage; losing a tab or line break
//      → Rejected(LayoutChanged)
//
// Rejection is data, not an error: the unit is only ever touched
// after step 5 succeeds, so "rolling back" is simply not applying.
// No stage outcome can abort the chunk.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;

use crate::data::preprocessor::Preprocessor;
use crate::domain::modification::{Modification, Stage};
use crate::domain::traits::{BatchOutcome, LanguageModel, LocalRules, ProviderOutcome};
use crate::domain::unit::{CorrectableUnit, UnitId};
use crate::engine::cache::{transfer_edits, SimilarityCache};
use crate::engine::glossary::{preserves_names, proper_nouns, Glossary};
use crate::engine::grammar_pool::GrammarPool;
use crate::engine::quality::{QualityConfig, QualityScorer};
use crate::engine::reconstructor::{is_catastrophic, Reconstruction, Reconstructor, ShieldConfig};
use crate::engine::stats::ChunkCounters;
use crate::engine::tokenizer::word_count;

// ─── States and outcomes ──────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Unprocessed,
    CacheChecked,
    LocalRulesApplied,
    GrammarChecked,
    AiPending,
    AiCorrected,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BelowThreshold,
    CatastrophicEdit,
    ProperNounAltered,
    /// A tab or line break would be lost
    LayoutChanged,
    /// The provider reported an error
    Provider,
    Timeout,
    /// A batch came back with the wrong number of texts
    LengthMismatch,
}

impl RejectReason {
    /// Failures of the provider itself rather than of its output.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, RejectReason::Provider | RejectReason::Timeout | RejectReason::LengthMismatch)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::BelowThreshold    => "below quality threshold",
            RejectReason::CatastrophicEdit  => "catastrophic edit",
            RejectReason::ProperNounAltered => "proper noun altered",
            RejectReason::LayoutChanged     => "tab or line break altered",
            RejectReason::Provider          => "provider error",
            RejectReason::Timeout           => "provider timeout",
            RejectReason::LengthMismatch    => "batch length mismatch",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Applied,
    Rejected(RejectReason),
    Unchanged,
}

// ─── Per-unit progress ────────────────────────────────────────────────────────
/// A unit on its way through the stages, plus everything the
/// pipeline learned about it.
#[derive(Debug, Clone)]
pub struct UnitProgress {
    pub unit:          CorrectableUnit,
    pub original_text: String,
    pub state:         UnitState,
    pub modifications: Vec<Modification>,
    pub history:       Vec<(Stage, StageOutcome)>,
    pub counters:      ChunkCounters,
    names:             BTreeSet<String>,
}

impl UnitProgress {
    fn new(unit: CorrectableUnit) -> Self {
        let original_text = unit.text();
        Self {
            names:         proper_nouns(&original_text),
            unit,
            original_text,
            state:         UnitState::Unprocessed,
            modifications: Vec::new(),
            history:       Vec::new(),
            counters:      ChunkCounters { units: 1, ..ChunkCounters::default() },
        }
    }

    fn id(&self) -> UnitId {
        self.unit.id
    }

    fn advance(&mut self, next: UnitState) {
        tracing::trace!(unit = %self.id(), from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    /// Record a stage outcome and count it.
    fn note(&mut self, stage: Stage, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Applied => {
                let slot = match stage {
                    Stage::Cache         => &mut self.counters.cache_hits,
                    Stage::LocalRules    => &mut self.counters.rules_applied,
                    Stage::Grammar       => &mut self.counters.grammar_applied,
                    Stage::LanguageModel => &mut self.counters.ai_applied,
                };
                *slot += 1;
                tracing::debug!(unit = %self.id(), %stage, "Stage applied");
            }
            StageOutcome::Rejected(reason) => {
                if reason.is_provider_failure() {
                    self.counters.provider_failures += 1;
                } else {
                    self.counters.rolled_back += 1;
                }
                self.state = UnitState::RolledBack;
                tracing::warn!(unit = %self.id(), %stage, %reason, "Stage rejected; keeping pre-stage text");
            }
            StageOutcome::Unchanged => {
                tracing::trace!(unit = %self.id(), %stage, "Stage left text unchanged");
            }
        }
        self.history.push((stage, outcome));
    }

    fn was_rejected(&self) -> bool {
        self.history.iter().any(|(_, o)| matches!(o, StageOutcome::Rejected(_)))
    }
}

/// Everything a finished chunk hands back to the scheduler.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub index:         usize,
    pub units:         Vec<CorrectableUnit>,
    pub states:        Vec<(UnitId, UnitState)>,
    pub modifications: Vec<Modification>,
    pub counters:      ChunkCounters,
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────
/// The correction sources a pipeline draws on.
pub struct Providers {
    pub rules:          Arc<dyn LocalRules>,
    pub grammar:        Arc<GrammarPool>,
    pub language_model: Arc<dyn LanguageModel>,
}

pub struct SafePipeline {
    scorer:         QualityScorer,
    reconstructor:  Reconstructor,
    preprocessor:   Preprocessor,
    cache:          Arc<SimilarityCache>,
    glossary:       Arc<Glossary>,
    providers:      Providers,
}

impl SafePipeline {
    pub fn new(
        quality:   QualityConfig,
        shield:    ShieldConfig,
        cache:     Arc<SimilarityCache>,
        glossary:  Arc<Glossary>,
        providers: Providers,
    ) -> Self {
        Self {
            scorer:        QualityScorer::new(quality, shield.clone()),
            reconstructor: Reconstructor::new(shield),
            preprocessor:  Preprocessor::new(),
            cache,
            glossary,
            providers,
        }
    }

    pub fn cache(&self) -> &Arc<SimilarityCache> {
        &self.cache
    }

    pub fn glossary(&self) -> &Arc<Glossary> {
        &self.glossary
    }

    /// Correct every unit of one chunk. Units run their per-unit
    /// stages concurrently; the language model gets one batch.
    pub async fn run_chunk(&self, index: usize, units: Vec<CorrectableUnit>) -> ChunkResult {
        let mut chunk = ChunkCounters::default();

        // ── Step 1: cache, rules and grammar, per unit ────────────────────────
        let mut progress: Vec<UnitProgress> =
            join_all(units.into_iter().map(|u| self.run_unit_stages(u))).await;

        // ── Step 2: one language-model batch ──────────────────────────────────
        self.language_model_stage(&mut progress, &mut chunk).await;

        // ── Step 3: commit ────────────────────────────────────────────────────
        let mut result = ChunkResult {
            index,
            units:         Vec::with_capacity(progress.len()),
            states:        Vec::with_capacity(progress.len()),
            modifications: Vec::new(),
            counters:      chunk,
        };
        for mut p in progress {
            self.commit(&mut p);
            result.counters.add(&p.counters);
            result.states.push((p.id(), p.state));
            result.modifications.append(&mut p.modifications);
            result.units.push(p.unit);
        }

        tracing::debug!(
            chunk = index,
            units = result.units.len(),
            applied = result.counters.applied(),
            rolled_back = result.counters.rolled_back,
            "Chunk finished"
        );
        result
    }

    /// Cache lookup, local rules and grammar for a single unit.
    async fn run_unit_stages(&self, unit: CorrectableUnit) -> UnitProgress {
        let mut p = UnitProgress::new(unit);

        if word_count(&p.original_text) == 0 {
            p.counters.skipped += 1;
            p.advance(UnitState::Committed);
            return p;
        }
        self.glossary.record(&p.names);

        // ── Cache ─────────────────────────────────────────────────────────────
        let threshold = self.cache.config().near_duplicate_similarity;
        if let Some(hit) = self.cache.get_if_similar(&p.original_text, threshold) {
            match transfer_edits(&p.original_text, &hit.entry.original_text, &hit.entry.corrected_text) {
                Some(candidate) => {
                    let outcome = self.apply(&mut p, &candidate, Stage::Cache);
                    p.note(Stage::Cache, outcome);
                    if outcome == StageOutcome::Applied {
                        p.advance(UnitState::Committed);
                        return p;
                    }
                }
                None => tracing::debug!(unit = %p.id(), "Cached edits don't anchor in this text"),
            }
        }
        p.advance(UnitState::CacheChecked);

        // ── Local rules ───────────────────────────────────────────────────────
        let candidate = self.providers.rules.apply(&p.unit.text());
        let outcome   = self.apply(&mut p, &candidate, Stage::LocalRules);
        p.note(Stage::LocalRules, outcome);
        p.advance(UnitState::LocalRulesApplied);

        // ── Grammar ───────────────────────────────────────────────────────────
        let outcome = match self.providers.grammar.check(&p.unit.text()).await {
            ProviderOutcome::Corrected(candidate) => self.apply(&mut p, &candidate, Stage::Grammar),
            ProviderOutcome::Failed(reason) => {
                tracing::warn!(unit = %p.id(), provider = self.providers.grammar.provider_name(), %reason, "Grammar check failed");
                StageOutcome::Rejected(RejectReason::Provider)
            }
            ProviderOutcome::TimedOut => StageOutcome::Rejected(RejectReason::Timeout),
        };
        p.note(Stage::Grammar, outcome);
        p.advance(UnitState::GrammarChecked);

        // Only units nobody managed to improve are worth an AI call
        if self.preprocessor.materially_equal(&p.unit.text(), &p.original_text) {
            p.advance(UnitState::AiPending);
        }
        p
    }

    async fn language_model_stage(&self, progress: &mut [UnitProgress], chunk: &mut ChunkCounters) {
        let pending: Vec<usize> = progress
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state == UnitState::AiPending)
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return;
        }

        let texts: Vec<String> = pending.iter().map(|&i| progress[i].unit.text()).collect();
        chunk.ai_batches += 1;

        let failure = match self.providers.language_model.correct_batch(&texts).await {
            BatchOutcome::Corrected(out) if out.len() == texts.len() => {
                for (&i, candidate) in pending.iter().zip(out) {
                    let p       = &mut progress[i];
                    let outcome = self.apply(p, &candidate, Stage::LanguageModel);
                    p.note(Stage::LanguageModel, outcome);
                    p.advance(UnitState::AiCorrected);
                }
                return;
            }
            BatchOutcome::Corrected(out) => {
                tracing::warn!(expected = texts.len(), got = out.len(), "Language model returned a batch of the wrong size");
                RejectReason::LengthMismatch
            }
            BatchOutcome::Failed(reason) => {
                tracing::warn!(provider = self.providers.language_model.name(), %reason, "Language model batch failed");
                RejectReason::Provider
            }
            BatchOutcome::TimedOut => {
                tracing::warn!(provider = self.providers.language_model.name(), "Language model batch timed out");
                RejectReason::Timeout
            }
        };

        // Whole batch failed: every pending unit keeps its pre-AI text
        chunk.ai_batch_failures += 1;
        for &i in &pending {
            progress[i].note(Stage::LanguageModel, StageOutcome::Rejected(failure));
        }
    }

    /// Validate `candidate` against the unit's current text and,
    /// if it passes, pour it into the unit's runs.
    fn apply(&self, p: &mut UnitProgress, candidate: &str, stage: Stage) -> StageOutcome {
        let before    = p.unit.text();
        let candidate = self.preprocessor.harmonize(&before, candidate);
        if candidate == before {
            return StageOutcome::Unchanged;
        }

        if is_catastrophic(&before, &candidate, self.reconstructor.shield()) {
            return StageOutcome::Rejected(RejectReason::CatastrophicEdit);
        }
        if !preserves_names(&p.names, &candidate) {
            return StageOutcome::Rejected(RejectReason::ProperNounAltered);
        }
        let score = self.scorer.score(&before, &candidate, stage);
        if !score.passes(self.scorer.config().rollback_threshold) {
            tracing::debug!(unit = %p.id(), %stage, score = score.overall, "Candidate below threshold");
            return StageOutcome::Rejected(RejectReason::BelowThreshold);
        }

        match self.reconstructor.reconstruct(&p.unit.runs, &candidate) {
            Reconstruction::Applied { texts, corrected } => {
                let id = p.id();
                p.unit.set_run_texts(texts);
                p.modifications.push(Modification::new(id, before, corrected, stage, score.overall));
                StageOutcome::Applied
            }
            Reconstruction::Unchanged     => StageOutcome::Unchanged,
            Reconstruction::Catastrophic  => StageOutcome::Rejected(RejectReason::CatastrophicEdit),
            Reconstruction::LayoutChanged => StageOutcome::Rejected(RejectReason::LayoutChanged),
            Reconstruction::NoRuns => {
                tracing::warn!(unit = %p.id(), "Unit has no runs to hold the correction");
                StageOutcome::Unchanged
            }
        }
    }

    /// Settle the final state and offer a changed unit to the cache.
    fn commit(&self, p: &mut UnitProgress) {
        let final_text = p.unit.text();

        if final_text == p.original_text {
            let state = if p.was_rejected() { UnitState::RolledBack } else { UnitState::Committed };
            p.advance(state);
            return;
        }

        let stage = p.modifications.last().map_or(Stage::LocalRules, |m| m.stage);
        let score = self.scorer.score(&p.original_text, &final_text, stage);
        if self.cache.put(&p.original_text, &final_text, score.overall, stage) {
            tracing::debug!(unit = %p.id(), score = score.overall, "Correction admitted to cache");
        }
        p.advance(UnitState::Committed);
    }
}
