// ============================================================
// Layer 5 — Bounded-Concurrency Chunk Scheduler
// ============================================================
// Drives the pipeline over a whole document:
//
//   1. Partition the ordered units into chunks (Chunker)
//   2. Spawn one task per chunk, at most `max_concurrent_chunks`
//      alive at any time (tokio Semaphore)
//   3. Collect results in chunk order, sort the modification log
//      by unit id, and build the aggregate statistics
//
// Permits are taken BEFORE a task is spawned, so chunks start in
// document order. With a ceiling of 1 the pass is strictly
// sequential, which is what the cache needs to make later chunks
// reuse earlier corrections deterministically.
//
// A chunk task that dies (panic) never takes the document with
// it: its units are returned exactly as they went in.
//
// Reference: tokio docs (sync::Semaphore::acquire_owned)
//            Rust Book §16 (Fearless Concurrency)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};
use tokio::sync::Semaphore;

use crate::data::chunker::Chunker;
use crate::domain::modification::{sort_log, Modification};
use crate::domain::unit::{CorrectableUnit, UnitId};
use crate::engine::pipeline::{SafePipeline, UnitState};
use crate::engine::stats::{ChunkCounters, PipelineStats};

// ─── Configuration ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_units_per_chunk:   usize,
    pub max_tokens_per_chunk:  usize,
    pub max_concurrent_chunks: usize,
    /// Grammar worker threads; None = cores − 1
    pub grammar_workers:       Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_units_per_chunk:   25,
            max_tokens_per_chunk:  1_500,
            max_concurrent_chunks: 10,
            grammar_workers:       None,
        }
    }
}

/// Everything a finished pass produced.
#[derive(Debug, Clone)]
pub struct SchedulerOutput {
    /// Units in document order, with corrected run texts
    pub units:         Vec<CorrectableUnit>,
    pub states:        Vec<(UnitId, UnitState)>,
    /// Sorted by unit id
    pub modifications: Vec<Modification>,
    pub stats:         PipelineStats,
}

// ─── Scheduler ────────────────────────────────────────────────────────────────
pub struct Scheduler {
    cfg:      SchedulerConfig,
    pipeline: Arc<SafePipeline>,
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig, pipeline: Arc<SafePipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn pipeline(&self) -> &Arc<SafePipeline> {
        &self.pipeline
    }

    pub async fn run(&self, units: Vec<CorrectableUnit>) -> Result<SchedulerOutput> {
        let started = Instant::now();
        let chunker = Chunker::new(self.cfg.max_units_per_chunk, self.cfg.max_tokens_per_chunk);
        let chunks  = chunker.chunk(units);
        let ceiling = self.cfg.max_concurrent_chunks.max(1);

        tracing::info!(
            chunks = chunks.len(),
            max_concurrent = ceiling,
            "Scheduling correction chunks"
        );

        // ── Spawn, at most `ceiling` chunks in flight ─────────────────────────
        let semaphore = Arc::new(Semaphore::new(ceiling));
        let mut handles = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("Chunk semaphore closed unexpectedly")?;
            let pipeline = Arc::clone(&self.pipeline);
            let fallback = chunk.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                pipeline.run_chunk(index, chunk).await
            });
            handles.push((index, fallback, handle));
        }

        // ── Collect in chunk order ────────────────────────────────────────────
        let mut units         = Vec::new();
        let mut states        = Vec::new();
        let mut modifications = Vec::new();
        let mut per_chunk     = Vec::with_capacity(handles.len());

        for (index, fallback, handle) in handles {
            match handle.await {
                Ok(mut result) => {
                    units.append(&mut result.units);
                    states.append(&mut result.states);
                    modifications.append(&mut result.modifications);
                    per_chunk.push(result.counters);
                }
                Err(e) => {
                    tracing::warn!(chunk = index, error = %e, "Chunk task failed; its units keep their original text");
                    per_chunk.push(ChunkCounters { units: fallback.len(), ..ChunkCounters::default() });
                    states.extend(fallback.iter().map(|u| (u.id, UnitState::RolledBack)));
                    units.extend(fallback);
                }
            }
        }

        sort_log(&mut modifications);
        let stats = PipelineStats::build(per_chunk, &modifications, started.elapsed());

        tracing::info!(
            units = stats.totals.units,
            modifications = modifications.len(),
            cache_hit_rate = stats.cache_hit_rate,
            rollback_rate = stats.rollback_rate,
            "Correction pass finished"
        );

        Ok(SchedulerOutput { units, states, modifications, stats })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::modification::Stage;
    use crate::domain::unit::{FormattedRun, RunStyle};
    use crate::engine::cache::CacheConfig;
    use crate::engine::pipeline::tests::{pipeline_with, EchoGrammar, ReplacingModel};
    use crate::engine::rules::RuleSet;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    const SENTENCES: [&str; 8] = [
        "Il treno per Milano parte alle otto con un eror di orario.",
        "Domani piove e la riunione è stata aprovata lo stesso.",
        "Abbiamo ricevuto tre pacchi ma nessuno conteneva il manuale.",
        "La relazione trimestrale contiene un eror nella tabella finale.",
        "Gli studenti hanno aprovato la proposta con entusiasmo.",
        "Nel magazzino mancano ancora due scaffali metallici.",
        "Questo capitolo descrive la procedura di installazione.",
        "Il cliente ha segnalato un eror nella fattura di marzo.",
    ];

    fn units() -> Vec<CorrectableUnit> {
        SENTENCES
            .iter()
            .enumerate()
            .map(|(i, s)| CorrectableUnit::new(UnitId::new(0, i as u32), vec![FormattedRun::plain(*s)]))
            .collect()
    }

    fn rules() -> RuleSet {
        let mut map = BTreeMap::new();
        map.insert("eror".to_string(), "errore".to_string());
        RuleSet::from_map(&map).unwrap()
    }

    fn scheduler(max_concurrent: usize, model: Arc<ReplacingModel>) -> Scheduler {
        // Only exact cache hits, so no chunk depends on another
        let cache = CacheConfig { near_duplicate_similarity: 1.0, ..CacheConfig::default() };
        let pipeline = pipeline_with(rules(), Arc::new(EchoGrammar), model, cache);
        let cfg = SchedulerConfig {
            max_units_per_chunk:   2,
            max_tokens_per_chunk:  1_000,
            max_concurrent_chunks: max_concurrent,
            grammar_workers:       Some(2),
        };
        Scheduler::new(cfg, Arc::new(pipeline))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pass_equals_sequential_pass() {
        let model_a = Arc::new(ReplacingModel::new(vec![("aprovat", "approvat")]));
        let model_b = Arc::new(ReplacingModel::new(vec![("aprovat", "approvat")]));

        let sequential = scheduler(1, model_a).run(units()).await.unwrap();
        let concurrent = scheduler(8, model_b).run(units()).await.unwrap();

        let key = |out: &SchedulerOutput| {
            out.modifications
                .iter()
                .map(|m| (m.unit_id, m.stage, m.original_text.clone(), m.corrected_text.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&sequential), key(&concurrent));
        assert_eq!(sequential.units, concurrent.units);
        assert_eq!(sequential.stats.chunks, 4);
        assert_eq!(sequential.modifications.len(), 5);
    }

    #[tokio::test]
    async fn test_log_is_in_document_order() {
        let model = Arc::new(ReplacingModel::new(vec![("aprovat", "approvat")]));
        let out = scheduler(4, model).run(units()).await.unwrap();

        let ids: Vec<UnitId> = out.modifications.iter().map(|m| m.unit_id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(out.units.len(), SENTENCES.len());
        assert_eq!(out.stats.totals.rules_applied, 3);
        assert_eq!(out.stats.totals.ai_applied, 2);
    }

    #[tokio::test]
    async fn test_zero_limits_run_one_unit_per_chunk() {
        let model    = Arc::new(ReplacingModel::new(vec![]));
        let pipeline = pipeline_with(rules(), Arc::new(EchoGrammar), model, CacheConfig::default());
        let cfg = SchedulerConfig {
            max_units_per_chunk:   0,
            max_tokens_per_chunk:  0,
            max_concurrent_chunks: 0,
            grammar_workers:       None,
        };

        let out = Scheduler::new(cfg, Arc::new(pipeline)).run(units()).await.unwrap();
        assert_eq!(out.stats.chunks, SENTENCES.len());
        assert_eq!(out.units.len(), SENTENCES.len());
        assert_eq!(out.modifications.len(), 3);
    }

    #[tokio::test]
    async fn test_sequential_chunks_reuse_cached_correction() {
        let model = Arc::new(ReplacingModel::new(vec![("aprovato", "approvato")]));
        let pipeline = pipeline_with(RuleSet::new(), Arc::new(EchoGrammar), model.clone(), CacheConfig::default());
        let cfg = SchedulerConfig {
            max_units_per_chunk:   1,
            max_concurrent_chunks: 1,
            ..SchedulerConfig::default()
        };
        let body = "Il progetto è stato aprovato dal consiglio comunale nella seduta di ieri sera, come annunciato dal presidente ";
        let units = vec![
            CorrectableUnit::new(UnitId::new(0, 0), vec![
                FormattedRun::plain(body),
                FormattedRun::new("Mario Rossi", RunStyle::bold()),
                FormattedRun::plain("."),
            ]),
            CorrectableUnit::new(UnitId::new(0, 1), vec![
                FormattedRun::plain(body),
                FormattedRun::new("Mario Bianchi", RunStyle::bold()),
                FormattedRun::plain("."),
            ]),
        ];

        let out = Scheduler::new(cfg, Arc::new(pipeline)).run(units).await.unwrap();

        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.modifications[1].stage, Stage::Cache);
        assert_eq!(out.units[1].runs[1].text, "Mario Bianchi");
        assert!(out.units[1].text().contains("approvato"));
        assert_eq!(out.stats.totals.cache_hits, 1);
    }
}
