// ============================================================
// Layer 5 — Pipeline Statistics
// ============================================================
// Counters every chunk fills in while it runs, and the aggregate
// the scheduler builds from them once all chunks are done.
//
// Rates:
//   cache_hit_rate = cache hits / units that reached the pipeline
//   rollback_rate  = rejected candidates / (applied + rejected)
//   throughput     = units per second of wall-clock time

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

use crate::domain::modification::{Modification, Stage};

/// Per-chunk observability counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkCounters {
    pub units:             usize,
    /// Units without any word, never sent anywhere
    pub skipped:           usize,
    pub cache_hits:        usize,
    pub rules_applied:     usize,
    pub grammar_applied:   usize,
    pub ai_applied:        usize,
    /// Candidates rejected by the quality gate, shield or name guard
    pub rolled_back:       usize,
    /// Units whose grammar or AI call failed, timed out or came
    /// back malformed
    pub provider_failures: usize,
    pub ai_batches:        usize,
    /// AI batches that failed as a whole
    pub ai_batch_failures: usize,
}

impl ChunkCounters {
    pub fn add(&mut self, other: &ChunkCounters) {
        self.units             += other.units;
        self.skipped           += other.skipped;
        self.cache_hits        += other.cache_hits;
        self.rules_applied     += other.rules_applied;
        self.grammar_applied   += other.grammar_applied;
        self.ai_applied        += other.ai_applied;
        self.rolled_back       += other.rolled_back;
        self.provider_failures += other.provider_failures;
        self.ai_batches        += other.ai_batches;
        self.ai_batch_failures += other.ai_batch_failures;
    }

    pub fn applied(&self) -> usize {
        self.cache_hits + self.rules_applied + self.grammar_applied + self.ai_applied
    }
}

/// Aggregate statistics for a whole pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub chunks:           usize,
    pub totals:           ChunkCounters,
    /// Counters in chunk order
    pub per_chunk:        Vec<ChunkCounters>,
    pub modifications:    BTreeMap<Stage, usize>,
    pub cache_hit_rate:   f64,
    pub rollback_rate:    f64,
    pub units_per_second: f64,
    pub elapsed_ms:       u128,
    /// The corrections were discarded because the original
    /// document had to be restored
    #[serde(default)]
    pub reverted:         bool,
}

impl PipelineStats {
    pub fn build(per_chunk: Vec<ChunkCounters>, log: &[Modification], elapsed: Duration) -> Self {
        let mut totals = ChunkCounters::default();
        for c in &per_chunk {
            totals.add(c);
        }

        let mut modifications = BTreeMap::new();
        for m in log {
            *modifications.entry(m.stage).or_insert(0) += 1;
        }

        let reached  = totals.units.saturating_sub(totals.skipped);
        let attempts = totals.applied() + totals.rolled_back;
        let secs     = elapsed.as_secs_f64();

        Self {
            chunks: per_chunk.len(),
            totals,
            per_chunk,
            modifications,
            cache_hit_rate:   ratio(totals.cache_hits, reached),
            rollback_rate:    ratio(totals.rolled_back, attempts),
            units_per_second: if secs > 0.0 { totals.units as f64 / secs } else { 0.0 },
            elapsed_ms:       elapsed.as_millis(),
            reverted:         false,
        }
    }

    /// Two consecutive passes (body, then notes) as one run.
    pub fn merge(first: &PipelineStats, second: &PipelineStats, log: &[Modification]) -> Self {
        let per_chunk  = first.per_chunk.iter().chain(&second.per_chunk).copied().collect();
        let elapsed_ms = first.elapsed_ms + second.elapsed_ms;
        let elapsed    = Duration::from_millis(u64::try_from(elapsed_ms).unwrap_or(u64::MAX));
        Self::build(per_chunk, log, elapsed)
    }

    /// None of the pass's modifications reached the output: drop the
    /// per-stage counts and flag the run. Activity counters stay.
    pub fn mark_reverted(&mut self) {
        self.modifications.clear();
        self.reverted = true;
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::unit::UnitId;

    #[test]
    fn test_rates() {
        let a = ChunkCounters { units: 4, cache_hits: 1, rules_applied: 2, rolled_back: 1, ..Default::default() };
        let b = ChunkCounters { units: 4, skipped: 2, ai_applied: 1, ..Default::default() };
        let log = vec![Modification::new(UnitId::new(0, 0), "a", "b", Stage::LocalRules, 0.9)];

        let s = PipelineStats::build(vec![a, b], &log, Duration::from_secs(2));
        assert_eq!(s.chunks, 2);
        assert_eq!(s.totals.units, 8);
        assert!((s.cache_hit_rate - 1.0 / 6.0).abs() < 1e-9);
        assert!((s.rollback_rate - 0.2).abs() < 1e-9);
        assert!((s.units_per_second - 4.0).abs() < 1e-9);
        assert_eq!(s.modifications.get(&Stage::LocalRules), Some(&1));
    }

    #[test]
    fn test_merge_sums_passes() {
        let a = PipelineStats::build(vec![ChunkCounters { units: 3, ..Default::default() }], &[], Duration::from_millis(1_000));
        let b = PipelineStats::build(vec![ChunkCounters { units: 1, cache_hits: 1, ..Default::default() }], &[], Duration::from_millis(1_000));
        let m = PipelineStats::merge(&a, &b, &[]);
        assert_eq!(m.chunks, 2);
        assert_eq!(m.totals.units, 4);
        assert_eq!(m.elapsed_ms, 2_000);
        assert!((m.cache_hit_rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_mark_reverted_drops_stage_counts() {
        let log = vec![Modification::new(UnitId::new(0, 0), "a", "b", Stage::LocalRules, 0.9)];
        let mut s = PipelineStats::build(vec![ChunkCounters { units: 1, rules_applied: 1, ..Default::default() }], &log, Duration::ZERO);
        s.mark_reverted();
        assert!(s.reverted);
        assert!(s.modifications.is_empty());
        assert_eq!(s.totals.rules_applied, 1);
    }

    #[test]
    fn test_empty_run() {
        let s = PipelineStats::build(Vec::new(), &[], Duration::ZERO);
        assert_eq!(s.cache_hit_rate, 0.0);
        assert_eq!(s.units_per_second, 0.0);
    }
}
