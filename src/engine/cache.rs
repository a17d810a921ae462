// ============================================================
// Layer 5 — Similarity Cache
// ============================================================
// Remembers good corrections so near-identical paragraphs
// (boilerplate, repeated disclaimers, list items that differ
// by a name) don't cost another provider call.
//
// Lookup (`get_if_similar`):
//   1. Exact key match (key = normalised text, see Preprocessor)
//   2. Otherwise scan the most recent `scan_limit` keys and take
//      the closest one at or above the similarity threshold
//   Expired entries are never returned.
//
// Admission (`put`):
//   Only results whose quality score is at or above the admission
//   threshold are stored. That threshold is strictly above the
//   rollback threshold, so the cache only ever holds corrections
//   that were comfortably accepted. A second `put` for the same
//   key overwrites the first (entries are content-derived, so
//   last-writer-wins is safe).
//
// Eviction (when over capacity):
//   expired entries first, then the lowest
//     quality × recency × usage
//   where recency = 1 / (1 + hours since last use)
//         usage   = 1 + ln(1 + usage_count)
//
// A hit never hands out text to paste wholesale. The caller
// replays the cached EDITS onto its own text (`transfer_edits`)
// and then reconstructs against its own runs, so formatting is
// never shared between paragraphs.
//
// Reference: Rust Book §16.3 (Shared-State Concurrency)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::data::preprocessor::Preprocessor;
use crate::domain::modification::Stage;
use crate::engine::aligner::{token_opcodes, EditOp};
use crate::engine::quality::lexical_similarity;
use crate::engine::tokenizer::tokenize;

// ─── Configuration ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries
    pub capacity:                  usize,
    /// Time-to-live of a new entry, in seconds
    pub ttl_secs:                  i64,
    /// Minimum similarity for a near-duplicate hit
    pub near_duplicate_similarity: f64,
    /// How many recent keys a near-duplicate lookup may compare
    pub scan_limit:                usize,
    /// Optional JSON store the cache is loaded from and saved to
    pub path:                      Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity:                  5_000,
            ttl_secs:                  30 * 24 * 3_600,
            near_duplicate_similarity: 0.90,
            scan_limit:                256,
            path:                      None,
        }
    }
}

// ─── CacheEntry ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub normalized_key: String,
    /// The text the correction was made against
    pub original_text:  String,
    pub corrected_text: String,
    pub quality_score:  f64,
    pub stage:          Stage,
    pub created_at:     DateTime<Utc>,
    pub last_used:      DateTime<Utc>,
    pub ttl_secs:       i64,
    pub usage_count:    u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(self.ttl_secs)
    }

    /// Composite keep-score; the lowest is evicted first.
    pub fn retention_score(&self, now: DateTime<Utc>) -> f64 {
        let idle_hours = (now - self.last_used).num_seconds().max(0) as f64 / 3_600.0;
        let recency    = 1.0 / (1.0 + idle_hours);
        let usage      = 1.0 + (1.0 + self.usage_count as f64).ln();
        self.quality_score * recency * usage
    }
}

/// A lookup result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub entry:      CacheEntry,
    /// 1.0 for an exact key match
    pub similarity: f64,
}

// ─── SimilarityCache ──────────────────────────────────────────────────────────
#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Keys in insertion order, newest at the back
    recent:  VecDeque<String>,
}

pub struct SimilarityCache {
    cfg:                 CacheConfig,
    admission_threshold: f64,
    preprocessor:        Preprocessor,
    inner:               RwLock<CacheInner>,
}

impl SimilarityCache {
    pub fn new(cfg: CacheConfig, admission_threshold: f64) -> Self {
        Self {
            cfg,
            admission_threshold,
            preprocessor: Preprocessor::new(),
            inner:        RwLock::new(CacheInner::default()),
        }
    }

    /// Build a cache pre-filled from persisted entries. Expired
    /// entries are dropped; the newest `capacity` survive.
    pub fn with_entries(cfg: CacheConfig, admission_threshold: f64, entries: Vec<CacheEntry>) -> Self {
        let cache = Self::new(cfg, admission_threshold);
        cache.replace_entries(entries);
        cache
    }

    /// Throw away the current content and load `entries` instead,
    /// under the same expiry and capacity rules as `with_entries`.
    pub fn replace_entries(&self, mut entries: Vec<CacheEntry>) {
        let now = Utc::now();
        entries.retain(|e| !e.is_expired(now));
        entries.sort_by_key(|e| e.created_at);

        let mut inner = self.write();
        *inner = CacheInner::default();
        for entry in entries {
            let key = entry.normalized_key.clone();
            if inner.entries.insert(key.clone(), entry).is_none() {
                inner.recent.push_back(key);
            }
        }
        evict(&mut inner, self.cfg.capacity, now);
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact hit, or the closest recent near-duplicate whose
    /// similarity is at least `min_similarity`.
    pub fn get_if_similar(&self, text: &str, min_similarity: f64) -> Option<CacheHit> {
        let key = self.preprocessor.cache_key(text);
        let now = Utc::now();

        let found = {
            let inner = self.read();
            match inner.entries.get(&key) {
                Some(e) if !e.is_expired(now) => Some((key.clone(), 1.0)),
                _ => best_near_duplicate(&inner, &key, min_similarity, self.cfg.scan_limit, now),
            }
        };

        let (hit_key, similarity) = found?;
        let mut inner = self.write();
        let entry = inner.entries.get_mut(&hit_key)?;
        entry.usage_count += 1;
        entry.last_used = now;
        tracing::debug!(similarity, uses = entry.usage_count, "Cache hit");
        Some(CacheHit { entry: entry.clone(), similarity })
    }

    /// Store a correction. Returns false when the quality score is
    /// below the admission threshold (nothing is stored).
    pub fn put(&self, text: &str, corrected: &str, quality: f64, stage: Stage) -> bool {
        if quality < self.admission_threshold {
            return false;
        }
        let key = self.preprocessor.cache_key(text);
        let now = Utc::now();

        let mut inner = self.write();
        match inner.entries.get_mut(&key) {
            Some(existing) => {
                existing.original_text  = text.to_string();
                existing.corrected_text = corrected.to_string();
                existing.quality_score  = quality;
                existing.stage          = stage;
                existing.last_used      = now;
            }
            None => {
                inner.entries.insert(key.clone(), CacheEntry {
                    normalized_key: key.clone(),
                    original_text:  text.to_string(),
                    corrected_text: corrected.to_string(),
                    quality_score:  quality,
                    stage,
                    created_at:     now,
                    last_used:      now,
                    ttl_secs:       self.cfg.ttl_secs,
                    usage_count:    0,
                });
                inner.recent.push_back(key);
                evict(&mut inner, self.cfg.capacity, now);
            }
        }
        true
    }

    /// Snapshot of every live entry, oldest first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let inner = self.read();
        inner
            .recent
            .iter()
            .filter_map(|k| inner.entries.get(k).cloned())
            .collect()
    }

    // Poisoning only means another thread panicked mid-update; the
    // map itself is still structurally sound, so keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn best_near_duplicate(
    inner:          &CacheInner,
    key:            &str,
    min_similarity: f64,
    scan_limit:     usize,
    now:            DateTime<Utc>,
) -> Option<(String, f64)> {
    let key_len = key.chars().count();
    let mut best: Option<(String, f64)> = None;

    for candidate in inner.recent.iter().rev().take(scan_limit) {
        let Some(entry) = inner.entries.get(candidate) else { continue };
        if entry.is_expired(now) {
            continue;
        }
        // Length prefilter: edit similarity can't exceed this ratio
        let cand_len = candidate.chars().count();
        let (lo, hi) = (key_len.min(cand_len), key_len.max(cand_len));
        if hi == 0 || (lo as f64 / hi as f64) < min_similarity {
            continue;
        }
        let sim = lexical_similarity(key, candidate);
        if sim >= min_similarity && best.as_ref().map_or(true, |(_, b)| sim > *b) {
            best = Some((candidate.clone(), sim));
        }
    }
    best
}

fn evict(inner: &mut CacheInner, capacity: usize, now: DateTime<Utc>) {
    if inner.entries.len() <= capacity {
        return;
    }

    // ── Expired entries go first ──────────────────────────────────────────────
    inner.entries.retain(|_, e| !e.is_expired(now));

    // ── Then the lowest retention scores ──────────────────────────────────────
    let excess = inner.entries.len().saturating_sub(capacity);
    if excess > 0 {
        let mut ranked: Vec<(String, f64)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.retention_score(now)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (key, _) in ranked.into_iter().take(excess) {
            inner.entries.remove(&key);
        }
    }

    let CacheInner { entries, recent } = inner;
    recent.retain(|k| entries.contains_key(k));
    tracing::debug!(live = entries.len(), "Cache eviction pass");
}

// ─── Edit transfer ────────────────────────────────────────────────────────────

/// Replay the edits that turned `cached_original` into
/// `cached_corrected` onto `request`.
///
/// Each edit is anchored on the original tokens it touches; it is
/// transferred only if those tokens also appear, contiguously and
/// unchanged, in `request`. Returns None when no edit could be
/// transferred.
pub fn transfer_edits(request: &str, cached_original: &str, cached_corrected: &str) -> Option<String> {
    let req  = tokenize(request);
    let orig = tokenize(cached_original);
    let corr = tokenize(cached_corrected);

    // ── Step 1: cached-original token → request token ────────────────────────
    let mut to_request: Vec<Option<usize>> = vec![None; orig.len()];
    for code in token_opcodes(&orig, &req) {
        if code.op == EditOp::Equal {
            for (k, o) in code.original.clone().enumerate() {
                to_request[o] = Some(code.corrected.start + k);
            }
        }
    }

    // ── Step 2: map every cached edit onto request positions ─────────────────
    let mut splices: Vec<(usize, usize, String)> = Vec::new();
    let mut edits = 0usize;

    for code in token_opcodes(&orig, &corr) {
        if code.op == EditOp::Equal {
            continue;
        }
        edits += 1;
        let replacement: String = corr[code.corrected.clone()].iter().map(|t| t.text.as_str()).collect();

        let target = if code.original.is_empty() {
            // Pure insertion: anchor after the preceding token
            match code.original.start {
                0 => to_request.first().copied().flatten().filter(|&r| r == 0).map(|r| r..r),
                s => to_request[s - 1].map(|r| r + 1..r + 1),
            }
        } else {
            let mapped: Option<Vec<usize>> = code.original.clone().map(|o| to_request[o]).collect();
            mapped.and_then(|m| {
                let contiguous = m.windows(2).all(|w| w[1] == w[0] + 1);
                contiguous.then(|| m[0]..m[m.len() - 1] + 1)
            })
        };

        if let Some(range) = target {
            splices.push((range.start, range.end, replacement));
        }
    }

    if edits > 0 && splices.is_empty() {
        return None;
    }

    // ── Step 3: apply, skipping overlaps ─────────────────────────────────────
    splices.sort_by_key(|s| (s.0, s.1));
    let mut out     = String::with_capacity(request.len());
    let mut cursor  = 0usize;
    for (start, end, replacement) in splices {
        if start < cursor {
            continue;
        }
        out.extend(req[cursor..start].iter().map(|t| t.text.as_str()));
        out.push_str(&replacement);
        cursor = end;
    }
    out.extend(req[cursor..].iter().map(|t| t.text.as_str()));
    Some(out)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SimilarityCache {
        SimilarityCache::new(CacheConfig::default(), 0.8)
    }

    #[test]
    fn test_exact_hit() {
        let c = cache();
        assert!(c.put("Un eror qui.", "Un errore qui.", 0.95, Stage::Grammar));
        let hit = c.get_if_similar("Un  eror qui.", 0.9).unwrap();
        assert_eq!(hit.similarity, 1.0);
        assert_eq!(hit.entry.corrected_text, "Un errore qui.");
        assert_eq!(hit.entry.usage_count, 1);
    }

    #[test]
    fn test_below_admission_is_not_stored() {
        let c = cache();
        assert!(!c.put("testo", "testi", 0.7, Stage::Grammar));
        assert!(c.is_empty());
        assert!(c.get_if_similar("testo", 0.5).is_none());
    }

    #[test]
    fn test_put_twice_is_idempotent() {
        let c = cache();
        c.put("Il documento è pronto.", "Il documento è pronto!", 0.9, Stage::LanguageModel);
        c.put("Il documento è pronto.", "Il documento è pronto!", 0.9, Stage::LanguageModel);
        assert_eq!(c.len(), 1);
        assert_eq!(c.entries().len(), 1);
        let hit = c.get_if_similar("Il documento è pronto.", 0.9).unwrap();
        assert_eq!(hit.entry.corrected_text, "Il documento è pronto!");
        assert_eq!(hit.entry.quality_score, 0.9);
    }

    #[test]
    fn test_near_duplicate_hit() {
        let c = cache();
        let a = "Il progetto è stato aprovato dal consiglio comunale nella seduta di ieri, come annunciato da Mario Rossi.";
        let b = "Il progetto è stato aprovato dal consiglio comunale nella seduta di ieri, come annunciato da Mario Bianchi.";
        c.put(a, &a.replace("aprovato", "approvato"), 0.95, Stage::LanguageModel);

        let hit = c.get_if_similar(b, 0.9).unwrap();
        assert!(hit.similarity >= 0.9 && hit.similarity < 1.0);
        assert!(c.get_if_similar("Tutt'altro paragrafo.", 0.9).is_none());
    }

    #[test]
    fn test_expired_entries_are_ignored() {
        let cfg = CacheConfig { ttl_secs: -1, ..CacheConfig::default() };
        let c = SimilarityCache::new(cfg, 0.8);
        c.put("vecchio", "vecchi", 0.9, Stage::Grammar);
        assert!(c.get_if_similar("vecchio", 0.9).is_none());
    }

    #[test]
    fn test_capacity_evicts_lowest_quality() {
        let cfg = CacheConfig { capacity: 2, ..CacheConfig::default() };
        let c = SimilarityCache::new(cfg, 0.8);
        c.put("uno", "1", 0.81, Stage::Grammar);
        c.put("due", "2", 0.99, Stage::Grammar);
        c.put("tre", "3", 0.95, Stage::Grammar);
        assert_eq!(c.len(), 2);
        assert!(c.get_if_similar("uno", 1.0).is_none());
        assert!(c.get_if_similar("due", 1.0).is_some());
    }

    #[test]
    fn test_replace_entries_rolls_back_to_snapshot() {
        let c = cache();
        c.put("prima frase", "prima frase!", 0.9, Stage::Grammar);
        let snapshot = c.entries();

        c.put("seconda frase", "seconda frase!", 0.9, Stage::Grammar);
        c.replace_entries(snapshot);
        assert_eq!(c.len(), 1);
        assert!(c.get_if_similar("prima frase", 1.0).is_some());
        assert!(c.get_if_similar("seconda frase", 1.0).is_none());
    }

    #[test]
    fn test_transfer_keeps_requesting_text() {
        let out = transfer_edits(
            "Il progetto è stato aprovato da Mario Bianchi.",
            "Il progetto è stato aprovato da Mario Rossi.",
            "Il progetto è stato approvato da Mario Rossi.",
        );
        assert_eq!(out.as_deref(), Some("Il progetto è stato approvato da Mario Bianchi."));
    }

    #[test]
    fn test_transfer_insertion_and_unanchored_edit() {
        let out = transfer_edits("Ciao mondo", "Ciao mondo", "Ciao, mondo");
        assert_eq!(out.as_deref(), Some("Ciao, mondo"));

        // The only edit touches a token the request doesn't have
        assert!(transfer_edits("Buongiorno a tutti", "Buonasera a tutti", "Buona sera a tutti").is_none());
    }
}
