// ============================================================
// Layer 5 — Quality Scorer
// ============================================================
// Pure function that rates a candidate correction against the
// text it would replace. The same score gates rollback (is the
// stage allowed to commit?) and cache admission (is the result
// good enough to reuse?), so it must be deterministic: identical
// inputs always produce an identical score.
//
// Dimensions (each in [0, 1]):
//   content_preservation — lexical similarity of the two texts
//   plausibility         — length-ratio check; 0 outside the
//                          configured band (default 0.5×–1.5×)
//   safety               — 0 when the safety shield trips
//
// overall = 0.6 × content + 0.4 × plausibility,
//           forced to 0 when safety or plausibility is 0.

use serde::{Deserialize, Serialize};

use crate::domain::modification::Stage;
use crate::engine::reconstructor::{is_catastrophic, ShieldConfig};

/// Above this many chars per side the O(n·m) edit distance is
/// swapped for the linear Sørensen–Dice bigram similarity.
const MAX_LEVENSHTEIN_CHARS: usize = 2_000;

const CONTENT_WEIGHT: f64      = 0.6;
const PLAUSIBILITY_WEIGHT: f64 = 0.4;

// ─── Configuration ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// A stage commits only at or above this score
    pub rollback_threshold:  f64,
    /// A result enters the cache only at or above this score;
    /// must be strictly greater than `rollback_threshold`
    pub admission_threshold: f64,
    pub min_length_ratio:    f64,
    pub max_length_ratio:    f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            rollback_threshold:  0.60,
            admission_threshold: 0.80,
            min_length_ratio:    0.5,
            max_length_ratio:    1.5,
        }
    }
}

// ─── QualityScore ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall:              f64,
    pub content_preservation: f64,
    pub plausibility:         f64,
    pub safety:               f64,
    pub stage:                Stage,
}

impl QualityScore {
    pub fn passes(&self, threshold: f64) -> bool {
        self.overall >= threshold
    }
}

// ─── QualityScorer ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct QualityScorer {
    cfg:    QualityConfig,
    shield: ShieldConfig,
}

impl QualityScorer {
    pub fn new(cfg: QualityConfig, shield: ShieldConfig) -> Self {
        Self { cfg, shield }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.cfg
    }

    pub fn score(&self, original: &str, candidate: &str, stage: Stage) -> QualityScore {
        let content_preservation = lexical_similarity(original, candidate);
        let plausibility         = self.plausibility(original, candidate);
        let safety = if is_catastrophic(original, candidate, &self.shield) { 0.0 } else { 1.0 };

        let overall = if safety == 0.0 || plausibility == 0.0 {
            0.0
        } else {
            CONTENT_WEIGHT * content_preservation + PLAUSIBILITY_WEIGHT * plausibility
        };

        QualityScore {
            overall,
            content_preservation,
            plausibility,
            safety,
            stage,
        }
    }

    fn plausibility(&self, original: &str, candidate: &str) -> f64 {
        let before = original.chars().count();
        let after  = candidate.chars().count();
        if before == 0 {
            return if after == 0 { 1.0 } else { 0.0 };
        }
        let ratio = after as f64 / before as f64;
        if ratio < self.cfg.min_length_ratio || ratio > self.cfg.max_length_ratio {
            return 0.0;
        }
        (1.0 - (1.0 - ratio).abs()).clamp(0.0, 1.0)
    }
}

/// Similarity in [0, 1] between two texts.
pub fn lexical_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.chars().count() <= MAX_LEVENSHTEIN_CHARS && b.chars().count() <= MAX_LEVENSHTEIN_CHARS {
        strsim::normalized_levenshtein(a, b)
    } else {
        strsim::sorensen_dice(a, b)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> QualityScorer {
        QualityScorer::new(QualityConfig::default(), ShieldConfig::default())
    }

    #[test]
    fn test_small_fix_scores_high() {
        let s = scorer().score(
            "Questo è un eror di battitura.",
            "Questo è un errore di battitura.",
            Stage::LocalRules,
        );
        assert!(s.overall > 0.9, "{s:?}");
        assert_eq!(s.safety, 1.0);
    }

    #[test]
    fn test_identity_is_perfect() {
        let s = scorer().score("uguale", "uguale", Stage::Grammar);
        assert_eq!(s.overall, 1.0);
    }

    #[test]
    fn test_unrelated_text_scores_below_rollback_threshold() {
        let cfg = QualityConfig::default();
        let s = scorer().score(
            "La riunione è fissata per martedì mattina.",
            "zzzz qqqq wwww xxxx yyyy kkkk jjjj hhhh.",
            Stage::Grammar,
        );
        assert!(!s.passes(cfg.rollback_threshold), "{s:?}");
    }

    #[test]
    fn test_length_outside_band_is_zero() {
        let s = scorer().score("breve", "molto molto molto più lungo", Stage::LanguageModel);
        assert_eq!(s.plausibility, 0.0);
        assert_eq!(s.overall, 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(scorer().score("", "", Stage::Grammar).overall, 1.0);
        assert_eq!(scorer().score("", "nuovo", Stage::Grammar).overall, 0.0);
    }

    #[test]
    fn test_deterministic() {
        let a = scorer().score("Un testo qualsiasi.", "Un testo qualunque.", Stage::LanguageModel);
        let b = scorer().score("Un testo qualsiasi.", "Un testo qualunque.", Stage::LanguageModel);
        assert_eq!(a, b);
    }
}
