// ============================================================
// Layer 3 — Modification Domain Type
// ============================================================
// An append-only audit record written every time a pipeline
// stage commits a change to a unit. Records are never edited
// after creation; reporting collaborators read them as-is.
//
// A Modification only exists when the committing stage's
// quality score cleared its threshold. Rejected candidates
// leave no record here (they show up in the statistics).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::unit::UnitId;

// ─── Stage ────────────────────────────────────────────────────────────────────
/// Which correction source produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Served from the similarity cache
    Cache,
    /// Deterministic, network-free rule fixes
    LocalRules,
    /// Grammar-analysis provider
    Grammar,
    /// Language-model provider
    LanguageModel,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Cache         => "cache",
            Stage::LocalRules    => "local-rules",
            Stage::Grammar       => "grammar",
            Stage::LanguageModel => "language-model",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Modification ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub unit_id:        UnitId,
    /// Unit text before the committing stage ran
    pub original_text:  String,
    /// Unit text after the stage committed
    pub corrected_text: String,
    pub stage:          Stage,
    /// Composite quality score the stage was accepted with
    pub quality:        f64,
    pub timestamp:      DateTime<Utc>,
}

impl Modification {
    pub fn new(
        unit_id:        UnitId,
        original_text:  impl Into<String>,
        corrected_text: impl Into<String>,
        stage:          Stage,
        quality:        f64,
    ) -> Self {
        Self {
            unit_id,
            original_text:  original_text.into(),
            corrected_text: corrected_text.into(),
            stage,
            quality,
            timestamp:      Utc::now(),
        }
    }

    /// Everything except the timestamp, for comparing runs.
    pub fn content_key(&self) -> (UnitId, Stage, &str, &str) {
        (self.unit_id, self.stage, &self.original_text, &self.corrected_text)
    }
}

/// Sort a modification log into document order. Stable, so the
/// per-unit stage order (rules before grammar before AI) survives.
pub fn sort_log(log: &mut [Modification]) {
    log.sort_by_key(|m| m.unit_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_match_serde() {
        let json = serde_json::to_string(&Stage::LocalRules).unwrap();
        assert_eq!(json, "\"local-rules\"");
        assert_eq!(Stage::LocalRules.to_string(), "local-rules");
    }

    #[test]
    fn test_sort_log_is_stable_within_a_unit() {
        let mut log = vec![
            Modification::new(UnitId::new(0, 5), "a", "b", Stage::LocalRules, 0.9),
            Modification::new(UnitId::new(0, 1), "c", "d", Stage::Grammar, 0.9),
            Modification::new(UnitId::new(0, 5), "b", "e", Stage::Grammar, 0.9),
        ];
        sort_log(&mut log);
        assert_eq!(log[0].unit_id, UnitId::new(0, 1));
        assert_eq!(log[1].stage, Stage::LocalRules);
        assert_eq!(log[2].stage, Stage::Grammar);
    }
}
