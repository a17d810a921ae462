// ============================================================
// Layer 2 — Run Configuration
// ============================================================
// Every tunable of a correction run, in one serialisable struct.
// Loaded from an optional JSON file; any missing field keeps its
// default, so `{}` is a valid configuration:
//
//   {
//     "quality":   { "rollback_threshold": 0.6, "admission_threshold": 0.8 },
//     "scheduler": { "max_concurrent_chunks": 4 },
//     "providers": { "language_model_command": ["my-llm", "--json"] }
//   }
//
// The safety-shield, quality and cache thresholds were picked
// empirically. They stay configurable and should be calibrated
// against a labelled correction corpus.
//
// Reference: serde documentation (container attributes)
//            Rust Book §5 (Structs)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::engine::cache::CacheConfig;
use crate::engine::quality::QualityConfig;
use crate::engine::reconstructor::ShieldConfig;
use crate::engine::scheduler::SchedulerConfig;

// ─── Providers ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// JSON map of whole-word replacements for the local rules
    pub rules_path:                  Option<PathBuf>,
    /// argv of the grammar command; None = pass-through
    pub grammar_command:             Option<Vec<String>>,
    /// argv of the language model command; None = pass-through
    pub language_model_command:      Option<Vec<String>>,
    pub grammar_timeout_secs:        u64,
    pub language_model_timeout_secs: u64,
    pub max_attempts:                u32,
    pub backoff_base_ms:             u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            rules_path:                  None,
            grammar_command:             None,
            language_model_command:      None,
            grammar_timeout_secs:        20,
            language_model_timeout_secs: 120,
            max_attempts:                3,
            backoff_base_ms:             500,
        }
    }
}

// ─── CorrectionConfig ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub shield:         ShieldConfig,
    pub quality:        QualityConfig,
    pub cache:          CacheConfig,
    pub scheduler:      SchedulerConfig,
    pub providers:      ProvidersConfig,
    /// Paragraphs with fewer non-blank characters are not units
    pub min_unit_chars: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            shield:         ShieldConfig::default(),
            quality:        QualityConfig::default(),
            cache:          CacheConfig::default(),
            scheduler:      SchedulerConfig::default(),
            providers:      ProvidersConfig::default(),
            min_unit_chars: 2,
        }
    }
}

impl CorrectionConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_str(&json)
            .with_context(|| format!("Config '{}' is not valid", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let q = &self.quality;
        if !(0.0..=1.0).contains(&q.rollback_threshold) || !(0.0..=1.0).contains(&q.admission_threshold) {
            bail!("Quality thresholds must lie in [0, 1]");
        }
        if q.admission_threshold <= q.rollback_threshold {
            bail!(
                "admission_threshold ({}) must be greater than rollback_threshold ({})",
                q.admission_threshold,
                q.rollback_threshold
            );
        }
        if q.min_length_ratio >= q.max_length_ratio {
            bail!("min_length_ratio must be below max_length_ratio");
        }
        if !(0.0..=1.0).contains(&self.shield.max_token_loss) {
            bail!("shield.max_token_loss must lie in [0, 1]");
        }
        let s = &self.scheduler;
        if s.max_units_per_chunk == 0 || s.max_tokens_per_chunk == 0 || s.max_concurrent_chunks == 0 {
            bail!("Scheduler limits must be at least 1");
        }
        if s.grammar_workers == Some(0) {
            bail!("grammar_workers must be at least 1");
        }
        if self.cache.capacity == 0 {
            bail!("cache.capacity must be at least 1");
        }
        if self.providers.max_attempts == 0 {
            bail!("providers.max_attempts must be at least 1");
        }
        Ok(())
    }
}
