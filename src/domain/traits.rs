// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Every collaborator the correction core talks to sits behind
// one of these traits. The engine only ever sees the trait and
// the result sum types defined here, so raw provider payloads
// never leak into the pipeline.
//
//   LocalRules        → deterministic fixes, sync, pure
//   GrammarProvider   → (text) -> text, may be out-of-process;
//                       runs on the grammar worker pool
//   LanguageModel     → (texts) -> texts, batched, async
//   BackupStore       → create/restore snapshot of the input
//   DocumentValidator → structural checks before and after a run
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)
//            Rust Book §17 (Trait Objects)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ─── Provider result types ────────────────────────────────────────────────────
/// What a single-text provider call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Corrected(String),
    Failed(String),
    TimedOut,
}

/// What a batched provider call produced. A batch either succeeds
/// as a whole or fails as a whole; there is no partial variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Corrected(Vec<String>),
    Failed(String),
    TimedOut,
}

// ─── LocalRules ───────────────────────────────────────────────────────────────
/// Deterministic, network-free text fixes.
pub trait LocalRules: Send + Sync {
    fn apply(&self, text: &str) -> String;
}

// ─── GrammarProvider ──────────────────────────────────────────────────────────
/// A grammar checker. Called from a worker-pool thread, so it may
/// block; the caller enforces the timeout.
pub trait GrammarProvider: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, text: &str) -> ProviderOutcome;
}

// ─── LanguageModel ────────────────────────────────────────────────────────────
/// A batched language-model corrector. One call per chunk;
/// output order must match input order.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn correct_batch(&self, texts: &[String]) -> BatchOutcome;
}

// ─── BackupStore ──────────────────────────────────────────────────────────────
/// Immutable snapshot of an input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHandle {
    pub id:            String,
    pub backup_path:   PathBuf,
    pub original_path: PathBuf,
    /// Hex SHA-256 of the snapshot bytes
    pub checksum:      String,
    pub created_at:    DateTime<Utc>,
}

pub trait BackupStore: Send + Sync {
    /// Snapshot the document at `source` before anything mutates it.
    fn create_backup(&self, source: &std::path::Path) -> Result<BackupHandle>;

    /// Return the snapshot bytes, verified against the checksum.
    fn restore(&self, handle: &BackupHandle) -> Result<Vec<u8>>;
}

// ─── DocumentValidator ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok:     bool,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<String>) -> Self {
        Self { ok: issues.is_empty(), issues }
    }
}

pub trait DocumentValidator: Send + Sync {
    fn validate(&self, document: &[u8]) -> ValidationReport;
}
