// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles the concerns that touch the outside world but don't
// belong to any business layer:
//
//   backup.rs       — Input snapshots
//                     Copies the document before a run, with a
//                     SHA-256 checksum and JSON sidecar, and
//                     hands verified bytes back on restore.
//
//   cache_store.rs  — Similarity-cache persistence
//                     Loads entries at start-up and saves them
//                     after the run; a bad store means a cold
//                     cache, never a failed run.
//
//   metrics.rs      — Run reports
//                     Modification log as CSV, aggregate
//                     statistics and glossary as JSON.
//
//   providers.rs    — Grammar and language-model providers
//                     backed by external commands, plus
//                     pass-through stand-ins.
//
// Keeping these here lets the engine stay free of file paths
// and process handling, and lets tests swap in mocks.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Document snapshots with checksum verification
pub mod backup;

/// JSON persistence for cache entries
pub mod cache_store;

/// Modification log and statistics reports
pub mod metrics;

/// Command-backed and pass-through providers
pub mod providers;
