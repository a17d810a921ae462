// ============================================================
// Layer 5 — Correction Engine
// ============================================================
// Everything that decides WHAT text a unit ends up with. The
// engine never sees XML or ZIP members, only CorrectableUnits.
//
//   tokenizer / aligner   → lossless tokens and token diffs
//   reconstructor         → pours corrected text back into runs,
//                           rejects catastrophic edits
//   quality               → scores a candidate against its source
//   cache / glossary      → state shared by every chunk
//   rules / grammar_pool  → the local stages
//   pipeline              → the per-unit state machine
//   scheduler / stats     → chunking, bounded concurrency, counters
//
// Reference: Rust Book §7 (Modules), §16 (Concurrency)

/// Lossless word / space / punctuation tokenizer
pub mod tokenizer;

/// Token-level diff (opcodes and per-token alignment)
pub mod aligner;

/// Formatting-preserving run reconstruction and safety shield
pub mod reconstructor;

/// Composite quality score for candidate corrections
pub mod quality;

/// Similarity cache with TTL, admission and eviction
pub mod cache;

/// Append-only proper-noun glossary
pub mod glossary;

/// Deterministic local correction rules
pub mod rules;

/// Bounded worker pool for grammar checks
pub mod grammar_pool;

/// Per-unit correction state machine
pub mod pipeline;

/// Chunk scheduler with a concurrency ceiling
pub mod scheduler;

/// Per-chunk counters and aggregate statistics
pub mod stats;
