// ============================================================
// Layer 5 — Formatting-Preserving Reconstructor
// ============================================================
// Pours a corrected paragraph text back into the paragraph's
// ORIGINAL styled runs, so bold/italic/underline, hyperlinks and
// anything else attached to a run survive the correction.
//
// How it works:
//   1. Harmonize the candidate (quotes / line breaks that only
//      the provider introduced are undone)
//   2. Safety shield: reject catastrophic edits outright
//   3. Tokenize original + corrected, align them
//   4. Build a byte → run map over the original text
//   5. Walk the corrected tokens in order and append each one to
//      the run that owns its origin:
//        Equal   tokens are split char-by-char along the original
//                run boundaries (a word that was half bold stays
//                half bold)
//        Replace/Insert tokens go whole to the owning run
//      The target run never moves backwards, so concatenating the
//      runs always reproduces the corrected text exactly.
//   6. Runs left holding only an orphaned quote mark are merged
//      into their neighbour; runs that receive nothing are cleared
//   7. Separator runs (tabs, line breaks) must come out exactly as
//      they went in. Edits that would land on one go to the next
//      editable run; a candidate that drops a separator, or cannot
//      be aligned with it in place, is refused as a layout change.
//
// The same routine works for any ordered list of text segments,
// which is how footnote XML text nodes are handled too.

use serde::{Deserialize, Serialize};

use crate::data::preprocessor::{is_quote_only, Preprocessor};
use crate::domain::unit::FormattedRun;
use crate::engine::aligner::{align, EditOp};
use crate::engine::tokenizer::{sentence_count, tokenize, word_count};

// ─── Safety shield ────────────────────────────────────────────────────────────
/// Catastrophic-edit guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Largest tolerated fraction of lost word tokens
    pub max_token_loss:        f64,
    /// Only reject when the sentence count also drops
    pub require_sentence_drop: bool,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            max_token_loss:        0.15,
            require_sentence_drop: true,
        }
    }
}

/// True when `candidate` loses too many words AND (by default)
/// collapses sentences relative to `original`.
pub fn is_catastrophic(original: &str, candidate: &str, cfg: &ShieldConfig) -> bool {
    let before = word_count(original);
    if before == 0 {
        return false;
    }
    let after = word_count(candidate);
    let loss  = before.saturating_sub(after) as f64 / before as f64;
    if loss <= cfg.max_token_loss {
        return false;
    }
    !cfg.require_sentence_drop || sentence_count(candidate) < sentence_count(original)
}

// ─── Outcome ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconstruction {
    /// New text for every run (same length as the input runs) and
    /// the harmonized corrected text they concatenate to
    Applied { texts: Vec<String>, corrected: String },
    /// Nothing to do: the candidate equals the current text
    Unchanged,
    /// The candidate failed the safety shield
    Catastrophic,
    /// There are no runs to hold non-empty text
    NoRuns,
    /// The candidate drops or rewrites a tab or line break
    LayoutChanged,
}

// ─── Reconstructor ────────────────────────────────────────────────────────────
pub struct Reconstructor {
    shield:       ShieldConfig,
    preprocessor: Preprocessor,
}

impl Reconstructor {
    pub fn new(shield: ShieldConfig) -> Self {
        Self { shield, preprocessor: Preprocessor::new() }
    }

    pub fn shield(&self) -> &ShieldConfig {
        &self.shield
    }

    /// Reconstruct formatted runs for `candidate`.
    pub fn reconstruct(&self, runs: &[FormattedRun], candidate: &str) -> Reconstruction {
        let segments: Vec<&str> = runs.iter().map(|r| r.text.as_str()).collect();
        let fixed: Vec<bool>    = runs.iter().map(|r| r.fixed).collect();
        self.reconstruct_with(&segments, &fixed, candidate)
    }

    /// Same as `reconstruct`, over bare text segments that are all
    /// editable.
    pub fn reconstruct_segments(&self, segments: &[&str], candidate: &str) -> Reconstruction {
        self.reconstruct_with(segments, &vec![false; segments.len()], candidate)
    }

    fn reconstruct_with(&self, segments: &[&str], fixed: &[bool], candidate: &str) -> Reconstruction {
        let original: String = segments.concat();
        let corrected = self.preprocessor.harmonize(&original, candidate);

        if corrected == original {
            return Reconstruction::Unchanged;
        }
        if is_catastrophic(&original, &corrected, &self.shield) {
            return Reconstruction::Catastrophic;
        }
        if segments.is_empty() {
            return Reconstruction::NoRuns;
        }

        let Some(texts) = distribute(segments, fixed, &original, &corrected) else {
            return Reconstruction::LayoutChanged;
        };
        debug_assert_eq!(texts.concat(), corrected);

        Reconstruction::Applied { texts, corrected }
    }
}

/// Map corrected text onto the original segments. None when a
/// fixed segment would not keep its exact text.
fn distribute(segments: &[&str], fixed: &[bool], original: &str, corrected: &str) -> Option<Vec<String>> {
    // ── Byte → segment map ────────────────────────────────────────────────────
    let mut ends = Vec::with_capacity(segments.len());
    let mut acc  = 0usize;
    for seg in segments {
        acc += seg.len();
        ends.push(acc);
    }
    // First segment whose end lies beyond `offset`; empty segments
    // are skipped naturally because their end equals their start.
    let owner_of = |offset: usize| -> usize {
        ends.partition_point(|&end| end <= offset).min(segments.len() - 1)
    };
    // New text never goes into a fixed segment: use the next
    // editable one (if there is none, the final check refuses)
    let editable_from = |index: usize| -> usize {
        (index..segments.len()).find(|&k| !fixed[k]).unwrap_or(index)
    };

    let orig_tokens = tokenize(original);
    let corr_tokens = tokenize(corrected);
    let alignment   = align(&orig_tokens, &corr_tokens);

    let mut buffers: Vec<String> = vec![String::new(); segments.len()];
    let leading_owner = if original.is_empty() { 0 } else { owner_of(0) };
    let mut floor = 0usize;

    for entry in &alignment {
        let token = &corr_tokens[entry.corrected_index];

        match (entry.op, entry.origin) {
            (EditOp::Equal, Some(o)) => {
                // Split along the original run boundaries
                let base = orig_tokens[o].offset;
                for (rel, c) in token.text.char_indices() {
                    let target = owner_of(base + rel).max(floor);
                    buffers[target].push(c);
                    floor = target;
                }
            }
            (_, origin) => {
                let owner = match origin {
                    Some(o) => owner_of(orig_tokens[o].offset),
                    None    => leading_owner,
                };
                let target = editable_from(owner.max(floor));
                buffers[target].push_str(&token.text);
                floor = target;
            }
        }
    }

    merge_orphan_quotes(segments, fixed, &mut buffers);

    let intact = (0..segments.len()).all(|i| !fixed[i] || buffers[i] == segments[i]);
    intact.then_some(buffers)
}

/// A run that ended up holding only a quote mark, when it used to
/// hold real text, is folded into the nearest non-empty neighbour
/// (previous first). Order is preserved because everything between
/// the two runs is empty.
fn merge_orphan_quotes(segments: &[&str], fixed: &[bool], buffers: &mut [String]) {
    for i in 0..buffers.len() {
        if fixed[i] || !is_quote_only(&buffers[i]) || is_quote_only(segments[i]) {
            continue;
        }
        let prev = (0..i).rev().find(|&k| !buffers[k].is_empty());
        let next = (i + 1..buffers.len()).find(|&k| !buffers[k].is_empty());

        // A separator in the way stays where it is, and so does the quote
        match (prev, next) {
            (Some(p), _) if !fixed[p] => {
                let moved = std::mem::take(&mut buffers[i]);
                buffers[p].push_str(&moved);
            }
            (None, Some(n)) if !fixed[n] => {
                let moved = std::mem::take(&mut buffers[i]);
                buffers[n].insert_str(0, &moved);
            }
            _ => {}
        }
    }
}
