// ============================================================
// Layer 4 — Unit Chunker
// ============================================================
// Groups the ordered list of correctable units into chunks.
// A chunk is the unit of scheduling (chunks run concurrently)
// and of language-model batching (one request per chunk).
//
// Two limits bound every chunk:
//   - max_units   — how many paragraphs go into one request
//   - max_tokens  — the word-token budget of one request
//
// A chunk is closed as soon as adding the next unit would break
// either limit. A single unit that is larger than the whole
// token budget is never split (that would cut a paragraph in
// half); it simply becomes a chunk of its own.
//
// Example with max_units=3, max_tokens=10:
//   token counts: [4, 4, 4, 15, 2, 2]
//   Chunk 1: [4, 4]      (adding the third 4 → 12 > 10)
//   Chunk 2: [4]         (next one is oversized)
//   Chunk 3: [15]        (oversized, alone)
//   Chunk 4: [2, 2]
//
// Chunks preserve document order, and every unit lands in
// exactly one chunk.
//
// Reference: Rust Book §8 (Vectors), §13 (Iterators)

use std::ops::Range;

use crate::domain::unit::CorrectableUnit;
use crate::engine::tokenizer::word_count;

pub struct Chunker {
    /// Maximum number of units per chunk
    max_units:  usize,
    /// Maximum word tokens per chunk (soft for a single unit)
    max_tokens: usize,
}

impl Chunker {
    /// Create a new Chunker. A zero limit is treated as 1: one
    /// unit per chunk, or every unit over budget.
    pub fn new(max_units: usize, max_tokens: usize) -> Self {
        Self { max_units: max_units.max(1), max_tokens: max_tokens.max(1) }
    }

    /// Index ranges of each chunk, given each unit's token count.
    pub fn plan(&self, token_counts: &[usize]) -> Vec<Range<usize>> {
        let mut chunks = Vec::new();
        let mut start  = 0usize;
        let mut tokens = 0usize;

        for (i, &count) in token_counts.iter().enumerate() {
            let units_in_chunk = i - start;
            let over_budget = units_in_chunk > 0
                && (units_in_chunk >= self.max_units || tokens + count > self.max_tokens);

            if over_budget {
                chunks.push(start..i);
                start  = i;
                tokens = 0;
            }
            tokens += count;
        }

        if start < token_counts.len() {
            chunks.push(start..token_counts.len());
        }
        chunks
    }

    /// Split `units` into chunks, keeping document order.
    pub fn chunk(&self, units: Vec<CorrectableUnit>) -> Vec<Vec<CorrectableUnit>> {
        let counts: Vec<usize> = units.iter().map(|u| word_count(&u.text())).collect();
        let plan = self.plan(&counts);

        let mut rest   = units.into_iter();
        plan.into_iter()
            .map(|range| rest.by_ref().take(range.len()).collect())
            .collect()
    }

    /// How many chunks `token_counts` would produce.
    pub fn num_chunks(&self, token_counts: &[usize]) -> usize {
        self.plan(token_counts).len()
    }
}
