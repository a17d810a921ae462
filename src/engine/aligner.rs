// ============================================================
// Layer 5 — Diff Aligner
// ============================================================
// Computes an edit script between an original and a corrected
// token sequence, then turns it into one AlignmentEntry per
// corrected token saying which original token it came from.
//
// Edit script (LCS based, like `diff`):
//   Equal   — same tokens on both sides
//   Replace — a block of original tokens became other tokens
//   Insert  — corrected tokens with no original counterpart
//   Delete  — original tokens that disappeared
//
// Origin rules:
//   Equal / Replace → the original token at the same position
//                     (extra replacement tokens reuse the last one)
//   Insert          → the nearest PRECEDING kept token's origin;
//                     a leading insertion has no origin (None)
//   Delete          → produces no entry at all
//
// Common prefix and suffix are stripped before the LCS table is
// built, so the quadratic part only covers the edited middle.
// If the middle is still huge it is treated as a single Replace.
//
// Reference: Hunt & McIlroy (1976), "An Algorithm for
//            Differential File Comparison"

use std::ops::Range;

use crate::engine::tokenizer::Token;

/// Upper bound on LCS table cells for one alignment.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Equal,
    Replace,
    Insert,
    Delete,
}

/// One block of the edit script, as ranges into both sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opcode {
    pub op:        EditOp,
    pub original:  Range<usize>,
    pub corrected: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentEntry {
    /// Index of the original token this corrected token inherits
    /// its position from; None only for a leading insertion
    pub origin: Option<usize>,
    /// Index of the corrected token (entries are in this order)
    pub corrected_index: usize,
    pub op: EditOp,
}

// ─── Edit script ──────────────────────────────────────────────────────────────

/// Edit script between two sequences of comparable items.
pub fn opcodes<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Opcode> {
    // ── Strip common prefix / suffix ──────────────────────────────────────────
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = prefix..a.len() - suffix;
    let b_mid = prefix..b.len() - suffix;

    // ── Matched pairs for the middle ──────────────────────────────────────────
    let n = a_mid.len();
    let m = b_mid.len();
    let mut pairs: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();

    if n > 0 && m > 0 && (n + 1).saturating_mul(m + 1) <= MAX_LCS_CELLS {
        pairs.extend(
            lcs_pairs(&a[a_mid.clone()], &b[b_mid.clone()])
                .into_iter()
                .map(|(i, j)| (i + prefix, j + prefix)),
        );
    }

    pairs.extend((0..suffix).map(|k| (a.len() - suffix + k, b.len() - suffix + k)));

    group_pairs(&pairs, a.len(), b.len())
}

/// Longest common subsequence as matched index pairs.
/// Ties prefer advancing in `a` first, which keeps output stable.
fn lcs_pairs<T: PartialEq>(a: &[T], b: &[T]) -> Vec<(usize, usize)> {
    let n    = a.len();
    let m    = b.len();
    let cols = m + 1;

    // table[i * cols + j] = LCS length of a[i..] and b[j..]
    let mut table = vec![0u32; (n + 1) * cols];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * cols + j] = if a[i] == b[j] {
                table[(i + 1) * cols + j + 1] + 1
            } else {
                table[(i + 1) * cols + j].max(table[i * cols + j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[0] as usize);
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * cols + j] >= table[i * cols + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

/// Turn strictly increasing matched pairs into opcodes.
fn group_pairs(pairs: &[(usize, usize)], a_len: usize, b_len: usize) -> Vec<Opcode> {
    let mut ops = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);

    let push_gap = |ops: &mut Vec<Opcode>, i: usize, ai: usize, j: usize, bj: usize| {
        let op = match (ai > i, bj > j) {
            (true, true)   => EditOp::Replace,
            (true, false)  => EditOp::Delete,
            (false, true)  => EditOp::Insert,
            (false, false) => return,
        };
        ops.push(Opcode { op, original: i..ai, corrected: j..bj });
    };

    for &(pi, pj) in pairs {
        push_gap(&mut ops, i, pi, j, pj);
        match ops.last_mut() {
            Some(last) if last.op == EditOp::Equal
                && last.original.end == pi
                && last.corrected.end == pj =>
            {
                last.original.end  += 1;
                last.corrected.end += 1;
            }
            _ => ops.push(Opcode {
                op:        EditOp::Equal,
                original:  pi..pi + 1,
                corrected: pj..pj + 1,
            }),
        }
        i = pi + 1;
        j = pj + 1;
    }
    push_gap(&mut ops, i, a_len, j, b_len);

    ops
}

/// Edit script over token texts.
pub fn token_opcodes(original: &[Token], corrected: &[Token]) -> Vec<Opcode> {
    let a: Vec<&str> = original.iter().map(|t| t.text.as_str()).collect();
    let b: Vec<&str> = corrected.iter().map(|t| t.text.as_str()).collect();
    opcodes(&a, &b)
}

// ─── Alignment ────────────────────────────────────────────────────────────────

/// Align every corrected token to an original position.
/// Output has exactly one entry per corrected token, in order.
pub fn align(original: &[Token], corrected: &[Token]) -> Vec<AlignmentEntry> {
    let mut entries     = Vec::with_capacity(corrected.len());
    let mut last_origin = None;

    for code in token_opcodes(original, corrected) {
        match code.op {
            EditOp::Equal => {
                for (k, j) in code.corrected.clone().enumerate() {
                    let origin = code.original.start + k;
                    last_origin = Some(origin);
                    entries.push(AlignmentEntry { origin: Some(origin), corrected_index: j, op: EditOp::Equal });
                }
            }
            EditOp::Replace => {
                let last = code.original.len() - 1;
                for (k, j) in code.corrected.clone().enumerate() {
                    let origin = code.original.start + k.min(last);
                    last_origin = Some(origin);
                    entries.push(AlignmentEntry { origin: Some(origin), corrected_index: j, op: EditOp::Replace });
                }
            }
            EditOp::Insert => {
                for j in code.corrected.clone() {
                    entries.push(AlignmentEntry { origin: last_origin, corrected_index: j, op: EditOp::Insert });
                }
            }
            EditOp::Delete => {}
        }
    }

    entries
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tokenizer::tokenize;
    use proptest::prelude::*;

    fn ops_of(a: &str, b: &str) -> Vec<EditOp> {
        token_opcodes(&tokenize(a), &tokenize(b)).iter().map(|o| o.op).collect()
    }

    #[test]
    fn test_single_word_replace() {
        let ops = ops_of("un eror qui", "un errore qui");
        assert_eq!(ops, vec![EditOp::Equal, EditOp::Replace, EditOp::Equal]);
    }

    #[test]
    fn test_identical_is_one_equal_block() {
        assert_eq!(ops_of("uguale.", "uguale."), vec![EditOp::Equal]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(ops_of("", "nuovo testo"), vec![EditOp::Insert]);
        assert_eq!(ops_of("vecchio testo", ""), vec![EditOp::Delete]);
        assert!(ops_of("", "").is_empty());
        assert!(align(&tokenize("abc"), &[]).is_empty());
    }

    #[test]
    fn test_insert_inherits_preceding_origin() {
        let orig = tokenize("a b");
        let corr = tokenize("a x b");
        let entries = align(&orig, &corr);
        // corr tokens: "a" " " "x" " " "b" ; orig: "a" " " "b"
        let x = entries.iter().find(|e| e.corrected_index == 2).unwrap();
        assert_eq!(x.op, EditOp::Insert);
        assert_eq!(x.origin, Some(1));
    }

    #[test]
    fn test_leading_insert_has_no_origin() {
        let entries = align(&tokenize("b"), &tokenize("a b"));
        assert_eq!(entries[0].origin, None);
        assert_eq!(entries[0].op, EditOp::Insert);
        assert_eq!(entries.last().unwrap().origin, Some(0));
    }

    #[test]
    fn test_insert_after_delete_attaches_to_kept_token() {
        // "b" is deleted, "z" is inserted in a separate block afterwards
        let orig = tokenize("a b c");
        let corr = tokenize("a c z");
        let entries = align(&orig, &corr);
        let z = entries.iter().find(|e| e.corrected_index == corr.len() - 1).unwrap();
        assert_eq!(z.origin, Some(orig.len() - 1));
    }

    #[test]
    fn test_huge_middle_falls_back_to_replace() {
        let a: Vec<u32> = (0..3000).collect();
        let b: Vec<u32> = (5000..8000).collect();
        let ops = opcodes(&a, &b);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, EditOp::Replace);
    }

    proptest! {
        #[test]
        fn prop_every_corrected_token_aligned_once(a in "[a-c ,.]{0,40}", b in "[a-c ,.]{0,40}") {
            let orig = tokenize(&a);
            let corr = tokenize(&b);
            let entries = align(&orig, &corr);
            prop_assert_eq!(entries.len(), corr.len());
            for (k, e) in entries.iter().enumerate() {
                prop_assert_eq!(e.corrected_index, k);
                if let Some(o) = e.origin {
                    prop_assert!(o < orig.len());
                }
            }
        }

        #[test]
        fn prop_opcodes_cover_both_sequences(a in "[a-c ]{0,30}", b in "[a-c ]{0,30}") {
            let orig = tokenize(&a);
            let corr = tokenize(&b);
            let ops = token_opcodes(&orig, &corr);
            let (mut i, mut j) = (0, 0);
            for op in &ops {
                prop_assert_eq!(op.original.start, i);
                prop_assert_eq!(op.corrected.start, j);
                i = op.original.end;
                j = op.corrected.end;
            }
            prop_assert_eq!(i, orig.len());
            prop_assert_eq!(j, corr.len());
        }
    }
}
