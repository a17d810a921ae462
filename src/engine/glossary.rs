// ============================================================
// Layer 5 — Proper-Noun Glossary
// ============================================================
// Collects names (capitalised words that don't open a sentence)
// from every unit's ORIGINAL text. Two uses:
//
//   1. Guard: a candidate that drops or alters a name found in
//      the unit's own original text is rejected. Providers love
//      to "fix" surnames and brand names.
//   2. Output: the run exposes the accumulated glossary so
//      reporting can list the names the document uses.
//
// The guard only ever looks at the unit's own names, never the
// global set, so a unit's outcome can't depend on which chunk
// happened to finish first. The shared set is append-only.

use std::collections::BTreeSet;
use std::sync::RwLock;

use crate::engine::tokenizer::{tokenize, TokenKind};

#[derive(Default)]
pub struct Glossary {
    terms: RwLock<BTreeSet<String>>,
}

impl Glossary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every name in `terms`. Safe to call from many chunks
    /// at once; inserting an existing name is a no-op.
    pub fn record<'a>(&self, terms: impl IntoIterator<Item = &'a String>) {
        let mut set = self.terms.write().unwrap_or_else(|p| p.into_inner());
        for t in terms {
            if !set.contains(t) {
                set.insert(t.clone());
            }
        }
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.read().unwrap_or_else(|p| p.into_inner()).contains(term)
    }

    /// Sorted copy of every recorded name.
    pub fn snapshot(&self) -> Vec<String> {
        self.terms.read().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }
}

/// Capitalised, non-sentence-initial words of `text`.
pub fn proper_nouns(text: &str) -> BTreeSet<String> {
    let mut names          = BTreeSet::new();
    let mut sentence_start = true;

    for tok in tokenize(text) {
        match tok.kind {
            TokenKind::Word => {
                let mut chars = tok.text.chars();
                let capital   = chars.next().is_some_and(char::is_uppercase);
                // "IVA", "ONU": all-caps acronyms count too, single letters don't
                let long      = tok.text.chars().count() > 1;
                if capital && long && !sentence_start {
                    names.insert(tok.text.clone());
                }
                sentence_start = false;
            }
            TokenKind::Punct if matches!(tok.text.as_str(), "." | "!" | "?" | "…" | ":") => {
                sentence_start = true;
            }
            // A line break starts a new line of text, e.g. a heading
            TokenKind::Space if tok.text.contains('\n') => sentence_start = true,
            _ => {}
        }
    }
    names
}

/// True when every name in `names` still occurs as a word of
/// `candidate`.
pub fn preserves_names(names: &BTreeSet<String>, candidate: &str) -> bool {
    if names.is_empty() {
        return true;
    }
    let words: BTreeSet<String> = tokenize(candidate)
        .into_iter()
        .filter(|t| t.is_word())
        .map(|t| t.text)
        .collect();
    names.iter().all(|n| words.contains(n))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_after_line_break_is_not_a_name() {
        let names = proper_nouns("Indirizzo\nVia Garibaldi 3");
        assert!(!names.contains("Via"));
        assert!(names.contains("Garibaldi"));
    }

    #[test]
    fn test_sentence_initial_words_are_not_names() {
        let names = proper_nouns("Ieri Mario Rossi è andato a Roma. Oggi no.");
        let got: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(got, vec!["Mario", "Roma", "Rossi"]);
    }

    #[test]
    fn test_guard_detects_altered_name() {
        let names = proper_nouns("Il dottor Bianchi arriva.");
        assert!(preserves_names(&names, "Il dott. Bianchi arriva."));
        assert!(!preserves_names(&names, "Il dottor Bianco arriva."));
    }

    #[test]
    fn test_glossary_is_append_only_and_sorted() {
        let g = Glossary::new();
        g.record(&proper_nouns("Lo ha detto Verdi."));
        g.record(&proper_nouns("Lo ha detto Anna Verdi."));
        assert_eq!(g.snapshot(), vec!["Anna".to_string(), "Verdi".to_string()]);
        assert!(g.contains("Anna"));
    }
}
