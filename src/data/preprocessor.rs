// ============================================================
// Layer 4 — Text Preprocessor
// ============================================================
// Normalises text around provider calls.
//
// Providers (especially language models) like to "help":
//   - straight quotes come back as typographic quotes
//   - a paragraph comes back with a trailing newline
//   - merged tokens get an internal line break
//
// None of that was in the source paragraph, and a Word run has
// no business containing a bare newline. `harmonize` undoes
// exactly the artefacts that the ORIGINAL text did not have,
// and leaves alone anything the original already used.
//
// The same module builds cache keys: a key is the text with
// Unicode composed (NFC), whitespace collapsed and quotes
// straightened, so trivially different copies of a paragraph
// share one cache slot.
//
// Cleaning steps for `harmonize` (applied in order):
//   1. Map typographic double/single quotes to straight ones
//      when the original has no typographic quotes of that kind
//   2. Replace line breaks with a space when the original had none
//   3. Collapse doubled spaces created by step 2 (only if the
//      original had no doubled spaces)
//   4. Drop leading/trailing whitespace the original didn't have
//
// Reference: Rust Book §8 (Strings in Rust)
//            Unicode Standard Annex #15 (Normalization Forms)

use unicode_normalization::UnicodeNormalization;

const CURLY_DOUBLE: [char; 4] = ['\u{201C}', '\u{201D}', '\u{201E}', '\u{00AB}'];
const CURLY_DOUBLE_CLOSE: char = '\u{00BB}';
const CURLY_SINGLE: [char; 3] = ['\u{2018}', '\u{2019}', '\u{201A}'];

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Remove formatting artefacts that `corrected` introduced
    /// relative to `original`.
    pub fn harmonize(&self, original: &str, corrected: &str) -> String {
        // ── Step 1: quotation marks ───────────────────────────────────────────
        let orig_has_curly_double = original.chars().any(is_curly_double);
        let orig_has_curly_single = original.chars().any(|c| CURLY_SINGLE.contains(&c));

        let step1: String = corrected
            .chars()
            .map(|c| match c {
                c if is_curly_double(c) && !orig_has_curly_double => '"',
                c if CURLY_SINGLE.contains(&c) && !orig_has_curly_single => '\'',
                c => c,
            })
            .collect();

        // ── Step 2: internal line breaks ──────────────────────────────────────
        let orig_has_breaks = original.contains(['\n', '\r', '\u{2028}']);
        let step2 = if orig_has_breaks {
            step1
        } else {
            step1.replace("\r\n", " ").replace(['\n', '\r', '\u{2028}'], " ")
        };

        // ── Step 3: doubled spaces created by step 2 ──────────────────────────
        let step3 = if original.contains("  ") || orig_has_breaks {
            step2
        } else {
            collapse_spaces(&step2)
        };

        // ── Step 4: edge whitespace ───────────────────────────────────────────
        let lead_ok  = original.starts_with(char::is_whitespace);
        let trail_ok = original.ends_with(char::is_whitespace);
        let mut out  = step3.as_str();
        if !lead_ok {
            out = out.trim_start();
        }
        if !trail_ok {
            out = out.trim_end();
        }
        out.to_string()
    }

    /// Cache key for a paragraph text.
    pub fn cache_key(&self, text: &str) -> String {
        let composed: String = text
            .nfc()
            .map(|c| match c {
                c if is_curly_double(c) => '"',
                c if CURLY_SINGLE.contains(&c) => '\'',
                c if c.is_whitespace() => ' ',
                c => c,
            })
            .collect();
        collapse_spaces(composed.trim())
    }

    /// True when two texts differ only in whitespace, quote style
    /// or Unicode composition.
    pub fn materially_equal(&self, a: &str, b: &str) -> bool {
        self.cache_key(a) == self.cache_key(b)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_curly_double(c: char) -> bool {
    CURLY_DOUBLE.contains(&c) || c == CURLY_DOUBLE_CLOSE
}

/// True for a non-empty string made only of quotation marks
/// (straight or typographic) and whitespace.
pub fn is_quote_only(s: &str) -> bool {
    let mut saw_quote = false;
    for c in s.chars() {
        if c == '"' || c == '\'' || is_curly_double(c) || CURLY_SINGLE.contains(&c) {
            saw_quote = true;
        } else if !c.is_whitespace() {
            return false;
        }
    }
    saw_quote
}

fn collapse_spaces(s: &str) -> String {
    let mut out        = String::with_capacity(s.len());
    let mut last_space = false;
    for c in s.chars() {
        if c == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curly_quotes_straightened_when_original_is_straight() {
        let p = Preprocessor::new();
        let out = p.harmonize("Disse \"ciao\".", "Disse \u{201C}ciao\u{201D}.");
        assert_eq!(out, "Disse \"ciao\".");
    }

    #[test]
    fn test_curly_quotes_kept_when_original_uses_them() {
        let p = Preprocessor::new();
        let corrected = "Disse \u{201C}ciao\u{201D}.";
        assert_eq!(p.harmonize("Disse \u{201C}cia\u{201D}.", corrected), corrected);
    }

    #[test]
    fn test_introduced_line_breaks_become_spaces() {
        let p = Preprocessor::new();
        assert_eq!(p.harmonize("Uno due tre.", "Uno due\ntre.\n"), "Uno due tre.");
        assert_eq!(p.harmonize("Uno due.", "Uno \n due."), "Uno due.");
    }

    #[test]
    fn test_existing_line_breaks_are_kept() {
        let p = Preprocessor::new();
        assert_eq!(p.harmonize("Uno\ndue", "Uno\ndue!"), "Uno\ndue!");
    }

    #[test]
    fn test_original_edge_whitespace_is_kept() {
        let p = Preprocessor::new();
        assert_eq!(p.harmonize(" testo ", " test0 "), " test0 ");
    }

    #[test]
    fn test_cache_key_normalises() {
        let p = Preprocessor::new();
        assert_eq!(p.cache_key("  Il  \u{201C}caso\u{201D}\t"), "Il \"caso\"");
        assert_eq!(p.cache_key("e\u{0300}"), "è");
        assert!(p.materially_equal("a  b", "a b"));
        assert!(!p.materially_equal("a b", "a c"));
    }

    #[test]
    fn test_is_quote_only() {
        assert!(is_quote_only("\u{201D}"));
        assert!(is_quote_only(" \" "));
        assert!(!is_quote_only(""));
        assert!(!is_quote_only("\"a"));
    }
}
