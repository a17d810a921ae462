// ============================================================
// Layer 3 — Correctable Unit Domain Types
// ============================================================
// A CorrectableUnit is the smallest block of formatted text we
// correct as a whole: one Word paragraph (body, table cell,
// header, footer, footnote or text box).
//
// A unit owns an ordered list of FormattedRuns. Concatenating
// the run texts gives the unit's plain text, and that is the
// only thing providers ever see. Styling never leaves the unit:
// corrected text is poured back into the same runs.
//
//   CorrectableUnit  (id = part 0, paragraph 12)
//     ├── FormattedRun "Il progetto è stato "   (plain)
//     ├── FormattedRun "approvato"              (bold)
//     └── FormattedRun " ieri."                 (plain)
//
// Tabs and line breaks (`w:tab`, `w:br`, `w:cr`) are separator
// runs holding "\t" or "\n". They keep words apart in the plain
// text, but their content is fixed: corrected text may flow
// around them, never into or through them.
//
// Reference: Rust Book §5 (Structs), §10 (Derive Macros)

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── UnitId ───────────────────────────────────────────────────────────────────
/// Stable address of a unit: which container part it lives in
/// and its paragraph ordinal inside that part.
///
/// Ordering is (part, index), which is document order because the
/// loader numbers parts body-first. Modification logs are sorted
/// by this id so they read the same whatever order chunks finish in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId {
    pub part:  u16,
    pub index: u32,
}

impl UnitId {
    pub fn new(part: u16, index: u32) -> Self {
        Self { part, index }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.part, self.index)
    }
}

// ─── RunStyle ─────────────────────────────────────────────────────────────────
/// Character formatting carried by a run. Only what the engine
/// needs to reason about (e.g. in tests and logs); the container
/// keeps the full original markup untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStyle {
    pub bold:      bool,
    pub italic:    bool,
    pub underline: bool,
    /// Character style id (`w:rStyle`), if any
    pub style_id:  Option<String>,
    /// True when the run sits inside a hyperlink
    pub hyperlink: bool,
}

impl RunStyle {
    pub fn bold() -> Self {
        Self { bold: true, ..Self::default() }
    }

    pub fn italic() -> Self {
        Self { italic: true, ..Self::default() }
    }

    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}

// ─── FormattedRun ─────────────────────────────────────────────────────────────
/// A contiguous styled span of text inside exactly one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedRun {
    pub text:  String,
    pub style: RunStyle,
    /// Separator run (tab or line break); its text never changes
    #[serde(default)]
    pub fixed: bool,
}

impl FormattedRun {
    pub fn new(text: impl Into<String>, style: RunStyle) -> Self {
        Self { text: text.into(), style, fixed: false }
    }

    pub fn separator(text: impl Into<String>, style: RunStyle) -> Self {
        Self { text: text.into(), style, fixed: true }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, RunStyle::default())
    }
}

// ─── CorrectableUnit ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectableUnit {
    pub id:   UnitId,
    pub runs: Vec<FormattedRun>,
}

impl CorrectableUnit {
    pub fn new(id: UnitId, runs: Vec<FormattedRun>) -> Self {
        Self { id, runs }
    }

    /// The unit's plain text: every run concatenated, no separator.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// Replace every run's text at once. The new texts must line up
    /// with the existing runs one-to-one; styles are never touched.
    pub fn set_run_texts(&mut self, texts: Vec<String>) {
        debug_assert_eq!(texts.len(), self.runs.len());
        for (run, text) in self.runs.iter_mut().zip(texts) {
            run.text = text;
        }
    }

    pub fn run_texts(&self) -> Vec<String> {
        self.runs.iter().map(|r| r.text.clone()).collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_concatenates_runs() {
        let unit = CorrectableUnit::new(
            UnitId::new(0, 3),
            vec![
                FormattedRun::plain("Questo è "),
                FormattedRun::new("un", RunStyle::bold()),
                FormattedRun::plain(" test."),
            ],
        );
        assert_eq!(unit.text(), "Questo è un test.");
    }

    #[test]
    fn test_unit_ids_sort_in_document_order() {
        let mut ids = vec![UnitId::new(1, 0), UnitId::new(0, 7), UnitId::new(0, 2)];
        ids.sort();
        assert_eq!(ids, vec![UnitId::new(0, 2), UnitId::new(0, 7), UnitId::new(1, 0)]);
    }

    #[test]
    fn test_separator_runs_join_words() {
        let unit = CorrectableUnit::new(
            UnitId::new(0, 1),
            vec![
                FormattedRun::plain("Capitolo"),
                FormattedRun::separator("\t", RunStyle::default()),
                FormattedRun::plain("primo"),
            ],
        );
        assert_eq!(unit.text(), "Capitolo\tprimo");
        assert!(unit.runs[1].fixed && !unit.runs[0].fixed);
    }

    #[test]
    fn test_set_run_texts_keeps_styles() {
        let mut unit = CorrectableUnit::new(
            UnitId::new(0, 0),
            vec![FormattedRun::new("a", RunStyle::italic()), FormattedRun::plain("b")],
        );
        unit.set_run_texts(vec!["x".into(), "".into()]);
        assert_eq!(unit.runs[0].style, RunStyle::italic());
        assert_eq!(unit.text(), "x");
    }
}
