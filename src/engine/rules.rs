// ============================================================
// Layer 5 — Local Rule Corrector
// ============================================================
// Deterministic, network-free fixes. Always the first stage
// after the cache because it is free and can't hallucinate.
//
// Two kinds of rules:
//   - Word replacements ("eror" → "errore"), whole-word and
//     case-preserving: "Eror" → "Errore", "EROR" → "ERRORE"
//   - Built-in typography: collapse runs of spaces between words
//     and drop the space before , ; : ! ?
//
// Replacement tables are plain JSON objects:
//   { "eror": "errore", "qual'è": "qual è" }
//
// Reference: regex crate docs (Unicode word boundaries)

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use crate::domain::traits::LocalRules;

static MULTI_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\S) {2,}").expect("Invalid multi-space regex"));

static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\S) +([,;:!?])").expect("Invalid space-before-punctuation regex"));

pub struct RuleSet {
    /// One alternation over every table key, longest first
    pattern:    Option<Regex>,
    /// Lower-cased key → replacement
    table:      HashMap<String, String>,
    typography: bool,
}

impl RuleSet {
    /// Built-in typography rules only.
    pub fn new() -> Self {
        Self { pattern: None, table: HashMap::new(), typography: true }
    }

    /// Built-ins plus a word-replacement table. All keys are matched
    /// in a single pass, so a replacement is never rewritten by
    /// another rule; at one position the longest key wins.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let table: HashMap<String, String> = map
            .iter()
            .map(|(from, to)| (from.to_lowercase(), to.clone()))
            .collect();
        if table.is_empty() {
            return Ok(Self::new());
        }

        let mut keys: Vec<&String> = table.keys().collect();
        keys.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
        let alternation: Vec<String> = keys.iter().map(|k| regex::escape(k)).collect();

        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation.join("|")))
            .context("Invalid replacement table")?;

        Ok(Self { pattern: Some(pattern), table, typography: true })
    }

    /// Load a replacement table from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read rules from '{}'", path.display()))?;
        let map: BTreeMap<String, String> = serde_json::from_str(&json)
            .with_context(|| format!("Rules file '{}' is not a JSON string map", path.display()))?;

        tracing::info!("Loaded {} replacement rules from '{}'", map.len(), path.display());
        Self::from_map(&map)
    }

    pub fn without_typography(mut self) -> Self {
        self.typography = false;
        self
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRules for RuleSet {
    fn apply(&self, text: &str) -> String {
        let mut out = match &self.pattern {
            Some(p) => p
                .replace_all(text, |caps: &Captures| {
                    let found = &caps[0];
                    match self.table.get(&found.to_lowercase()) {
                        Some(to) => match_case(found, to),
                        None     => found.to_string(),
                    }
                })
                .into_owned(),
            None => text.to_string(),
        };

        if self.typography {
            out = MULTI_SPACE.replace_all(&out, "$1 ").into_owned();
            out = SPACE_BEFORE_PUNCT.replace_all(&out, "$1$2").into_owned();
        }
        out
    }
}

/// Give `replacement` the capitalisation pattern of `found`.
fn match_case(found: &str, replacement: &str) -> String {
    let letters: Vec<char> = found.chars().filter(|c| c.is_alphabetic()).collect();
    let all_upper = letters.len() > 1 && letters.iter().all(|c| c.is_uppercase());
    if all_upper {
        return replacement.to_uppercase();
    }

    let starts_upper = found.chars().next().is_some_and(char::is_uppercase);
    if starts_upper {
        let mut chars = replacement.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None        => String::new(),
        };
    }
    replacement.to_string()
}
