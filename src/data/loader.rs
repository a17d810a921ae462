// ============================================================
// Layer 4 — Unit Loader
// ============================================================
// Turns the XML parts of a .docx package into CorrectableUnits
// and, after correction, writes the units' run texts back.
//
// How units map onto WordprocessingML:
//
//   word/document.xml                      part ordinal 0
//     └── w:p (body, table cell, text box) → one unit
//           └── w:r / w:t                  → one FormattedRun
//           └── w:r / w:tab, w:br, w:cr    → one separator run
//   word/header1.xml, … footer1.xml, …     ordinals 1, 2, …
//   word/footnotes.xml, endnotes.xml       loaded in a second pass,
//                                          ordinals continue
//
// Part ordinals and paragraph ordinals form the UnitId, so ids
// sort in document order and stay unique across both passes.
//
// Skipped paragraphs (equations, mc:Fallback copies, runaway
// nesting, text shorter than `min_unit_chars`) never become units
// and are therefore never rewritten.
//
// Write-back is per part and atomic: a part is replaced in the
// package only if its edited form serialises and parses again.
// Otherwise the original part stays and a warning is logged.
//
// Reference: ECMA-376 Part 1 §17.3 (Paragraphs and Runs)
//            Rust Book §8 (Collections)

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::data::package::{DocxPackage, DOCUMENT_PART, ENDNOTES_PART, FOOTNOTES_PART};
use crate::data::xml_part::{ParagraphInfo, XmlPart, MAX_PARAGRAPH_DEPTH};
use crate::domain::unit::{CorrectableUnit, FormattedRun, UnitId};

/// Where a unit's runs live: `(event index, text as loaded, fixed)`.
type NodeMap = BTreeMap<u32, Vec<(usize, String, bool)>>;

struct LoadedPart {
    ordinal: u16,
    xml:     XmlPart,
    nodes:   NodeMap,
}

/// What a write-back did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteBack {
    pub replaced: usize,
    pub kept:     usize,
}

pub struct DocxLoader {
    min_unit_chars: usize,
    parts:          Vec<LoadedPart>,
}

impl DocxLoader {
    pub fn new(min_unit_chars: usize) -> Self {
        Self { min_unit_chars, parts: Vec::new() }
    }

    /// Body, then headers, then footers.
    pub fn main_parts(package: &DocxPackage) -> Vec<String> {
        let mut names = vec![DOCUMENT_PART.to_string()];
        names.extend(package.header_footer_parts());
        names
    }

    /// Footnotes and endnotes, when the package has them.
    pub fn note_parts(package: &DocxPackage) -> Vec<String> {
        [FOOTNOTES_PART, ENDNOTES_PART]
            .into_iter()
            .filter(|n| package.contains(n))
            .map(String::from)
            .collect()
    }

    /// Parse `names` from the package and enumerate their units in
    /// document order. May be called again for a second pass.
    pub fn load(&mut self, package: &DocxPackage, names: &[String]) -> Result<Vec<CorrectableUnit>> {
        let mut units = Vec::new();

        for name in names {
            let Some(bytes) = package.part(name) else {
                tracing::warn!(part = %name, "Part listed but missing from package; skipped");
                continue;
            };
            let xml     = XmlPart::parse(name, bytes).with_context(|| format!("Cannot parse part '{name}'"))?;
            let ordinal = u16::try_from(self.parts.len()).context("Too many parts in one package")?;

            let mut nodes = NodeMap::new();
            let before    = units.len();
            for (index, paragraph) in xml.scan().paragraphs.iter().enumerate() {
                if !self.admit(name, paragraph) {
                    continue;
                }
                let index = u32::try_from(index).context("Too many paragraphs in one part")?;
                let runs  = paragraph
                    .nodes
                    .iter()
                    .map(|n| {
                        if n.fixed {
                            FormattedRun::separator(n.text.clone(), n.style.clone())
                        } else {
                            FormattedRun::new(n.text.clone(), n.style.clone())
                        }
                    })
                    .collect();
                nodes.insert(index, paragraph.nodes.iter().map(|n| (n.event, n.text.clone(), n.fixed)).collect());
                units.push(CorrectableUnit::new(UnitId::new(ordinal, index), runs));
            }

            tracing::debug!(part = %name, ordinal, units = units.len() - before, "Enumerated part");
            self.parts.push(LoadedPart { ordinal, xml, nodes });
        }

        Ok(units)
    }

    fn admit(&self, part: &str, paragraph: &ParagraphInfo) -> bool {
        if paragraph.in_fallback || paragraph.nodes.is_empty() {
            return false;
        }
        if paragraph.has_math {
            tracing::warn!(part, event = paragraph.start, "Paragraph contains an equation; skipped");
            return false;
        }
        if paragraph.depth > MAX_PARAGRAPH_DEPTH {
            tracing::warn!(part, depth = paragraph.depth, "Paragraph nested too deeply; skipped");
            return false;
        }
        paragraph.text().trim().chars().count() >= self.min_unit_chars
    }

    /// Record the units' run texts against their parts. Returns how
    /// many units actually changed.
    pub fn apply(&mut self, units: &[CorrectableUnit]) -> usize {
        let mut changed = 0;

        for unit in units {
            let Some(part) = self.parts.iter_mut().find(|p| p.ordinal == unit.id.part) else {
                tracing::warn!(unit = %unit.id, "Unit refers to an unknown part; ignored");
                continue;
            };
            let Some(nodes) = part.nodes.get(&unit.id.index) else {
                tracing::warn!(unit = %unit.id, "Unit refers to an unknown paragraph; ignored");
                continue;
            };
            if nodes.len() != unit.runs.len() {
                tracing::warn!(unit = %unit.id, "Run count changed since loading; unit left as is");
                continue;
            }
            if nodes.iter().zip(&unit.runs).any(|((_, loaded, fixed), run)| *fixed && *loaded != run.text) {
                tracing::warn!(unit = %unit.id, "Tab or break text changed; unit left as is");
                continue;
            }

            let mut touched = false;
            for ((event, loaded, _), run) in nodes.iter().zip(&unit.runs) {
                if *loaded != run.text {
                    part.xml.set_text(*event, run.text.clone());
                    touched = true;
                }
            }
            changed += usize::from(touched);
        }
        changed
    }

    /// The loaded part called `name`, for structural post-passes.
    pub fn part_mut(&mut self, name: &str) -> Option<&mut XmlPart> {
        self.parts.iter_mut().find(|p| p.xml.name() == name).map(|p| &mut p.xml)
    }

    /// Splice every modified part back into `package`.
    pub fn write_back(&self, package: &mut DocxPackage) -> Result<WriteBack> {
        let mut outcome = WriteBack::default();

        for part in self.parts.iter().filter(|p| p.xml.is_modified()) {
            match part.xml.to_checked_bytes() {
                Ok(bytes) => {
                    package.replace_part(part.xml.name(), bytes)?;
                    outcome.replaced += 1;
                }
                Err(e) => {
                    tracing::warn!(part = %part.xml.name(), error = %e, "Edited part rejected; original kept");
                    outcome.kept += 1;
                }
            }
        }

        tracing::info!(replaced = outcome.replaced, kept = outcome.kept, "Parts written back");
        Ok(outcome)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::package::build_docx;

    const FOOTNOTES: &str = r#"<?xml version="1.0"?><w:footnotes xmlns:w="w"><w:footnote w:id="1"><w:p><w:r><w:t>Una nota con un eror.</w:t></w:r></w:p></w:footnote></w:footnotes>"#;
    const HEADER: &str = r#"<?xml version="1.0"?><w:hdr xmlns:w="w"><w:p><w:r><w:t>Intestazione</w:t></w:r></w:p></w:hdr>"#;

    fn package() -> DocxPackage {
        let body = concat!(
            r#"<w:p><w:r><w:t>Primo paragrafo.</w:t></w:r></w:p>"#,
            r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Cella</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
            r#"<w:p><m:oMath><m:r><m:t>x</m:t></m:r></m:oMath><w:r><w:t>formula</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>a</w:t></w:r></w:p>"#,
        );
        DocxPackage::from_bytes(&build_docx(body, &[("word/header1.xml", HEADER), (FOOTNOTES_PART, FOOTNOTES)])).unwrap()
    }

    #[test]
    fn test_enumeration_order_and_skips() {
        let pkg = package();
        let mut loader = DocxLoader::new(2);
        let units = loader.load(&pkg, &DocxLoader::main_parts(&pkg)).unwrap();

        let texts: Vec<String> = units.iter().map(|u| u.text()).collect();
        assert_eq!(texts, vec!["Primo paragrafo.", "Cella", "Intestazione"]);
        assert_eq!(units[2].id.part, 1);

        let notes = loader.load(&pkg, &DocxLoader::note_parts(&pkg)).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id.part, 2);
    }

    #[test]
    fn test_apply_and_write_back() {
        let mut pkg = package();
        let mut loader = DocxLoader::new(2);
        let mut notes = loader.load(&pkg, &DocxLoader::note_parts(&pkg)).unwrap();

        notes[0].set_run_texts(vec!["Una nota con un errore.".into()]);
        assert_eq!(loader.apply(&notes), 1);
        let written = loader.write_back(&mut pkg).unwrap();
        assert_eq!(written, WriteBack { replaced: 1, kept: 0 });

        let mut again = DocxLoader::new(2);
        let reloaded = again.load(&pkg, &DocxLoader::note_parts(&pkg)).unwrap();
        assert_eq!(reloaded[0].text(), "Una nota con un errore.");
    }

    #[test]
    fn test_separators_are_loaded_and_never_rewritten() {
        let body = r#"<w:p><w:r><w:t>Capitolo</w:t><w:tab/><w:t>primo del libro.</w:t></w:r></w:p>"#;
        let mut pkg    = DocxPackage::from_bytes(&build_docx(body, &[])).unwrap();
        let mut loader = DocxLoader::new(2);
        let mut units  = loader.load(&pkg, &[DOCUMENT_PART.to_string()]).unwrap();

        assert_eq!(units[0].text(), "Capitolo\tprimo del libro.");
        assert!(units[0].runs[1].fixed);

        // A rewritten separator leaves the whole unit alone
        units[0].set_run_texts(vec!["Capitolo".into(), " ".into(), "primo del libro.".into()]);
        assert_eq!(loader.apply(&units), 0);

        units[0].set_run_texts(vec!["Capitolo".into(), "\t".into(), "primo del libro!".into()]);
        assert_eq!(loader.apply(&units), 1);
        loader.write_back(&mut pkg).unwrap();

        let xml = String::from_utf8(pkg.part(DOCUMENT_PART).unwrap().to_vec()).unwrap();
        assert!(xml.contains("<w:t>Capitolo</w:t><w:tab/>"));
        assert!(xml.contains("primo del libro!</w:t>"));
    }

    #[test]
    fn test_unchanged_units_leave_parts_untouched() {
        let mut pkg = package();
        let before = pkg.part(DOCUMENT_PART).unwrap().to_vec();
        let mut loader = DocxLoader::new(2);
        let units = loader.load(&pkg, &DocxLoader::main_parts(&pkg)).unwrap();

        assert_eq!(loader.apply(&units), 0);
        assert_eq!(loader.write_back(&mut pkg).unwrap().replaced, 0);
        assert_eq!(pkg.part(DOCUMENT_PART).unwrap(), before.as_slice());
    }
}
