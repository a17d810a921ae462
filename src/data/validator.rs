// ============================================================
// Layer 4 — Document Validator
// ============================================================
// Structural checks run on the whole .docx before a correction
// pass and again on the output:
//
//   1. the bytes are a readable ZIP archive
//   2. [Content_Types].xml and word/document.xml are present
//   3. every .xml / .rels member is well-formed XML
//   4. docx-rs accepts the package as a Word document
//
// The validator never fails: problems come back as issues in the
// report, and the caller decides what they mean.
//
// Reference: docx-rs crate documentation
//            ECMA-376 Part 2 (Open Packaging Conventions)

use quick_xml::{events::Event, Reader};

use crate::data::package::{DocxPackage, CONTENT_TYPES_PART, DOCUMENT_PART};
use crate::domain::traits::{DocumentValidator, ValidationReport};

#[derive(Debug, Clone, Copy, Default)]
pub struct DocxValidator;

impl DocxValidator {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentValidator for DocxValidator {
    fn validate(&self, document: &[u8]) -> ValidationReport {
        let mut issues = Vec::new();

        // ── Step 1: container ─────────────────────────────────────────────────
        let package = match DocxPackage::from_bytes(document) {
            Ok(p)  => p,
            Err(e) => return ValidationReport::from_issues(vec![format!("unreadable container: {e:#}")]),
        };

        // ── Step 2: required members ──────────────────────────────────────────
        for required in [CONTENT_TYPES_PART, DOCUMENT_PART] {
            if !package.contains(required) {
                issues.push(format!("missing required part '{required}'"));
            }
        }

        // ── Step 3: well-formed XML ───────────────────────────────────────────
        for name in package.names().filter(|n| n.ends_with(".xml") || n.ends_with(".rels")) {
            if let Some(bytes) = package.part(name) {
                if let Err(e) = check_well_formed(bytes) {
                    issues.push(format!("part '{name}' is not well-formed: {e}"));
                }
            }
        }

        // ── Step 4: Word-level parse ──────────────────────────────────────────
        if issues.is_empty() {
            if let Err(e) = docx_rs::read_docx(document) {
                issues.push(format!("docx-rs rejected the document: {e:?}"));
            }
        }

        for issue in &issues {
            tracing::debug!(%issue, "Validation issue");
        }
        ValidationReport::from_issues(issues)
    }
}

fn check_well_formed(bytes: &[u8]) -> Result<(), String> {
    let xml = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8 ({e})"))?;
    let mut reader = Reader::from_str(xml);
    reader.check_end_names(true);

    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_))   => depth = depth.saturating_sub(1),
            Ok(Event::Eof)      => break,
            Ok(_)               => {}
            Err(e)              => return Err(format!("{e} at byte {}", reader.buffer_position())),
        }
    }

    if depth == 0 {
        Ok(())
    } else {
        Err(format!("{depth} unclosed element(s)"))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::package::build_docx;

    #[test]
    fn test_well_formed_document_passes() {
        let report = DocxValidator::new().validate(&build_docx(r#"<w:p><w:r><w:t>Ciao</w:t></w:r></w:p>"#, &[]));
        assert!(report.ok, "{:?}", report.issues);
    }

    #[test]
    fn test_garbage_is_reported_not_raised() {
        let report = DocxValidator::new().validate(b"PK but not really");
        assert!(!report.ok);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn test_broken_member_is_reported() {
        let bytes = build_docx("<w:p/>", &[("word/header1.xml", "<w:hdr><w:p></w:hdr>")]);
        let report = DocxValidator::new().validate(&bytes);
        assert!(!report.ok);
        assert!(report.issues.iter().any(|i| i.contains("word/header1.xml")));
    }

    #[test]
    fn test_missing_document_part_is_reported() {
        let bytes = {
            use std::io::Write;
            let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
            let opts  = zip::write::SimpleFileOptions::default();
            w.start_file(CONTENT_TYPES_PART, opts).unwrap();
            w.write_all(b"<Types/>").unwrap();
            w.finish().unwrap().into_inner()
        };
        let report = DocxValidator::new().validate(&bytes);
        assert!(!report.ok);
        assert!(report.issues.iter().any(|i| i.contains(DOCUMENT_PART)));
    }
}
