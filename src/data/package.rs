// ============================================================
// Layer 4 — .docx Package
// ============================================================
// A .docx file is a ZIP archive of XML "parts":
//
//   [Content_Types].xml
//   _rels/.rels
//   word/document.xml      ← body, tables, text boxes
//   word/header1.xml …     ← headers
//   word/footer1.xml …     ← footers
//   word/footnotes.xml     ← footnotes (second pass)
//   word/endnotes.xml      ← endnotes  (second pass)
//   word/styles.xml, media, …
//
// DocxPackage keeps every member in its original order. Members
// we never touch are written back byte-for-byte; only replaced
// parts get re-serialised.
//
// Reference: ECMA-376 Part 2 (Open Packaging Conventions)
//            zip crate documentation

use anyhow::{bail, Context, Result};
use std::{
    fs,
    io::{Cursor, Read, Write},
    path::Path,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

pub const DOCUMENT_PART: &str      = "word/document.xml";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const FOOTNOTES_PART: &str     = "word/footnotes.xml";
pub const ENDNOTES_PART: &str      = "word/endnotes.xml";

#[derive(Debug, Clone)]
struct PackageEntry {
    name:    String,
    data:    Vec<u8>,
    stored:  bool,
    is_dir:  bool,
}

#[derive(Debug, Clone, Default)]
pub struct DocxPackage {
    entries: Vec<PackageEntry>,
}

impl DocxPackage {
    /// Read a package from raw .docx bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).context("Not a ZIP archive")?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .with_context(|| format!("Cannot read ZIP member #{i}"))?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("Cannot decompress '{}'", file.name()))?;

            entries.push(PackageEntry {
                name:   file.name().to_string(),
                stored: file.compression() == CompressionMethod::Stored,
                is_dir: file.is_dir(),
                data,
            });
        }

        Ok(Self { entries })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("Cannot read '{}'", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("'{}' is not a valid .docx package", path.display()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.data.as_slice())
    }

    /// Replace the content of an existing part.
    pub fn replace_part(&mut self, name: &str, data: Vec<u8>) -> Result<()> {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.data = data;
                Ok(())
            }
            None => bail!("Package has no part named '{name}'"),
        }
    }

    /// Header parts followed by footer parts, each sorted by name.
    pub fn header_footer_parts(&self) -> Vec<String> {
        let mut headers: Vec<String> = self.names().filter(|n| is_part(n, "word/header")).map(String::from).collect();
        let mut footers: Vec<String> = self.names().filter(|n| is_part(n, "word/footer")).map(String::from).collect();
        headers.sort();
        footers.sort();
        headers.extend(footers);
        headers
    }

    /// Serialise the package back to .docx bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for entry in &self.entries {
            let method  = if entry.stored { CompressionMethod::Stored } else { CompressionMethod::Deflated };
            let options = SimpleFileOptions::default().compression_method(method);

            if entry.is_dir {
                writer.add_directory(entry.name.as_str(), options)
                    .with_context(|| format!("Cannot write directory '{}'", entry.name))?;
                continue;
            }
            writer.start_file(entry.name.as_str(), options)
                .with_context(|| format!("Cannot start member '{}'", entry.name))?;
            writer.write_all(&entry.data)
                .with_context(|| format!("Cannot write member '{}'", entry.name))?;
        }

        let cursor = writer.finish().context("Cannot finalise ZIP archive")?;
        Ok(cursor.into_inner())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes).with_context(|| format!("Cannot write '{}'", path.display()))
    }
}

fn is_part(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix) && name.ends_with(".xml") && !name.contains("/_rels/")
}

// ─── Test fixtures ────────────────────────────────────────────────────────────
/// Minimal .docx bytes for tests: the given document body plus
/// any extra `(name, xml)` members.
#[cfg(test)]
pub(crate) fn build_docx(body_xml: &str, extra: &[(&str, &str)]) -> Vec<u8> {
    let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;
    let rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;
    let document_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:mc="http://schemas.openxmlformats.org/markup-compatibility/2006" xmlns:m="http://schemas.openxmlformats.org/officeDocument/2006/math"><w:body>{body_xml}</w:body></w:document>"#
    );

    let mut writer  = ZipWriter::new(Cursor::new(Vec::new()));
    let options     = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut members = vec![
        (CONTENT_TYPES_PART.to_string(), content_types.to_string()),
        ("_rels/.rels".to_string(), rels.to_string()),
        (DOCUMENT_PART.to_string(), document),
        ("word/_rels/document.xml.rels".to_string(), document_rels.to_string()),
    ];
    members.extend(extra.iter().map(|(n, x)| (n.to_string(), x.to_string())));

    for (name, xml) in members {
        writer.start_file(name.as_str(), options).unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_members_and_order() {
        let bytes = build_docx("<w:p/>", &[("word/footer1.xml", "<w:ftr/>"), ("word/header2.xml", "<w:hdr/>")]);
        let pkg   = DocxPackage::from_bytes(&bytes).unwrap();
        let again = DocxPackage::from_bytes(&pkg.to_bytes().unwrap()).unwrap();

        let before: Vec<&str> = pkg.names().collect();
        let after: Vec<&str>  = again.names().collect();
        assert_eq!(before, after);
        assert_eq!(again.part("word/footer1.xml"), Some("<w:ftr/>".as_bytes()));
    }

    #[test]
    fn test_header_footer_order() {
        let bytes = build_docx("<w:p/>", &[
            ("word/footer1.xml", "<w:ftr/>"),
            ("word/header2.xml", "<w:hdr/>"),
            ("word/header1.xml", "<w:hdr/>"),
        ]);
        let pkg = DocxPackage::from_bytes(&bytes).unwrap();
        assert_eq!(pkg.header_footer_parts(), vec!["word/header1.xml", "word/header2.xml", "word/footer1.xml"]);
    }

    #[test]
    fn test_replace_missing_part_fails() {
        let mut pkg = DocxPackage::from_bytes(&build_docx("<w:p/>", &[])).unwrap();
        assert!(pkg.replace_part("word/nope.xml", Vec::new()).is_err());
        assert!(pkg.replace_part(DOCUMENT_PART, b"<x/>".to_vec()).is_ok());
        assert_eq!(pkg.part(DOCUMENT_PART), Some(&b"<x/>"[..]));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(DocxPackage::from_bytes(b"definitely not a zip").is_err());
    }
}
