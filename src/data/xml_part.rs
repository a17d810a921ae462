// ============================================================
// Layer 4 — WordprocessingML Part
// ============================================================
// One XML part (document, header, footer, footnotes…) held as a
// flat list of owned quick-xml events. Nothing is modelled that
// we don't need: every event is written back exactly as read,
// except
//   - the text of `w:t` nodes we were told to change, and
//   - whole event ranges removed by the cleanup pass.
//
// Edits are recorded against event indices and only applied when
// the part is serialised, so indices never shift while units are
// being corrected.
//
// `scan()` walks the events once with an explicit stack (no
// recursion, however deep tables and text boxes nest) and
// returns every `w:p` paragraph with its text nodes:
//
//   <w:p>                                 ParagraphInfo
//     <w:r><w:rPr><w:b/></w:rPr>            ├── TextNode "Ciao " (bold)
//       <w:t xml:space="preserve">Ciao </w:t>
//     </w:r>
//     <w:hyperlink><w:r>                    └── TextNode "mondo" (hyperlink)
//       <w:t>mondo</w:t>
//     </w:r></w:hyperlink>
//   </w:p>
//
// A text node belongs to the innermost open paragraph, so a text
// box paragraph nested inside a body paragraph is its own unit.
//
// `w:tab`, `w:br` and `w:cr` inside a run become separator nodes
// holding "\t" / "\n". They keep the words on either side apart
// and are never rewritten; the element itself is written back
// untouched.
//
// Reference: ECMA-376 Part 1 §17 (WordprocessingML)
//            quick-xml documentation (Reader / Writer events)

use anyhow::{Context, Result};
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use std::{collections::BTreeMap, ops::Range};

use crate::domain::unit::RunStyle;

/// Paragraphs nested deeper than this are not corrected.
pub const MAX_PARAGRAPH_DEPTH: usize = 32;

/// One `w:t` node of a paragraph, or a tab / break separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
    /// Index of the node's Start (or Empty) event
    pub event: usize,
    pub text:  String,
    pub style: RunStyle,
    /// Tab or break: read-only
    pub fixed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphInfo {
    /// Index of the `w:p` Start event (or Empty event)
    pub start:       usize,
    /// Index of the matching End event (== start for `<w:p/>`)
    pub end:         usize,
    /// Number of enclosing paragraphs
    pub depth:       usize,
    pub nodes:       Vec<TextNode>,
    /// Contains an equation (`m:oMath` / `m:oMathPara`)
    pub has_math:    bool,
    /// Lives inside `mc:Fallback`, the duplicate copy of a text box
    pub in_fallback: bool,
    /// Direct child of `w:body`
    pub body_level:  bool,
    /// Carries its own section break (`w:pPr/w:sectPr`)
    pub has_sect_pr: bool,
}

impl ParagraphInfo {
    pub fn text(&self) -> String {
        self.nodes.iter().map(|n| n.text.as_str()).collect()
    }

    /// Whether the corrector may touch this paragraph.
    pub fn is_correctable(&self) -> bool {
        !self.nodes.is_empty() && !self.has_math && !self.in_fallback && self.depth <= MAX_PARAGRAPH_DEPTH
    }
}

/// Result of a scan: paragraphs in the order they open, plus the
/// index of the body-level `w:sectPr` if there is one.
#[derive(Debug, Clone, Default)]
pub struct PartLayout {
    pub paragraphs:     Vec<ParagraphInfo>,
    pub body_sect_pr:   Option<usize>,
}

#[derive(Debug, Clone)]
pub struct XmlPart {
    name:      String,
    events:    Vec<Event<'static>>,
    overrides: BTreeMap<usize, String>,
    removed:   Vec<Range<usize>>,
}

impl XmlPart {
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self> {
        let xml = std::str::from_utf8(bytes).with_context(|| format!("Part '{name}' is not UTF-8"))?;
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);

        let mut events = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(e)          => events.push(e.into_owned()),
                Err(e)         => {
                    return Err(anyhow::anyhow!(
                        "XML error in '{name}' at byte {}: {e}",
                        reader.buffer_position()
                    ))
                }
            }
        }

        Ok(Self { name: name.to_string(), events, overrides: BTreeMap::new(), removed: Vec::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_modified(&self) -> bool {
        !self.overrides.is_empty() || !self.removed.is_empty()
    }

    /// Replace the text of the `w:t` node starting at `event`.
    pub fn set_text(&mut self, event: usize, text: impl Into<String>) {
        self.overrides.insert(event, text.into());
    }

    /// Paragraph text with pending `set_text` edits applied.
    pub fn current_text(&self, paragraph: &ParagraphInfo) -> String {
        paragraph
            .nodes
            .iter()
            .map(|n| self.overrides.get(&n.event).unwrap_or(&n.text).as_str())
            .collect()
    }

    /// Drop events `range` (a whole element) from the output.
    pub fn remove_range(&mut self, range: Range<usize>) {
        self.removed.push(range);
    }

    // ─── Scan ────────────────────────────────────────────────────────────────
    pub fn scan(&self) -> PartLayout {
        let mut layout   = PartLayout::default();
        // Open element names, innermost last
        let mut elements: Vec<Vec<u8>>       = Vec::new();
        let mut open:     Vec<ParagraphInfo> = Vec::new();
        let mut fallback  = 0usize;
        let mut hyperlink = 0usize;
        let mut run_style = RunStyle::default();
        // Styles of enclosing runs; a text box run sits inside one
        let mut outer_styles: Vec<RunStyle> = Vec::new();
        // (start event, collected text) of the w:t being read
        let mut text_node: Option<(usize, String)> = None;

        for (i, event) in self.events.iter().enumerate() {
            match event {
                Event::Start(e) => {
                    let name = e.name().as_ref().to_vec();
                    match name.as_slice() {
                        b"w:p" => open.push(new_paragraph(i, open.len(), fallback > 0, &elements)),
                        b"mc:Fallback" => fallback += 1,
                        b"w:hyperlink" => hyperlink += 1,
                        b"w:r" => {
                            let inner = RunStyle { hyperlink: hyperlink > 0, ..RunStyle::default() };
                            outer_styles.push(std::mem::replace(&mut run_style, inner));
                        }
                        b"w:t" if !open.is_empty() => text_node = Some((i, String::new())),
                        _ => self.inspect(e, &elements, &mut open, &mut run_style, &mut layout, i),
                    }
                    elements.push(name);
                }
                Event::Empty(e) => match e.name().as_ref() {
                    b"w:p" => layout.paragraphs.push(ParagraphInfo {
                        end: i,
                        ..new_paragraph(i, open.len(), fallback > 0, &elements)
                    }),
                    b"w:t" => {
                        if let Some(p) = open.last_mut() {
                            p.nodes.push(TextNode { event: i, text: String::new(), style: run_style.clone(), fixed: false });
                        }
                    }
                    name @ (b"w:tab" | b"w:br" | b"w:cr") if elements.last().map(Vec::as_slice) == Some(b"w:r".as_slice()) => {
                        if let Some(p) = open.last_mut() {
                            let text = if name == b"w:tab" { "\t" } else { "\n" };
                            p.nodes.push(TextNode { event: i, text: text.into(), style: run_style.clone(), fixed: true });
                        }
                    }
                    _ => self.inspect(e, &elements, &mut open, &mut run_style, &mut layout, i),
                },
                Event::Text(t) => {
                    if let Some((_, buf)) = text_node.as_mut() {
                        let raw = t.unescape().map(|c| c.into_owned());
                        buf.push_str(&raw.unwrap_or_else(|_| String::from_utf8_lossy(t).into_owned()));
                    }
                }
                Event::CData(t) => {
                    if let Some((_, buf)) = text_node.as_mut() {
                        buf.push_str(&String::from_utf8_lossy(t));
                    }
                }
                Event::End(e) => {
                    elements.pop();
                    match e.name().as_ref() {
                        b"w:p" => {
                            if let Some(mut p) = open.pop() {
                                p.end = i;
                                layout.paragraphs.push(p);
                            }
                        }
                        b"mc:Fallback" => fallback = fallback.saturating_sub(1),
                        b"w:hyperlink" => hyperlink = hyperlink.saturating_sub(1),
                        b"w:r" => run_style = outer_styles.pop().unwrap_or_default(),
                        b"w:t" => {
                            if let (Some((start, text)), Some(p)) = (text_node.take(), open.last_mut()) {
                                p.nodes.push(TextNode { event: start, text, style: run_style.clone(), fixed: false });
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        // Document order = the order paragraphs open
        layout.paragraphs.sort_by_key(|p| p.start);
        layout
    }

    /// Run properties, equations and section breaks.
    fn inspect(
        &self,
        e:         &BytesStart<'_>,
        elements:  &[Vec<u8>],
        open:      &mut [ParagraphInfo],
        run_style: &mut RunStyle,
        layout:    &mut PartLayout,
        index:     usize,
    ) {
        let parent  = elements.last().map(Vec::as_slice);
        let grandpa = elements.len().checked_sub(2).map(|k| elements[k].as_slice());
        let in_rpr  = parent == Some(b"w:rPr".as_slice()) && grandpa == Some(b"w:r".as_slice());

        match e.name().as_ref() {
            b"m:oMath" | b"m:oMathPara" => {
                if let Some(p) = open.last_mut() {
                    p.has_math = true;
                }
            }
            b"w:sectPr" if parent == Some(b"w:body".as_slice()) => layout.body_sect_pr = Some(index),
            b"w:sectPr" if parent == Some(b"w:pPr".as_slice()) => {
                if let Some(p) = open.last_mut() {
                    p.has_sect_pr = true;
                }
            }
            b"w:b" if in_rpr => run_style.bold = toggle_on(e),
            b"w:i" if in_rpr => run_style.italic = toggle_on(e),
            b"w:u" if in_rpr => run_style.underline = attr(e, b"w:val").map_or(true, |v| v != "none"),
            b"w:rStyle" if in_rpr => run_style.style_id = attr(e, b"w:val"),
            _ => {}
        }
    }

    // ─── Serialise ───────────────────────────────────────────────────────────
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        let mut i = 0usize;

        while i < self.events.len() {
            if let Some(r) = self.removed.iter().find(|r| r.contains(&i)) {
                i = r.end;
                continue;
            }

            match (self.overrides.get(&i), &self.events[i]) {
                (Some(text), Event::Start(start)) => {
                    writer.write_event(Event::Start(preserve_space(start)))?;
                    writer.write_event(Event::Text(BytesText::new(text)))?;
                    // Skip the original content up to the closing w:t
                    let mut j = i + 1;
                    while j < self.events.len() && !matches!(&self.events[j], Event::End(e) if e.name().as_ref() == b"w:t") {
                        j += 1;
                    }
                    writer.write_event(Event::End(BytesEnd::new("w:t")))?;
                    i = j + 1;
                    continue;
                }
                (Some(text), Event::Empty(start)) => {
                    if !text.is_empty() {
                        writer.write_event(Event::Start(preserve_space(start)))?;
                        writer.write_event(Event::Text(BytesText::new(text)))?;
                        writer.write_event(Event::End(BytesEnd::new("w:t")))?;
                    } else {
                        writer.write_event(&self.events[i])?;
                    }
                }
                (_, event) => writer.write_event(event)?,
            }
            i += 1;
        }

        Ok(writer.into_inner())
    }

    /// Serialise and check the result parses again.
    pub fn to_checked_bytes(&self) -> Result<Vec<u8>> {
        let bytes = self.to_bytes().with_context(|| format!("Cannot serialise '{}'", self.name))?;
        XmlPart::parse(&self.name, &bytes).with_context(|| format!("Serialised '{}' is not well-formed", self.name))?;
        Ok(bytes)
    }
}

fn new_paragraph(start: usize, depth: usize, in_fallback: bool, elements: &[Vec<u8>]) -> ParagraphInfo {
    ParagraphInfo {
        start,
        end: start,
        depth,
        nodes: Vec::new(),
        has_math: false,
        in_fallback,
        body_level: elements.last().map(Vec::as_slice) == Some(b"w:body".as_slice()),
        has_sect_pr: false,
    }
}

/// Copy of a `w:t` start tag that is guaranteed to carry
/// `xml:space="preserve"`, so edge spaces survive.
fn preserve_space(start: &BytesStart<'_>) -> BytesStart<'static> {
    let mut tag = BytesStart::new("w:t");
    for a in start.attributes().flatten() {
        if a.key.as_ref() != b"xml:space" {
            tag.push_attribute(a);
        }
    }
    tag.push_attribute(("xml:space", "preserve"));
    tag.into_owned()
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// `<w:b/>` is on; `<w:b w:val="0"/>` / `"false"` is off.
fn toggle_on(e: &BytesStart<'_>) -> bool {
    !matches!(attr(e, b"w:val").as_deref(), Some("0" | "false" | "off"))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = r#"xmlns:w="w" xmlns:mc="mc" xmlns:m="m""#;

    fn part(body: &str) -> XmlPart {
        let xml = format!(r#"<?xml version="1.0" encoding="UTF-8"?><w:document {NS}><w:body>{body}</w:body></w:document>"#);
        XmlPart::parse("word/document.xml", xml.as_bytes()).unwrap()
    }

    #[test]
    fn test_scan_collects_runs_with_styles() {
        let p = part(concat!(
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">Ciao </w:t></w:r>"#,
            r#"<w:hyperlink><w:r><w:t>mondo</w:t></w:r></w:hyperlink></w:p>"#,
        ));
        let layout = p.scan();
        assert_eq!(layout.paragraphs.len(), 1);
        let para = &layout.paragraphs[0];
        assert_eq!(para.text(), "Ciao mondo");
        assert!(para.nodes[0].style.bold);
        assert!(!para.nodes[1].style.bold);
        assert!(para.nodes[1].style.hyperlink);
        assert!(para.body_level);
    }

    #[test]
    fn test_paragraph_mark_properties_are_not_run_style() {
        let p = part(r#"<w:p><w:pPr><w:rPr><w:b/></w:rPr></w:pPr><w:r><w:t>testo</w:t></w:r></w:p>"#);
        assert!(!p.scan().paragraphs[0].nodes[0].style.bold);
    }

    #[test]
    fn test_escaped_text_is_unescaped() {
        let p = part(r#"<w:p><w:r><w:t>A &amp; B &lt;C&gt;</w:t></w:r></w:p>"#);
        assert_eq!(p.scan().paragraphs[0].text(), "A & B <C>");
    }

    #[test]
    fn test_nested_text_box_paragraph_is_separate() {
        let p = part(concat!(
            r#"<w:p><w:r><w:t>fuori</w:t></w:r><w:r><mc:AlternateContent><mc:Choice>"#,
            r#"<w:txbxContent><w:p><w:r><w:t>dentro</w:t></w:r></w:p></w:txbxContent>"#,
            r#"</mc:Choice><mc:Fallback><w:txbxContent><w:p><w:r><w:t>dentro</w:t></w:r></w:p></w:txbxContent></mc:Fallback>"#,
            r#"</mc:AlternateContent></w:r></w:p>"#,
        ));
        let layout = p.scan();
        let correctable: Vec<String> = layout.paragraphs.iter().filter(|p| p.is_correctable()).map(|p| p.text()).collect();
        assert_eq!(correctable, vec!["fuori", "dentro"]);
        assert_eq!(layout.paragraphs.len(), 3);
        assert!(layout.paragraphs[2].in_fallback);
        assert_eq!(layout.paragraphs[1].depth, 1);
    }

    #[test]
    fn test_tabs_and_breaks_are_separator_nodes() {
        let p = part(concat!(
            r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr>"#,
            r#"<w:r><w:t>Capitolo</w:t><w:tab/><w:t>primo del libro.</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>Fine riga.</w:t><w:br/><w:t>Nuova riga</w:t><w:cr/><w:t>qui.</w:t></w:r></w:p>"#,
        ));
        let layout = p.scan();
        assert_eq!(layout.paragraphs[0].text(), "Capitolo\tprimo del libro.");
        assert_eq!(layout.paragraphs[1].text(), "Fine riga.\nNuova riga\nqui.");

        let nodes = &layout.paragraphs[0].nodes;
        assert_eq!(nodes.len(), 3);
        assert!(nodes[1].fixed && !nodes[0].fixed && !nodes[2].fixed);
    }

    #[test]
    fn test_nested_run_does_not_leak_its_style() {
        let p = part(concat!(
            r#"<w:p><w:r><w:t>prima</w:t><mc:AlternateContent><mc:Choice><w:txbxContent>"#,
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>dentro</w:t></w:r></w:p>"#,
            r#"</w:txbxContent></mc:Choice></mc:AlternateContent><w:t> dopo</w:t></w:r></w:p>"#,
        ));
        let layout = p.scan();
        let outer  = &layout.paragraphs[0];
        assert_eq!(outer.text(), "prima dopo");
        assert!(!outer.nodes[1].style.bold);
        assert!(layout.paragraphs[1].nodes[0].style.bold);
    }

    #[test]
    fn test_equation_paragraph_is_not_correctable() {
        let p = part(r#"<w:p><w:r><w:t>Sia </w:t></w:r><m:oMath><m:r><m:t>x</m:t></m:r></m:oMath></w:p>"#);
        let para = &p.scan().paragraphs[0];
        assert!(para.has_math);
        assert!(!para.is_correctable());
    }

    #[test]
    fn test_set_text_round_trip() {
        let mut p = part(r#"<w:p><w:r><w:t>eror</w:t></w:r><w:r><w:t/></w:r></w:p>"#);
        let nodes = p.scan().paragraphs[0].nodes.clone();
        p.set_text(nodes[0].event, "errore ");
        p.set_text(nodes[1].event, "& co");
        let bytes = p.to_checked_bytes().unwrap();

        let again = XmlPart::parse("x", &bytes).unwrap();
        assert_eq!(again.scan().paragraphs[0].text(), "errore & co");
        assert!(String::from_utf8(bytes).unwrap().contains(r#"xml:space="preserve""#));
    }

    #[test]
    fn test_unmodified_part_is_byte_identical() {
        let xml = format!(r#"<?xml version="1.0"?><w:document {NS}><w:body><w:p w:rsidR="00A1"><w:r><w:t xml:space="preserve"> a &amp; b </w:t></w:r></w:p></w:body></w:document>"#);
        let p = XmlPart::parse("x", xml.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(p.to_bytes().unwrap()).unwrap(), xml);
    }

    #[test]
    fn test_remove_range_and_body_sect_pr() {
        let mut p = part(r#"<w:p><w:r><w:t>uno</w:t></w:r></w:p><w:p><w:r><w:t>due</w:t></w:r></w:p><w:sectPr/>"#);
        let layout = p.scan();
        assert!(layout.body_sect_pr.is_some());
        let second = &layout.paragraphs[1];
        p.remove_range(second.start..second.end + 1);
        let again = XmlPart::parse("x", &p.to_bytes().unwrap()).unwrap();
        let texts: Vec<String> = again.scan().paragraphs.iter().map(|p| p.text()).collect();
        assert_eq!(texts, vec!["uno"]);
    }
}
