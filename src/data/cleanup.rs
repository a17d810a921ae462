// ============================================================
// Layer 4 — Structural Cleanup
// ============================================================
// Word stores the properties of the last section as a w:sectPr
// that closes w:body; earlier sections end with a paragraph that
// carries its own w:pPr/w:sectPr. Editing round trips sometimes
// leave a copy of the previous paragraph right before that final
// break:
//
//   <w:p>Conclusioni.</w:p>
//   <w:p>Conclusioni.</w:p>     ← duplicate
//   <w:sectPr …/>
//
// The duplicate is removed. If it is itself a section-break
// paragraph, only its text is cleared so the break survives.
//
// Reference: ECMA-376 Part 1 §17.6 (Sections)

use crate::data::xml_part::XmlPart;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    NothingToDo,
    Removed,
    /// Duplicate held a section break; text cleared, paragraph kept
    Cleared,
}

/// Remove a duplicate trailing body paragraph from `document`.
pub fn remove_duplicate_trailing_paragraph(document: &mut XmlPart) -> CleanupOutcome {
    let layout = document.scan();
    let Some(sect_pr) = layout.body_sect_pr else {
        return CleanupOutcome::NothingToDo;
    };

    let body: Vec<_> = layout
        .paragraphs
        .iter()
        .filter(|p| p.body_level && p.end < sect_pr)
        .collect();
    let [.., previous, last] = body.as_slice() else {
        return CleanupOutcome::NothingToDo;
    };

    let last_text = document.current_text(last);
    if last_text.trim().is_empty() || last_text.trim() != document.current_text(previous).trim() {
        return CleanupOutcome::NothingToDo;
    }

    if last.has_sect_pr {
        for node in last.nodes.iter().filter(|n| !n.fixed) {
            document.set_text(node.event, "");
        }
        tracing::info!(part = %document.name(), "Cleared duplicate trailing paragraph, section break kept");
        CleanupOutcome::Cleared
    } else {
        document.remove_range(last.start..last.end + 1);
        tracing::info!(part = %document.name(), "Removed duplicate trailing paragraph");
        CleanupOutcome::Removed
    }
}
