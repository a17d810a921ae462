// ============================================================
// Layer 6 — Run Reports
// ============================================================
// Writes what a correction run did, next to its output:
//
//   <report_dir>/
//     modifications.csv   ← one row per committed stage change
//     stats.json          ← aggregate PipelineStats
//     glossary.json       ← proper nouns seen in the document
//
// Example CSV output:
//   unit_id,stage,quality,timestamp,original,corrected
//   0:3,local-rules,0.941200,2024-03-01T10:15:00Z,"Un eror.","Un errore."
//
// Rows are in unit-id order, which is document order. Text
// columns are always quoted; embedded quotes are doubled.
//
// Reference: RFC 4180 (CSV)
//            Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::domain::modification::Modification;
use crate::engine::stats::PipelineStats;

pub const CSV_HEADER: &str = "unit_id,stage,quality,timestamp,original,corrected";

/// Writes the report files of one run into a directory.
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    /// Create the writer, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create report directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join("modifications.csv")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join("stats.json")
    }

    pub fn glossary_path(&self) -> PathBuf {
        self.dir.join("glossary.json")
    }

    /// Write the modification log; `log` must already be sorted.
    pub fn write_modifications(&self, log: &[Modification]) -> Result<PathBuf> {
        let path = self.csv_path();
        let file = fs::File::create(&path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        let mut out = BufWriter::new(file);

        writeln!(out, "{CSV_HEADER}")?;
        for m in log {
            writeln!(
                out,
                "{},{},{:.6},{},{},{}",
                m.unit_id,
                m.stage,
                m.quality,
                m.timestamp.to_rfc3339(),
                csv_field(&m.original_text),
                csv_field(&m.corrected_text),
            )?;
        }
        out.flush()?;

        tracing::debug!(rows = log.len(), path = %path.display(), "Modification log written");
        Ok(path)
    }

    pub fn write_stats(&self, stats: &PipelineStats) -> Result<PathBuf> {
        write_json(&self.stats_path(), stats)
    }

    pub fn write_glossary(&self, terms: &[String]) -> Result<PathBuf> {
        write_json(&self.glossary_path(), &terms)
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
    Ok(path.to_path_buf())
}

/// Quote a text column.
fn csv_field(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::modification::Stage;
    use crate::domain::unit::UnitId;
    use std::time::Duration;

    #[test]
    fn test_csv_field_escapes_quotes() {
        assert_eq!(csv_field(r#"disse "ciao", poi"#), r#""disse ""ciao"", poi""#);
    }

    #[test]
    fn test_reports_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("report")).unwrap();
        let log = vec![
            Modification::new(UnitId::new(0, 1), "Un eror.", "Un errore.", Stage::LocalRules, 0.94),
            Modification::new(UnitId::new(0, 4), "a,b", "a, b", Stage::Grammar, 0.9),
        ];

        let csv = fs::read_to_string(writer.write_modifications(&log).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("0:1,local-rules,0.940000,"));
        assert!(lines[2].ends_with(r#","a,b","a, b""#));

        let stats = PipelineStats::build(Vec::new(), &log, Duration::from_millis(5));
        let json = fs::read_to_string(writer.write_stats(&stats).unwrap()).unwrap();
        let parsed: PipelineStats = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.modifications.get(&Stage::Grammar), Some(&1));
    }
}
