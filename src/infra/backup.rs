// ============================================================
// Layer 6 — Backup Store
// ============================================================
// Snapshots the input document before a correction run and
// hands the bytes back if the output fails validation.
//
// What gets saved per backup:
//   1. <id>.docx        — byte-for-byte copy of the input
//   2. <id>.json        — the BackupHandle: SHA-256 checksum,
//                         original path, creation time
//
// The sidecar lets a backup be restored by hand after the run
// is gone (see `load_handle`).
//
// restore() re-hashes the snapshot and refuses to return bytes
// whose checksum no longer matches.
//
// File naming convention:
//   backups/
//     relazione_20240301-101500123.docx
//     relazione_20240301-101500123.json
//
// Reference: Rust Book §9 (Error Handling)
//            sha2 crate documentation

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::traits::{BackupHandle, BackupStore};

/// Stores backups as plain files in one directory.
pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    /// Create a store rooted at `dir`, creating the directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create backup directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the handle written next to a backup.
    pub fn load_handle(sidecar: &Path) -> Result<BackupHandle> {
        let json = fs::read_to_string(sidecar)
            .with_context(|| format!("Cannot read backup sidecar '{}'", sidecar.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Backup sidecar '{}' is not valid JSON", sidecar.display()))
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl BackupStore for FileBackupStore {
    fn create_backup(&self, source: &Path) -> Result<BackupHandle> {
        let bytes = fs::read(source)
            .with_context(|| format!("Cannot read '{}' for backup", source.display()))?;

        let now  = Utc::now();
        let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or("document");
        let id   = format!("{stem}_{}", now.format("%Y%m%d-%H%M%S%3f"));

        let backup_path = self.dir.join(format!("{id}.docx"));
        fs::write(&backup_path, &bytes)
            .with_context(|| format!("Cannot write backup '{}'", backup_path.display()))?;

        let handle = BackupHandle {
            id,
            backup_path,
            original_path: source.to_path_buf(),
            checksum:      checksum(&bytes),
            created_at:    now,
        };

        let sidecar = self.dir.join(format!("{}.json", handle.id));
        fs::write(&sidecar, serde_json::to_string_pretty(&handle)?)
            .with_context(|| format!("Cannot write backup sidecar '{}'", sidecar.display()))?;

        tracing::info!(backup = %handle.backup_path.display(), checksum = %handle.checksum, "Backup created");
        Ok(handle)
    }

    fn restore(&self, handle: &BackupHandle) -> Result<Vec<u8>> {
        let bytes = fs::read(&handle.backup_path)
            .with_context(|| format!("Cannot read backup '{}'", handle.backup_path.display()))?;

        let actual = checksum(&bytes);
        if actual != handle.checksum {
            bail!(
                "Backup '{}' is corrupt: checksum {} does not match {}",
                handle.backup_path.display(),
                actual,
                handle.checksum
            );
        }

        tracing::info!(backup = %handle.backup_path.display(), "Backup verified for restore");
        Ok(bytes)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_and_restore() {
        let dir   = tempfile::tempdir().unwrap();
        let input = dir.path().join("relazione.docx");
        fs::write(&input, b"original bytes").unwrap();

        let store  = FileBackupStore::new(dir.path().join("backups")).unwrap();
        let handle = store.create_backup(&input).unwrap();

        fs::write(&input, b"clobbered").unwrap();
        assert_eq!(store.restore(&handle).unwrap(), b"original bytes");
        assert_eq!(handle.original_path, input);
        assert!(handle.id.starts_with("relazione_"));

        let sidecar = store.dir().join(format!("{}.json", handle.id));
        assert_eq!(FileBackupStore::load_handle(&sidecar).unwrap(), handle);
    }

    #[test]
    fn test_tampered_backup_is_refused() {
        let dir   = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.docx");
        fs::write(&input, b"v1").unwrap();

        let store  = FileBackupStore::new(dir.path()).unwrap();
        let handle = store.create_backup(&input).unwrap();
        fs::write(&handle.backup_path, b"v2").unwrap();

        assert!(store.restore(&handle).is_err());
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir   = tempfile::tempdir().unwrap();
        let store = FileBackupStore::new(dir.path()).unwrap();
        assert!(store.create_backup(&dir.path().join("nope.docx")).is_err());
    }
}
