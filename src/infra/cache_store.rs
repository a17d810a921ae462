// ============================================================
// Layer 6 — Cache Store
// ============================================================
// Persists similarity-cache entries between runs as one JSON
// file:
//
//   {
//     "version": 1,
//     "saved_at": "2024-03-01T10:15:00Z",
//     "entries": [ { "normalized_key": …, "corrected_text": …,
//                    "quality_score": …, "ttl_secs": …, … } ]
//   }
//
// Saving writes a sibling temp file and renames it over the
// store, so a crash mid-write never leaves half a file behind.
//
// Loading never fails. A missing store is a cold cache; an
// unreadable or corrupt one is logged and treated the same way.
//
// Reference: Rust Book §9 (Error Handling)
//            serde_json documentation

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::engine::cache::CacheEntry;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version:  u32,
    saved_at: DateTime<Utc>,
    entries:  Vec<CacheEntry>,
}

pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries from disk, or none when the store is absent or bad.
    pub fn load(&self) -> Vec<CacheEntry> {
        if !self.path.exists() {
            tracing::info!(store = %self.path.display(), "No cache store yet; starting cold");
            return Vec::new();
        }

        let parsed = fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|json| serde_json::from_str::<StoreFile>(&json).map_err(anyhow::Error::from));

        match parsed {
            Ok(file) if file.version == STORE_VERSION => {
                tracing::info!(store = %self.path.display(), entries = file.entries.len(), "Cache store loaded");
                file.entries
            }
            Ok(file) => {
                tracing::warn!(store = %self.path.display(), version = file.version, "Unknown cache store version; ignored");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(store = %self.path.display(), error = %e, "Cache store unreadable; starting cold");
                Vec::new()
            }
        }
    }

    pub fn save(&self, entries: Vec<CacheEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create cache directory '{}'", parent.display()))?;
        }

        let count = entries.len();
        let file  = StoreFile { version: STORE_VERSION, saved_at: Utc::now(), entries };
        let tmp   = self.path.with_extension("json.tmp");

        fs::write(&tmp, serde_json::to_vec(&file)?)
            .with_context(|| format!("Cannot write cache store '{}'", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Cannot move cache store into '{}'", self.path.display()))?;

        tracing::info!(store = %self.path.display(), entries = count, "Cache store saved");
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::modification::Stage;
    use crate::engine::cache::{CacheConfig, SimilarityCache};

    #[test]
    fn test_save_then_load() {
        let dir   = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache").join("store.json"));

        let cache = SimilarityCache::new(CacheConfig::default(), 0.8);
        assert!(cache.put("Questo è un eror.", "Questo è un errore.", 0.95, Stage::LocalRules));
        store.save(cache.entries()).unwrap();

        let loaded = SimilarityCache::with_entries(CacheConfig::default(), 0.8, store.load());
        let hit = loaded.get_if_similar("Questo è un eror.", 0.9).unwrap();
        assert_eq!(hit.entry.corrected_text, "Questo è un errore.");
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_store_is_cold() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CacheStore::new(dir.path().join("none.json")).load().is_empty());
    }

    #[test]
    fn test_corrupt_store_is_cold() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(CacheStore::new(path).load().is_empty());
    }
}
