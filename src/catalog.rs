//! On-disk bookkeeping for store files.
//!
//! The store directory holds one SQLite file per built store plus a
//! `CURRENT.json` pointer naming the published one. The pointer is replaced
//! atomically (write to a temp file, then rename) before a store is
//! published in memory, so a restart always reloads a complete store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use snapshot_relay_core::models::Fingerprint;

use crate::error::PipelineError;
use crate::store::{journal_path, StoreInstance, StoreManifest};

const POINTER_FILE: &str = "CURRENT.json";
const STORE_PREFIX: &str = "store-";
const STORE_SUFFIX: &str = ".sqlite";

#[derive(Debug, Clone)]
pub struct StoreCatalog {
    dir: PathBuf,
}

impl StoreCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a new store: `store-<timestamp>-<fingerprint prefix>.sqlite`.
    pub fn store_file_name(built_at: DateTime<Utc>, fingerprint: &Fingerprint) -> String {
        format!(
            "{}{}-{}{}",
            STORE_PREFIX,
            built_at.format("%Y%m%dT%H%M%S%3f"),
            fingerprint.short(),
            STORE_SUFFIX
        )
    }

    pub fn path_of(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Atomically point the catalog at `manifest`.
    pub fn write_current(&self, manifest: &StoreManifest) -> Result<(), PipelineError> {
        let io_err = |e: std::io::Error| PipelineError::BuildAborted(format!("catalog pointer: {}", e));

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| PipelineError::BuildAborted(format!("catalog pointer: {}", e)))?;

        let tmp = self.dir.join(format!("{}.tmp", POINTER_FILE));
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, self.dir.join(POINTER_FILE)).map_err(io_err)?;
        Ok(())
    }

    /// Read the pointer, if one has been written.
    pub fn read_current(&self) -> Result<Option<StoreManifest>> {
        let path = self.dir.join(POINTER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(manifest))
    }

    /// Reopen the store the pointer names.
    ///
    /// A missing or unreadable store is logged and treated as "nothing to
    /// restore" so the service comes up NOT_READY instead of failing.
    pub async fn restore(&self) -> Option<StoreInstance> {
        let manifest = match self.read_current() {
            Ok(Some(m)) => m,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable catalog pointer");
                return None;
            }
        };

        let path = self.path_of(&manifest.file);
        if !path.exists() {
            tracing::warn!(file = %manifest.file, "catalog points at a missing store");
            return None;
        }

        match StoreInstance::open(&path, manifest).await {
            Ok(store) => {
                tracing::info!(
                    file = %store.manifest().file,
                    fingerprint = %store.fingerprint().short(),
                    tables = store.tables().len(),
                    "restored published store"
                );
                Some(store)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to reopen published store");
                None
            }
        }
    }

    /// Delete store files other than `keep`. Returns how many were removed.
    ///
    /// Only safe while no build is in progress, i.e. at startup.
    pub fn sweep_orphans(&self, keep: Option<&str>) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(STORE_PREFIX) || !name.ends_with(STORE_SUFFIX) {
                continue;
            }
            if keep == Some(name.as_str()) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    let _ = std::fs::remove_file(journal_path(&path));
                    tracing::info!(file = %name, "swept orphaned store");
                    removed += 1;
                }
                Err(e) => tracing::warn!(file = %name, error = %e, "failed to sweep orphaned store"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(file: &str) -> StoreManifest {
        StoreManifest {
            file: file.to_string(),
            fingerprint: Fingerprint::of(b"snapshot"),
            message_key: Some("7:42".to_string()),
            built_at: Utc::now(),
            exported_at: Some("2024-05-01T00:00:00".to_string()),
        }
    }

    #[test]
    fn test_store_file_name_shape() {
        let fp = Fingerprint::of(b"abc");
        let name = StoreCatalog::store_file_name(Utc::now(), &fp);
        assert!(name.starts_with("store-"));
        assert!(name.ends_with("-ba7816bf8f01.sqlite"));
    }

    #[test]
    fn test_pointer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = StoreCatalog::new(dir.path());
        assert!(catalog.read_current().unwrap().is_none());

        let m = manifest("store-a.sqlite");
        catalog.write_current(&m).unwrap();
        assert_eq!(catalog.read_current().unwrap(), Some(m));
        assert!(!dir.path().join("CURRENT.json.tmp").exists());
    }

    #[test]
    fn test_sweep_keeps_current_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["store-a.sqlite", "store-b.sqlite", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let catalog = StoreCatalog::new(dir.path());
        assert_eq!(catalog.sweep_orphans(Some("store-b.sqlite")), 1);
        assert!(!dir.path().join("store-a.sqlite").exists());
        assert!(dir.path().join("store-b.sqlite").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_restore_missing_store_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = StoreCatalog::new(dir.path());
        catalog.write_current(&manifest("store-gone.sqlite")).unwrap();
        assert!(catalog.restore().await.is_none());
    }
}
