//! History Store - durable JSON persistence for the idea memory
//!
//! The whole document is rewritten on every save via a sibling temp file and
//! a rename, so an interrupted write never leaves a half-written history behind.
//! Loading never fails: a missing, unreadable or corrupt file yields an empty
//! document.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::HistoryDocument;

/// Reasons a persisted history could not be read
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history file {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to read history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("history file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence seam for the history document
pub trait HistoryStore: Send + Sync {
    /// Load the persisted document, degrading to an empty one on any failure
    fn load(&self) -> HistoryDocument;

    /// Persist the full document. Bumps `last_updated` before writing.
    fn save(&self, doc: &mut HistoryDocument) -> Result<()>;
}

/// History store backed by a single pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file, reporting exactly why it failed
    pub fn try_load(&self) -> Result<HistoryDocument, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(self.path.clone()));
            }
            Err(source) => {
                return Err(StoreError::Io { path: self.path.clone(), source });
            }
        };

        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "history.json".to_string());
        self.path.with_file_name(format!("{}.tmp", name))
    }

    /// Keep a copy of an unparseable file so an operator can inspect it
    /// before the next save replaces it.
    fn preserve_corrupt_copy(&self) {
        let backup = self.path.with_extension(format!(
            "corrupt-{}",
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        match fs::copy(&self.path, &backup) {
            Ok(_) => warn!("Corrupt history preserved at {}", backup.display()),
            Err(e) => warn!("Could not preserve corrupt history file: {}", e),
        }
    }

    fn write_atomically(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create history directory {}", parent.display())
                })?;
            }
        }

        let tmp_path = self.temp_path();
        let written = fs::File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(contents.as_bytes())?;
                file.sync_all()
            })
            .with_context(|| format!("Failed to write temp file {}", tmp_path.display()));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e).with_context(|| {
                format!("Failed to move history into place at {}", self.path.display())
            });
        }
        Ok(())
    }
}

impl HistoryStore for JsonHistoryStore {
    fn load(&self) -> HistoryDocument {
        match self.try_load() {
            Ok(doc) => {
                info!(
                    "Loaded history from {} ({} approved, {} rejected)",
                    self.path.display(),
                    doc.approved_ideas.len(),
                    doc.rejected_ideas.len()
                );
                doc
            }
            Err(StoreError::Missing(path)) => {
                info!("No history at {}, starting fresh", path.display());
                HistoryDocument::new()
            }
            Err(e @ StoreError::Io { .. }) => {
                warn!("{}; starting with empty history", e);
                HistoryDocument::new()
            }
            Err(e @ StoreError::Corrupt { .. }) => {
                error!("{}; prior history discarded, starting with empty history", e);
                self.preserve_corrupt_copy();
                HistoryDocument::new()
            }
        }
    }

    fn save(&self, doc: &mut HistoryDocument) -> Result<()> {
        // last_updated never moves backwards, even if the clock does
        doc.last_updated = doc.last_updated.max(Utc::now());

        let json = serde_json::to_string_pretty(doc).context("Failed to serialize history")?;
        self.write_atomically(&json)?;

        debug!("History saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_temp_path_is_sibling() {
        let store = JsonHistoryStore::new("/data/ideas_history.json");
        assert_eq!(store.temp_path(), PathBuf::from("/data/ideas_history.json.tmp"));
    }

    #[test]
    fn test_try_load_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path().join("nope.json"));
        assert!(matches!(store.try_load(), Err(StoreError::Missing(_))));
    }

    #[test]
    fn test_try_load_reports_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();
        let store = JsonHistoryStore::new(&path);
        assert!(matches!(store.try_load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_schema_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, r#"{"approved_ideas": 42}"#).unwrap();
        let store = JsonHistoryStore::new(&path);
        assert!(matches!(store.try_load(), Err(StoreError::Corrupt { .. })));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_keeps_last_updated_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path().join("history.json"));
        let mut doc = HistoryDocument::new();
        let future = Utc::now() + Duration::hours(1);
        doc.last_updated = future;
        store.save(&mut doc).unwrap();
        assert_eq!(doc.last_updated, future);
    }
}
