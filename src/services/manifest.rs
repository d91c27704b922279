//! Cache manifest
//!
//! Maps each source path to the fingerprint it was last documented at and the
//! artifacts produced for it. Every write goes through temp file + rename, so
//! after a crash the file on disk is either the previous or the next manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::utils::write_atomic;

const MANIFEST_VERSION: u32 = 1;

/// Manifest persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read manifest {0}: {1}")]
    Read(PathBuf, #[source] io::Error),

    #[error("manifest {0} is corrupt: {1}")]
    Corrupt(PathBuf, String),

    #[error("failed to write manifest {0}: {1}")]
    Write(PathBuf, #[source] io::Error),

    #[error("failed to serialize manifest: {0}")]
    Serialize(String),
}

/// What was generated for one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// sha256 of the file content at generation time
    pub fingerprint: String,
    pub generated_at: DateTime<Utc>,
    /// Artifact paths relative to the docs directory
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl CacheEntry {
    pub fn new(fingerprint: impl Into<String>, outputs: Vec<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            generated_at: Utc::now(),
            outputs,
        }
    }
}

/// Point-in-time copy of all entries
pub type ManifestSnapshot = BTreeMap<String, CacheEntry>;

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: ManifestSnapshot,
}

/// Shared manifest; all mutation is serialized through one lock
pub struct ManifestStore {
    path: PathBuf,
    entries: Mutex<ManifestSnapshot>,
}

impl ManifestStore {
    /// An in-memory store that will persist to `path`
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: Mutex::new(ManifestSnapshot::new()),
        }
    }

    /// Read the manifest; a missing file is an empty manifest
    pub async fn load(path: &Path) -> Result<Self, StorageError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No manifest at {}, starting empty", path.display());
                return Ok(Self::empty(path.to_path_buf()));
            }
            Err(e) => return Err(StorageError::Read(path.to_path_buf(), e)),
        };

        let file: ManifestFile = serde_json::from_str(&content)
            .map_err(|e| StorageError::Corrupt(path.to_path_buf(), e.to_string()))?;
        if file.version > MANIFEST_VERSION {
            return Err(StorageError::Corrupt(
                path.to_path_buf(),
                format!("unsupported manifest version {}", file.version),
            ));
        }

        info!("Manifest loaded: {} entries", file.entries.len());
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(file.entries),
        })
    }

    /// Like [`load`](Self::load), but an unreadable manifest yields an empty
    /// store and the error is handed back for reporting.
    pub async fn load_or_recover(path: &Path) -> (Self, Option<StorageError>) {
        match Self::load(path).await {
            Ok(store) => (store, None),
            Err(e) => {
                warn!("{}; every file will be treated as new", e);
                (Self::empty(path.to_path_buf()), Some(e))
            }
        }
    }

    pub async fn snapshot(&self) -> ManifestSnapshot {
        self.entries.lock().await.clone()
    }

    pub async fn get(&self, source_path: &str) -> Option<CacheEntry> {
        self.entries.lock().await.get(source_path).cloned()
    }

    /// Record `entry` for `source_path` and persist.
    ///
    /// The in-memory state is rolled back if the write fails.
    pub async fn commit(&self, source_path: &str, entry: CacheEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(source_path.to_string(), entry);

        if let Err(e) = self.persist(&entries).await {
            match previous {
                Some(prev) => entries.insert(source_path.to_string(), prev),
                None => entries.remove(source_path),
            };
            return Err(e);
        }

        debug!("Manifest committed: {}", source_path);
        Ok(())
    }

    /// Drop the entry for a deleted source file and persist
    pub async fn remove(&self, source_path: &str) -> Result<Option<CacheEntry>, StorageError> {
        let mut entries = self.entries.lock().await;
        let Some(removed) = entries.remove(source_path) else {
            return Ok(None);
        };

        if let Err(e) = self.persist(&entries).await {
            entries.insert(source_path.to_string(), removed);
            return Err(e);
        }

        debug!("Manifest entry removed: {}", source_path);
        Ok(Some(removed))
    }

    async fn persist(&self, entries: &ManifestSnapshot) -> Result<(), StorageError> {
        let file = ManifestFile {
            version: MANIFEST_VERSION,
            entries: entries.clone(),
        };
        let bytes =
            serde_json::to_vec_pretty(&file).map_err(|e| StorageError::Serialize(e.to_string()))?;

        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| StorageError::Write(self.path.clone(), e))
    }
}
