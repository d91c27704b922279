//! Backend response cache
//!
//! Stores the text a backend returned for a prompt, keyed by the fingerprint of
//! the prompt and the backend that answered it. A rerun that builds the same
//! prompt is served from here instead of calling the backend again. One file
//! per entry, each written through [`write_atomic`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::utils::{fingerprint, remove_if_exists, write_atomic};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write cached response {0}: {1}")]
    Write(PathBuf, #[source] io::Error),

    #[error("failed to read response cache {0}: {1}")]
    Read(PathBuf, #[source] io::Error),

    #[error("failed to serialize cached response: {0}")]
    Serialize(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    key: String,
    stored_at: DateTime<Utc>,
    response: String,
}

/// Entry count and on-disk size
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

pub struct ResponseCache {
    dir: PathBuf,
    /// Backend identity mixed into every key
    namespace: String,
}

impl ResponseCache {
    pub fn new(dir: PathBuf, namespace: impl Into<String>) -> Self {
        Self {
            dir,
            namespace: namespace.into(),
        }
    }

    pub fn key_for(&self, prompt: &str) -> String {
        fingerprint(format!("{}\n{}", self.namespace, prompt).as_bytes())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Cached response for `prompt`; unreadable entries count as misses
    pub async fn get(&self, prompt: &str) -> Option<String> {
        let key = self.key_for(prompt);
        let path = self.entry_path(&key);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cached response {} unreadable: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<CachedResponse>(&content) {
            Ok(entry) if entry.key == key => {
                debug!("Response cache hit: {}", &key[..12]);
                Some(entry.response)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Cached response {} is corrupt: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn store(&self, prompt: &str, response: &str) -> Result<(), CacheError> {
        let key = self.key_for(prompt);
        let path = self.entry_path(&key);
        let entry = CachedResponse {
            key,
            stored_at: Utc::now(),
            response: response.to_string(),
        };
        let bytes =
            serde_json::to_vec(&entry).map_err(|e| CacheError::Serialize(e.to_string()))?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| CacheError::Write(path.clone(), e))
    }

    async fn entries(&self) -> Result<Vec<(PathBuf, u64)>, CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Read(self.dir.clone(), e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::Read(self.dir.clone(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            entries.push((path, size));
        }
        Ok(entries)
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries().await?;
        Ok(CacheStats {
            entries: entries.len(),
            total_bytes: entries.iter().map(|(_, size)| size).sum(),
        })
    }

    /// Remove every cached response; returns how many were removed
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (path, _) in self.entries().await? {
            if remove_if_exists(&path)
                .await
                .map_err(|e| CacheError::Write(path.clone(), e))?
            {
                removed += 1;
            }
        }
        info!("Response cache cleared: {} entries", removed);
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache(dir: &TempDir, namespace: &str) -> ResponseCache {
        ResponseCache::new(dir.path().join("responses"), namespace)
    }

    #[tokio::test]
    async fn test_store_then_get() {
        let temp_dir = TempDir::new().unwrap();
        let cache = cache(&temp_dir, "offline/m");

        assert_eq!(cache.get("Subject: Foo").await, None);
        cache.store("Subject: Foo", "# Foo\n").await.unwrap();
        assert_eq!(cache.get("Subject: Foo").await.as_deref(), Some("# Foo\n"));
        assert_eq!(cache.get("Subject: Bar").await, None);
    }

    #[tokio::test]
    async fn test_namespace_separates_backends() {
        let temp_dir = TempDir::new().unwrap();
        cache(&temp_dir, "openai/gpt").store("p", "one").await.unwrap();
        assert_eq!(cache(&temp_dir, "ollama/llama3").get("p").await, None);
        assert_eq!(cache(&temp_dir, "openai/gpt").get("p").await.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let cache = cache(&temp_dir, "ns");
        std::fs::create_dir_all(cache.dir()).unwrap();
        std::fs::write(cache.entry_path(&cache.key_for("p")), "{ nope").unwrap();
        assert_eq!(cache.get("p").await, None);

        // Overwritten by the next store
        cache.store("p", "fresh").await.unwrap();
        assert_eq!(cache.get("p").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let cache = cache(&temp_dir, "ns");
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());

        cache.store("a", "alpha").await.unwrap();
        cache.store("b", "beta").await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.total_bytes > 0);

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.stats().await.unwrap().entries, 0);
        assert_eq!(cache.get("a").await, None);
    }
}
