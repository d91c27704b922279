//! Source tree scanner
//!
//! Walks the source root and returns every candidate file with its content
//! and fingerprint, keyed by `/`-separated path relative to the root.

use glob::{MatchOptions, Pattern};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::utils::fingerprint;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("source root {0} is not a readable directory")]
    Root(PathBuf),

    #[error("invalid glob pattern `{0}`: {1}")]
    Pattern(String, String),
}

/// One candidate source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub fingerprint: String,
    pub content: Vec<u8>,
}

/// Everything one walk saw
#[derive(Debug, Default)]
pub struct SourceTree {
    pub files: BTreeMap<String, SourceFile>,
    /// Files that could not be read and directories that could not be
    /// listed. An empty path stands for the whole tree.
    pub unreadable: BTreeSet<String>,
}

impl SourceTree {
    /// True when `path` is, or lies below, an unreadable entry
    pub fn is_unreadable(&self, path: &str) -> bool {
        self.unreadable.iter().any(|entry| {
            entry.is_empty()
                || path == entry
                || path
                    .strip_prefix(entry.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// A glob, plus the same glob without a leading `**/` so that it also
/// matches at the root
struct GlobRule {
    pattern: Pattern,
    rootless: Option<Pattern>,
}

impl GlobRule {
    fn new(raw: &str) -> Result<Self, ScanError> {
        let compile =
            |p: &str| Pattern::new(p).map_err(|e| ScanError::Pattern(raw.to_string(), e.to_string()));
        Ok(Self {
            pattern: compile(raw)?,
            rootless: raw.strip_prefix("**/").map(compile).transpose()?,
        })
    }

    fn matches(&self, relative: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.pattern.matches_with(relative, options)
            || self
                .rootless
                .as_ref()
                .is_some_and(|p| p.matches_with(relative, options))
    }
}

pub struct SourceScanner {
    root: PathBuf,
    includes: Vec<GlobRule>,
    excludes: Vec<GlobRule>,
    /// Output locations that must never be scanned as input
    skip_dirs: Vec<PathBuf>,
    max_file_size: u64,
    read: fn(&Path) -> io::Result<Vec<u8>>,
}

impl SourceScanner {
    pub fn new(config: &AppConfig) -> Result<Self, ScanError> {
        let compile = |patterns: &[String]| -> Result<Vec<GlobRule>, ScanError> {
            patterns.iter().map(|p| GlobRule::new(p)).collect()
        };

        let mut skip_dirs = vec![config.docs_dir.clone()];
        if let Some(parent) = config.manifest_path.parent() {
            skip_dirs.push(parent.to_path_buf());
        }
        skip_dirs.push(config.cache.dir.clone());

        Ok(Self {
            root: config.source_root.clone(),
            includes: compile(&config.include_patterns)?,
            excludes: compile(&config.exclude_patterns)?,
            skip_dirs: skip_dirs.iter().map(|d| normalize(d)).collect(),
            max_file_size: config.max_file_size,
            read: |path| fs::read(path),
        })
    }

    #[cfg(test)]
    fn with_reader(mut self, read: fn(&Path) -> io::Result<Vec<u8>>) -> Self {
        self.read = read;
        self
    }

    fn is_candidate(&self, relative: &str) -> bool {
        self.includes.iter().any(|g| g.matches(relative))
            && !self.excludes.iter().any(|g| g.matches(relative))
    }

    fn is_skipped_dir(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.skip_dirs.iter().any(|d| !d.as_os_str().is_empty() && path == *d)
    }

    /// Walk the tree. Entries that exist but cannot be read are reported in
    /// [`SourceTree::unreadable`] rather than silently left out.
    pub fn scan(&self) -> Result<SourceTree, ScanError> {
        if !self.root.is_dir() || fs::read_dir(&self.root).is_err() {
            return Err(ScanError::Root(self.root.clone()));
        }

        info!("Scanning source tree: {}", self.root.display());
        let mut tree = SourceTree::default();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                !hidden && !(entry.file_type().is_dir() && self.is_skipped_dir(entry.path()))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let relative = e
                        .path()
                        .and_then(|p| relative_path(&self.root, p))
                        .unwrap_or_default();
                    warn!("Unreadable entry `{}`: {}", relative, e);
                    tree.unreadable.insert(relative);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_path(&self.root, entry.path()) else {
                continue;
            };
            if !self.is_candidate(&relative) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.max_file_size {
                debug!("Skipping oversized file: {} ({} bytes)", relative, size);
                continue;
            }

            let content = match (self.read)(entry.path()) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Unreadable file {}: {}", relative, e);
                    tree.unreadable.insert(relative);
                    continue;
                }
            };

            tree.files.insert(
                relative.clone(),
                SourceFile {
                    fingerprint: fingerprint(&content),
                    path: relative,
                    content,
                },
            );
        }

        info!(
            "Scan completed: {} candidate files, {} unreadable",
            tree.files.len(),
            tree.unreadable.len()
        );
        Ok(tree)
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Canonical form where possible so `./docs` and `docs` compare equal
fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
