//! Change detection
//!
//! The only gate deciding which files enter the pipeline.

use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::scanner::SourceTree;
use super::types::ChangeSet;
use crate::services::manifest::ManifestSnapshot;

pub struct ChangeDetector {
    force_regenerate: bool,
    docs_dir: PathBuf,
}

impl ChangeDetector {
    pub fn new(force_regenerate: bool, docs_dir: PathBuf) -> Self {
        Self {
            force_regenerate,
            docs_dir,
        }
    }

    /// Diff the current tree against the manifest.
    ///
    /// A file whose recorded artifacts are no longer on disk counts as
    /// modified even when its fingerprint matches. A known file that exists
    /// but could not be read stays unchanged, never deleted.
    pub fn classify(&self, tree: &SourceTree, snapshot: &ManifestSnapshot) -> ChangeSet {
        let files = &tree.files;
        let mut changes = ChangeSet::default();

        for (path, file) in files {
            if self.force_regenerate {
                changes.modified.insert(path.clone());
                continue;
            }

            match snapshot.get(path) {
                None => {
                    changes.new.insert(path.clone());
                }
                Some(entry) if entry.fingerprint != file.fingerprint => {
                    changes.modified.insert(path.clone());
                }
                Some(entry) => {
                    let missing = entry
                        .outputs
                        .iter()
                        .find(|output| !self.docs_dir.join(output.as_str()).is_file());
                    if let Some(output) = missing {
                        debug!("{} is stale: {} is missing", path, output);
                        changes.modified.insert(path.clone());
                    } else {
                        changes.unchanged.insert(path.clone());
                    }
                }
            }
        }

        for path in snapshot.keys() {
            if files.contains_key(path) {
                continue;
            }
            if tree.is_unreadable(path) {
                warn!("{} could not be read; keeping its cache entry and artifacts", path);
                changes.unchanged.insert(path.clone());
                changes.unreadable.insert(path.clone());
            } else {
                changes.deleted.insert(path.clone());
            }
        }

        let counts = changes.counts();
        info!(
            "Changes: {} unchanged, {} new, {} modified, {} deleted, {} unreadable",
            counts.unchanged, counts.new, counts.modified, counts.deleted, counts.unreadable
        );
        changes
    }
}
