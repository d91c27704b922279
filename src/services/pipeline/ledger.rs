//! Commit ledger
//!
//! A source file's cache entry may only be written once every task that
//! reads it has produced its artifact. One failed or cancelled dependent
//! keeps the file out of the manifest so the next run picks it up again.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct CommitLedger {
    remaining: HashMap<String, usize>,
    failed: HashSet<String>,
}

impl CommitLedger {
    /// `dependents` maps each changed file to the number of tasks reading it
    pub fn new(dependents: HashMap<String, usize>) -> Self {
        Self {
            remaining: dependents,
            failed: HashSet::new(),
        }
    }

    /// Files no task depends on; they can commit right away
    pub fn ready(&mut self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(path, _)| path.clone())
            .collect();
        ready.sort();
        for path in &ready {
            self.remaining.remove(path);
        }
        ready
    }

    /// Record one task's outcome; returns the files that became committable
    pub fn settle(&mut self, sources: &[String], success: bool) -> Vec<String> {
        let mut ready = Vec::new();
        for source in sources {
            if !success {
                self.failed.insert(source.clone());
            }
            let Some(count) = self.remaining.get_mut(source) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.remaining.remove(source);
                if !self.failed.contains(source) {
                    ready.push(source.clone());
                }
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(entries: &[(&str, usize)]) -> CommitLedger {
        CommitLedger::new(entries.iter().map(|(p, n)| (p.to_string(), *n)).collect())
    }

    fn sources(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_commits_after_last_dependent() {
        let mut ledger = ledger(&[("a.rs", 2), ("b.rs", 1)]);
        assert!(ledger.ready().is_empty());

        assert_eq!(ledger.settle(&sources(&["a.rs", "b.rs"]), true), vec!["b.rs"]);
        assert_eq!(ledger.settle(&sources(&["a.rs"]), true), vec!["a.rs"]);
        // Settled files are gone from the ledger
        assert!(ledger.settle(&sources(&["a.rs"]), true).is_empty());
    }

    #[test]
    fn test_failure_holds_file_back() {
        let mut ledger = ledger(&[("a.rs", 2), ("b.rs", 1)]);
        assert!(ledger.settle(&sources(&["a.rs"]), false).is_empty());
        assert!(ledger.settle(&sources(&["a.rs"]), true).is_empty());
        assert_eq!(ledger.settle(&sources(&["b.rs"]), true), vec!["b.rs"]);
        assert!(ledger.ready().is_empty());
    }

    #[test]
    fn test_files_without_dependents_are_ready() {
        let mut ledger = ledger(&[("a.rs", 0), ("b.rs", 1)]);
        assert_eq!(ledger.ready(), vec!["a.rs"]);
        assert!(ledger.ready().is_empty());
        // Unknown sources are ignored
        assert!(ledger.settle(&sources(&["zzz.rs"]), true).is_empty());
    }
}
