//! Background publishing
//!
//! [`Pipeline::run_async`] starts a run on its own task and returns a
//! [`RunHandle`] at once. Finished results flow through the
//! [`ArtifactPublisher`]: the page is written atomically first and the
//! source file's cache entry is committed after, so a crash in between only
//! costs a regeneration on the next run.

use parking_lot::Mutex;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::generator::{contents_for, render_page};
use super::ledger::CommitLedger;
use super::linker::CrossLinker;
use super::orchestrator::{prepare, Orchestrator, Prepared, RunError, RunShared};
use super::planner::Plan;
use super::types::{
    FailureKind, GenerationResult, ProgressEvent, ProgressSnapshot, RunSummary, TaskFailure,
    TaskOutcome,
};
use crate::config::AppConfig;
use crate::services::backend::SharedBackend;
use crate::services::extractor::Extractor;
use crate::services::manifest::{CacheEntry, ManifestSnapshot, ManifestStore};
use crate::utils::{remove_if_exists, write_atomic};

/// Artifact IO errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, #[source] io::Error),

    #[error("failed to remove {0}: {1}")]
    Remove(PathBuf, #[source] io::Error),
}

/// Entry point for hosts: owns the configuration, backend and extractor
pub struct Pipeline {
    config: Arc<AppConfig>,
    backend: SharedBackend,
    extractor: Arc<Extractor>,
}

impl Pipeline {
    pub fn new(config: AppConfig, backend: SharedBackend) -> Self {
        let extractor = Extractor::detect(config.extractor, config.max_excerpt_chars);
        Self {
            config: Arc::new(config),
            backend,
            extractor: Arc::new(extractor),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start a run in the background
    pub fn run_async(&self) -> RunHandle {
        let run_id = Uuid::new_v4().to_string();
        info!("Starting run {}", run_id);

        let shared = Arc::new(RunShared::new(run_id));
        let orchestrator = Orchestrator::new(
            self.config.clone(),
            self.backend.clone(),
            self.extractor.clone(),
            shared.clone(),
        );
        let join = tokio::spawn(orchestrator.run());
        RunHandle { shared, join }
    }

    /// Scan, classify and plan without generating anything
    pub async fn plan(&self) -> Result<Prepared, RunError> {
        prepare(self.config.clone(), self.extractor.clone()).await
    }
}

/// Handle to a background run
pub struct RunHandle {
    shared: Arc<RunShared>,
    join: JoinHandle<RunSummary>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    /// Shared state, for registries that outlive the handle
    pub fn shared(&self) -> Arc<RunShared> {
        self.shared.clone()
    }

    pub fn progress(&self) -> (usize, usize) {
        self.shared.progress()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.subscribe()
    }

    /// Stop dispatching; in-flight calls finish and are published
    pub fn cancel(&self) {
        self.shared.request_stop();
    }

    /// Wait for completion (non-interactive builds only)
    pub async fn wait(self) -> RunSummary {
        match self.join.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Run {} aborted: {}", self.shared.run_id, e);
                let summary =
                    RunSummary::crashed(&self.shared.run_id, format!("run task aborted: {}", e));
                self.shared.finish(summary.clone());
                summary
            }
        }
    }
}

/// Writes pages and commits cache entries for one run
pub struct ArtifactPublisher {
    docs_dir: PathBuf,
    manifest: ManifestStore,
    plan: Arc<Plan>,
    linker: CrossLinker,
    /// Manifest as it was when the run started
    previous: ManifestSnapshot,
    ledger: Mutex<CommitLedger>,
    written: AtomicUsize,
    removed: AtomicUsize,
    manifest_errors: Mutex<Vec<String>>,
}

impl ArtifactPublisher {
    pub async fn new(
        docs_dir: PathBuf,
        manifest: ManifestStore,
        plan: Arc<Plan>,
        linker: CrossLinker,
    ) -> Self {
        let previous = manifest.snapshot().await;
        let ledger = CommitLedger::new(plan.dependents());
        Self {
            docs_dir,
            manifest,
            plan,
            linker,
            previous,
            ledger: Mutex::new(ledger),
            written: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            manifest_errors: Mutex::new(Vec::new()),
        }
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn manifest_errors(&self) -> Vec<String> {
        self.manifest_errors.lock().clone()
    }

    pub fn manifest(&self) -> &ManifestStore {
        &self.manifest
    }

    /// Write a successful result, then commit every source file that no
    /// longer waits on any task. Returns the outcome as published.
    pub async fn publish(&self, outcome: TaskOutcome) -> TaskOutcome {
        let outcome = match outcome {
            TaskOutcome::Succeeded(result) => match self.write(result).await {
                Ok(result) => TaskOutcome::Succeeded(result),
                Err(failure) => TaskOutcome::Failed(failure),
            },
            other => other,
        };

        let ready = self
            .ledger
            .lock()
            .settle(outcome.sources(), outcome.is_success());
        for source in ready {
            self.commit(&source).await;
        }
        outcome
    }

    /// Commit changed files that no task depends on
    pub async fn commit_ready(&self) {
        let ready = self.ledger.lock().ready();
        for source in ready {
            self.commit(&source).await;
        }
    }

    /// Remove the artifacts of deleted source files and forget them
    pub async fn remove_deleted(&self) -> usize {
        let mut count = 0;
        for source in &self.plan.changes.deleted {
            let Some(entry) = self.previous.get(source) else {
                continue;
            };
            let snapshot = self.manifest.snapshot().await;
            for output in &entry.outputs {
                if !self.referenced_elsewhere(output, source, &snapshot)
                    && self.remove_artifact(output).await
                {
                    count += 1;
                }
            }

            match self.manifest.remove(source).await {
                Ok(_) => info!("{} was deleted, cache entry dropped", source),
                Err(e) => self.record_manifest_error(source, &e),
            }
        }
        count
    }

    async fn write(&self, result: GenerationResult) -> Result<GenerationResult, TaskFailure> {
        let result = self.linker.link(result);
        let page = render_page(&result, contents_for(&self.plan, &result));
        let path = self.docs_dir.join(&result.target_output_path);

        if let Err(e) = write_atomic(&path, page.as_bytes()).await {
            let error = PublishError::Write(path, e);
            error!("{}", error);
            return Err(TaskFailure {
                task_id: result.task_id,
                level: result.level,
                target_output_path: result.target_output_path,
                sources: result.sources,
                attempts: result.attempts,
                kind: FailureKind::Publish,
                error: error.to_string(),
            });
        }

        self.written.fetch_add(1, Ordering::SeqCst);
        debug!("Wrote {}", path.display());
        Ok(result)
    }

    async fn commit(&self, source: &str) {
        let Some(file) = self.plan.files.get(source) else {
            return;
        };
        let outputs = self.plan.outputs_for(source);
        let entry = CacheEntry::new(file.fingerprint.clone(), outputs.clone());
        if let Err(e) = self.manifest.commit(source, entry).await {
            self.record_manifest_error(source, &e);
            return;
        }

        let Some(old) = self.previous.get(source) else {
            return;
        };
        let stale: Vec<&String> = old.outputs.iter().filter(|o| !outputs.contains(o)).collect();
        if stale.is_empty() {
            return;
        }
        let snapshot = self.manifest.snapshot().await;
        for output in stale {
            if !self.referenced_elsewhere(output, source, &snapshot) {
                self.remove_artifact(output).await;
            }
        }
    }

    /// Produced by this run, or recorded for another source file
    fn referenced_elsewhere(&self, output: &str, owner: &str, snapshot: &ManifestSnapshot) -> bool {
        self.plan
            .tasks
            .iter()
            .any(|t| t.target_output_path == output)
            || snapshot
                .iter()
                .any(|(path, entry)| path != owner && entry.outputs.iter().any(|o| o == output))
    }

    async fn remove_artifact(&self, output: &str) -> bool {
        let path = self.docs_dir.join(output);
        match remove_if_exists(&path).await {
            Ok(true) => {
                self.removed.fetch_add(1, Ordering::SeqCst);
                info!("Removed stale artifact {}", output);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("{}", PublishError::Remove(path, e));
                false
            }
        }
    }

    fn record_manifest_error(&self, source: &str, error: &dyn std::fmt::Display) {
        error!("Cache entry for {} not updated: {}", source, error);
        self.manifest_errors
            .lock()
            .push(format!("{}: {}", source, error));
    }
}
