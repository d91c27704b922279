//! Multi-level orchestration
//!
//! Drives one run from planning through the project, module and unit
//! passes. A level is dispatched only after the previous one has fully
//! drained, and a failed level never blocks the next.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::detector::ChangeDetector;
use super::linker::CrossLinker;
use super::planner::{Plan, Planner};
use super::prompts::PromptContext;
use super::publisher::ArtifactPublisher;
use super::scanner::{ScanError, SourceScanner};
use super::scheduler::{RetryPolicy, Scheduler};
use super::types::{
    FileCounts, Level, LevelReport, ProgressEvent, ProgressSnapshot, RunState, RunStatus,
    RunSummary, TaskOutcome,
};
use crate::config::{AppConfig, ConfigError};
use crate::services::backend::{GenerateOptions, SharedBackend};
use crate::services::extractor::Extractor;
use crate::services::manifest::ManifestStore;
use crate::services::response_cache::ResponseCache;

/// Response cache for the configured backend and model
pub fn response_cache(config: &AppConfig, backend: &SharedBackend) -> ResponseCache {
    ResponseCache::new(
        config.cache.dir.clone(),
        format!("{}/{}", backend.name(), config.backend.model),
    )
}

/// Buffered progress events per subscriber
const EVENT_CAPACITY: usize = 256;

/// Errors that end a run before any task starts
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("source scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("planning aborted: {0}")]
    Planning(String),
}

/// State of one run, shared between the pipeline and the host
pub struct RunShared {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    state: RwLock<RunState>,
    completed: AtomicUsize,
    total: AtomicUsize,
    stop: Arc<AtomicBool>,
    events: broadcast::Sender<ProgressEvent>,
    summary: RwLock<Option<RunSummary>>,
}

impl RunShared {
    pub fn new(run_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            state: RwLock::new(RunState::Idle),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            stop: Arc::new(AtomicBool::new(false)),
            events,
            summary: RwLock::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    fn set_state(&self, state: RunState) {
        debug!("Run {}: {:?}", self.run_id, state);
        *self.state.write() = state;
    }

    /// Set the stop flag; tasks already in flight finish normally
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            info!("Run {}: stop requested", self.run_id);
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// `(completed, total)`; `completed` only ever grows
    pub fn progress(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.summary.read().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.summary.read().is_some()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let (completed, total) = self.progress();
        ProgressSnapshot {
            run_id: self.run_id.clone(),
            state: self.state(),
            completed,
            total,
            stop_requested: self.stop_requested(),
            summary: self.summary(),
        }
    }

    fn emit(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn planned(&self, total: usize, files: FileCounts) {
        self.total.store(total, Ordering::SeqCst);
        self.emit(ProgressEvent::Planned { total, files });
    }

    fn task_settled(&self, outcome: &TaskOutcome) {
        let total = self.total.load(Ordering::SeqCst);
        match outcome {
            TaskOutcome::Succeeded(result) => {
                let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    "[{}/{}] {} written",
                    completed, total, result.target_output_path
                );
                self.emit(ProgressEvent::TaskCompleted {
                    level: result.level,
                    target: result.target_output_path.clone(),
                    completed,
                    total,
                });
            }
            TaskOutcome::Failed(failure) => {
                let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit(ProgressEvent::TaskFailed {
                    level: failure.level,
                    target: failure.target_output_path.clone(),
                    error: failure.error.clone(),
                    completed,
                    total,
                });
            }
            TaskOutcome::Cancelled(_) => {}
        }
    }

    pub(super) fn finish(&self, summary: RunSummary) {
        let state = match summary.status {
            RunStatus::Complete => RunState::Done,
            _ => RunState::Degraded,
        };
        self.set_state(state);
        *self.summary.write() = Some(summary.clone());
        self.emit(ProgressEvent::Finished { summary });
    }
}

/// Output of the planning phase
pub struct Prepared {
    pub plan: Plan,
    pub manifest: ManifestStore,
    /// Why the manifest was discarded, if it was
    pub storage_warning: Option<String>,
}

/// Validate, load the manifest, scan, classify and plan.
///
/// Scanning and extraction are CPU-bound and run on the blocking pool.
pub async fn prepare(
    config: Arc<AppConfig>,
    extractor: Arc<Extractor>,
) -> Result<Prepared, RunError> {
    config.validate()?;

    let (manifest, storage_error) = ManifestStore::load_or_recover(&config.manifest_path).await;
    let snapshot = manifest.snapshot().await;

    let plan = tokio::task::spawn_blocking(move || -> Result<Plan, RunError> {
        let tree = SourceScanner::new(&config)?.scan()?;
        let changes = ChangeDetector::new(config.force_regenerate, config.docs_dir.clone())
            .classify(&tree, &snapshot);
        Ok(Planner::new(&config).build(&tree.files, changes, &extractor))
    })
    .await
    .map_err(|e| RunError::Planning(e.to_string()))??;

    Ok(Prepared {
        plan,
        manifest,
        storage_warning: storage_error.map(|e| e.to_string()),
    })
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    backend: SharedBackend,
    extractor: Arc<Extractor>,
    shared: Arc<RunShared>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        backend: SharedBackend,
        extractor: Arc<Extractor>,
        shared: Arc<RunShared>,
    ) -> Self {
        Self {
            config,
            backend,
            extractor,
            shared,
        }
    }

    /// Run to a terminal state; never panics or errors
    pub async fn run(self) -> RunSummary {
        let started = Instant::now();
        let run_id = self.shared.run_id.clone();
        self.shared.set_state(RunState::Planning);

        let mut summary = match self.execute().await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Run {} crashed: {}", run_id, e);
                RunSummary::crashed(&run_id, e.to_string())
            }
        };
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            "Run {} finished: {} ({} tasks, {} written, {} removed, {}ms)",
            run_id,
            summary.status,
            summary.tasks_planned(),
            summary.artifacts_written,
            summary.artifacts_removed,
            summary.elapsed_ms
        );
        self.shared.finish(summary.clone());
        summary
    }

    async fn execute(&self) -> Result<RunSummary, RunError> {
        let Prepared {
            mut plan,
            manifest,
            storage_warning,
        } = prepare(self.config.clone(), self.extractor.clone()).await?;

        let files = plan.changes.counts();
        let linker = CrossLinker::new(
            std::mem::take(&mut plan.symbols),
            self.config.enable_cross_references,
        );
        let plan = Arc::new(plan);
        self.shared.planned(plan.total_tasks(), files);

        let publisher =
            ArtifactPublisher::new(self.config.docs_dir.clone(), manifest, plan.clone(), linker)
                .await;
        publisher.remove_deleted().await;
        publisher.commit_ready().await;

        let mut scheduler = Scheduler::new(
            self.backend.clone(),
            GenerateOptions::from_config(&self.config.backend),
            RetryPolicy::from_settings(&self.config.retry),
            self.config.concurrency_limit,
            self.shared.stop.clone(),
        );
        if self.config.cache.enabled {
            scheduler = scheduler.with_cache(Arc::new(response_cache(&self.config, &self.backend)));
        }

        // Content written this run, keyed by artifact path, for lower-level prompts
        let mut summaries: HashMap<String, String> = HashMap::new();
        let mut levels = Vec::with_capacity(Level::ALL.len());
        let mut failures = Vec::new();
        let mut cancelled = false;

        for level in Level::ALL {
            let tasks = plan.tasks_for(level);
            if tasks.is_empty() {
                debug!("Level {}: nothing to do", level);
                levels.push(LevelReport::skipped(level));
                continue;
            }

            self.shared.set_state(RunState::Dispatching(level));
            self.shared.emit(ProgressEvent::LevelStarted {
                level,
                tasks: tasks.len(),
            });
            info!("Level {}: {} tasks", level, tasks.len());

            // Prompts quote pages from disk
            let tasks = {
                let plan = plan.clone();
                let docs_dir = self.config.docs_dir.clone();
                let summaries = summaries.clone();
                tokio::task::spawn_blocking(move || {
                    let context = PromptContext {
                        plan: &plan,
                        docs_dir: &docs_dir,
                        summaries: &summaries,
                    };
                    let mut tasks = tasks;
                    for task in &mut tasks {
                        task.prompt = context.build(task);
                    }
                    tasks
                })
                .await
                .map_err(|e| RunError::Planning(e.to_string()))?
            };

            let shared = &self.shared;
            let publisher = &publisher;
            let outcomes = scheduler
                .run(
                    tasks,
                    || shared.set_state(RunState::Draining(level)),
                    |outcome| async move {
                        let outcome = publisher.publish(outcome).await;
                        shared.task_settled(&outcome);
                        outcome
                    },
                )
                .await;

            for outcome in &outcomes {
                match outcome {
                    TaskOutcome::Succeeded(result) => {
                        summaries.insert(result.target_output_path.clone(), result.content.clone());
                    }
                    TaskOutcome::Failed(failure) => failures.push(failure.clone()),
                    TaskOutcome::Cancelled(_) => cancelled = true,
                }
            }

            let report = LevelReport::from_outcomes(level, &outcomes);
            if report.failed > 0 {
                warn!(
                    "Level {}: {} of {} tasks failed",
                    level, report.failed, report.planned
                );
            } else {
                info!("Level {}: {:?}", level, report.status);
            }
            self.shared.emit(ProgressEvent::LevelFinished {
                report: report.clone(),
            });
            levels.push(report);
        }

        let manifest_errors = publisher.manifest_errors();
        let failure_count = failures.len() + manifest_errors.len();
        let status = if cancelled {
            RunStatus::Cancelled
        } else if failure_count > 0 {
            RunStatus::Degraded {
                failures: failure_count,
            }
        } else {
            RunStatus::Complete
        };

        Ok(RunSummary {
            run_id: self.shared.run_id.clone(),
            status,
            strategy: plan.strategy.to_string(),
            files,
            levels,
            artifacts_written: publisher.written(),
            artifacts_removed: publisher.removed(),
            extraction_warnings: plan.extraction_warnings,
            storage_warning,
            manifest_errors,
            failures,
            elapsed_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline::types::{FailureKind, GenerationResult, TaskFailure};

    fn result(target: &str) -> TaskOutcome {
        TaskOutcome::Succeeded(GenerationResult {
            task_id: format!("unit:{}", target),
            level: Level::Unit,
            title: "T".into(),
            target_output_path: target.into(),
            content: String::new(),
            referenced_symbols: vec![],
            sources: vec![],
            attempts: 1,
        })
    }

    #[tokio::test]
    async fn test_progress_counter_is_monotonic() {
        let shared = RunShared::new("r1");
        let mut events = shared.subscribe();
        shared.planned(3, FileCounts::default());

        shared.task_settled(&result("a.md"));
        shared.task_settled(&TaskOutcome::Failed(TaskFailure {
            task_id: "unit:b.md".into(),
            level: Level::Unit,
            target_output_path: "b.md".into(),
            sources: vec![],
            attempts: 2,
            kind: FailureKind::Transient,
            error: "timeout".into(),
        }));
        assert_eq!(shared.progress(), (2, 3));

        assert!(matches!(
            events.recv().await.unwrap(),
            ProgressEvent::Planned { total: 3, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            ProgressEvent::TaskCompleted { completed: 1, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            ProgressEvent::TaskFailed { completed: 2, .. }
        ));
    }

    #[test]
    fn test_finish_sets_terminal_state() {
        let shared = RunShared::new("r2");
        shared.finish(RunSummary::crashed("r2", "bad root"));
        assert_eq!(shared.state(), RunState::Degraded);
        assert!(shared.is_finished());
        assert!(shared.state().is_terminal());

        let shared = RunShared::new("r3");
        let mut summary = RunSummary::crashed("r3", "");
        summary.status = RunStatus::Complete;
        shared.finish(summary);
        assert_eq!(shared.state(), RunState::Done);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let shared = RunShared::new("r4");
        assert!(!shared.stop_requested());
        shared.request_stop();
        shared.request_stop();
        assert!(shared.snapshot().stop_requested);
    }
}
