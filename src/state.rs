//! Shared host state
//!
//! The host only ever sees runs through their [`RunShared`] view; it never
//! touches the manifest or task state directly.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::services::pipeline::{Pipeline, ProgressSnapshot, RunShared};

/// Every run started by this process, by id
pub type RunRegistry = DashMap<String, Arc<RunShared>>;

pub struct AppState {
    pub pipeline: Pipeline,
    pub runs: RunRegistry,
    /// Most recently started run
    active: Mutex<Option<Arc<RunShared>>>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            runs: DashMap::new(),
            active: Mutex::new(None),
        }
    }

    /// The run still in progress, if any
    pub fn active_run(&self) -> Option<Arc<RunShared>> {
        self.active
            .lock()
            .as_ref()
            .filter(|run| !run.is_finished())
            .cloned()
    }

    /// Start a background run unless one is already in progress or the
    /// configuration is invalid
    pub fn start_run(&self) -> AppResult<Arc<RunShared>> {
        let mut active = self.active.lock();
        if let Some(run) = active.as_ref().filter(|run| !run.is_finished()) {
            return Err(AppError::Conflict(format!(
                "run {} is still in progress",
                run.run_id
            )));
        }

        self.pipeline.config().validate()?;
        let handle = self.pipeline.run_async();
        let shared = handle.shared();
        self.runs.insert(shared.run_id.clone(), shared.clone());
        *active = Some(shared.clone());

        tokio::spawn(async move {
            let summary = handle.wait().await;
            info!("Run {} ended: {}", summary.run_id, summary.status);
        });
        Ok(shared)
    }

    pub fn get_run(&self, run_id: &str) -> AppResult<Arc<RunShared>> {
        self.runs
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("run {}", run_id)))
    }

    /// Snapshots of every known run, oldest first
    pub fn list_runs(&self) -> Vec<ProgressSnapshot> {
        let mut runs: Vec<Arc<RunShared>> =
            self.runs.iter().map(|entry| entry.value().clone()).collect();
        runs.sort_by_key(|run| run.started_at);
        runs.iter().map(|run| run.snapshot()).collect()
    }
}

pub fn create_shared_state(pipeline: Pipeline) -> Arc<AppState> {
    Arc::new(AppState::new(pipeline))
}
