//! Pipeline data types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Generation pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Project,
    Module,
    Unit,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Project, Level::Module, Level::Unit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Project => "project",
            Level::Module => "module",
            Level::Unit => "unit",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskScope {
    Project,
    Module { name: String },
    Unit { path: String, qualified_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One request for one (scope, level) pair
#[derive(Debug, Clone, Serialize)]
pub struct GenerationTask {
    pub task_id: String,
    pub level: Level,
    pub scope: TaskScope,
    /// Heading of the written artifact
    pub title: String,
    /// Filled in right before dispatch, once higher levels have drained
    pub prompt: String,
    /// Relative to the docs directory, unique within a run
    pub target_output_path: String,
    /// Source files whose cache entries wait on this task
    pub sources: Vec<String>,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl GenerationTask {
    pub fn new(
        level: Level,
        scope: TaskScope,
        title: impl Into<String>,
        target_output_path: impl Into<String>,
        sources: Vec<String>,
    ) -> Self {
        let target_output_path = target_output_path.into();
        Self {
            task_id: format!("{}:{}", level, target_output_path),
            level,
            scope,
            title: title.into(),
            prompt: String::new(),
            target_output_path,
            sources,
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }
}

/// Parsed output of a successful task
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub task_id: String,
    pub level: Level,
    pub title: String,
    pub target_output_path: String,
    pub content: String,
    /// Identifier paths mentioned in the content
    pub referenced_symbols: Vec<String>,
    pub sources: Vec<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Retry budget exhausted
    Transient,
    /// Rejected outright
    Permanent,
    /// Generated but could not be written
    Publish,
}

/// A task that produced no artifact
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub level: Level,
    pub target_output_path: String,
    pub sources: Vec<String>,
    pub attempts: u32,
    pub kind: FailureKind,
    pub error: String,
}

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded(GenerationResult),
    Failed(TaskFailure),
    /// Never dispatched because the stop flag was set
    Cancelled(GenerationTask),
}

impl TaskOutcome {
    pub fn sources(&self) -> &[String] {
        match self {
            TaskOutcome::Succeeded(r) => &r.sources,
            TaskOutcome::Failed(f) => &f.sources,
            TaskOutcome::Cancelled(t) => &t.sources,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }
}

/// Change Detector output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub unchanged: BTreeSet<String>,
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// Present but unreadable; kept as they are and also listed in `unchanged`
    /// when the manifest knows them
    pub unreadable: BTreeSet<String>,
}

impl ChangeSet {
    /// New and modified files
    pub fn changed(&self) -> impl Iterator<Item = &String> {
        self.new.iter().chain(self.modified.iter())
    }

    pub fn is_changed(&self, path: &str) -> bool {
        self.new.contains(path) || self.modified.contains(path)
    }

    pub fn counts(&self) -> FileCounts {
        FileCounts {
            unchanged: self.unchanged.len(),
            new: self.new.len(),
            modified: self.modified.len(),
            deleted: self.deleted.len(),
            unreadable: self.unreadable.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    pub unchanged: usize,
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    #[serde(default)]
    pub unreadable: usize,
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "level", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Planning,
    Dispatching(Level),
    Draining(Level),
    Done,
    Degraded,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Degraded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelStatus {
    /// Disabled, or nothing to do
    Skipped,
    Complete,
    /// Some tasks failed
    Partial,
    /// Every task failed
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelReport {
    pub level: Level,
    pub status: LevelStatus,
    pub planned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl LevelReport {
    pub fn skipped(level: Level) -> Self {
        Self {
            level,
            status: LevelStatus::Skipped,
            planned: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
        }
    }

    pub fn from_outcomes(level: Level, outcomes: &[TaskOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Failed(_)))
            .count();
        let cancelled = outcomes.len() - succeeded - failed;

        let status = if outcomes.is_empty() {
            LevelStatus::Skipped
        } else if cancelled > 0 {
            LevelStatus::Cancelled
        } else if failed == 0 {
            LevelStatus::Complete
        } else if succeeded == 0 {
            LevelStatus::Failed
        } else {
            LevelStatus::Partial
        };

        Self {
            level,
            status,
            planned: outcomes.len(),
            succeeded,
            failed,
            cancelled,
        }
    }
}

/// Final outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Degraded { failures: usize },
    Cancelled,
    /// Configuration problem found before any task started
    Crashed { reason: String },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Complete => f.write_str("complete"),
            RunStatus::Degraded { failures } => write!(f, "degraded ({} failures)", failures),
            RunStatus::Cancelled => f.write_str("cancelled"),
            RunStatus::Crashed { reason } => write!(f, "crashed: {}", reason),
        }
    }
}

/// Everything a run reports when it ends
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub strategy: String,
    pub files: FileCounts,
    pub levels: Vec<LevelReport>,
    pub artifacts_written: usize,
    pub artifacts_removed: usize,
    pub extraction_warnings: usize,
    /// Manifest problem that forced a full rebuild
    pub storage_warning: Option<String>,
    /// Cache entries that could not be committed or removed
    pub manifest_errors: Vec<String>,
    pub failures: Vec<TaskFailure>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn crashed(run_id: &str, reason: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Crashed {
                reason: reason.into(),
            },
            strategy: String::new(),
            files: FileCounts::default(),
            levels: Vec::new(),
            artifacts_written: 0,
            artifacts_removed: 0,
            extraction_warnings: 0,
            storage_warning: None,
            manifest_errors: Vec::new(),
            failures: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn tasks_planned(&self) -> usize {
        self.levels.iter().map(|l| l.planned).sum()
    }
}

/// Broadcast to progress subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Planned {
        total: usize,
        files: FileCounts,
    },
    LevelStarted {
        level: Level,
        tasks: usize,
    },
    TaskCompleted {
        level: Level,
        target: String,
        completed: usize,
        total: usize,
    },
    TaskFailed {
        level: Level,
        target: String,
        error: String,
        completed: usize,
        total: usize,
    },
    LevelFinished {
        report: LevelReport,
    },
    Finished {
        summary: RunSummary,
    },
}

/// Point-in-time view of a run for the host
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub run_id: String,
    pub state: RunState,
    pub completed: usize,
    pub total: usize,
    pub stop_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}
