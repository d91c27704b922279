//! Bounded task scheduler
//!
//! Runs one level's tasks on a pool of `concurrency_limit` workers. Transient
//! backend errors are retried with exponential backoff; permanent ones fail
//! the task at once. A failed task never affects its siblings.

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::generator::parse_response;
use super::types::{FailureKind, GenerationTask, TaskFailure, TaskOutcome, TaskStatus};
use crate::config::RetrySettings;
use crate::services::backend::{BackendError, GenerateOptions, SharedBackend};
use crate::services::response_cache::ResponseCache;

/// Backoff schedule for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Including the first attempt
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Wait before retry number `retry` (1-based): `base * 2^(retry-1)`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

pub struct Scheduler {
    backend: SharedBackend,
    options: GenerateOptions,
    retry: RetryPolicy,
    concurrency: usize,
    /// Caps in-flight backend calls; released while a task backs off
    semaphore: Arc<Semaphore>,
    stop: Arc<AtomicBool>,
    cache: Option<Arc<ResponseCache>>,
}

impl Scheduler {
    pub fn new(
        backend: SharedBackend,
        options: GenerateOptions,
        retry: RetryPolicy,
        concurrency: usize,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            backend,
            options,
            retry,
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            stop,
            cache: None,
        }
    }

    /// Answer prompts seen before from `cache` and record new responses in it
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run `tasks` to completion.
    ///
    /// `on_drain` fires once the last task has been handed to a worker.
    /// `settle` sees every outcome as soon as it is known and may replace it
    /// (a result that could not be written becomes a failure).
    pub async fn run<D, F, Fut>(
        &self,
        tasks: Vec<GenerationTask>,
        on_drain: D,
        settle: F,
    ) -> Vec<TaskOutcome>
    where
        D: Fn() + Sync,
        F: Fn(TaskOutcome) -> Fut + Sync,
        Fut: Future<Output = TaskOutcome> + Send,
    {
        let total = tasks.len();
        let dispatched = AtomicUsize::new(0);
        let outcomes = Mutex::new(Vec::with_capacity(total));

        stream::iter(tasks)
            .for_each_concurrent(self.concurrency, |task| {
                let dispatched = &dispatched;
                let outcomes = &outcomes;
                let on_drain = &on_drain;
                let settle = &settle;
                async move {
                    if dispatched.fetch_add(1, Ordering::SeqCst) + 1 == total {
                        on_drain();
                    }
                    let outcome = settle(self.execute(task).await).await;
                    outcomes.lock().push(outcome);
                }
            })
            .await;

        outcomes.into_inner()
    }

    async fn execute(&self, mut task: GenerationTask) -> TaskOutcome {
        if self.stop.load(Ordering::SeqCst) {
            debug!("Stop requested, not dispatching {}", task.task_id);
            return TaskOutcome::Cancelled(task);
        }
        task.status = TaskStatus::Running;

        if let Some(cache) = &self.cache {
            if let Some(text) = cache.get(&task.prompt).await {
                debug!("{} answered from the response cache", task.task_id);
                task.status = TaskStatus::Succeeded;
                return TaskOutcome::Succeeded(parse_response(&task, &text));
            }
        }

        loop {
            task.attempt_count += 1;
            let result = match self.semaphore.acquire().await {
                Ok(_permit) => {
                    debug!(
                        "Dispatching {} (attempt {})",
                        task.task_id, task.attempt_count
                    );
                    self.backend.generate(&task.prompt, &self.options).await
                }
                Err(e) => Err(BackendError::Permanent(e.to_string())),
            };

            let error = match result {
                Ok(text) => {
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.store(&task.prompt, &text).await {
                            warn!("{}", e);
                        }
                    }
                    task.status = TaskStatus::Succeeded;
                    return TaskOutcome::Succeeded(parse_response(&task, &text));
                }
                Err(e) => e,
            };
            task.last_error = Some(error.to_string());

            let exhausted = task.attempt_count >= self.retry.max_attempts;
            if !error.is_transient() || exhausted {
                return self.fail(task, &error);
            }

            let delay = self.retry.delay_for(task.attempt_count);
            warn!(
                "{} failed ({}), retrying in {}ms",
                task.task_id,
                error,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;

            if self.stop.load(Ordering::SeqCst) {
                debug!("Stop requested, abandoning retries of {}", task.task_id);
                return TaskOutcome::Cancelled(task);
            }
        }
    }

    fn fail(&self, mut task: GenerationTask, error: &BackendError) -> TaskOutcome {
        task.status = TaskStatus::Failed;
        error!(
            "{} failed after {} attempt(s): {}",
            task.task_id, task.attempt_count, error
        );
        TaskOutcome::Failed(TaskFailure {
            task_id: task.task_id,
            level: task.level,
            target_output_path: task.target_output_path,
            sources: task.sources,
            attempts: task.attempt_count,
            kind: if error.is_transient() {
                FailureKind::Transient
            } else {
                FailureKind::Permanent
            },
            error: error.message().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::testing::ScriptedBackend;
    use crate::services::pipeline::types::{Level, TaskScope};

    fn options() -> GenerateOptions {
        GenerateOptions {
            max_tokens: 100,
            temperature: 0.0,
            timeout: Duration::from_secs(5),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn tasks(names: &[&str]) -> Vec<GenerationTask> {
        names
            .iter()
            .map(|name| {
                let mut task = GenerationTask::new(
                    Level::Unit,
                    TaskScope::Unit {
                        path: "a.rs".into(),
                        qualified_name: name.to_string(),
                    },
                    *name,
                    format!("api/{}.md", name),
                    vec!["a.rs".into()],
                );
                task.prompt = format!("Subject: {}\n", name);
                task
            })
            .collect()
    }

    fn scheduler(backend: Arc<ScriptedBackend>, limit: usize, retry: RetryPolicy) -> Scheduler {
        Scheduler::new(backend, options(), retry, limit, Arc::new(AtomicBool::new(false)))
    }

    async fn identity(outcome: TaskOutcome) -> TaskOutcome {
        outcome
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::from_settings(&RetrySettings::default());
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_in_flight_calls_never_exceed_limit() {
        let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(20)));
        let names: Vec<String> = (0..12).map(|i| format!("T{}", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let outcomes = scheduler(backend.clone(), 3, fast_retry(3))
            .run(tasks(&names), || {}, identity)
            .await;

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(TaskOutcome::is_success));
        assert!(backend.peak_in_flight() <= 3);
        assert!(backend.peak_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let backend = Arc::new(ScriptedBackend::new().fail_transiently("Flaky", 2));
        let outcomes = scheduler(backend.clone(), 2, fast_retry(3))
            .run(tasks(&["Flaky"]), || {}, identity)
            .await;

        match &outcomes[0] {
            TaskOutcome::Succeeded(result) => assert_eq!(result.attempts, 3),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let backend = Arc::new(ScriptedBackend::new().fail_transiently("Flaky", 10));
        let outcomes = scheduler(backend.clone(), 2, fast_retry(3))
            .run(tasks(&["Flaky"]), || {}, identity)
            .await;

        match &outcomes[0] {
            TaskOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::Transient);
                assert_eq!(failure.attempts, 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_once_and_stay_isolated() {
        let backend = Arc::new(ScriptedBackend::new().fail_permanently("Broken"));
        let outcomes = scheduler(backend.clone(), 2, fast_retry(3))
            .run(tasks(&["Good", "Broken", "Fine"]), || {}, identity)
            .await;

        let failed: Vec<&TaskFailure> = outcomes
            .iter()
            .filter_map(|o| match o {
                TaskOutcome::Failed(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].kind, FailureKind::Permanent);
        assert_eq!(failed[0].attempts, 1);
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 2);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_stop_flag_prevents_dispatch() {
        let backend = Arc::new(ScriptedBackend::new());
        let stop = Arc::new(AtomicBool::new(true));
        let scheduler = Scheduler::new(backend.clone(), options(), fast_retry(3), 2, stop);

        let outcomes = scheduler.run(tasks(&["A", "B"]), || {}, identity).await;
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, TaskOutcome::Cancelled(_))));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cached_prompts_skip_the_backend() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = Arc::new(ResponseCache::new(temp_dir.path().join("responses"), "scripted"));
        cache.store("Subject: A\n", "# Cached A").await.unwrap();

        let backend = Arc::new(ScriptedBackend::new());
        let outcomes = scheduler(backend.clone(), 2, fast_retry(1))
            .with_cache(cache.clone())
            .run(tasks(&["A", "B"]), || {}, identity)
            .await;

        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.prompts_containing("Subject: A"), 0);
        let cached = outcomes
            .iter()
            .find_map(|o| match o {
                TaskOutcome::Succeeded(r) if r.title == "A" => Some(r),
                _ => None,
            })
            .unwrap();
        assert_eq!(cached.content, "# Cached A");
        assert_eq!(cached.attempts, 0);

        // The fresh response for B was recorded
        assert!(cache.get("Subject: B\n").await.is_some());
    }

    #[tokio::test]
    async fn test_failed_responses_are_not_cached() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = Arc::new(ResponseCache::new(temp_dir.path().join("responses"), "scripted"));
        let backend = Arc::new(ScriptedBackend::new().fail_permanently("Broken"));

        scheduler(backend, 1, fast_retry(1))
            .with_cache(cache.clone())
            .run(tasks(&["Broken"]), || {}, identity)
            .await;
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_drain_hook_and_settle_see_every_task() {
        let backend = Arc::new(ScriptedBackend::new());
        let drained = AtomicUsize::new(0);
        let settled = AtomicUsize::new(0);

        let outcomes = scheduler(backend, 2, fast_retry(1))
            .run(
                tasks(&["A", "B", "C"]),
                || {
                    drained.fetch_add(1, Ordering::SeqCst);
                },
                |outcome| {
                    settled.fetch_add(1, Ordering::SeqCst);
                    async move { outcome }
                },
            )
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(drained.load(Ordering::SeqCst), 1);
        assert_eq!(settled.load(Ordering::SeqCst), 3);
    }
}
