//! Whole-pipeline behavior against a scripted backend

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

use super::*;
use crate::config::{AppConfig, ExtractorMode, Provider, RetrySettings};
use crate::services::backend::testing::ScriptedBackend;
use crate::services::manifest::ManifestStore;
use crate::utils::fingerprint;

struct Workspace {
    _temp_dir: TempDir,
    config: AppConfig,
}

impl Workspace {
    fn new(files: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let mut config = AppConfig::default();
        config.source_root = root.join("src");
        config.docs_dir = root.join("docs");
        config.manifest_path = root.join("cache/manifest.json");
        config.cache.enabled = false;
        config.cache.dir = root.join("cache/responses");
        config.backend.provider = Provider::Offline;
        config.extractor = ExtractorMode::Heuristic;
        config.concurrency_limit = 2;
        config.retry = RetrySettings {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
        };
        std::fs::create_dir_all(&config.source_root).unwrap();

        let workspace = Self {
            _temp_dir: temp_dir,
            config,
        };
        for (path, content) in files {
            workspace.write(path, content);
        }
        workspace
    }

    fn write(&self, path: &str, content: &str) {
        let full = self.config.source_root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    fn delete(&self, path: &str) {
        std::fs::remove_file(self.config.source_root.join(path)).unwrap();
    }

    async fn run(&self, backend: &Arc<ScriptedBackend>) -> RunSummary {
        Pipeline::new(self.config.clone(), backend.clone())
            .run_async()
            .wait()
            .await
    }

    fn manifest_bytes(&self) -> Vec<u8> {
        std::fs::read(&self.config.manifest_path).unwrap_or_default()
    }

    async fn manifest_keys(&self) -> BTreeSet<String> {
        ManifestStore::load(&self.config.manifest_path)
            .await
            .unwrap()
            .snapshot()
            .await
            .into_keys()
            .collect()
    }

    fn artifacts(&self) -> BTreeSet<String> {
        let docs = &self.config.docs_dir;
        WalkDir::new(docs)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(docs)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect()
    }

    fn artifact(&self, path: &str) -> String {
        std::fs::read_to_string(self.config.docs_dir.join(path)).unwrap()
    }
}

fn level(summary: &RunSummary, level: Level) -> &LevelReport {
    summary.levels.iter().find(|l| l.level == level).unwrap()
}

fn three_modules() -> Vec<(&'static str, &'static str)> {
    vec![
        ("net/socket.hpp", "class Socket {\n};\n"),
        ("core/log.hpp", "class Log {\n};\n"),
        ("main.cpp", "class App {\n};\n"),
    ]
}

#[tokio::test]
async fn test_second_run_without_changes_is_a_no_op() {
    let workspace = Workspace::new(&three_modules());
    let backend = Arc::new(ScriptedBackend::new());

    let handle = Pipeline::new(workspace.config.clone(), backend.clone()).run_async();
    let shared = handle.shared();
    let first = handle.wait().await;
    assert_eq!(first.status, RunStatus::Complete);
    // 1 project + 3 modules + 3 units
    assert_eq!(first.tasks_planned(), 7);
    assert_eq!(backend.call_count(), 7);
    assert_eq!(shared.progress(), (7, 7));
    assert_eq!(shared.state(), RunState::Done);

    let manifest = workspace.manifest_bytes();
    let artifacts = workspace.artifacts();
    assert_eq!(artifacts.len(), 7);

    let second = workspace.run(&backend).await;
    assert_eq!(second.status, RunStatus::Complete);
    assert_eq!(second.tasks_planned(), 0);
    assert_eq!(second.files.unchanged, 3);
    assert_eq!(backend.call_count(), 7);
    assert_eq!(workspace.manifest_bytes(), manifest);
    assert_eq!(workspace.artifacts(), artifacts);
}

#[tokio::test]
async fn test_one_modified_file_only_touches_its_scopes() {
    let workspace = Workspace::new(&three_modules());
    workspace.run(&Arc::new(ScriptedBackend::new())).await;

    workspace.write("core/log.hpp", "class Log {\n};\nclass Sink {\n};\n");
    let backend = Arc::new(ScriptedBackend::new());
    let summary = workspace.run(&backend).await;

    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.files.modified, 1);
    assert_eq!(level(&summary, Level::Project).planned, 1);
    assert_eq!(level(&summary, Level::Module).planned, 1);
    assert_eq!(level(&summary, Level::Unit).planned, 2);

    assert_eq!(backend.prompts_containing("Subject: core\n"), 1);
    assert_eq!(backend.prompts_containing("Subject: net\n"), 0);
    assert_eq!(backend.prompts_containing("Subject: Socket\n"), 0);
    assert_eq!(backend.prompts_containing("Subject: App\n"), 0);
    assert_eq!(backend.prompts_containing("Subject: Sink\n"), 1);
}

#[tokio::test]
async fn test_in_flight_calls_respect_concurrency_limit() {
    let files: Vec<(String, String)> = (0..8)
        .map(|i| {
            (
                format!("m{}/f{}.hpp", i % 3, i),
                format!("class A{} {{\n}};\nclass B{} {{\n}};\n", i, i),
            )
        })
        .collect();
    let refs: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();

    let mut workspace = Workspace::new(&refs);
    workspace.config.concurrency_limit = 3;
    let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(10)));
    let summary = workspace.run(&backend).await;

    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(backend.call_count(), summary.tasks_planned());
    assert!(backend.peak_in_flight() <= 3);
}

#[tokio::test]
async fn test_permanent_failure_is_isolated() {
    let workspace = Workspace::new(&[
        ("api.hpp", "class Alpha {\n};\nclass Beta {\n};\n"),
        ("bad.hpp", "class Broken {\n};\n"),
        ("core/x.hpp", "class Gamma {\n};\n"),
    ]);
    let backend = Arc::new(ScriptedBackend::new().fail_permanently("Subject: Broken\n"));
    let summary = workspace.run(&backend).await;

    assert_eq!(summary.status, RunStatus::Degraded { failures: 1 });
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.level, Level::Unit);
    assert_eq!(failure.kind, FailureKind::Permanent);
    assert_eq!(failure.attempts, 1);
    assert_eq!(level(&summary, Level::Unit).status, LevelStatus::Partial);

    let artifacts = workspace.artifacts();
    for unit in [
        "generated/api/api.hpp/alpha.md",
        "generated/api/api.hpp/beta.md",
        "generated/api/core/x.hpp/gamma.md",
    ] {
        assert!(artifacts.contains(unit), "missing {}", unit);
    }
    assert!(!artifacts.contains("generated/api/bad.hpp/broken.md"));

    // The failed file stays out of the manifest and is retried next time
    let keys = workspace.manifest_keys().await;
    assert!(keys.contains("api.hpp"));
    assert!(keys.contains("core/x.hpp"));
    assert!(!keys.contains("bad.hpp"));

    let healthy = Arc::new(ScriptedBackend::new());
    let retry = workspace.run(&healthy).await;
    assert_eq!(retry.status, RunStatus::Complete);
    assert_eq!(retry.files.new, 1);
    assert_eq!(level(&retry, Level::Unit).planned, 1);
    assert!(workspace.manifest_keys().await.contains("bad.hpp"));
}

#[tokio::test]
async fn test_transient_failures_are_retried_within_a_run() {
    let workspace = Workspace::new(&[("a.hpp", "class Flaky {\n};\n")]);
    let backend = Arc::new(ScriptedBackend::new().fail_transiently("Subject: Flaky\n", 2));
    let summary = workspace.run(&backend).await;

    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(backend.prompts_containing("Subject: Flaky\n"), 3);
    assert!(workspace
        .artifacts()
        .contains("generated/api/a.hpp/flaky.md"));
}

#[tokio::test]
async fn test_interrupted_commit_costs_one_regeneration() {
    let workspace = Workspace::new(&[
        ("a.hpp", "class A {\n};\n"),
        ("b.hpp", "class B {\n};\n"),
    ]);
    workspace.run(&Arc::new(ScriptedBackend::new())).await;
    let committed_before = workspace.manifest_bytes();

    let changed = "class A {\n};\nclass A2 {\n};\n";
    workspace.write("a.hpp", changed);
    workspace.run(&Arc::new(ScriptedBackend::new())).await;
    let artifacts = workspace.artifacts();

    // Pages were written but the cache entry never made it to disk
    std::fs::write(&workspace.config.manifest_path, &committed_before).unwrap();

    let backend = Arc::new(ScriptedBackend::new());
    let summary = workspace.run(&backend).await;
    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.files.modified, 1);
    assert_eq!(level(&summary, Level::Unit).planned, 2);
    assert_eq!(backend.prompts_containing("Subject: B\n"), 0);
    assert_eq!(workspace.artifacts(), artifacts);

    let store = ManifestStore::load(&workspace.config.manifest_path)
        .await
        .unwrap();
    let entry = store.get("a.hpp").await.unwrap();
    assert_eq!(entry.fingerprint, fingerprint(changed.as_bytes()));
    for output in &entry.outputs {
        assert!(artifacts.contains(output));
    }

    let settled = Arc::new(ScriptedBackend::new());
    workspace.run(&settled).await;
    assert_eq!(settled.call_count(), 0);
}

#[tokio::test]
async fn test_missing_artifact_is_regenerated() {
    let workspace = Workspace::new(&[("a.hpp", "class A {\n};\n")]);
    workspace.run(&Arc::new(ScriptedBackend::new())).await;

    std::fs::remove_file(workspace.config.docs_dir.join("generated/api/a.hpp/a.md")).unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    let summary = workspace.run(&backend).await;

    assert_eq!(summary.files.modified, 1);
    assert!(backend.call_count() > 0);
    assert!(workspace
        .artifacts()
        .contains("generated/api/a.hpp/a.md"));
}

#[tokio::test]
async fn test_failed_project_level_does_not_block_lower_levels() {
    let workspace = Workspace::new(&three_modules());
    let backend = Arc::new(ScriptedBackend::new().fail_permanently("Level: project\n"));
    let summary = workspace.run(&backend).await;

    assert_eq!(summary.status, RunStatus::Degraded { failures: 1 });
    assert_eq!(level(&summary, Level::Project).status, LevelStatus::Failed);
    assert_eq!(level(&summary, Level::Module).status, LevelStatus::Complete);
    assert_eq!(level(&summary, Level::Unit).status, LevelStatus::Complete);

    // Every level drains before the next one is dispatched
    let prompts = backend.prompts.lock().clone();
    let rank = |p: &String| {
        Level::ALL
            .iter()
            .position(|l| p.starts_with(&format!("Level: {}\n", l)))
            .unwrap()
    };
    let ranks: Vec<usize> = prompts.iter().map(rank).collect();
    let mut sorted = ranks.clone();
    sorted.sort();
    assert_eq!(ranks, sorted);
}

#[tokio::test]
async fn test_module_prompt_quotes_project_summary() {
    let workspace = Workspace::new(&[("net/socket.hpp", "class Socket {\n};\n")]);
    let backend = Arc::new(
        ScriptedBackend::new().reply_with("Level: project\n", "The project moves packets.\n"),
    );
    workspace.run(&backend).await;

    assert_eq!(backend.prompts_containing("## Project context\n\nThe project moves packets."), 1);
}

#[tokio::test]
async fn test_qualified_reference_links_to_qualified_target() {
    let workspace = Workspace::new(&[(
        "foo.hpp",
        "namespace Foo {\nclass Bar {\n};\n}\nclass Bar {\n};\n",
    )]);
    let backend = Arc::new(ScriptedBackend::new().reply_with(
        "Level: module\n",
        "Wraps `Foo::Bar` and the top-level `Bar`.\n",
    ));
    let summary = workspace.run(&backend).await;
    assert_eq!(summary.status, RunStatus::Complete);

    let page = workspace.artifact("generated/modules/root.md");
    assert!(page.contains("[`Foo::Bar`](../api/foo.hpp/foo-bar.md)"), "{}", page);
    assert!(page.contains("[`Bar`](../api/foo.hpp/bar.md)"), "{}", page);
}

#[tokio::test]
async fn test_deleted_file_artifacts_are_removed() {
    let workspace = Workspace::new(&[
        ("a.hpp", "class A {\n};\n"),
        ("b.hpp", "class B {\n};\n"),
    ]);
    workspace.run(&Arc::new(ScriptedBackend::new())).await;
    assert!(workspace.artifacts().contains("generated/api/b.hpp/b.md"));

    workspace.delete("b.hpp");
    let summary = workspace.run(&Arc::new(ScriptedBackend::new())).await;

    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.files.deleted, 1);
    assert_eq!(summary.artifacts_removed, 1);
    let artifacts = workspace.artifacts();
    assert!(!artifacts.contains("generated/api/b.hpp/b.md"));
    assert!(artifacts.contains("generated/api/a.hpp/a.md"));
    assert!(artifacts.contains("generated/index.md"));
    assert!(!workspace.manifest_keys().await.contains("b.hpp"));
}

#[tokio::test]
async fn test_removed_unit_page_is_cleaned_up() {
    let workspace = Workspace::new(&[("a.hpp", "class A {\n};\nclass Old {\n};\n")]);
    workspace.run(&Arc::new(ScriptedBackend::new())).await;
    assert!(workspace.artifacts().contains("generated/api/a.hpp/old.md"));

    workspace.write("a.hpp", "class A {\n};\n");
    let summary = workspace.run(&Arc::new(ScriptedBackend::new())).await;

    assert_eq!(summary.artifacts_removed, 1);
    assert!(!workspace.artifacts().contains("generated/api/a.hpp/old.md"));
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    let workspace = Workspace::new(&three_modules());
    let backend = Arc::new(ScriptedBackend::new());

    let handle = Pipeline::new(workspace.config.clone(), backend.clone()).run_async();
    handle.cancel();
    let summary = handle.wait().await;

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(backend.call_count(), 0);
    assert!(summary
        .levels
        .iter()
        .all(|l| l.status == LevelStatus::Cancelled));
    assert!(workspace.manifest_keys().await.is_empty());
}

#[tokio::test]
async fn test_cancel_mid_run_publishes_in_flight_work_only() {
    let mut workspace = Workspace::new(&[(
        "a.hpp",
        "class Alpha {\n};\nclass Beta {\n};\nclass Gamma {\n};\n",
    )]);
    workspace.config.levels.project = false;
    workspace.config.levels.module = false;
    workspace.config.concurrency_limit = 1;
    let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(200)));

    let handle = Pipeline::new(workspace.config.clone(), backend.clone()).run_async();
    while backend.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.cancel();
    let summary = handle.wait().await;

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(backend.call_count(), 1);

    let units = level(&summary, Level::Unit);
    assert_eq!(units.status, LevelStatus::Cancelled);
    assert_eq!(units.succeeded, 1);
    assert_eq!(units.cancelled, 2);

    // The in-flight call finished and its page was published
    assert_eq!(summary.artifacts_written, 1);
    let artifacts = workspace.artifacts();
    assert_eq!(artifacts.len(), 1);
    let page = artifacts.iter().next().unwrap();
    assert!(page.starts_with("generated/api/a.hpp/"));

    // a.hpp still has undocumented units, so it is not recorded
    assert!(workspace.manifest_keys().await.is_empty());

    // The next run picks up where this one stopped
    let rerun = workspace.run(&backend).await;
    assert_eq!(rerun.status, RunStatus::Complete);
    assert_eq!(level(&rerun, Level::Unit).planned, 3);
    assert!(workspace.manifest_keys().await.contains("a.hpp"));
}

#[tokio::test]
async fn test_forced_rerun_is_served_from_response_cache() {
    let mut workspace = Workspace::new(&three_modules());
    workspace.config.cache.enabled = true;
    workspace.config.levels.project = false;

    let first = Arc::new(ScriptedBackend::new());
    let summary = workspace.run(&first).await;
    assert_eq!(summary.status, RunStatus::Complete);
    // 3 modules + 3 units
    assert_eq!(first.call_count(), 6);
    let artifacts = workspace.artifacts();

    workspace.config.force_regenerate = true;
    let second = Arc::new(ScriptedBackend::new());
    let summary = workspace.run(&second).await;
    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.tasks_planned(), 6);
    assert_eq!(second.call_count(), 0);
    assert_eq!(workspace.artifacts(), artifacts);
    assert_eq!(summary.files.modified, 3);
}

#[tokio::test]
async fn test_disabled_cache_always_calls_the_backend() {
    let mut workspace = Workspace::new(&three_modules());
    workspace.config.levels.project = false;
    workspace.run(&Arc::new(ScriptedBackend::new())).await;

    workspace.config.force_regenerate = true;
    let backend = Arc::new(ScriptedBackend::new());
    workspace.run(&backend).await;
    assert_eq!(backend.call_count(), 6);
    assert!(!workspace.config.cache.dir.exists());
}

#[tokio::test]
async fn test_unreadable_source_root_crashes_before_any_task() {
    let mut workspace = Workspace::new(&[]);
    workspace.config.source_root = workspace.config.source_root.join("missing");
    let backend = Arc::new(ScriptedBackend::new());
    let summary = workspace.run(&backend).await;

    assert!(matches!(summary.status, RunStatus::Crashed { .. }));
    assert_eq!(backend.call_count(), 0);
    assert!(!Path::new(&workspace.config.manifest_path).exists());
}

#[tokio::test]
async fn test_corrupt_manifest_triggers_full_rebuild() {
    let workspace = Workspace::new(&three_modules());
    std::fs::create_dir_all(workspace.config.manifest_path.parent().unwrap()).unwrap();
    std::fs::write(&workspace.config.manifest_path, "{ not json").unwrap();

    let summary = workspace.run(&Arc::new(ScriptedBackend::new())).await;
    assert_eq!(summary.status, RunStatus::Complete);
    assert!(summary.storage_warning.is_some());
    assert_eq!(summary.files.new, 3);
    assert_eq!(workspace.manifest_keys().await.len(), 3);
}

#[tokio::test]
async fn test_disabled_levels_produce_no_tasks() {
    let mut workspace = Workspace::new(&three_modules());
    workspace.config.levels.project = false;
    workspace.config.levels.module = false;
    let summary = workspace.run(&Arc::new(ScriptedBackend::new())).await;

    assert_eq!(level(&summary, Level::Project).status, LevelStatus::Skipped);
    assert_eq!(level(&summary, Level::Module).status, LevelStatus::Skipped);
    assert_eq!(level(&summary, Level::Unit).planned, 3);
    assert_eq!(workspace.manifest_keys().await.len(), 3);
}
