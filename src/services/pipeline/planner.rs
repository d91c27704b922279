//! Run planning
//!
//! Extracts every present file (so the symbol index is complete), assigns a
//! unique artifact path to every project, module and unit page, and emits
//! tasks only for what the change set touches.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use super::imports::local_imports;
use super::linker::SymbolIndex;
use super::scanner::SourceFile;
use super::types::{ChangeSet, GenerationTask, Level, TaskScope};
use crate::config::{AppConfig, LevelToggles, OutputLayout};
use crate::services::extractor::{Extractor, SourceUnit};

/// Module for files at the top of the tree
pub const ROOT_MODULE: &str = "root";

/// A unit and the page it is documented on
#[derive(Debug, Clone)]
pub struct PlannedUnit {
    pub unit: SourceUnit,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct FilePlan {
    pub path: String,
    pub fingerprint: String,
    pub module: String,
    pub units: Vec<PlannedUnit>,
    pub imports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModulePlan {
    pub name: String,
    pub files: Vec<String>,
    pub target: String,
}

/// Everything a run needs after scanning
#[derive(Debug, Clone)]
pub struct Plan {
    pub project_name: String,
    pub strategy: &'static str,
    pub changes: ChangeSet,
    pub files: BTreeMap<String, FilePlan>,
    pub modules: BTreeMap<String, ModulePlan>,
    pub project_target: String,
    pub levels: LevelToggles,
    /// Ordered by level
    pub tasks: Vec<GenerationTask>,
    pub symbols: SymbolIndex,
    pub extraction_warnings: usize,
}

impl Plan {
    pub fn tasks_for(&self, level: Level) -> Vec<GenerationTask> {
        self.tasks
            .iter()
            .filter(|t| t.level == level)
            .cloned()
            .collect()
    }

    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// How many tasks each changed file waits on
    pub fn dependents(&self) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> =
            self.changes.changed().map(|p| (p.clone(), 0)).collect();
        for task in &self.tasks {
            for source in &task.sources {
                *counts.entry(source.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Artifacts recorded for `path` once it commits
    pub fn outputs_for(&self, path: &str) -> Vec<String> {
        let outputs: BTreeSet<&String> = self
            .tasks
            .iter()
            .filter(|t| t.sources.iter().any(|s| s == path))
            .map(|t| &t.target_output_path)
            .collect();
        outputs.into_iter().cloned().collect()
    }

    /// The planned unit documented at `target`
    pub fn unit_at(&self, path: &str, target: &str) -> Option<&PlannedUnit> {
        self.files
            .get(path)?
            .units
            .iter()
            .find(|u| u.target == target)
    }
}

/// First path component, or [`ROOT_MODULE`] for top-level files
pub fn module_of(path: &str) -> &str {
    match path.split_once('/') {
        Some((first, _)) => first,
        None => ROOT_MODULE,
    }
}

/// Lowercase; `::`, spaces and `_` become `-`; everything else
/// non-alphanumeric is dropped
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.replace("::", "-").chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if matches!(c, ' ' | '_' | '-') && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

fn join_dir(dir: &str, rest: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        rest.to_string()
    } else {
        format!("{}/{}", dir, rest)
    }
}

/// Hands out artifact paths, suffixing `-2`, `-3`... on collision
#[derive(Default)]
struct TargetAllocator {
    used: HashSet<String>,
}

impl TargetAllocator {
    fn claim(&mut self, stem: &str) -> String {
        let mut candidate = format!("{}.md", stem);
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{}-{}.md", stem, n);
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

pub struct Planner<'a> {
    levels: &'a LevelToggles,
    layout: &'a OutputLayout,
    project_name: String,
}

impl<'a> Planner<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        let project_name = config
            .source_root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "project".to_string());

        Self {
            levels: &config.levels,
            layout: &config.output,
            project_name,
        }
    }

    pub fn build(
        &self,
        files: &BTreeMap<String, SourceFile>,
        changes: ChangeSet,
        extractor: &Extractor,
    ) -> Plan {
        let mut targets = TargetAllocator::default();
        let project_target = targets.claim(&join_dir(&self.layout.project_dir, "index"));

        let mut modules: BTreeMap<String, ModulePlan> = BTreeMap::new();
        for path in files.keys() {
            let name = module_of(path);
            modules
                .entry(name.to_string())
                .or_insert_with(|| ModulePlan {
                    name: name.to_string(),
                    files: Vec::new(),
                    target: String::new(),
                })
                .files
                .push(path.clone());
        }
        for module in modules.values_mut() {
            module.target = targets.claim(&join_dir(&self.layout.module_dir, &sanitize(&module.name)));
        }

        let mut symbols = SymbolIndex::new();
        let mut extraction_warnings = 0;
        let mut file_plans = BTreeMap::new();
        for (path, file) in files {
            let mut extraction = extractor.extract(path, &file.content);
            extraction_warnings += extraction.warnings.len();
            extraction.units.sort_by_key(|u| (u.start_line, u.end_line));

            let units: Vec<PlannedUnit> = extraction
                .units
                .into_iter()
                .map(|unit| {
                    let stem = join_dir(
                        &self.layout.unit_dir,
                        &format!("{}/{}", path, sanitize(&unit.qualified_name)),
                    );
                    let target = targets.claim(&stem);
                    symbols.insert(&unit.qualified_name, &target);
                    PlannedUnit { unit, target }
                })
                .collect();

            let imports = local_imports(path, &String::from_utf8_lossy(&file.content));
            file_plans.insert(
                path.clone(),
                FilePlan {
                    path: path.clone(),
                    fingerprint: file.fingerprint.clone(),
                    module: module_of(path).to_string(),
                    units,
                    imports,
                },
            );
        }

        let tasks = self.plan_tasks(&changes, &file_plans, &modules, &project_target);
        info!(
            "Planned {} tasks over {} files ({} symbols indexed)",
            tasks.len(),
            file_plans.len(),
            symbols.len()
        );

        Plan {
            project_name: self.project_name.clone(),
            strategy: extractor.strategy(),
            changes,
            files: file_plans,
            modules,
            project_target,
            levels: self.levels.clone(),
            tasks,
            symbols,
            extraction_warnings,
        }
    }

    fn plan_tasks(
        &self,
        changes: &ChangeSet,
        files: &BTreeMap<String, FilePlan>,
        modules: &BTreeMap<String, ModulePlan>,
        project_target: &str,
    ) -> Vec<GenerationTask> {
        let changed: Vec<String> = changes.changed().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let touched_modules: HashSet<&str> = changes
            .changed()
            .chain(changes.deleted.iter())
            .map(|p| module_of(p))
            .collect();
        let mut tasks = Vec::new();

        if self.levels.project && !files.is_empty() && !touched_modules.is_empty() {
            tasks.push(GenerationTask::new(
                Level::Project,
                TaskScope::Project,
                self.project_name.clone(),
                project_target,
                changed.clone(),
            ));
        }

        if self.levels.module {
            for module in modules.values() {
                if !touched_modules.contains(module.name.as_str()) {
                    continue;
                }
                let sources: Vec<String> = module
                    .files
                    .iter()
                    .filter(|f| changes.is_changed(f))
                    .cloned()
                    .collect();
                tasks.push(GenerationTask::new(
                    Level::Module,
                    TaskScope::Module {
                        name: module.name.clone(),
                    },
                    format!("Module {}", module.name),
                    module.target.clone(),
                    sources,
                ));
            }
        }

        if self.levels.unit {
            for path in &changed {
                let Some(file) = files.get(path) else {
                    continue;
                };
                for planned in &file.units {
                    tasks.push(GenerationTask::new(
                        Level::Unit,
                        TaskScope::Unit {
                            path: path.clone(),
                            qualified_name: planned.unit.qualified_name.clone(),
                        },
                        planned.unit.qualified_name.clone(),
                        planned.target.clone(),
                        vec![path.clone()],
                    ));
                }
            }
        }

        debug!(
            "Tasks: {} changed files, {} touched modules",
            changed.len(),
            touched_modules.len()
        );
        tasks
    }
}
