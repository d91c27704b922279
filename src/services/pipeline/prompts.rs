//! Prompt templates
//!
//! Prompts are built right before dispatch so that lower levels can quote
//! summaries produced earlier in the same run. Building reads existing pages
//! from disk, so it runs on the blocking pool.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::planner::{FilePlan, ModulePlan, Plan, PlannedUnit};
use super::types::{GenerationTask, TaskScope};
use crate::services::extractor::truncate_chars;

pub const SYSTEM_PROMPT: &str = "You are a technical documentation writer. You receive \
structured facts extracted from a source tree and write accurate, concise Markdown reference \
documentation. Do not invent APIs that are not listed. Mention other documented symbols by \
their qualified name in inline code. Do not add a top-level heading; the page title is added \
for you.";

/// Files listed in the project tree
const TREE_FILE_LIMIT: usize = 50;
/// Files listed per directory in the project tree
const TREE_DIR_LIMIT: usize = 5;
/// Characters quoted from a higher-level summary
const CONTEXT_CHARS: usize = 1500;
/// Characters quoted from each existing module page
const MODULE_EXCERPT_CHARS: usize = 400;

/// Read-only view used to materialize prompts for one level
pub struct PromptContext<'a> {
    pub plan: &'a Plan,
    pub docs_dir: &'a Path,
    /// Artifact path -> content written earlier in this run
    pub summaries: &'a HashMap<String, String>,
}

impl PromptContext<'_> {
    /// This run's summary for `target`, else the page already on disk
    fn summary_of(&self, target: &str) -> Option<String> {
        if let Some(content) = self.summaries.get(target) {
            return Some(content.clone());
        }
        std::fs::read_to_string(self.docs_dir.join(target))
            .ok()
            .map(|page| strip_page_chrome(&page).to_string())
            .filter(|body| !body.trim().is_empty())
    }

    pub fn build(&self, task: &GenerationTask) -> String {
        match &task.scope {
            TaskScope::Project => self.project_prompt(),
            TaskScope::Module { name } => match self.plan.modules.get(name) {
                Some(module) => self.module_prompt(module),
                None => self.missing_scope_prompt(task),
            },
            TaskScope::Unit { path, .. } => {
                match (
                    self.plan.files.get(path),
                    self.plan.unit_at(path, &task.target_output_path),
                ) {
                    (Some(file), Some(unit)) => self.unit_prompt(file, unit),
                    _ => self.missing_scope_prompt(task),
                }
            }
        }
    }

    fn project_prompt(&self) -> String {
        let plan = self.plan;
        let mut prompt = format!(
            "Level: project\nSubject: {}\n\nWrite the overview page for the project `{}`: its \
             purpose, its main modules and how they fit together.\n\n## Directory tree\n\n{}\n",
            plan.project_name,
            plan.project_name,
            directory_tree(plan.files.keys().map(String::as_str)),
        );

        let deps: Vec<String> = plan
            .files
            .values()
            .filter(|f| !f.imports.is_empty())
            .map(|f| format!("- {} -> {}", f.path, f.imports.join(", ")))
            .collect();
        if !deps.is_empty() {
            prompt.push_str("\n## Local dependencies\n\n");
            prompt.push_str(&deps.join("\n"));
            prompt.push('\n');
        }

        prompt.push_str("\n## Modules\n\n");
        for module in plan.modules.values() {
            let units: usize = module
                .files
                .iter()
                .filter_map(|f| plan.files.get(f))
                .map(|f| f.units.len())
                .sum();
            prompt.push_str(&format!(
                "- {}: {} files, {} units\n",
                module.name,
                module.files.len(),
                units
            ));
        }

        let excerpts: Vec<String> = plan
            .modules
            .values()
            .filter_map(|m| {
                std::fs::read_to_string(self.docs_dir.join(&m.target))
                    .ok()
                    .map(|page| {
                        format!(
                            "### {}\n\n{}",
                            m.name,
                            truncate_chars(strip_page_chrome(&page).trim(), MODULE_EXCERPT_CHARS)
                        )
                    })
            })
            .collect();
        if !excerpts.is_empty() {
            prompt.push_str("\n## Existing module summaries\n\n");
            prompt.push_str(&excerpts.join("\n\n"));
            prompt.push('\n');
        }
        prompt
    }

    fn module_prompt(&self, module: &ModulePlan) -> String {
        let mut prompt = format!(
            "Level: module\nSubject: {}\n\nWrite the summary page for the module `{}`: its \
             responsibility, its key types and functions, and how its files relate.\n\n## Files\n\n",
            module.name, module.name
        );

        for path in &module.files {
            let Some(file) = self.plan.files.get(path) else {
                continue;
            };
            prompt.push_str(&format!("### {}\n\n", path));
            if file.units.is_empty() {
                prompt.push_str("(no documentable units)\n\n");
                continue;
            }
            for planned in &file.units {
                prompt.push_str(&format!(
                    "- {} `{}`: `{}`\n",
                    planned.unit.kind.as_str(),
                    planned.unit.qualified_name,
                    planned.unit.signature_text
                ));
            }
            prompt.push('\n');
        }

        if let Some(summary) = self.summary_of(&self.plan.project_target) {
            prompt.push_str("## Project context\n\n");
            prompt.push_str(&truncate_chars(summary.trim(), CONTEXT_CHARS));
            prompt.push('\n');
        }
        prompt
    }

    fn unit_prompt(&self, file: &FilePlan, planned: &PlannedUnit) -> String {
        let unit = &planned.unit;
        let mut prompt = format!(
            "Level: unit\nSubject: {}\n\nWrite the reference page for the {} `{}` defined in \
             `{}` (lines {}-{}). Describe what it does, its parameters or members, and how it \
             is used.\n\n## Signature\n\n```\n{}\n```\n\n## Source excerpt\n\n```\n{}\n```\n",
            unit.qualified_name,
            unit.kind.as_str(),
            unit.qualified_name,
            unit.path,
            unit.start_line,
            unit.end_line,
            unit.signature_text,
            unit.raw_body_excerpt,
        );

        if let Some(parent) = &unit.parent_unit_ref {
            prompt.push_str(&format!("\nEnclosing scope: `{}`\n", parent));
        }

        let siblings: Vec<&str> = file
            .units
            .iter()
            .filter(|u| u.target != planned.target && u.unit.parent_unit_ref == unit.parent_unit_ref)
            .map(|u| u.unit.qualified_name.as_str())
            .collect();
        if !siblings.is_empty() {
            prompt.push_str(&format!("Defined alongside: {}\n", siblings.join(", ")));
        }

        let module_target = self
            .plan
            .modules
            .get(&file.module)
            .map(|m| m.target.as_str());
        if let Some(summary) = module_target.and_then(|t| self.summary_of(t)) {
            prompt.push_str("\n## Module context\n\n");
            prompt.push_str(&truncate_chars(summary.trim(), CONTEXT_CHARS));
            prompt.push('\n');
        }
        prompt
    }

    fn missing_scope_prompt(&self, task: &GenerationTask) -> String {
        format!(
            "Level: {}\nSubject: {}\n\nWrite a short reference page for `{}`.\n",
            task.level, task.title, task.title
        )
    }
}

/// Page body without the generated header and contents section
pub fn strip_page_chrome(page: &str) -> &str {
    let body = match page.find("\n---\n") {
        Some(pos) if page.starts_with("# ") => &page[pos + 5..],
        _ => page,
    };
    match body.find(super::generator::CONTENTS_MARKER) {
        Some(pos) => &body[..pos],
        None => body,
    }
}

/// Indented tree capped at [`TREE_FILE_LIMIT`] files and
/// [`TREE_DIR_LIMIT`] per directory
pub fn directory_tree<'a>(paths: impl Iterator<Item = &'a str>) -> String {
    let mut by_dir: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for path in paths {
        let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
        by_dir.entry(dir).or_default().push(name);
    }

    let mut out = String::new();
    let mut listed = 0;
    let mut omitted = 0;
    for (dir, names) in &by_dir {
        if listed >= TREE_FILE_LIMIT {
            omitted += names.len();
            continue;
        }
        let indent = if dir.is_empty() {
            ""
        } else {
            out.push_str(&format!("{}/\n", dir));
            "  "
        };
        for (i, name) in names.iter().enumerate() {
            if i >= TREE_DIR_LIMIT || listed >= TREE_FILE_LIMIT {
                omitted += names.len() - i;
                out.push_str(&format!("{}... ({} more)\n", indent, names.len() - i));
                break;
            }
            out.push_str(&format!("{}{}\n", indent, name));
            listed += 1;
        }
    }
    if omitted > 0 {
        out.push_str(&format!("({} files not shown)\n", omitted));
    }
    out
}
