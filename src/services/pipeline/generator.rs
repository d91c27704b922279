//! Response parsing and page rendering

use chrono::Local;

use super::linker::{relative_link, RE_SYMBOL_PATH};
use super::planner::Plan;
use super::types::{GenerationResult, GenerationTask, Level};

/// Marks where the generated contents section starts
pub const CONTENTS_MARKER: &str = "<!-- contents -->";

/// Turn raw backend text into a result for `task`
pub fn parse_response(task: &GenerationTask, text: &str) -> GenerationResult {
    let content = strip_wrapping_fence(text.trim()).trim().to_string();
    let referenced_symbols = collect_symbols(&content);

    GenerationResult {
        task_id: task.task_id.clone(),
        level: task.level,
        title: task.title.clone(),
        target_output_path: task.target_output_path.clone(),
        content,
        referenced_symbols,
        sources: task.sources.clone(),
        attempts: task.attempt_count,
    }
}

/// Models often wrap the whole answer in ```markdown ... ```
pub fn strip_wrapping_fence(text: &str) -> &str {
    if !text.starts_with("```") || !text.ends_with("```") || text.len() < 6 {
        return text;
    }
    let Some(first_newline) = text.find('\n') else {
        return text;
    };
    let inner = &text[first_newline + 1..text.len() - 3];
    // A second fence opener inside means the text is several blocks, not one wrapper
    if inner.lines().any(|l| l.trim_start().starts_with("```")) {
        return text;
    }
    inner
}

/// Inline-code identifier paths plus any `::`-qualified path in prose
pub fn collect_symbols(content: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    let mut push = |s: &str| {
        if !symbols.iter().any(|x| x == s) {
            symbols.push(s.to_string());
        }
    };

    let mut in_fence = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        for (i, span) in line.split('`').enumerate() {
            if i % 2 == 1 {
                let name = span.trim();
                let name = name.strip_suffix("()").unwrap_or(name);
                if RE_SYMBOL_PATH
                    .find(name)
                    .is_some_and(|m| m.start() == 0 && m.end() == name.len())
                {
                    push(name);
                }
            } else {
                for m in RE_SYMBOL_PATH.find_iter(span) {
                    if m.as_str().contains("::") {
                        push(m.as_str());
                    }
                }
            }
        }
    }
    symbols
}

/// Full page: title, provenance line, body, and a contents section for
/// project and module pages
pub fn render_page(result: &GenerationResult, contents: Option<String>) -> String {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S");
    let sources = match result.level {
        Level::Unit => format!(
            "`{}`",
            result.sources.first().map(String::as_str).unwrap_or("")
        ),
        _ => format!("{} changed files", result.sources.len()),
    };

    let mut page = format!(
        "# {}\n\n> {} documentation. Sources: {}. Generated: {}\n\n---\n\n{}\n",
        result.title,
        capitalize(result.level.as_str()),
        sources,
        now,
        result.content.trim_end()
    );
    if let Some(contents) = contents.filter(|c| !c.is_empty()) {
        page.push('\n');
        page.push_str(CONTENTS_MARKER);
        page.push_str("\n## Contents\n\n");
        page.push_str(&contents);
    }
    page
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Links from a project or module page to its child pages
pub fn contents_for(plan: &Plan, result: &GenerationResult) -> Option<String> {
    let from = result.target_output_path.as_str();
    match result.level {
        Level::Project if plan.levels.module => Some(
            plan.modules
                .values()
                .map(|m| {
                    format!(
                        "- [{}]({}) ({} files)\n",
                        m.name,
                        relative_link(from, &m.target),
                        m.files.len()
                    )
                })
                .collect(),
        ),
        Level::Module if plan.levels.unit => {
            let module = plan.modules.values().find(|m| m.target == from)?;
            let mut out = String::new();
            for file in module.files.iter().filter_map(|f| plan.files.get(f)) {
                if file.units.is_empty() {
                    continue;
                }
                out.push_str(&format!("### `{}`\n\n", file.path));
                for planned in &file.units {
                    out.push_str(&format!(
                        "- [{}]({}) ({})\n",
                        planned.unit.qualified_name,
                        relative_link(from, &planned.target),
                        planned.unit.kind.as_str()
                    ));
                }
                out.push('\n');
            }
            Some(out)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline::types::TaskScope;

    fn task() -> GenerationTask {
        GenerationTask::new(
            Level::Unit,
            TaskScope::Unit {
                path: "net/socket.cpp".into(),
                qualified_name: "net::Socket".into(),
            },
            "net::Socket",
            "generated/api/net/socket.cpp/net-socket.md",
            vec!["net/socket.cpp".into()],
        )
    }

    #[test]
    fn test_strip_wrapping_fence() {
        assert_eq!(strip_wrapping_fence("```markdown\nHello\n```"), "Hello\n");
        assert_eq!(strip_wrapping_fence("Hello"), "Hello");
        let two_blocks = "```\na\n```\ntext\n```\nb\n```";
        assert_eq!(strip_wrapping_fence(two_blocks), two_blocks);
    }

    #[test]
    fn test_parse_response_collects_symbols() {
        let text = "```md\nWraps `Buffer` and calls net::resolve.\nSee `read_all()` or `x + 1`.\n\n```\nignored::Inside\n```\n```";
        // The inner fence keeps the outer wrapper from being stripped
        let result = parse_response(&task(), text);
        assert!(result.content.starts_with("```md"));

        let text = "Wraps `Buffer` and calls net::resolve.\nSee `read_all()` or `x + 1`.\n";
        let result = parse_response(&task(), text);
        assert_eq!(result.referenced_symbols, vec!["Buffer", "net::resolve", "read_all"]);
        assert_eq!(result.sources, vec!["net/socket.cpp"]);
    }

    #[test]
    fn test_render_page() {
        let mut result = parse_response(&task(), "Body.");
        result.level = Level::Module;
        let page = render_page(&result, Some("- [a](a.md)\n".into()));
        assert!(page.starts_with("# net::Socket\n\n> Module documentation."));
        assert!(page.contains("\n---\n\nBody.\n"));
        assert!(page.contains("<!-- contents -->\n## Contents\n\n- [a](a.md)\n"));

        let page = render_page(&parse_response(&task(), "Body."), None);
        assert!(page.contains("Sources: `net/socket.cpp`"));
        assert!(!page.contains("## Contents"));
    }
}
