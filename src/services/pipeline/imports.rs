//! Local dependency detection for the project prompt
//!
//! Only in-tree references are kept: quoted includes, relative imports and
//! crate-local paths. System and third-party imports are ignored.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::services::extractor::Language;

static RE_QUOTED_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*#\s*include\s+"([^"]+)""#).unwrap());

static RE_RUST_MOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(\w+)\s*;").unwrap());

static RE_RUST_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+((?:crate|super)::[\w:]+)").unwrap());

static RE_PY_RELATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+(\.[\w.]*)\s+import").unwrap());

static RE_JS_RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:from\s+|require\(\s*|import\s+)['"](\.{1,2}/[^'"]+)['"]"#).unwrap()
});

/// In-tree dependencies named by `source`, in first-seen order
pub fn local_imports(path: &str, source: &str) -> Vec<String> {
    let language = Language::from_path(path);
    let mut found: Vec<String> = Vec::new();

    for line in source.lines() {
        let captures = match language {
            Language::Rust => RE_RUST_MOD
                .captures(line)
                .or_else(|| RE_RUST_USE.captures(line)),
            Language::Python => RE_PY_RELATIVE.captures(line),
            Language::JavaScript => RE_JS_RELATIVE.captures(line),
            Language::Brace => RE_QUOTED_INCLUDE
                .captures(line)
                .or_else(|| RE_JS_RELATIVE.captures(line)),
        };
        if let Some(name) = captures.and_then(|c| c.get(1)) {
            let name = name.as_str().trim_end_matches(':').to_string();
            if !found.contains(&name) {
                found.push(name);
            }
        }
    }
    found
}
