//! Extraction data types

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Kind of documentable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Namespace / `mod` block
    Module,
    /// class, struct, enum, trait, interface
    Class,
    Function,
    /// C++ `template<...>` class or function
    Template,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Module => "module",
            UnitKind::Class => "class",
            UnitKind::Function => "function",
            UnitKind::Template => "template",
        }
    }
}

/// One documentable entity extracted from a file
///
/// Immutable once built; lives only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceUnit {
    /// Source path relative to the tree root, `/`-separated
    pub path: String,
    pub kind: UnitKind,
    /// Scopes joined with `::` in every language
    pub qualified_name: String,
    pub signature_text: String,
    pub raw_body_excerpt: String,
    /// Qualified name of the enclosing scope, if any
    pub parent_unit_ref: Option<String>,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
}

impl SourceUnit {
    pub fn short_name(&self) -> &str {
        self.qualified_name
            .rsplit("::")
            .next()
            .unwrap_or(&self.qualified_name)
    }
}

/// A fragment that was skipped, or a fallback that was taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionWarning {
    pub path: String,
    pub line: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.path, line, self.message),
            None => write!(f, "{}: {}", self.path, self.message),
        }
    }
}

/// Units plus any warnings for a single file
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub units: Vec<SourceUnit>,
    pub warnings: Vec<ExtractionWarning>,
}

impl Extraction {
    pub(crate) fn warn(&mut self, path: &str, line: Option<usize>, message: impl Into<String>) {
        self.warnings.push(ExtractionWarning {
            path: path.to_string(),
            line,
            message: message.into(),
        });
    }
}

/// Source language, as far as extraction cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    /// Any other curly-brace language (C, C++, Java, C#, Go, TypeScript...)
    Brace,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            _ => Language::Brace,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Brace => "c-family",
        }
    }
}

/// Collapse whitespace runs and cap the length
pub(crate) fn normalize_signature(text: &str) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&joined, 300)
}

/// Truncate on a char boundary
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_path() {
        assert_eq!(Language::from_path("src/lib.rs"), Language::Rust);
        assert_eq!(Language::from_path("tools/gen.PY"), Language::Python);
        assert_eq!(Language::from_path("web/app.mjs"), Language::JavaScript);
        assert_eq!(Language::from_path("net/socket.hpp"), Language::Brace);
        assert_eq!(Language::from_path("Makefile"), Language::Brace);
    }

    #[test]
    fn test_normalize_signature() {
        assert_eq!(
            normalize_signature("int  add(int a,\n        int b)"),
            "int add(int a, int b)"
        );
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
