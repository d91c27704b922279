//! Pattern-based extraction (fallback strategy)
//!
//! Line-oriented regular expressions over common declaration idioms.
//! Brace languages track scope by brace depth, Python by indentation.
//! Declarations are only recognised at file scope or directly inside a
//! namespace / type body; function bodies and unknown blocks are opaque.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{
    normalize_signature, truncate_chars, Extraction, Language, SourceUnit, UnitKind,
};

static RE_NAMESPACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(?:inline\s+)?namespace\s+([A-Za-z_]\w*(?:::[A-Za-z_]\w*)*)")
        .unwrap()
});

static RE_RUST_MOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_]\w*)\s*\{").unwrap());

static RE_EXTERN_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^extern\s+"[^"]*"\s*\{"#).unwrap());

static RE_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:pub(?:\([^)]*\))?|public|private|protected|internal|export|default|abstract|final|static|sealed|partial|declare|data|open)\s+)*(?:class|struct|interface|enum|trait|union)\s+(?:class\s+|struct\s+)?([A-Za-z_]\w*)")
        .unwrap()
});

static RE_GO_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b").unwrap());

static RE_IMPL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:unsafe\s+)?impl\b(?:\s*<.*?>)?\s+(?:.*?\s+for\s+)?(?:\w+::)*([A-Za-z_]\w*)")
        .unwrap()
});

static RE_KEYWORD_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:(?:pub(?:\([^)]*\))?|export|default|async|unsafe|const|static|extern(?:\s+"[^"]*")?|public|private|protected|override|suspend)\s+)*(?:fn|fun|func|function)\b\*?\s*(?:\([^)]*\)\s*)?([A-Za-z_$][\w$]*)"#)
        .unwrap()
});

static RE_ARROW_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>)")
        .unwrap()
});

static RE_TYPED_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>(?:[A-Za-z_][\w:<>,\*&\[\]\.\s]*?[\s\*&>\]])?)(?P<name>~?[A-Za-z_]\w*(?:::~?[A-Za-z_]\w*)*)\s*\(")
        .unwrap()
});

static RE_PY_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^class\s+([A-Za-z_]\w*)").unwrap());

static RE_PY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(").unwrap());

/// Names that look like calls but are control flow or types
const NON_DECL_NAMES: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "new", "else", "sizeof", "do", "case",
    "delete", "throw", "decltype", "static_assert", "alignof", "defined", "void", "int", "char",
    "bool", "float", "double", "long", "short", "unsigned", "signed", "auto", "const", "static",
    "operator", "typeof", "await", "assert",
];

/// Leading words that make a line a statement rather than a declaration
const STATEMENT_WORDS: &[&str] = &[
    "return", "new", "else", "throw", "case", "delete", "goto", "typedef", "using", "await",
    "yield", "co_return", "co_await", "let", "var",
];

/// How far a declaration may span before it is considered malformed
const MAX_DECL_LINES: usize = 8;

/// Pattern-based extractor
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    max_excerpt_chars: usize,
}

/// Open scope in brace mode
struct BraceScope {
    /// Qualified name; `None` for opaque blocks and transparent ones
    name: Option<String>,
    opaque: bool,
    /// Type bodies, where bare `name(...)` declares a member
    members: bool,
    /// Depth before the opening brace
    open_depth: i32,
    unit_index: Option<usize>,
}

/// Declaration waiting for its opening brace
struct PendingScope {
    line: usize,
    scope: BraceScope,
}

/// Recognised declaration head
struct Declaration {
    kind: UnitKind,
    name: String,
    /// Byte offset in the code line where the search for `{` / `;` starts
    search_from: usize,
    /// Unit-less scope (Rust `impl`, `extern "C"`)
    scope_only: bool,
    /// Prototype with `;` is still a unit (functions only)
    allow_prototype: bool,
}

impl HeuristicExtractor {
    pub fn new(max_excerpt_chars: usize) -> Self {
        Self { max_excerpt_chars }
    }

    pub fn extract(&self, path: &str, source: &str) -> Extraction {
        self.extract_at(path, source, 0)
    }

    /// Extract from a fragment whose first line is `line_offset + 1` in the file
    pub fn extract_at(&self, path: &str, source: &str, line_offset: usize) -> Extraction {
        match Language::from_path(path) {
            Language::Python => self.extract_indented(path, source, line_offset),
            _ => self.extract_braced(path, source, line_offset),
        }
    }

    fn excerpt(&self, lines: &[&str], start: usize, end: usize) -> String {
        let end = end.min(lines.len().saturating_sub(1));
        if start > end {
            return String::new();
        }
        truncate_chars(&lines[start..=end].join("\n"), self.max_excerpt_chars)
    }

    // ------------------------------------------------------------------
    // brace languages
    // ------------------------------------------------------------------

    fn extract_braced(&self, path: &str, source: &str, line_offset: usize) -> Extraction {
        let lines: Vec<&str> = source.lines().collect();
        let code = strip_code(&lines);
        let mut out = Extraction::default();

        let mut stack: Vec<BraceScope> = Vec::new();
        let mut pending: Option<PendingScope> = None;
        let mut depth: i32 = 0;
        let mut skip_until = 0usize;
        let mut pending_template: Option<String> = None;

        for idx in 0..code.len() {
            let trimmed = code[idx].trim();

            if idx >= skip_until
                && pending.is_none()
                && !trimmed.is_empty()
                && at_declaration_level(&stack, depth)
            {
                let (head, template) = match strip_template_prefix(trimmed) {
                    Some(rest) if rest.trim().is_empty() => {
                        pending_template = Some(lines[idx].trim().to_string());
                        (None, None)
                    }
                    Some(rest) => (Some(rest.trim()), Some(lines[idx].trim().to_string())),
                    None => (Some(trimmed), pending_template.take()),
                };

                if let Some(head) = head {
                    let in_type = stack.last().map_or(false, |s| s.members);
                    if let Some(decl) = match_braced_declaration(head, in_type) {
                        let start = head.as_ptr() as usize - code[idx].as_ptr() as usize
                            + decl.search_from;
                        self.handle_declaration(
                            path,
                            &lines,
                            &code,
                            idx,
                            start,
                            decl,
                            template,
                            line_offset,
                            &stack,
                            &mut out,
                            &mut pending,
                            &mut skip_until,
                        );
                    }
                }
            }

            // brace accounting
            for ch in code[idx].chars() {
                match ch {
                    '{' => {
                        if pending.as_ref().map_or(false, |p| p.line == idx) {
                            if let Some(mut p) = pending.take() {
                                p.scope.open_depth = depth;
                                stack.push(p.scope);
                            }
                        }
                        depth += 1;
                    }
                    '}' => {
                        depth -= 1;
                        if depth < 0 {
                            out.warn(path, Some(idx + 1 + line_offset), "unexpected closing brace");
                            depth = 0;
                        }
                        while stack.last().map_or(false, |s| depth <= s.open_depth) {
                            if let Some(scope) = stack.pop() {
                                self.close_scope(&scope, idx, &lines, line_offset, &mut out);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if !stack.is_empty() || depth != 0 {
            out.warn(path, None, "unbalanced braces at end of input");
            let last = lines.len().saturating_sub(1);
            while let Some(scope) = stack.pop() {
                self.close_scope(&scope, last, &lines, line_offset, &mut out);
            }
        }

        out
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_declaration(
        &self,
        path: &str,
        lines: &[&str],
        code: &[String],
        idx: usize,
        search_from: usize,
        decl: Declaration,
        template: Option<String>,
        line_offset: usize,
        stack: &[BraceScope],
        out: &mut Extraction,
        pending: &mut Option<PendingScope>,
        skip_until: &mut usize,
    ) {
        let Some((term_line, term)) = find_terminator(code, idx, search_from) else {
            out.warn(
                path,
                Some(idx + 1 + line_offset),
                format!("incomplete declaration of `{}` skipped", decl.name),
            );
            return;
        };
        *skip_until = term_line + 1;

        let between = between_text(code, idx, search_from, term_line);
        let is_type = matches!(decl.kind, UnitKind::Class | UnitKind::Module);
        if is_type && !decl.scope_only && between.contains('=') {
            // `struct point p = {...}` is a variable, not a type
            return;
        }
        if term == ';' && !decl.allow_prototype {
            return;
        }

        let qualified = qualify(stack, &decl.name);
        if decl.scope_only {
            if term == '{' {
                *pending = Some(PendingScope {
                    line: term_line,
                    scope: BraceScope {
                        name: (!decl.name.is_empty()).then(|| qualified),
                        opaque: false,
                        members: !decl.name.is_empty(),
                        open_depth: 0,
                        unit_index: None,
                    },
                });
            }
            return;
        }

        let kind = if template.is_some() && decl.kind != UnitKind::Module {
            UnitKind::Template
        } else {
            decl.kind
        };
        let mut signature_source = lines[idx..=term_line].join(" ");
        if let Some(pos) = signature_source.find(if term == '{' { '{' } else { ';' }) {
            signature_source.truncate(pos);
        }
        if let Some(template) = template.filter(|t| !signature_source.trim_start().starts_with("template")) {
            signature_source = format!("{} {}", template, signature_source);
        }

        let parent = qualified.rsplit_once("::").map(|(p, _)| p.to_string());
        out.units.push(SourceUnit {
            path: path.to_string(),
            kind,
            qualified_name: qualified.clone(),
            signature_text: normalize_signature(&signature_source),
            raw_body_excerpt: self.excerpt(lines, idx, term_line),
            parent_unit_ref: parent,
            start_line: idx + 1 + line_offset,
            end_line: term_line + 1 + line_offset,
        });

        if term == '{' {
            let opaque = matches!(kind, UnitKind::Function)
                || (kind == UnitKind::Template && decl.kind == UnitKind::Function);
            *pending = Some(PendingScope {
                line: term_line,
                scope: BraceScope {
                    name: (!opaque).then(|| qualified),
                    opaque,
                    members: decl.kind == UnitKind::Class,
                    open_depth: 0,
                    unit_index: Some(out.units.len() - 1),
                },
            });
        }
    }

    fn close_scope(
        &self,
        scope: &BraceScope,
        end_idx: usize,
        lines: &[&str],
        line_offset: usize,
        out: &mut Extraction,
    ) {
        if let Some(i) = scope.unit_index {
            let start_idx = out.units[i].start_line - 1 - line_offset;
            out.units[i].end_line = end_idx + 1 + line_offset;
            out.units[i].raw_body_excerpt = self.excerpt(lines, start_idx, end_idx);
        }
    }

    // ------------------------------------------------------------------
    // indentation languages
    // ------------------------------------------------------------------

    fn extract_indented(&self, path: &str, source: &str, line_offset: usize) -> Extraction {
        struct PyScope {
            indent: usize,
            qualified: String,
            is_function: bool,
            unit_index: usize,
        }

        let lines: Vec<&str> = source.lines().collect();
        let mut out = Extraction::default();
        let mut stack: Vec<PyScope> = Vec::new();
        let mut in_triple: Option<&'static str> = None;
        let mut skip_until = 0usize;
        let mut last_code_idx = 0usize;

        let close = |scope: &PyScope, end_idx: usize, out: &mut Extraction| {
            let start_idx = out.units[scope.unit_index].start_line - 1 - line_offset;
            let end_idx = end_idx.max(start_idx);
            out.units[scope.unit_index].end_line = end_idx + 1 + line_offset;
            out.units[scope.unit_index].raw_body_excerpt = self.excerpt(&lines, start_idx, end_idx);
        };

        for (idx, line) in lines.iter().enumerate() {
            if let Some(quote) = in_triple {
                if line.matches(quote).count() % 2 == 1 {
                    in_triple = None;
                }
                last_code_idx = idx;
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if idx >= skip_until {
                let indent = indent_width(line);
                while stack.last().map_or(false, |s| s.indent >= indent) {
                    if let Some(scope) = stack.pop() {
                        close(&scope, last_code_idx, &mut out);
                    }
                }

                let inside_function = stack.iter().any(|s| s.is_function);
                let matched = if inside_function {
                    None
                } else if let Some(caps) = RE_PY_CLASS.captures(trimmed) {
                    Some((UnitKind::Class, caps[1].to_string()))
                } else {
                    RE_PY_DEF
                        .captures(trimmed)
                        .map(|caps| (UnitKind::Function, caps[1].to_string()))
                };

                if let Some((kind, name)) = matched {
                    match find_header_colon(&lines, idx) {
                        Some((term_line, colon)) => {
                            skip_until = term_line + 1;
                            let qualified = match stack.last() {
                                Some(parent) => format!("{}::{}", parent.qualified, name),
                                None => name,
                            };
                            let mut parts = lines[idx..term_line].to_vec();
                            parts.push(&lines[term_line][..colon]);
                            let signature = parts.join(" ");
                            let signature = signature.trim().to_string();
                            out.units.push(SourceUnit {
                                path: path.to_string(),
                                kind,
                                qualified_name: qualified.clone(),
                                signature_text: normalize_signature(&signature),
                                raw_body_excerpt: String::new(),
                                parent_unit_ref: stack.last().map(|s| s.qualified.clone()),
                                start_line: idx + 1 + line_offset,
                                end_line: term_line + 1 + line_offset,
                            });
                            stack.push(PyScope {
                                indent,
                                qualified,
                                is_function: kind == UnitKind::Function,
                                unit_index: out.units.len() - 1,
                            });
                        }
                        None => out.warn(
                            path,
                            Some(idx + 1 + line_offset),
                            format!("incomplete definition of `{}` skipped", name),
                        ),
                    }
                }
            }

            for quote in ["\"\"\"", "'''"] {
                if line.matches(quote).count() % 2 == 1 {
                    in_triple = Some(quote);
                    break;
                }
            }
            last_code_idx = idx;
        }

        while let Some(scope) = stack.pop() {
            close(&scope, last_code_idx, &mut out);
        }
        out
    }
}

/// Declarations are only looked for where a container body (or the file) is
/// the innermost open block
fn at_declaration_level(stack: &[BraceScope], depth: i32) -> bool {
    match stack.last() {
        None => depth == 0,
        Some(scope) if scope.opaque => false,
        Some(scope) => depth == scope.open_depth + 1,
    }
}

fn qualify(stack: &[BraceScope], name: &str) -> String {
    match stack.iter().rev().find_map(|s| s.name.as_deref()) {
        Some(scope) if !name.is_empty() => format!("{}::{}", scope, name),
        Some(scope) => scope.to_string(),
        None => name.to_string(),
    }
}

fn match_braced_declaration(head: &str, in_type: bool) -> Option<Declaration> {
    if head.starts_with('@') || head.ends_with(':') && !head.contains('(') {
        // annotations, access specifiers, labels
        return None;
    }

    if let Some(m) = RE_EXTERN_BLOCK.find(head) {
        return Some(Declaration {
            kind: UnitKind::Module,
            name: String::new(),
            search_from: m.end() - 1,
            scope_only: true,
            allow_prototype: false,
        });
    }

    for (re, kind) in [
        (&*RE_NAMESPACE, UnitKind::Module),
        (&*RE_RUST_MOD, UnitKind::Module),
        (&*RE_TYPE, UnitKind::Class),
        (&*RE_GO_TYPE, UnitKind::Class),
    ] {
        if let Some(caps) = re.captures(head) {
            let name = caps.get(1)?;
            return Some(Declaration {
                kind,
                name: name.as_str().to_string(),
                search_from: name.end(),
                scope_only: false,
                allow_prototype: false,
            });
        }
    }

    if let Some(caps) = RE_IMPL.captures(head) {
        let name = caps.get(1)?;
        return Some(Declaration {
            kind: UnitKind::Class,
            name: name.as_str().to_string(),
            search_from: name.end(),
            scope_only: true,
            allow_prototype: false,
        });
    }

    for re in [&*RE_KEYWORD_FUNC, &*RE_ARROW_FUNC] {
        if let Some(caps) = re.captures(head) {
            let name = caps.get(1)?;
            return Some(Declaration {
                kind: UnitKind::Function,
                name: name.as_str().to_string(),
                search_from: name.end(),
                scope_only: false,
                allow_prototype: true,
            });
        }
    }

    let caps = RE_TYPED_FUNC.captures(head)?;
    let name = caps.name("name")?;
    let prefix = caps.name("prefix").map_or("", |m| m.as_str()).trim();
    let short = name.as_str().rsplit("::").next().unwrap_or(name.as_str());
    if NON_DECL_NAMES.contains(&short) {
        return None;
    }
    if prefix
        .split_whitespace()
        .next()
        .map_or(false, |w| STATEMENT_WORDS.contains(&w))
    {
        return None;
    }
    let qualified = name.as_str().contains("::") || short.starts_with('~');
    if prefix.is_empty() && !qualified && !in_type {
        // bare call at file scope, most likely a macro
        return None;
    }

    Some(Declaration {
        kind: UnitKind::Function,
        name: name.as_str().to_string(),
        search_from: name.end(),
        scope_only: false,
        allow_prototype: true,
    })
}

/// `template <...>` prefix removed, balancing nested angle brackets
fn strip_template_prefix(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("template")?;
    let rest_trimmed = rest.trim_start();
    if !rest_trimmed.starts_with('<') {
        return None;
    }
    let start = line.len() - rest_trimmed.len();
    let mut depth = 0i32;
    for (i, ch) in line[start..].char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&line[start + i + 1..]);
                }
            }
            _ => {}
        }
    }
    // unterminated parameter list spanning lines
    Some("")
}

/// First `{` or `;` at or after `from` on line `idx`, else on the next lines
fn find_terminator(code: &[String], idx: usize, from: usize) -> Option<(usize, char)> {
    let first = code[idx].get(from..).unwrap_or("");
    if let Some(ch) = first.chars().find(|c| *c == '{' || *c == ';') {
        return Some((idx, ch));
    }
    for (line_idx, line) in code
        .iter()
        .enumerate()
        .skip(idx + 1)
        .take(MAX_DECL_LINES)
    {
        if let Some(ch) = line.chars().find(|c| *c == '{' || *c == ';') {
            return Some((line_idx, ch));
        }
    }
    None
}

/// Code between the declaration name and its terminator
fn between_text(code: &[String], idx: usize, from: usize, term_line: usize) -> String {
    let mut text = String::new();
    for (line_idx, line) in code.iter().enumerate().take(term_line + 1).skip(idx) {
        let segment = if line_idx == idx {
            line.get(from..).unwrap_or("")
        } else {
            line.as_str()
        };
        let end = segment.find(|c| c == '{' || c == ';').unwrap_or(segment.len());
        text.push_str(&segment[..end]);
        if line_idx == term_line || end < segment.len() {
            break;
        }
        text.push(' ');
    }
    text
}

/// Line and byte offset of the `:` closing a Python header, outside
/// brackets and string literals. `None` if another header starts first.
fn find_header_colon(lines: &[&str], idx: usize) -> Option<(usize, usize)> {
    let mut depth = 0i32;
    for (line_idx, line) in lines.iter().enumerate().skip(idx).take(MAX_DECL_LINES + 1) {
        if line_idx > idx {
            let trimmed = line.trim();
            if RE_PY_CLASS.is_match(trimmed) || RE_PY_DEF.is_match(trimmed) {
                return None;
            }
        }

        let mut quote: Option<char> = None;
        let mut chars = line.char_indices();
        while let Some((pos, c)) = chars.next() {
            if let Some(q) = quote {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '#' => break,
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ':' if depth <= 0 => return Some((line_idx, pos)),
                _ => {}
            }
        }
    }
    None
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Remove comments, string contents and preprocessor lines, keeping one
/// output line per input line
fn strip_code(lines: &[&str]) -> Vec<String> {
    let mut in_block = false;
    lines
        .iter()
        .map(|line| {
            let chars: Vec<char> = line.chars().collect();
            let mut out = String::with_capacity(line.len());
            let mut i = 0;
            while i < chars.len() {
                let c = chars[i];
                let next = chars.get(i + 1).copied();
                if in_block {
                    if c == '*' && next == Some('/') {
                        in_block = false;
                        i += 2;
                    } else {
                        i += 1;
                    }
                    continue;
                }
                match c {
                    '/' if next == Some('/') => break,
                    '/' if next == Some('*') => {
                        in_block = true;
                        i += 2;
                    }
                    '"' | '`' => {
                        out.push('"');
                        i += 1;
                        while i < chars.len() && chars[i] != c {
                            i += if chars[i] == '\\' { 2 } else { 1 };
                        }
                        out.push('"');
                        i += 1;
                    }
                    '\'' if chars.get(i + 2) == Some(&'\'') => {
                        out.push_str("''");
                        i += 3;
                    }
                    '\'' if next == Some('\\') && chars.get(i + 3) == Some(&'\'') => {
                        out.push_str("''");
                        i += 4;
                    }
                    '#' if out.trim().is_empty() => break,
                    _ => {
                        out.push(c);
                        i += 1;
                    }
                }
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(path: &str, source: &str) -> Extraction {
        HeuristicExtractor::new(400).extract(path, source)
    }

    fn names(extraction: &Extraction) -> Vec<(&str, UnitKind)> {
        extraction
            .units
            .iter()
            .map(|u| (u.qualified_name.as_str(), u.kind))
            .collect()
    }

    const CPP_SOURCE: &str = r#"#include <vector>
#include "net/socket.h"

namespace net {

// A TCP connection
class Connection : public Stream {
public:
    Connection(int fd);
    ~Connection();
    bool send(const std::vector<char>& data);
    int fd() const { return fd_; }
private:
    int fd_;
};

template <typename T>
class Pool {
    T* acquire();
};

int connect_to(const char* host,
               int port) {
    if (port < 0) {
        return -1;
    }
    return open_socket(host, port);
}

}  // namespace net

bool net::Connection::send(const std::vector<char>& data) {
    return write(fd_, data.data(), data.size()) > 0;
}
"#;

    #[test]
    fn test_cpp_units_and_scopes() {
        let extraction = extract("src/net/connection.cpp", CPP_SOURCE);
        assert_eq!(
            names(&extraction),
            vec![
                ("net", UnitKind::Module),
                ("net::Connection", UnitKind::Class),
                ("net::Connection::Connection", UnitKind::Function),
                ("net::Connection::~Connection", UnitKind::Function),
                ("net::Connection::send", UnitKind::Function),
                ("net::Connection::fd", UnitKind::Function),
                ("net::Pool", UnitKind::Template),
                ("net::Pool::acquire", UnitKind::Function),
                ("net::connect_to", UnitKind::Function),
                ("net::Connection::send", UnitKind::Function),
            ]
        );
        assert!(extraction.warnings.is_empty(), "{:?}", extraction.warnings);

        let connect = &extraction.units[8];
        assert_eq!(connect.signature_text, "int connect_to(const char* host, int port)");
        assert_eq!(connect.parent_unit_ref.as_deref(), Some("net"));
        assert_eq!((connect.start_line, connect.end_line), (22, 28));
        assert!(connect.raw_body_excerpt.contains("open_socket"));

        let pool = &extraction.units[6];
        assert!(pool.signature_text.starts_with("template <typename T>"));
    }

    #[test]
    fn test_rust_and_go_idioms() {
        let rust = r#"
pub mod wire {
    pub struct Frame {
        len: usize,
    }

    impl Frame {
        pub fn new(len: usize) -> Self {
            Self { len }
        }
    }
}

pub(crate) async fn serve(addr: &str) -> Result<()> {
    Ok(())
}
"#;
        let extraction = extract("src/lib.rs", rust);
        assert_eq!(
            names(&extraction),
            vec![
                ("wire", UnitKind::Module),
                ("wire::Frame", UnitKind::Class),
                ("wire::Frame::new", UnitKind::Function),
                ("serve", UnitKind::Function),
            ]
        );

        let go = "type Server struct {\n\taddr string\n}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n";
        let extraction = extract("cmd/server.go", go);
        assert_eq!(
            names(&extraction),
            vec![("Server", UnitKind::Class), ("Start", UnitKind::Function)]
        );
    }

    #[test]
    fn test_python_one_line_def_does_not_swallow_next_class() {
        let source = "def f(): return 1\nclass Foo:\n    def bar(self) -> Dict[str, int]:\n        pass\n";
        let extraction = extract("m.py", source);
        assert_eq!(
            names(&extraction),
            vec![
                ("f", UnitKind::Function),
                ("Foo", UnitKind::Class),
                ("Foo::bar", UnitKind::Function),
            ]
        );
        assert_eq!(extraction.units[0].signature_text, "def f()");
        assert_eq!(extraction.units[0].end_line, 1);
        assert_eq!(extraction.units[2].signature_text, "def bar(self) -> Dict[str, int]");
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn test_python_unterminated_header_is_reported() {
        let source = "def g(a,\n      b\nclass Bar:\n    pass\n";
        let extraction = extract("m.py", source);
        assert_eq!(names(&extraction), vec![("Bar", UnitKind::Class)]);
        assert_eq!(extraction.warnings.len(), 1);
        assert_eq!(extraction.warnings[0].line, Some(1));
    }

    #[test]
    fn test_python_indentation_scopes() {
        let source = r#"
import os

class Cache(Base):
    """Docstring with
def not_a_function():
    """

    def get(self, key,
            default=None):
        def inner():
            pass
        return self._data.get(key, default)

async def refresh(cache):
    await cache.reload()
"#;
        let extraction = extract("tools/cache.py", source);
        assert_eq!(
            names(&extraction),
            vec![
                ("Cache", UnitKind::Class),
                ("Cache::get", UnitKind::Function),
                ("refresh", UnitKind::Function),
            ]
        );
        let get = &extraction.units[1];
        assert_eq!(get.parent_unit_ref.as_deref(), Some("Cache"));
        assert_eq!(get.signature_text, "def get(self, key, default=None)");
        assert_eq!((get.start_line, get.end_line), (9, 13));
    }

    #[test]
    fn test_no_units_is_empty_not_error() {
        let extraction = extract("include/config.h", "#pragma once\n#define MAX 10\n\nextern int counter;\n");
        assert!(extraction.units.is_empty());
        assert!(extraction.warnings.is_empty());

        assert!(extract("empty.py", "").units.is_empty());
    }

    #[test]
    fn test_malformed_fragments_are_skipped_with_warning() {
        let source = "int broken(int a,\n\n\n\n\n\n\n\n\n\n\n\nint ok(void) {\n    return 0;\n}\n";
        let extraction = extract("src/bad.c", source);
        assert!(extraction
            .warnings
            .iter()
            .any(|w| w.message.contains("broken") && w.line == Some(1)));
        assert_eq!(names(&extraction), vec![("ok", UnitKind::Function)]);
    }

    #[test]
    fn test_statements_and_macros_are_not_units() {
        let source = r#"
TEST_CASE(parse) {
    std::string s("x");
    if (check(s)) { run(); }
}
struct point origin = {0, 0};
class Forward;
"#;
        let extraction = extract("tests/parse.cpp", source);
        assert!(extraction.units.is_empty(), "{:?}", names(&extraction));
    }

    #[test]
    fn test_line_offset_applies() {
        let extraction = HeuristicExtractor::new(100).extract_at("a.js", "function run() {\n}\n", 40);
        assert_eq!(extraction.units[0].start_line, 41);
        assert_eq!(extraction.units[0].end_line, 42);
    }
}
