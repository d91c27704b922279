//! Cross-reference linking
//!
//! Rewrites mentions of known symbols in a finished artifact into relative
//! Markdown links to the artifact documenting that symbol.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::types::GenerationResult;

/// Identifier path such as `net::Socket::open`
pub(crate) static RE_SYMBOL_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:::[A-Za-z_][A-Za-z0-9_]*)*").unwrap()
});

/// Links emitted per target per artifact
const MAX_LINKS_PER_SYMBOL: usize = 3;

/// Qualified name -> artifact path, built once per run and read-only after
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    targets: BTreeMap<String, String>,
    by_short_name: HashMap<String, Vec<String>>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// First registration of a name wins
    pub fn insert(&mut self, qualified_name: &str, target: &str) {
        if self.targets.contains_key(qualified_name) {
            return;
        }
        self.targets
            .insert(qualified_name.to_string(), target.to_string());
        let short = qualified_name
            .rsplit("::")
            .next()
            .unwrap_or(qualified_name)
            .to_string();
        self.by_short_name
            .entry(short)
            .or_default()
            .push(qualified_name.to_string());
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Artifact path for a mention of `name`.
    ///
    /// Candidates share the last segment and one must be a segment-suffix of
    /// the other. The longest matched qualification wins, then an exact match,
    /// then the least qualified candidate, then lexicographic order.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let wanted: Vec<&str> = name.split("::").collect();
        let short = *wanted.last()?;
        let candidates = self.by_short_name.get(short)?;

        candidates
            .iter()
            .filter_map(|candidate| {
                let have: Vec<&str> = candidate.split("::").collect();
                let matched = have
                    .iter()
                    .rev()
                    .zip(wanted.iter().rev())
                    .take_while(|(a, b)| a == b)
                    .count();
                (matched == have.len().min(wanted.len())).then_some((
                    matched,
                    have.len() == wanted.len(),
                    have.len(),
                    candidate,
                ))
            })
            .max_by(|a, b| {
                a.0.cmp(&b.0)
                    .then(a.1.cmp(&b.1))
                    .then(b.2.cmp(&a.2))
                    .then(b.3.cmp(a.3))
            })
            .and_then(|(_, _, _, candidate)| self.targets.get(candidate.as_str()))
            .map(String::as_str)
    }
}

/// Path to `target` as seen from the directory containing `from`
pub fn relative_link(from: &str, target: &str) -> String {
    let from_dir: Vec<&str> = from.split('/').collect();
    let from_dir = &from_dir[..from_dir.len().saturating_sub(1)];
    let to: Vec<&str> = target.split('/').collect();

    let common = from_dir
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_dir.len() - common];
    parts.extend(&to[common..]);
    parts.join("/")
}

/// Applies a [`SymbolIndex`] to generation results
pub struct CrossLinker {
    index: SymbolIndex,
    enabled: bool,
}

impl CrossLinker {
    pub fn new(index: SymbolIndex, enabled: bool) -> Self {
        Self { index, enabled }
    }

    /// Rewrite resolvable references in `result.content`; unresolvable ones
    /// are left as plain text.
    pub fn link(&self, mut result: GenerationResult) -> GenerationResult {
        if !self.enabled || self.index.is_empty() || result.referenced_symbols.is_empty() {
            return result;
        }
        let mut pass = LinkPass {
            index: &self.index,
            from: &result.target_output_path,
            referenced: result.referenced_symbols.iter().map(String::as_str).collect(),
            emitted: HashMap::new(),
        };
        let linked = pass.run(&result.content);
        result.content = linked;
        result
    }

    /// Batch form of [`link`](Self::link)
    pub fn link_all(&self, results: Vec<GenerationResult>) -> Vec<GenerationResult> {
        results.into_iter().map(|r| self.link(r)).collect()
    }
}

struct LinkPass<'a> {
    index: &'a SymbolIndex,
    from: &'a str,
    referenced: HashSet<&'a str>,
    emitted: HashMap<String, usize>,
}

impl LinkPass<'_> {
    fn run(&mut self, content: &str) -> String {
        let mut out = String::with_capacity(content.len());
        let mut fence: Option<String> = None;

        for line in content.split_inclusive('\n') {
            let trimmed = line.trim_start();
            if let Some(open) = &fence {
                if trimmed.starts_with(open.as_str()) {
                    fence = None;
                }
                out.push_str(line);
                continue;
            }
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                fence = Some(trimmed[..3].to_string());
                out.push_str(line);
                continue;
            }
            if trimmed.starts_with('#') {
                out.push_str(line);
                continue;
            }
            self.link_line(line, &mut out);
        }
        out
    }

    /// Link a target once more, if allowed
    fn admit(&mut self, name: &str) -> Option<String> {
        let target = self.index.resolve(name)?;
        if target == self.from {
            return None;
        }
        let count = self.emitted.entry(target.to_string()).or_insert(0);
        if *count >= MAX_LINKS_PER_SYMBOL {
            return None;
        }
        *count += 1;
        Some(relative_link(self.from, target))
    }

    fn link_line(&mut self, line: &str, out: &mut String) {
        let bytes = line.as_bytes();
        let mut plain_start = 0;
        let mut i = 0;

        while i < bytes.len() {
            let verbatim_end = match bytes[i] {
                b'`' => code_span_end(line, i),
                b'[' => link_end(line, i),
                b'<' if line[i..].starts_with("<http") => line[i..].find('>').map(|p| i + p + 1),
                _ => None,
            };
            let Some(end) = verbatim_end else {
                i += 1;
                continue;
            };

            self.link_plain(&line[plain_start..i], out);
            let segment = &line[i..end];
            if bytes[i] == b'`' {
                self.link_code_span(segment, out);
            } else {
                out.push_str(segment);
            }
            i = end;
            plain_start = end;
        }
        self.link_plain(&line[plain_start..], out);
    }

    /// Whole-span match only: `` `Foo::bar()` `` links, `` `x = Foo` `` does not
    fn link_code_span(&mut self, span: &str, out: &mut String) {
        let inner = span.trim_matches('`').trim();
        let name = inner.strip_suffix("()").unwrap_or(inner);
        let whole = RE_SYMBOL_PATH
            .find(name)
            .is_some_and(|m| m.start() == 0 && m.end() == name.len());

        match whole.then(|| self.admit(name)).flatten() {
            Some(href) => out.push_str(&format!("[{}]({})", span, href)),
            None => out.push_str(span),
        }
    }

    fn link_plain(&mut self, text: &str, out: &mut String) {
        let mut last = 0;
        for m in RE_SYMBOL_PATH.find_iter(text) {
            let before = text[..m.start()].chars().next_back();
            let after = text[m.end()..].chars().next();
            let glued = before.is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | ':'))
                || after.is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | ':'));
            if glued || !self.referenced.contains(m.as_str()) {
                continue;
            }
            if let Some(href) = self.admit(m.as_str()) {
                out.push_str(&text[last..m.start()]);
                out.push_str(&format!("[{}]({})", m.as_str(), href));
                last = m.end();
            }
        }
        out.push_str(&text[last..]);
    }
}

/// End of an inline code span opened at `start`
fn code_span_end(line: &str, start: usize) -> Option<usize> {
    let ticks = line[start..].bytes().take_while(|b| *b == b'`').count();
    let delimiter = "`".repeat(ticks);
    let body = start + ticks;
    line[body..]
        .find(&delimiter)
        .map(|p| body + p + ticks)
}

/// End of a `[text](href)` link opened at `start`; a bare `[text]` is not one
fn link_end(line: &str, start: usize) -> Option<usize> {
    let close = start + line[start..].find(']')?;
    let paren = close + 1;
    if !line[paren..].starts_with('(') {
        return None;
    }
    line[paren..].find(')').map(|p| paren + p + 1)
}
