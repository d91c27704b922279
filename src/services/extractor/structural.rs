//! Grammar-based extraction (tree-sitter)
//!
//! Walks the syntax tree keeping a scope stack so nested items get
//! `::`-qualified names. Function bodies are not descended into.
//!
//! Error recovery: units from well-formed regions are kept, and every
//! `ERROR` region outside a function body is re-scanned with the heuristic
//! extractor. If no tree comes back at all the whole file goes through the
//! heuristic extractor.

use std::collections::HashSet;
use std::ops::Range;
use thiserror::Error;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use super::heuristic::HeuristicExtractor;
use super::types::{
    normalize_signature, truncate_chars, Extraction, Language, SourceUnit, UnitKind,
};

/// Structural extractor errors
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to load {0} grammar: {1}")]
    Grammar(&'static str, String),

    #[error("no structural grammar is available")]
    NoGrammar,
}

/// What a syntax node means for extraction
enum NodeRole {
    Unit(UnitKind),
    /// Rust `impl` block: a naming scope without a unit of its own
    ImplScope,
}

/// Syntax error region, widened to whole lines
struct ErrorRegion {
    bytes: Range<usize>,
    first_row: usize,
    scope: Option<String>,
}

/// State carried through one tree walk
struct Walk<'a> {
    language: Language,
    path: &'a str,
    source: &'a str,
    units: Vec<SourceUnit>,
    errors: Vec<ErrorRegion>,
    unnamed: usize,
}

/// Tree-sitter backed extractor for the grammars compiled in
pub struct StructuralExtractor {
    languages: Vec<Language>,
    max_excerpt_chars: usize,
}

fn grammar(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::Rust => Some(tree_sitter_rust::language()),
        Language::Python => Some(tree_sitter_python::language()),
        Language::JavaScript => Some(tree_sitter_javascript::language()),
        Language::Brace => None,
    }
}

fn new_parser(language: Language) -> Result<Parser, ExtractError> {
    let grammar = grammar(language).ok_or(ExtractError::NoGrammar)?;
    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| ExtractError::Grammar(language.name(), e.to_string()))?;
    Ok(parser)
}

impl StructuralExtractor {
    /// Capability probe: load every grammar and parse an empty document
    pub fn probe(max_excerpt_chars: usize) -> Result<Self, ExtractError> {
        let mut languages = Vec::new();
        for language in [Language::Rust, Language::Python, Language::JavaScript] {
            match new_parser(language) {
                Ok(mut parser) => {
                    if parser.parse("", None).is_some() {
                        languages.push(language)
                    } else {
                        warn!("{} grammar loaded but cannot parse", language.name())
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }

        if languages.is_empty() {
            return Err(ExtractError::NoGrammar);
        }
        debug!(
            "Structural grammars available: {:?}",
            languages.iter().map(|l| l.name()).collect::<Vec<_>>()
        );
        Ok(Self {
            languages,
            max_excerpt_chars,
        })
    }

    pub fn supports(&self, language: Language) -> bool {
        self.languages.contains(&language)
    }

    pub fn extract(&self, path: &str, source: &str, fallback: &HeuristicExtractor) -> Extraction {
        let language = Language::from_path(path);
        let tree = new_parser(language)
            .ok()
            .and_then(|mut parser| parser.parse(source, None));

        let tree = tree.filter(|t| !t.root_node().is_error());
        let Some(tree) = tree else {
            let mut extraction = fallback.extract(path, source);
            extraction.warn(
                path,
                None,
                "structural parse failed; used pattern-based extraction for the whole file",
            );
            return extraction;
        };

        let root = tree.root_node();
        let mut walk = Walk {
            language,
            path,
            source,
            units: Vec::new(),
            errors: Vec::new(),
            unnamed: 0,
        };
        self.visit(root, None, &mut walk);

        let mut extraction = Extraction::default();
        if walk.unnamed > 0 {
            extraction.warn(
                path,
                None,
                format!("{} unnamed declaration(s) skipped", walk.unnamed),
            );
        }

        if root.has_error() {
            let recovered = self.recover(&mut walk, fallback, &mut extraction);
            extraction.warn(
                path,
                None,
                format!(
                    "syntax errors in {} region(s); {} unit(s) recovered by pattern-based extraction",
                    walk.errors.len(),
                    recovered
                ),
            );
        }

        walk.units.sort_by_key(|u| u.start_line);
        extraction.units = walk.units;
        extraction
    }

    /// Re-scan error regions heuristically, keeping names not already found
    fn recover(
        &self,
        walk: &mut Walk<'_>,
        fallback: &HeuristicExtractor,
        extraction: &mut Extraction,
    ) -> usize {
        let mut seen: HashSet<String> = walk.units.iter().map(|u| u.qualified_name.clone()).collect();
        let mut recovered = 0;

        for region in &walk.errors {
            let Some(text) = walk.source.get(region.bytes.clone()) else {
                continue;
            };
            let fragment = fallback.extract_at(walk.path, text, region.first_row);
            extraction.warnings.extend(fragment.warnings);

            for mut unit in fragment.units {
                if let Some(scope) = &region.scope {
                    unit.qualified_name = format!("{}::{}", scope, unit.qualified_name);
                    unit.parent_unit_ref = Some(match unit.parent_unit_ref.take() {
                        Some(parent) => format!("{}::{}", scope, parent),
                        None => scope.clone(),
                    });
                }
                if seen.insert(unit.qualified_name.clone()) {
                    walk.units.push(unit);
                    recovered += 1;
                }
            }
        }
        recovered
    }

    fn visit(&self, node: Node<'_>, scope: Option<&str>, walk: &mut Walk<'_>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.is_error() {
                walk.errors.push(error_region(walk.source, child, scope));
                continue;
            }
            if child.is_missing() {
                continue;
            }

            match role(walk.language, child) {
                Some(NodeRole::Unit(kind)) => {
                    let Some(name) = child
                        .child_by_field_name("name")
                        .map(|n| node_text(walk.source, n).to_string())
                    else {
                        walk.unnamed += 1;
                        self.visit(child, scope, walk);
                        continue;
                    };

                    let qualified = join_scope(scope, &name);
                    let unit = self.unit(walk, child, kind, &qualified, scope);
                    walk.units.push(unit);
                    if kind != UnitKind::Function {
                        self.visit(child, Some(&qualified), walk);
                    }
                }
                Some(NodeRole::ImplScope) => {
                    let name = child
                        .child_by_field_name("type")
                        .map(|n| impl_type_name(node_text(walk.source, n)))
                        .unwrap_or_default();
                    if name.is_empty() {
                        self.visit(child, scope, walk);
                    } else {
                        let qualified = join_scope(scope, &name);
                        self.visit(child, Some(&qualified), walk);
                    }
                }
                None => self.visit(child, scope, walk),
            }
        }
    }

    fn unit(
        &self,
        walk: &Walk<'_>,
        node: Node<'_>,
        kind: UnitKind,
        qualified: &str,
        scope: Option<&str>,
    ) -> SourceUnit {
        let text = node_text(walk.source, node);
        let signature_end = body_node(node)
            .map(|body| body.start_byte())
            .unwrap_or_else(|| node.end_byte());
        let signature = walk
            .source
            .get(node.start_byte()..signature_end)
            .unwrap_or(text)
            .trim_end_matches(|c: char| c == ':' || c == ';' || c == '{' || c.is_whitespace());

        SourceUnit {
            path: walk.path.to_string(),
            kind,
            qualified_name: qualified.to_string(),
            signature_text: normalize_signature(signature),
            raw_body_excerpt: truncate_chars(text, self.max_excerpt_chars),
            parent_unit_ref: scope.map(str::to_string),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        }
    }
}

fn role(language: Language, node: Node<'_>) -> Option<NodeRole> {
    let kind = node.kind();
    match language {
        Language::Rust => match kind {
            "mod_item" if node.child_by_field_name("body").is_some() => {
                Some(NodeRole::Unit(UnitKind::Module))
            }
            "struct_item" | "enum_item" | "union_item" | "trait_item" => {
                Some(NodeRole::Unit(UnitKind::Class))
            }
            "function_item" | "function_signature_item" => Some(NodeRole::Unit(UnitKind::Function)),
            "impl_item" => Some(NodeRole::ImplScope),
            _ => None,
        },
        Language::Python => match kind {
            "class_definition" => Some(NodeRole::Unit(UnitKind::Class)),
            "function_definition" => Some(NodeRole::Unit(UnitKind::Function)),
            _ => None,
        },
        Language::JavaScript => match kind {
            "class_declaration" => Some(NodeRole::Unit(UnitKind::Class)),
            "function_declaration" | "generator_function_declaration" | "method_definition" => {
                Some(NodeRole::Unit(UnitKind::Function))
            }
            "variable_declarator" => {
                let value = node.child_by_field_name("value")?;
                matches!(
                    value.kind(),
                    "arrow_function" | "function" | "function_expression"
                )
                .then_some(NodeRole::Unit(UnitKind::Function))
            }
            _ => None,
        },
        Language::Brace => None,
    }
}

/// The node whose start ends the signature
fn body_node(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() == "variable_declarator" {
        return node
            .child_by_field_name("value")
            .and_then(|v| v.child_by_field_name("body"));
    }
    node.child_by_field_name("body")
}

fn node_text<'s>(source: &'s str, node: Node<'_>) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

fn join_scope(scope: Option<&str>, name: &str) -> String {
    match scope {
        Some(scope) => format!("{}::{}", scope, name),
        None => name.to_string(),
    }
}

/// `crate::wire::Frame<T>` -> `Frame`
fn impl_type_name(text: &str) -> String {
    let base = text.split('<').next().unwrap_or(text);
    base.rsplit("::").next().unwrap_or(base).trim().to_string()
}

fn error_region(source: &str, node: Node<'_>, scope: Option<&str>) -> ErrorRegion {
    let range = node.byte_range();
    let start = source
        .get(..range.start)
        .and_then(|before| before.rfind('\n'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = source
        .get(range.end..)
        .and_then(|after| after.find('\n'))
        .map(|i| range.end + i)
        .unwrap_or(source.len());
    ErrorRegion {
        bytes: start..end,
        first_row: node.start_position().row,
        scope: scope.map(str::to_string),
    }
}
