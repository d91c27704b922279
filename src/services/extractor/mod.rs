//! Source unit extraction
//!
//! Two interchangeable strategies produce the same [`SourceUnit`] shape:
//! a tree-sitter structural parser and a pattern-based fallback. The
//! strategy is resolved once by [`Extractor::detect`].

mod heuristic;
mod structural;
mod types;

pub use heuristic::HeuristicExtractor;
pub use structural::{ExtractError, StructuralExtractor};
pub use types::*;

use tracing::{info, warn};

use crate::config::ExtractorMode;

/// Bytes inspected when sniffing for binary content
const BINARY_SNIFF_LEN: usize = 8000;

/// Extraction strategy, chosen by capability probe at startup
pub enum Extractor {
    /// Grammar-backed where a grammar exists, pattern-based elsewhere
    Structural {
        structural: StructuralExtractor,
        fallback: HeuristicExtractor,
    },
    Heuristic(HeuristicExtractor),
}

impl Extractor {
    pub fn detect(mode: ExtractorMode, max_excerpt_chars: usize) -> Self {
        let fallback = HeuristicExtractor::new(max_excerpt_chars);
        if mode == ExtractorMode::Heuristic {
            info!("Extractor: pattern-based (configured)");
            return Extractor::Heuristic(fallback);
        }

        match StructuralExtractor::probe(max_excerpt_chars) {
            Ok(structural) => {
                info!("Extractor: structural with pattern-based fallback");
                Extractor::Structural {
                    structural,
                    fallback,
                }
            }
            Err(e) => {
                warn!("Structural extractor unavailable ({}), using pattern-based", e);
                Extractor::Heuristic(fallback)
            }
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            Extractor::Structural { .. } => "structural",
            Extractor::Heuristic(_) => "heuristic",
        }
    }

    /// Extract documentable units from one file; warnings are logged here
    pub fn extract(&self, path: &str, bytes: &[u8]) -> Extraction {
        let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
        if sniff.contains(&0) {
            let mut extraction = Extraction::default();
            extraction.warn(path, None, "binary content skipped");
            warn!("{}", extraction.warnings[0]);
            return extraction;
        }

        let source = String::from_utf8_lossy(bytes);
        let language = Language::from_path(path);
        let extraction = match self {
            Extractor::Structural {
                structural,
                fallback,
            } if structural.supports(language) => structural.extract(path, &source, fallback),
            Extractor::Structural { fallback, .. } => fallback.extract(path, &source),
            Extractor::Heuristic(heuristic) => heuristic.extract(path, &source),
        };

        for warning in &extraction.warnings {
            warn!("{}", warning);
        }
        extraction
    }
}
