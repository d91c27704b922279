//! Incremental documentation pipeline
//!
//! Scan the source tree, classify files against the cache manifest, plan
//! project, module and unit tasks for what changed, run them on a bounded
//! worker pool, cross-link the results and publish them atomically.
//!
//! # Usage
//!
//! ```ignore
//! use crate::services::backend::create_backend;
//! use crate::services::pipeline::{Pipeline, SYSTEM_PROMPT};
//!
//! let backend = create_backend(&config, SYSTEM_PROMPT)?;
//! let handle = Pipeline::new(config, backend).run_async();
//!
//! let mut events = handle.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! let summary = handle.wait().await;
//! ```

mod detector;
mod generator;
mod imports;
mod ledger;
mod linker;
mod orchestrator;
mod planner;
pub mod prompts;
mod publisher;
mod scanner;
mod scheduler;
pub mod types;

pub use detector::ChangeDetector;
pub use linker::{CrossLinker, SymbolIndex};
pub use orchestrator::{response_cache, Prepared, RunError, RunShared};
pub use planner::{Plan, ROOT_MODULE};
pub use prompts::SYSTEM_PROMPT;
pub use publisher::{Pipeline, PublishError, RunHandle};
pub use scanner::{ScanError, SourceScanner};
pub use scheduler::{RetryPolicy, Scheduler};
pub use types::*;

#[cfg(test)]
mod tests;
