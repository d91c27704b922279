//! autodoc-rs
//!
//! Incremental documentation generation: only files whose content changed
//! are sent to the model, on a bounded worker pool, and every page is
//! published atomically before its cache entry is committed.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod config;
mod error;
mod llm;
mod services;
mod state;
mod utils;

use cli::Cli;

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "autodoc_rs=debug,tower_http=debug"
    } else {
        "autodoc_rs=info,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    cli.execute().await
}
