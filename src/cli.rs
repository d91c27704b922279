//! Command line interface

use anyhow::{bail, Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::create_api_routes;
use crate::config::{AppConfig, Provider};
use crate::services::backend::{create_backend, OfflineBackend};
use crate::services::pipeline::{Level, Pipeline, RunStatus, RunSummary, SYSTEM_PROMPT};
use crate::services::response_cache::ResponseCache;
use crate::state::create_shared_state;

#[derive(Parser)]
#[command(name = "autodoc-rs")]
#[command(about = "Incremental documentation generator for source trees")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Source tree to document
    #[arg(long, global = true)]
    pub source: Option<PathBuf>,

    /// Documentation output directory
    #[arg(long, global = true)]
    pub docs: Option<PathBuf>,

    /// Regenerate every file regardless of the manifest
    #[arg(long, global = true)]
    pub force: bool,

    /// Maximum concurrent backend calls
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline once and wait for it
    Build {
        /// Exit non-zero when any task failed
        #[arg(long)]
        fail_on_degraded: bool,
    },

    /// Show what a run would do without calling the backend
    Plan,

    /// Start the HTTP host and a background run
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect or empty the backend response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show entry count and size
    Stats,
    /// Remove every cached response
    Clear,
}

impl Cli {
    /// Config file (or defaults) with command line overrides applied
    pub fn load_config(&self) -> Result<AppConfig> {
        let cwd = std::env::current_dir().context("cannot read the current directory")?;
        let mut config = AppConfig::load_or_default(self.config.as_deref(), &cwd)?;

        if let Some(source) = &self.source {
            config.source_root = cwd.join(source);
        }
        if let Some(docs) = &self.docs {
            config.docs_dir = cwd.join(docs);
        }
        if self.force {
            config.force_regenerate = true;
        }
        if let Some(limit) = self.concurrency {
            config.concurrency_limit = limit;
        }
        Ok(config)
    }

    pub async fn execute(self) -> Result<()> {
        let config = self.load_config()?;
        match self.command {
            Commands::Build { fail_on_degraded } => build(config, fail_on_degraded).await,
            Commands::Plan => plan(config).await,
            Commands::Serve { port } => serve(config, port).await,
            Commands::Cache { action } => cache(config, action).await,
        }
    }
}

async fn build(config: AppConfig, fail_on_degraded: bool) -> Result<()> {
    let backend = create_backend(&config, SYSTEM_PROMPT)?;
    let handle = Pipeline::new(config, backend).run_async();

    let shared = handle.shared();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; letting in-flight tasks finish");
            shared.request_stop();
        }
    });

    let summary = handle.wait().await;
    print_summary(&summary);

    match &summary.status {
        RunStatus::Crashed { reason } => bail!("run crashed: {}", reason),
        RunStatus::Degraded { failures } if fail_on_degraded => {
            bail!("run degraded with {} failures", failures)
        }
        _ => Ok(()),
    }
}

async fn plan(mut config: AppConfig) -> Result<()> {
    // Planning never calls the backend
    config.backend.provider = Provider::Offline;
    let pipeline = Pipeline::new(config, Arc::new(OfflineBackend));
    let prepared = pipeline.plan().await?;
    let plan = &prepared.plan;
    let counts = plan.changes.counts();

    if let Some(warning) = &prepared.storage_warning {
        println!("Manifest discarded: {}", warning);
    }
    println!("Extractor: {}", plan.strategy);
    println!(
        "Files: {} unchanged, {} new, {} modified, {} deleted",
        counts.unchanged, counts.new, counts.modified, counts.deleted
    );
    if counts.unreadable > 0 {
        println!("Unreadable (kept as-is): {}", counts.unreadable);
    }
    for level in Level::ALL {
        let tasks = plan.tasks_for(level);
        println!("\n{} ({} tasks)", level, tasks.len());
        for task in tasks {
            println!("  {} <- {}", task.target_output_path, task.title);
        }
    }
    Ok(())
}

async fn serve(mut config: AppConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server.host))?;

    let backend = create_backend(&config, SYSTEM_PROMPT)?;
    let state = create_shared_state(Pipeline::new(config, backend));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = Router::new()
        .merge(create_api_routes(Arc::clone(&state)))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!("Server listening on: {}", addr);

    match state.start_run() {
        Ok(run) => info!("Background run {} started", run.run_id),
        Err(e) => warn!("Background run not started: {}", e),
    }

    axum::serve(listener, app).await?;
    Ok(())
}

async fn cache(config: AppConfig, action: CacheAction) -> Result<()> {
    // Clearing and counting cover every backend's entries
    let cache = ResponseCache::new(config.cache.dir.clone(), "");
    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await?;
            println!("Response cache: {}", cache.dir().display());
            println!(
                "{} entries, {} bytes{}",
                stats.entries,
                stats.total_bytes,
                if config.cache.enabled { "" } else { " (disabled)" }
            );
        }
        CacheAction::Clear => {
            let removed = cache.clear().await?;
            println!("Removed {} cached responses", removed);
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nRun {}: {}", summary.run_id, summary.status);
    if let RunStatus::Crashed { .. } = summary.status {
        return;
    }

    let files = &summary.files;
    println!(
        "Files: {} unchanged, {} new, {} modified, {} deleted",
        files.unchanged, files.new, files.modified, files.deleted
    );
    if files.unreadable > 0 {
        println!("Unreadable (kept as-is): {}", files.unreadable);
    }
    for report in &summary.levels {
        println!(
            "  {:<8} {:?}: {}/{} succeeded, {} failed, {} cancelled",
            report.level.as_str(),
            report.status,
            report.succeeded,
            report.planned,
            report.failed,
            report.cancelled
        );
    }
    println!(
        "Artifacts: {} written, {} removed ({} extractor, {} extraction warnings)",
        summary.artifacts_written,
        summary.artifacts_removed,
        summary.strategy,
        summary.extraction_warnings
    );
    if let Some(warning) = &summary.storage_warning {
        println!("Manifest discarded: {}", warning);
    }
    for error in &summary.manifest_errors {
        println!("Manifest error: {}", error);
    }
    for failure in &summary.failures {
        println!(
            "  FAILED {} [{}] after {} attempt(s): {}",
            failure.target_output_path, failure.level, failure.attempts, failure.error
        );
    }
    println!("Elapsed: {:.1}s", summary.elapsed_ms as f64 / 1000.0);
}
