//! etl-runner: runs every job of a run file through the resolved pipeline.
//!
//! ```bash
//! etl-runner run.json
//! etl-runner run.json --pipeline raw
//! etl-runner run.json --use-mock
//! ```
//!
//! Logs go to stderr. Stdout carries a single JSON status object.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use etl_runner::config::{LogLevel, RunFile, Settings};
use etl_runner::etl::{PipelineRegistry, RunSummary};
use etl_runner::telemetry::init_logging;

#[derive(Parser)]
#[command(name = "etl-runner")]
#[command(version, about = "Runs search-to-storage extraction pipelines")]
struct Cli {
    /// Path to the JSON run file
    run_file: PathBuf,

    /// Swap the search backend and storage for in-memory ones
    #[arg(long)]
    use_mock: bool,

    /// Registry id of the pipeline; overrides the run file
    #[arg(long)]
    pipeline: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summaries) => {
            println!("{}", json!({ "status": "success", "result": summaries }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("run failed: {e:#}");
            println!("{}", json!({ "status": "error", "message": format!("{e:#}") }));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Vec<RunSummary>> {
    let run = match RunFile::from_path(&cli.run_file) {
        Ok(run) => run,
        Err(e) => {
            init_logging(LogLevel::default());
            return Err(e).with_context(|| format!("invalid run file {}", cli.run_file.display()));
        }
    };
    init_logging(run.logs_level);

    let settings = Settings::from_env().context("invalid environment settings")?;
    let pipeline = cli.pipeline.as_deref().or(run.pipeline.as_deref());
    info!(
        env = ?run.env,
        pipeline = pipeline.unwrap_or("default"),
        jobs = run.jobs.len(),
        "starting run"
    );

    let manager = PipelineRegistry::with_builtin()
        .build_manager(pipeline, &run, &settings, cli.use_mock)
        .context("failed to assemble pipelines")?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received, cancelling");
            signal.cancel();
        }
    });

    let summaries = manager.run_all(&cancel).await?;
    info!(pipelines = summaries.len(), "run finished");
    Ok(summaries)
}
