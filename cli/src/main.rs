use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use hls_dl_engine::run_all;
use hls_dl_cli::{config::FileConfig, error::AppError, jobs::load_jobs, logging};
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Drives the HLS download engine over a job descriptor file.
#[derive(Debug, Parser)]
#[command(name = "hls-dl", version, about)]
struct Args {
    /// Path to the job descriptor JSON file (spec.md §6.1).
    #[arg(long, default_value = "jobs.json")]
    jobs: PathBuf,

    /// Path to the TOML config file (spec.md §6.4: `./conf/`).
    #[arg(long, default_value = "conf/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let file_config = FileConfig::load(&args.config)?;
    let log_dir = file_config.log_dir.clone();
    let _guard = logging::init(&log_dir).map_err(AppError::Io)?;

    let jobs = load_jobs(&args.jobs)?;
    info!(count = jobs.len(), "loaded jobs");

    let engine_config = Arc::new(file_config.into_engine_config()?);
    let results = run_all(engine_config, jobs).await?;

    let mut failed = 0usize;
    for r in &results {
        match &r.result {
            Ok(()) => info!(job_id = %r.job_id, "job finished"),
            Err(e) => {
                failed += 1;
                error!(job_id = %r.job_id, error = %e, "job failed");
            }
        }
    }

    if failed > 0 {
        warn!(failed, total = results.len(), "some jobs failed");
        return Err(AppError::InvalidInput(format!(
            "{failed} of {} jobs failed",
            results.len()
        )));
    }
    Ok(())
}
