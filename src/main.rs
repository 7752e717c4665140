//! VOD Runner - Remote Transcoding Agent
//!
//! Entry point: loads configuration, sets up logging and runs claimed jobs
//! against the coordinating server.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vod_runner::cli::{Args, Commands};
use vod_runner::config::Config;
use vod_runner::encoder::FfmpegEncoderFactory;
use vod_runner::fetch::HttpInputFetcher;
use vod_runner::job::RunnerJob;
use vod_runner::mutex::KeyedMutexCoordinator;
use vod_runner::processor::JobProcessor;
use vod_runner::report::ServerClient;
use vod_runner::scratch::ScratchDir;
use vod_runner::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Commands::InitConfig { path } = &args.command {
        Config::default().save_to_file(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    // Setup logging to both console and file
    if args.command.writes_logs() {
        setup_logging(args.verbose, &config.logging.directory)?;
    }
    info!("Starting VOD runner");

    match args.command {
        Commands::InitConfig { .. } => {}
        Commands::Check => {
            config.validate()?;
            check_binary(&config.ffmpeg.binary_path).await?;
            check_binary(&config.ffmpeg.probe_path).await?;
            println!("Configuration and encoding tools look good");
        }
        Commands::Process {
            jobs,
            server,
            runner_token,
        } => {
            config.validate()?;
            run_jobs(Arc::new(config), &jobs, &server, &runner_token).await?;
        }
    }

    info!("VOD runner finished");
    Ok(())
}

async fn run_jobs(config: Arc<Config>, job_files: &[PathBuf], server: &str, runner_token: &str) -> Result<()> {
    let jobs = job_files
        .iter()
        .map(|path| load_job(path))
        .collect::<Result<Vec<_>>>()?;

    let scratch = ScratchDir::new(&config);
    scratch.prepare().await?;
    if let Err(e) = scratch.purge_stale(config.worker.job_lifetime()) {
        warn!("Could not purge {}: {}", scratch.path().display(), e);
    }

    let server = Arc::new(ServerClient::new(server)?);
    let processor = Arc::new(JobProcessor::new(
        Arc::clone(&config),
        Arc::new(HttpInputFetcher::new(scratch)?),
        Arc::new(FfmpegEncoderFactory::new(Arc::clone(&config))),
        Arc::new(KeyedMutexCoordinator::new()),
    ));
    let worker = Worker::new(processor, server, runner_token, config.worker.max_concurrent_jobs);

    let cancel = worker.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running jobs");
            cancel.cancel();
        }
    });

    let outcomes = worker.run_jobs(jobs).await;
    let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).collect();
    for outcome in &failed {
        if let Err(e) = &outcome.result {
            error!(job_uuid = %outcome.job_uuid, "{} job failed: {}", outcome.kind, e);
        }
    }
    if !failed.is_empty() {
        anyhow::bail!("{} of {} jobs failed", failed.len(), outcomes.len());
    }
    Ok(())
}

fn load_job(path: &Path) -> Result<RunnerJob> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid job file {}", path.display()))
}

/// Run `<binary> -version` and fail if it cannot be executed.
async fn check_binary(binary: &str) -> Result<()> {
    let output = tokio::process::Command::new(binary)
        .arg("-version")
        .output()
        .await
        .with_context(|| format!("{} is not installed or not in PATH", binary))?;

    if !output.status.success() {
        anyhow::bail!("{} -version exited with {}", binary, output.status);
    }
    let version = String::from_utf8_lossy(&output.stdout);
    info!("{}: {}", binary, version.lines().next().unwrap_or_default());
    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(log_dir, "vod-runner.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("vod-runner.log").display()
    );
    Ok(())
}
