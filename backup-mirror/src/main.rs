//! Backup Mirror - Main entry point
//!
//! Mirrors the newest backup artifact from a source directory into a
//! destination directory, on demand or on a daily schedule.

use anyhow::Result;
use backup_mirror::daemon::shutdown::ShutdownCoordinator;
use backup_mirror::services::runner::MirrorRunner;
use backup_mirror::services::scheduler::Scheduler;
use backup_mirror::transfer::progress::{
    format_bytes, format_speed, JobState, ProgressReceiver, ProgressTracker,
};
use backup_mirror::{utils, Config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source directory (overrides config)
    #[arg(long)]
    source: Option<PathBuf>,

    /// Destination directory (overrides config)
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror the newest backup artifact once and exit
    Run {
        /// Print the final report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Keep mirroring on the configured daily schedule until terminated
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args)?;
    if let Some(source) = args.source {
        config.source.dir = source;
    }
    if let Some(dest) = args.dest {
        config.destination.dir = dest;
    }
    config.validate()?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level);

    tracing::info!(
        "Starting backup-mirror v{} ({} -> {})",
        env!("CARGO_PKG_VERSION"),
        config.source.dir.display(),
        config.destination.dir.display()
    );

    let runner = Arc::new(MirrorRunner::new(&config));

    match args.command {
        Command::Run { json } => run_once(runner, json).await,
        Command::Daemon => run_daemon(runner, &config).await,
    }
}

fn load_config(args: &Args) -> Result<Config> {
    if let Some(path) = &args.config {
        return Ok(Config::from_file(path)?);
    }
    match (&args.source, &args.dest) {
        (Some(source), Some(dest)) => Ok(Config::with_dirs(source.clone(), dest.clone())),
        _ => anyhow::bail!("either --config or both --source and --dest are required"),
    }
}

async fn run_once(runner: Arc<MirrorRunner>, json: bool) -> Result<()> {
    let shutdown = ShutdownCoordinator::new();
    let cancel = shutdown.token();

    let renderer = spawn_progress_renderer(runner.subscribe(), cancel.clone());

    let run = runner.run_manual(&cancel);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown.wait_for_signal() => {
            // token is cancelled; let the engine roll its temp file back
            run.await
        }
    };

    cancel.cancel();
    let _ = renderer.await;

    let report = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        tracing::info!("{}", report.summary());
    }
    Ok(())
}

async fn run_daemon(runner: Arc<MirrorRunner>, config: &Config) -> Result<()> {
    if !config.schedule.enabled {
        anyhow::bail!("schedule.enabled is false; nothing to do in daemon mode");
    }

    let shutdown = ShutdownCoordinator::new();
    let cancel = shutdown.token();

    let renderer = spawn_progress_renderer(runner.subscribe(), cancel.clone());

    let scheduler = Scheduler::new(runner);
    scheduler.schedule(&config.schedule, &cancel).await;
    tracing::info!(
        hour = config.schedule.hour,
        minute = config.schedule.minute,
        "Daily mirror schedule active"
    );

    shutdown.wait_for_signal().await;

    scheduler.shutdown().await;
    let _ = renderer.await;
    tracing::info!("Mirror daemon stopped");
    Ok(())
}

/// Log copy progress at a fixed cadence while a job is active.
fn spawn_progress_renderer(
    mut rx: ProgressReceiver,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        let mut tracker = ProgressTracker::new();
        let mut current_job = Uuid::nil();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let snapshot = rx.borrow_and_update().clone();
                    if snapshot.state != JobState::Copying || snapshot.bytes_total == 0 {
                        continue;
                    }
                    if snapshot.job_id != current_job {
                        current_job = snapshot.job_id;
                        tracker = ProgressTracker::new();
                    }
                    tracker.update(&snapshot);
                    tracing::info!(
                        job_id = %snapshot.job_id,
                        "Copying {} / {} ({:.0}%) at {}",
                        format_bytes(snapshot.bytes_copied),
                        format_bytes(snapshot.bytes_total),
                        snapshot.percent_complete(),
                        format_speed(tracker.bytes_per_second()),
                    );
                }
            }
        }
    })
}
