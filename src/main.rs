#![forbid(unsafe_code)]

//! `assessd` — compliance assessment orchestration daemon.
//!
//! Bootstraps configuration, opens the `SQLite` store, recovers any
//! executions interrupted by a prior crash, and runs the scheduler and
//! stall-recovery background tasks until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use assessd::config::GlobalConfig;
use assessd::orchestrator::dispatch::RunnerDispatcher;
use assessd::orchestrator::scheduler::{self, Scheduler};
use assessd::orchestrator::stall_sweep;
use assessd::persistence::db;
use assessd::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "assessd", about = "Compliance assessment orchestration daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("assessd bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db_path = config.db_path.to_string_lossy().to_string();
    let db = Arc::new(db::connect(&db_path).await?);
    info!("database connected");

    // ── Recover executions interrupted by a prior crash ─
    let reset = scheduler::recover_startup(&db).await?;
    if reset > 0 {
        info!(count = reset, "reset interrupted executions to pending");
    }

    // ── Start background services ───────────────────────
    let ct = CancellationToken::new();
    let reschedule = Arc::new(Notify::new());

    let dispatcher = Arc::new(RunnerDispatcher::new(
        Arc::clone(&db),
        Arc::clone(&config),
        Arc::clone(&reschedule),
    ));
    let sched = Scheduler::new(Arc::clone(&db), dispatcher);

    let tick_handle = scheduler::spawn_scheduler_tick(
        sched.clone(),
        Duration::from_secs(config.scheduler.tick_seconds),
        Arc::clone(&reschedule),
        ct.clone(),
    );
    let sweep_handle = stall_sweep::spawn_stall_sweep(
        Arc::clone(&db),
        sched,
        Duration::from_secs(config.scheduler.stall_sweep_seconds),
        ct.clone(),
    );
    info!("scheduler and stall sweep started");

    // Kick an immediate pass so pending work dispatches without
    // waiting for the first tick.
    reschedule.notify_one();
    info!("assessd ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(tick_handle, sweep_handle);
    info!("assessd shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
