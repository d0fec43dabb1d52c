//! pg-backup - Main entry point
//!
//! Dumps the database on a schedule, syncs the dump to the backup server and
//! serves the last outcome on `/metrics`.

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use pg_backup::{
    api,
    config::Config,
    daemon::shutdown::ShutdownCoordinator,
    executor::{BackupOperation, ProcessRunner},
    metrics::OutcomeRegistry,
    scheduler::Scheduler,
    utils,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "./pg_backup.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run one backup immediately and exit with its result
    #[arg(long)]
    once: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)?;

    if args.check {
        println!(
            "{}: ok ({}, metrics on {})",
            args.config.display(),
            config.schedule,
            config.metrics.listen
        );
        return Ok(());
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.file.as_deref())?;

    tracing::info!(
        "Starting pg-backup v{} ({}, target {}@{}:{})",
        env!("CARGO_PKG_VERSION"),
        config.schedule,
        config.remote.user,
        config.remote.host,
        config.remote.path
    );

    let config = Arc::new(config);
    let registry = Arc::new(OutcomeRegistry::new()?);
    let operation = BackupOperation::new(config.clone(), ProcessRunner, registry.clone());

    if args.once {
        operation.execute(Local::now()).await?;
        return Ok(());
    }

    let fatal = operation.fatal_token();
    let scheduler = Scheduler::new(config.schedule, Arc::new(operation));
    let run_slot = scheduler.run_slot();

    // Start metrics server
    let app = api::create_router(api::AppState::new(registry, run_slot.clone()));
    let listener = tokio::net::TcpListener::bind(config.metrics.listen).await?;
    tracing::info!("Metrics endpoint: http://{}/metrics", config.metrics.listen);
    tracing::info!("Health endpoint: http://{}/health", config.metrics.listen);

    let server_shutdown = CancellationToken::new();
    let server_stop = server_shutdown.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_stop.cancelled().await })
            .await
    });

    // Start scheduler loop
    let scheduler_shutdown = CancellationToken::new();
    let scheduler_handle = tokio::spawn(scheduler.run(scheduler_shutdown.clone()));

    // Wait for a signal, or for a failed run under the exit policy
    let shutdown_coordinator = ShutdownCoordinator::new(config.run.shutdown_grace());
    let failed = tokio::select! {
        _ = shutdown_coordinator.wait_for_signal() => false,
        _ = fatal.cancelled() => true,
    };

    // Stop scheduling, let a running backup finish, then stop serving
    scheduler_shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        tracing::error!("Scheduler task panicked: {}", e);
    }
    shutdown_coordinator.drain(&run_slot).await;
    server_shutdown.cancel();

    match tokio::time::timeout(std::time::Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    if failed {
        anyhow::bail!("backup run failed and run.on_failure is \"exit\"");
    }

    Ok(())
}
