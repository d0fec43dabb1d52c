//! Backup operation - one dump-and-sync cycle.
//!
//! A run goes through three steps, strictly in order:
//! - make sure the local backup root exists
//! - produce: run the dump command into the run's document directory
//! - transfer: sync the run's local directory to the remote server
//!
//! The first failing step ends the run. The outcome is written to the
//! [`OutcomeRegistry`] exactly once, when the run ends.

pub mod command;
pub mod run;

use crate::config::{Config, FailurePolicy};
use crate::metrics::{BackupStatus, OutcomeRegistry, RunOutcome};
use crate::scheduler::ScheduledTask;
use crate::utils::{BackupError, Phase, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use command::{CommandRunner, CommandSpec};
use run::BackupRun;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;
use walkdir::WalkDir;

pub use command::ProcessRunner;

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stamp: String,
    pub local_dir: PathBuf,
    /// Bytes under the run directory, if they could be measured
    pub size: Option<u64>,
    pub duration: Duration,
}

pub struct BackupOperation<R: CommandRunner = ProcessRunner> {
    config: Arc<Config>,
    runner: R,
    registry: Arc<OutcomeRegistry>,
    fatal: CancellationToken,
}

impl<R: CommandRunner> BackupOperation<R> {
    pub fn new(config: Arc<Config>, runner: R, registry: Arc<OutcomeRegistry>) -> Self {
        Self {
            config,
            runner,
            registry,
            fatal: CancellationToken::new(),
        }
    }

    /// Token cancelled when a run fails under `run.on_failure = "exit"`
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Run one backup cycle for the given start time
    pub async fn execute(&self, now: DateTime<Local>) -> Result<RunReport> {
        let run = BackupRun::new(&self.config, now);
        let span = info_span!("backup_run", run_id = %run.id, stamp = %run.stamp);

        async {
            info!("Starting backup run");
            let start = Instant::now();

            match self.run_phases(&run).await {
                Ok(()) => {
                    let size = self.measure(&run.local_dir).await;
                    if let Some(bytes) = size {
                        self.registry.set_size(bytes);
                    }
                    self.registry.set_status(BackupStatus::Healthy);
                    self.registry.record_run(RunOutcome::Ok);

                    let report = RunReport {
                        run_id: run.id,
                        stamp: run.stamp.clone(),
                        local_dir: run.local_dir.clone(),
                        size,
                        duration: start.elapsed(),
                    };
                    info!(
                        size = ?report.size,
                        duration_secs = report.duration.as_secs(),
                        "Backup run completed"
                    );
                    Ok(report)
                }
                Err(e) => {
                    self.registry.set_status(BackupStatus::Failed);
                    self.registry.record_run(RunOutcome::failed_in(e.phase()));
                    error!(
                        phase = e.phase().map(|p| p.as_str()).unwrap_or("prepare"),
                        "Backup run failed: {}",
                        e
                    );
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_phases(&self, run: &BackupRun) -> Result<()> {
        ensure_backup_root(&self.config.paths.backup_dir).await?;

        let produce = CommandSpec::shell(run.produce_command(&self.config.commands.produce));
        self.run_phase(Phase::Produce, &produce).await?;
        info!("Dump created in {}", run.doc_dir.display());

        let transfer = transfer_command(&self.config, run);
        self.run_phase(Phase::Transfer, &transfer).await?;
        info!(
            "Dump synchronized to {}@{}:{}",
            self.config.remote.user, self.config.remote.host, self.config.remote.path
        );

        Ok(())
    }

    async fn run_phase(&self, phase: Phase, spec: &CommandSpec) -> Result<()> {
        info!(%phase, command = %spec, "Running {} phase", phase);

        let execution = self.runner.execute(spec);
        let result = match self.config.commands.timeout() {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .map_err(|_| BackupError::Timeout {
                    phase,
                    after: limit,
                })?,
            None => execution.await,
        };

        let output = result.map_err(|source| BackupError::Spawn {
            phase,
            program: spec.program.clone(),
            source,
        })?;

        if output.success() {
            Ok(())
        } else {
            Err(BackupError::PhaseFailed {
                phase,
                exit: output.exit,
                stderr: output.stderr_text(),
            })
        }
    }

    async fn measure(&self, dir: &Path) -> Option<u64> {
        let dir = dir.to_path_buf();
        match tokio::task::spawn_blocking(move || dir_size(&dir)).await {
            Ok(Ok(bytes)) => Some(bytes),
            Ok(Err(e)) => {
                warn!("Could not measure backup size, keeping previous value: {}", e);
                None
            }
            Err(e) => {
                warn!("Backup size task failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl<R: CommandRunner> ScheduledTask for BackupOperation<R> {
    async fn run(&self) {
        let failed = self.execute(Local::now()).await.is_err();
        if failed && self.config.run.on_failure == FailurePolicy::Exit {
            error!("Stopping after failed backup run (run.on_failure = \"exit\")");
            self.fatal.cancel();
        }
    }
}

/// Create the local backup root if it is missing. Safe to call repeatedly.
pub async fn ensure_backup_root(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| BackupError::Prepare {
            path: path.to_path_buf(),
            source,
        })
}

/// `rsync [args] [--bwlimit=N] -e "ssh -p PORT" <run dir>/ user@host:path`
fn transfer_command(config: &Config, run: &BackupRun) -> CommandSpec {
    let commands = &config.commands;
    let remote = &config.remote;

    let mut args = commands.transfer_args.clone();
    if let Some(limit) = &remote.bandwidth_limit {
        args.push(format!("--bwlimit={}", limit));
    }
    args.push("-e".to_string());
    args.push(format!("ssh -p {}", remote.port));
    args.push(run.transfer_source());
    args.push(format!("{}@{}:{}", remote.user, remote.host, remote.path));

    CommandSpec::new(commands.transfer_program.clone(), args)
}

fn dir_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}
