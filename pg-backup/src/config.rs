//! Configuration management for the backup daemon.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`PG_BACKUP__REMOTE__HOST=...`). A `.env` file in the working directory is
//! honoured when present.

use crate::scheduler::cadence::Cadence;
use crate::utils::{BackupError, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "PG_BACKUP";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub commands: CommandsConfig,
    pub remote: RemoteConfig,
    pub schedule: Cadence,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Local root that receives one `YYYY-MM-DD/HH-MM/` directory per run
    pub backup_dir: PathBuf,

    /// Root passed to the produce command (defaults to `backup_dir`)
    #[serde(default)]
    pub doc_backup_dir: Option<PathBuf>,
}

impl PathsConfig {
    pub fn doc_root(&self) -> &Path {
        self.doc_backup_dir.as_deref().unwrap_or(&self.backup_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandsConfig {
    /// Shell command line that writes the dump; `{path}` is replaced by the run's document path
    pub produce: String,

    /// Program used to ship the local run directory
    #[serde(default = "default_transfer_program")]
    pub transfer_program: String,

    /// Extra arguments placed before the transport options
    #[serde(default = "default_transfer_args")]
    pub transfer_args: Vec<String>,

    /// Upper bound for each external command; unbounded when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub host: String,

    /// SSH port on the backup server
    #[serde(default = "default_remote_port")]
    pub port: u16,

    pub user: String,
    pub path: String,

    /// rsync `--bwlimit` value, passed verbatim (e.g. `5000` or `5m`)
    #[serde(default)]
    pub bandwidth_limit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Address of the `/metrics` and `/health` endpoint
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional file that receives a copy of the log
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// How long shutdown waits for a running backup
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            on_failure: FailurePolicy::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl RunConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// What the process does after a failed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure and keep scheduling and serving metrics
    #[default]
    Continue,
    /// Record the failure, shut down and exit non-zero
    Exit,
}

// Default values
fn default_transfer_program() -> String {
    "rsync".to_string()
}

fn default_transfer_args() -> Vec<String> {
    vec!["-a".to_string()]
}

fn default_remote_port() -> u16 {
    22
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 48080))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then apply `.env` and environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config: Config = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML text, with environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would only fail once the first run starts
    pub fn validate(&self) -> Result<()> {
        if self.commands.produce.trim().is_empty() {
            return Err(BackupError::Config("commands.produce must not be empty".into()));
        }
        if self.commands.transfer_program.trim().is_empty() {
            return Err(BackupError::Config(
                "commands.transfer_program must not be empty".into(),
            ));
        }
        if self.commands.timeout_secs == Some(0) {
            return Err(BackupError::Config(
                "commands.timeout_secs must be at least 1".into(),
            ));
        }
        for (key, value) in [
            ("remote.host", &self.remote.host),
            ("remote.user", &self.remote.user),
            ("remote.path", &self.remote.path),
        ] {
            if value.trim().is_empty() {
                return Err(BackupError::Config(format!("{} must not be empty", key)));
            }
        }
        if self.paths.backup_dir.as_os_str().is_empty() {
            return Err(BackupError::Config("paths.backup_dir must not be empty".into()));
        }
        Ok(())
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
