//! Custom error types for the backup daemon.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The two external steps of a backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Dump the database into the document backup directory
    Produce,
    /// Sync the local backup directory to the remote server
    Transfer,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Produce => "produce",
            Phase::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an external command ended. `None` means it was killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome(pub Option<i32>);

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.0 == Some(0)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Failed to prepare backup root {path:?}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} phase failed ({exit}): {stderr}")]
    PhaseFailed {
        phase: Phase,
        exit: ExitOutcome,
        stderr: String,
    },

    #[error("{phase} phase could not start `{program}`: {source}")]
    Spawn {
        phase: Phase,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} phase timed out after {after:?}")]
    Timeout { phase: Phase, after: Duration },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl BackupError {
    /// The phase this error belongs to, if it came from an external command.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            BackupError::PhaseFailed { phase, .. }
            | BackupError::Spawn { phase, .. }
            | BackupError::Timeout { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_failure_names_phase_and_stderr() {
        let err = BackupError::PhaseFailed {
            phase: Phase::Transfer,
            exit: ExitOutcome(Some(23)),
            stderr: "connection refused".to_string(),
        };

        let msg = err.to_string();
        assert_eq!(msg, "transfer phase failed (exit code 23): connection refused");
        assert_eq!(err.phase(), Some(Phase::Transfer));
    }

    #[test]
    fn test_exit_outcome() {
        assert!(ExitOutcome(Some(0)).success());
        assert!(!ExitOutcome(Some(1)).success());
        assert!(!ExitOutcome(None).success());
        assert_eq!(ExitOutcome(None).to_string(), "terminated by signal");
    }
}
