//! Outcome registry: the last backup size and status, exposed as Prometheus gauges.
//!
//! The registry is owned by the daemon and handed to the backup operation and
//! the HTTP reporter. Every field is an atomic gauge, so reads never block a
//! run in progress and never observe a torn value.

use crate::utils::{Phase, Result};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Coarse result of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i64)]
pub enum BackupStatus {
    Healthy = 0,
    Failed = 1,
}

impl BackupStatus {
    fn from_gauge(value: i64) -> Self {
        if value == BackupStatus::Healthy as i64 {
            BackupStatus::Healthy
        } else {
            BackupStatus::Failed
        }
    }
}

/// Label values for `backup_runs_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    PrepareFailed,
    ProduceFailed,
    TransferFailed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Ok => "ok",
            RunOutcome::PrepareFailed => "prepare_failed",
            RunOutcome::ProduceFailed => "produce_failed",
            RunOutcome::TransferFailed => "transfer_failed",
        }
    }

    pub fn failed_in(phase: Option<Phase>) -> Self {
        match phase {
            Some(Phase::Produce) => RunOutcome::ProduceFailed,
            Some(Phase::Transfer) => RunOutcome::TransferFailed,
            None => RunOutcome::PrepareFailed,
        }
    }
}

/// Point-in-time read of both gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub size: u64,
    pub status: BackupStatus,
}

pub struct OutcomeRegistry {
    registry: Registry,
    backup_size: IntGauge,
    backup_status: IntGauge,
    backup_runs: IntCounterVec,
}

impl OutcomeRegistry {
    /// Register the gauges and set the baseline (size 0, healthy)
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let backup_size = IntGauge::new("backup_size", "Current backup size.")?;
        registry.register(Box::new(backup_size.clone()))?;

        let backup_status = IntGauge::new(
            "backup_status",
            "Current backup status (0 = healthy, 1 = failed).",
        )?;
        registry.register(Box::new(backup_status.clone()))?;

        let backup_runs = IntCounterVec::new(
            Opts::new("backup_runs_total", "Completed backup runs by outcome."),
            &["outcome"],
        )?;
        registry.register(Box::new(backup_runs.clone()))?;

        backup_size.set(0);
        backup_status.set(BackupStatus::Healthy as i64);

        Ok(Self {
            registry,
            backup_size,
            backup_status,
            backup_runs,
        })
    }

    pub fn set_status(&self, status: BackupStatus) {
        self.backup_status.set(status as i64);
    }

    pub fn set_size(&self, bytes: u64) {
        self.backup_size.set(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    pub fn record_run(&self, outcome: RunOutcome) {
        self.backup_runs.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn runs(&self, outcome: RunOutcome) -> u64 {
        self.backup_runs.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            size: u64::try_from(self.backup_size.get()).unwrap_or(0),
            status: BackupStatus::from_gauge(self.backup_status.get()),
        }
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_baseline_before_any_run() {
        let registry = OutcomeRegistry::new().unwrap();
        assert_eq!(
            registry.snapshot(),
            Snapshot {
                size: 0,
                status: BackupStatus::Healthy
            }
        );

        let text = registry.encode().unwrap();
        assert!(text.contains("backup_size 0"), "{}", text);
        assert!(text.contains("backup_status 0"), "{}", text);
    }

    #[test]
    fn test_updates_are_visible() {
        let registry = OutcomeRegistry::new().unwrap();
        registry.set_size(7_000_000);
        registry.set_status(BackupStatus::Failed);
        registry.record_run(RunOutcome::ProduceFailed);

        assert_eq!(registry.snapshot().size, 7_000_000);
        assert_eq!(registry.snapshot().status, BackupStatus::Failed);
        assert_eq!(registry.runs(RunOutcome::ProduceFailed), 1);
        assert_eq!(registry.runs(RunOutcome::Ok), 0);

        let text = registry.encode().unwrap();
        assert!(text.contains("backup_size 7000000"), "{}", text);
        assert!(text.contains("backup_status 1"), "{}", text);
        assert!(text.contains("backup_runs_total{outcome=\"produce_failed\"} 1"), "{}", text);
    }

    #[test]
    fn test_independent_registries() {
        let a = OutcomeRegistry::new().unwrap();
        let b = OutcomeRegistry::new().unwrap();
        a.set_status(BackupStatus::Failed);
        assert_eq!(b.snapshot().status, BackupStatus::Healthy);
    }

    #[test]
    fn test_concurrent_reads_see_whole_values() {
        let registry = Arc::new(OutcomeRegistry::new().unwrap());
        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..10_000u64 {
                    registry.set_size(if i % 2 == 0 { 0 } else { u32::MAX as u64 });
                }
            })
        };

        for _ in 0..10_000 {
            let size = registry.snapshot().size;
            assert!(size == 0 || size == u32::MAX as u64);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_failed_in_phase() {
        assert_eq!(RunOutcome::failed_in(Some(Phase::Produce)), RunOutcome::ProduceFailed);
        assert_eq!(RunOutcome::failed_in(Some(Phase::Transfer)), RunOutcome::TransferFailed);
        assert_eq!(RunOutcome::failed_in(None), RunOutcome::PrepareFailed);
    }
}
