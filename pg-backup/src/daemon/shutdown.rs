//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! Ensures that:
//! - No new backup run starts once shutdown begins
//! - A run in progress gets a grace period to finish its current phase
//! - The metrics endpoint keeps answering until the drain is over

use crate::scheduler::run_slot::RunSlot;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(250);

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator with the given drain grace period
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Wait for shutdown signal (SIGTERM or SIGINT)
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
    }

    /// Wait for an in-flight run to finish, up to the grace period.
    ///
    /// Returns `true` when the slot is idle.
    pub async fn drain(&self, slot: &RunSlot) -> bool {
        if !slot.is_running() {
            return true;
        }

        info!(
            "Waiting up to {}s for the running backup to finish",
            self.grace.as_secs()
        );
        let deadline = tokio::time::Instant::now() + self.grace;
        while slot.is_running() {
            if tokio::time::Instant::now() >= deadline {
                warn!("Backup still running after grace period, abandoning it");
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        info!("Running backup finished, continuing shutdown");
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
