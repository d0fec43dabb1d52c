//! Backup scheduler.
//!
//! A single timer loop fires ticks per the configured [`Cadence`]. Each tick
//! spawns the task on its own tokio task so a slow transfer never delays the
//! timer, and the [`RunSlot`] guarantees at most one run at a time: a tick
//! that finds a run in progress is dropped, not queued.

pub mod cadence;
pub mod run_slot;

use async_trait::async_trait;
use cadence::Cadence;
use chrono::{DateTime, Local, TimeZone};
use run_slot::RunSlot;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Work fired on each tick. Failures are the task's own business.
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    async fn run(&self);
}

/// What a single tick did
#[derive(Debug)]
pub enum TickOutcome {
    Started(JoinHandle<()>),
    Skipped,
}

pub struct Scheduler {
    cadence: Cadence,
    task: Arc<dyn ScheduledTask>,
    slot: RunSlot,
}

impl Scheduler {
    pub fn new(cadence: Cadence, task: Arc<dyn ScheduledTask>) -> Self {
        Self {
            cadence,
            task,
            slot: RunSlot::new(),
        }
    }

    /// Handle for observers that need to know whether a run is in progress
    pub fn run_slot(&self) -> RunSlot {
        self.slot.clone()
    }

    /// Start a run unless one is already in progress
    pub fn tick(&self) -> TickOutcome {
        let Some(permit) = self.slot.try_acquire() else {
            warn!("Skipping scheduled backup: previous run still in progress");
            return TickOutcome::Skipped;
        };

        let task = Arc::clone(&self.task);
        TickOutcome::Started(tokio::spawn(async move {
            let _permit = permit;
            task.run().await;
        }))
    }

    /// Fire ticks until `cancel` is triggered
    pub async fn run(self, cancel: CancellationToken) {
        info!(cadence = %self.cadence, "Scheduler started");

        match self.cadence.period() {
            Some(period) => {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => { self.tick(); }
                    }
                }
            }
            None => {
                let mut last_fire = Local::now();
                loop {
                    let (next, delay) = next_wakeup(&self.cadence, Local::now(), last_fire);
                    debug!("Next backup at {}", next.format("%Y-%m-%d %H:%M:%S"));

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {
                            last_fire = next;
                            self.tick();
                        }
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}

/// Next wall-clock fire and how long to sleep until it.
///
/// Timers may wake a little before the target, so the next fire is computed
/// from the later of `now` and the previous fire: a wake-up at 01:59:59.99
/// for a 02:00 run must not schedule 02:00 again.
fn next_wakeup<Tz: TimeZone>(
    cadence: &Cadence,
    now: DateTime<Tz>,
    last_fire: DateTime<Tz>,
) -> (DateTime<Tz>, Duration) {
    let from = if last_fire > now { last_fire } else { now.clone() };
    let next = cadence.next_fire(&from);
    let delay = next.clone().signed_duration_since(now).to_std().unwrap_or_default();
    (next, delay)
}
