//! Idle/Running flag that keeps backup runs from overlapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared between the scheduler, which acquires it per tick, and the
/// reporter, which only reads it.
#[derive(Debug, Clone, Default)]
pub struct RunSlot {
    busy: Arc<AtomicBool>,
}

impl RunSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move Idle -> Running, or return `None` if a run is already in progress
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one run; dropping it moves the slot back to Idle,
/// including when the run panics.
#[derive(Debug)]
pub struct RunPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder() {
        let slot = RunSlot::new();
        assert!(!slot.is_running());

        let permit = slot.try_acquire().unwrap();
        assert!(slot.is_running());
        assert!(slot.try_acquire().is_none());
        assert!(slot.clone().try_acquire().is_none());

        drop(permit);
        assert!(!slot.is_running());
        assert!(slot.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_released_on_panic() {
        let slot = RunSlot::new();
        let permit = slot.try_acquire().unwrap();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            panic!("run blew up");
        });

        assert!(handle.await.is_err());
        assert!(!slot.is_running());
    }
}
