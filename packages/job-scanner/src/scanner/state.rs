//! The process-wide "scan in progress" flag.
//!
//! One [`ScanState`] is created per scanner and handed to the engine (the only
//! writer) and the scheduler (reads it to skip ticks). The flag is only ever
//! set through [`ScanState::try_acquire`] and cleared when the returned
//! [`ScanGuard`] drops, so every exit path of a run releases it: normal
//! return, `?` propagation and panics alike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct ScanState {
    running: AtomicBool,
    idle: Notify,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scanning(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Take the flag, or `None` if another run holds it. Never blocks.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ScanGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanGuard {
                state: Arc::clone(self),
            })
    }

    /// Resolves once no run holds the flag.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // register before checking so a release in between is not missed
            notified.as_mut().enable();
            if !self.is_scanning() {
                return;
            }
            notified.await;
        }
    }
}

/// Holds the running flag for the lifetime of one scan run.
#[derive(Debug)]
pub struct ScanGuard {
    state: Arc<ScanState>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
        self.state.idle.notify_waiters();
    }
}
