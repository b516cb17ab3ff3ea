//! Start/stop bookkeeping shared by the long-running loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Running flag plus a wake-up for inter-cycle sleeps.
///
/// `stop` only flips the flag and cuts the current sleep short. Work already
/// in progress is never interrupted. A loop stays `active` until its
/// [`ActiveLoop`] guard drops, so a stopped loop still finishing its cycle
/// blocks a new one from starting.
#[derive(Debug, Default)]
pub(crate) struct OperationLoop {
    running: AtomicBool,
    active: AtomicBool,
    wake: Notify,
}

/// Held by the one loop body allowed to run. Dropping it releases the slot.
#[derive(Debug)]
pub(crate) struct ActiveLoop<'a> {
    active: &'a AtomicBool,
}

impl Drop for ActiveLoop<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl OperationLoop {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claims the loop and marks it running. Returns `None` while another
    /// loop body holds it, including one that was stopped mid-cycle.
    pub(crate) fn try_begin(&self) -> Option<ActiveLoop<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.running.store(true, Ordering::SeqCst);

        Some(ActiveLoop {
            active: &self.active,
        })
    }

    /// Returns `false` if the loop was not running.
    pub(crate) fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.wake.notify_waiters();
        was_running
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless stopped first.
    pub(crate) async fn pause(&self, duration: Duration) {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_running() {
            return;
        }

        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = notified => {}
        }
    }
}
