//! Update delayer: debounce policy between invalidation and automatic
//! recomputation.
//!
//! After a watched node goes stale the live state does not refresh
//! immediately; it waits a quiescence interval so bursts of invalidations
//! collapse into a single refresh. Every further invalidation of the same
//! key within the window re-arms the deadline. An explicit cancel request
//! ends the wait immediately.

use reflex_core::CallKey;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Debounce policy for one live subscription.
#[derive(Debug)]
pub struct UpdateDelayer {
    delay: Duration,
    cancel: Notify,
}

impl UpdateDelayer {
    /// Create a delayer with the given quiescence interval.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            cancel: Notify::new(),
        }
    }

    /// The configured quiescence interval.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel any pending delay: the current (or next) [`wait`] returns
    /// immediately. Used by "invalidate now" requests.
    ///
    /// [`wait`]: UpdateDelayer::wait
    pub fn cancel_delays(&self) {
        self.cancel.notify_one();
    }

    /// Wait until `delay` has elapsed with no further invalidation of
    /// `key`, or until cancelled, whichever comes first.
    pub async fn wait(&self, rx: &mut broadcast::Receiver<CallKey>, key: &CallKey) {
        let mut deadline = Instant::now() + self.delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                _ = self.cancel.notified() => return,
                event = rx.recv() => match event {
                    Ok(k) if k == *key => {
                        // Burst: restart the quiescence window.
                        deadline = Instant::now() + self.delay;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Events were dropped; one of them may have been
                        // ours. Re-arm conservatively.
                        deadline = Instant::now() + self.delay;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }
}
