//! Cancellable repeating heartbeat timer.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A repeating task that runs `tick` every `interval` until cancelled.
///
/// The token handed to `tick` is the same one [`cancel`](Self::cancel)
/// trips, so a tick that takes a lock can re-check it and skip the send
/// if cancellation won the race.  Dropping the handle cancels it.
pub struct Heartbeat {
    interval: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawn the timer on `runtime`.  The first tick fires one full
    /// `interval` after this call.  `tick` returns `false` to stop the
    /// schedule.
    ///
    /// Callable from any thread.  `interval` must be non-zero.
    pub fn start<F>(runtime: &Handle, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut(&CancellationToken) -> bool + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if token.is_cancelled() || !tick(&token) {
                    break;
                }
            }
            tracing::trace!(interval_ms = interval.as_millis() as u64, "heartbeat task exited");
        });

        Self {
            interval,
            cancel,
            task,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the schedule.  Safe to call more than once.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel();
    }
}
