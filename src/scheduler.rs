use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Paces probes of a single run and observes cancellation between them.
pub struct Scheduler {
    interval: Duration,
    cancel: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(interval: Duration, cancel: watch::Receiver<bool>) -> Self {
        Self { interval, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Wait before probe `sequence`. The first probe goes out immediately.
    ///
    /// Returns false if the run was cancelled before or during the wait.
    pub async fn wait_turn(&mut self, sequence: u16) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if sequence <= 1 {
            return true;
        }

        let next = Instant::now() + self.interval;
        let cancel = &mut self.cancel;
        let interrupted = tokio::select! {
            _ = sleep_until(next) => false,
            // Err means the sender is gone without cancelling
            cancelled = async { cancel.wait_for(|cancelled| *cancelled).await.is_ok() } => cancelled,
        };
        if interrupted {
            return false;
        }
        sleep_until(next).await;
        !self.is_cancelled()
    }
}
