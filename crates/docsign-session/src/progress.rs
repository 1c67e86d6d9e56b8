//! Cosmetic submission progress
//!
//! The batch submission gives no progress feedback, so a ticker advances a
//! counter toward (never past) a ceiling while the request is outstanding.
//! The ticker only writes the progress value; it never decides the outcome
//! of a submission.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

const MIN_TICK: Duration = Duration::from_millis(1);

/// Perceived progress, in documents
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmissionProgress {
    pub current: f64,
    pub total: usize,
}

impl SubmissionProgress {
    pub fn idle(total: usize) -> Self {
        Self {
            current: 0.0,
            total,
        }
    }

    pub fn done(total: usize) -> Self {
        Self {
            current: total as f64,
            total,
        }
    }

    /// Progress as a percentage in `[0, 100]`
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current / self.total as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Advance by one document without passing `ceiling * total`
    pub fn step(self, ceiling: f64) -> Self {
        let cap = self.total as f64 * ceiling;
        Self {
            current: (self.current + 1.0).min(cap).max(self.current),
            total: self.total,
        }
    }
}

/// Running ticker. Stops when stopped or dropped.
pub struct ProgressTicker {
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    /// Reset `sink` to zero and start advancing it every `interval`
    /// (at least 1 ms)
    pub fn start(
        sink: Arc<watch::Sender<SubmissionProgress>>,
        total: usize,
        ceiling: f64,
        interval: Duration,
    ) -> Self {
        sink.send_replace(SubmissionProgress::idle(total));
        let interval = interval.max(MIN_TICK);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                sink.send_modify(|progress| {
                    *progress = progress.step(ceiling);
                    trace!("Submission progress {:.0}%", progress.percent());
                });
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
