//! Sweep cadence derivation and the recurring wake-up.
//!
//! The sweep interval scales with the configured threshold so that a short
//! threshold is checked often enough to fire close to on time, while a long
//! threshold does not waste wake-ups:
//!
//! | Threshold      | Check interval          |
//! |----------------|-------------------------|
//! | under 1 minute | threshold/10, min 1s    |
//! | under 5 min    | 30s                     |
//! | under 30 min   | 1 minute                |
//! | otherwise      | 5 minutes               |
//!
//! [`SweepScheduler`] owns the recurring wake-up task. Reinstalling is
//! cancel-and-recreate: the old task is aborted before the new one starts,
//! so a settings change can never leave two cadences firing at once.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::EngineEvent;

/// Derives the sweep cadence for a threshold in milliseconds.
#[must_use]
pub fn check_interval(threshold_ms: i64) -> Duration {
    if threshold_ms < 60_000 {
        let interval_ms = (threshold_ms / 10).max(1_000);
        Duration::from_millis(interval_ms as u64)
    } else if threshold_ms < 300_000 {
        Duration::from_secs(30)
    } else if threshold_ms < 1_800_000 {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(300)
    }
}

/// Owns the recurring sweep wake-up.
///
/// Each installed schedule is a background task emitting
/// [`EngineEvent::SweepTick`] into the engine's event channel at a fixed
/// period. The task ends on its own when the channel closes.
#[derive(Debug)]
pub struct SweepScheduler {
    events: mpsc::Sender<EngineEvent>,
    task: Option<JoinHandle<()>>,
    interval: Option<Duration>,
}

impl SweepScheduler {
    /// Creates a scheduler with nothing installed.
    #[must_use]
    pub fn new(events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            events,
            task: None,
            interval: None,
        }
    }

    /// Installs (or replaces) the recurring wake-up.
    ///
    /// Any previously installed schedule is cancelled first. The first tick
    /// fires one full period after installation.
    pub fn install(&mut self, interval: Duration) {
        self.cancel();
        debug!(interval_ms = interval.as_millis() as u64, "sweep cadence installed");

        let events = self.events.clone();
        self.interval = Some(interval);
        self.task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                if events.send(EngineEvent::SweepTick).await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancels the installed wake-up, if any.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.interval = None;
    }

    /// The currently installed period, if a schedule is running.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
