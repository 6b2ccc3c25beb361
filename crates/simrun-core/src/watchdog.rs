//! Inactivity watchdog.
//!
//! A fixed-period poll, not a rescheduled deadline: every `timeout` the
//! session asks whether the most recent routed line is at least `timeout`
//! old. Activity between ticks does not move the next tick.

use std::time::{Duration, Instant};

use tokio::time::{interval_at, Interval, MissedTickBehavior};

/// Periodic inactivity check for a launch session.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    interval: Interval,
}

impl Watchdog {
    /// Creates a watchdog whose first tick fires one `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        let mut interval = interval_at(tokio::time::Instant::now() + timeout, timeout);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { timeout, interval }
    }

    /// The configured inactivity threshold.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for the next tick.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Whether `last_activity` is at least one timeout before `now`.
    pub fn expired(&self, last_activity: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_activity) >= self.timeout
    }
}

/// Ticks `watchdog` if there is one; pends forever otherwise.
pub(crate) async fn tick(watchdog: &mut Option<Watchdog>) {
    match watchdog {
        Some(watchdog) => watchdog.tick().await,
        None => std::future::pending().await,
    }
}
