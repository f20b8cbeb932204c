//! Poll scheduling.

use crate::error::ScheduleError;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

/// Fixed-interval schedule driving trigger polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    interval: Duration,
}

impl PollSchedule {
    /// Creates a schedule firing every `interval`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInterval` for a zero interval.
    pub fn new(interval: Duration) -> Result<Self, ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::InvalidInterval {
                reason: "interval must be greater than zero".to_string(),
            });
        }
        Ok(Self { interval })
    }

    /// Creates a schedule from whole seconds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInterval` for zero seconds.
    pub fn from_secs(seconds: u64) -> Result<Self, ScheduleError> {
        Self::new(Duration::from_secs(seconds))
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Builds a ticker for this schedule.
    ///
    /// Ticks missed while a previous tick was being handled are dropped rather
    /// than fired in a burst.
    #[must_use]
    pub fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_rejected() {
        assert!(matches!(
            PollSchedule::from_secs(0),
            Err(ScheduleError::InvalidInterval { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_skips_missed_ticks() {
        let schedule = PollSchedule::new(Duration::from_millis(100)).expect("valid");
        let mut ticker = schedule.ticker();
        ticker.tick().await;

        tokio::time::sleep(Duration::from_millis(350)).await;
        let start = tokio::time::Instant::now();
        ticker.tick().await;
        ticker.tick().await;

        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
