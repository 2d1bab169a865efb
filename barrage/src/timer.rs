use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

/// Controller tick source, measuring time from the start of the run.
pub(crate) struct Timer {
    interval: Interval,
    start: Instant,
    interval_dur: Duration,
}

impl Timer {
    pub async fn new(interval_dur: Duration) -> Self {
        let mut interval = interval(interval_dur);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // NOTE: First tick completes instantly
        let start = interval.tick().await;
        Self {
            interval,
            start,
            interval_dur,
        }
    }

    /// Waits for the next tick and returns the time elapsed since the run started.
    pub async fn tick(&mut self) -> Duration {
        self.interval.tick().await;
        self.start.elapsed()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn start(&self) -> Instant {
        self.start
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", humantime::format_duration(self.interval_dur))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticks_at_interval() {
        let mut timer = Timer::new(Duration::from_millis(20)).await;
        assert_eq!(timer.to_string(), "20ms");

        let first = timer.tick().await;
        let second = timer.tick().await;
        assert!(first >= Duration::from_millis(15));
        assert!(second >= Duration::from_millis(35));
        assert!(timer.elapsed() >= second);
    }
}
