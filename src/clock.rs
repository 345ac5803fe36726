//! Time source for the orchestrator
//!
//! Settle delays and probe sampling windows go through a `Clock` so runs can be
//! driven instantly under test.

use chrono::{DateTime, Local};
use std::time::Duration;

/// Wall-clock time and blocking sleeps
pub trait Clock: Send + Sync {
    /// Current local time
    fn now(&self) -> DateTime<Local>;

    /// Block the caller for `duration`
    fn sleep(&self, duration: Duration);

    /// Timestamp used in artifact file names
    fn stamp(&self) -> String {
        self.now().format("%Y%m%d_%H%M%S").to_string()
    }
}

/// The real clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that advances only when slept on
#[cfg(test)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Local>>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        use chrono::TimeZone;
        let start = Local
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Local::now);
        Self::starting_at(start)
    }

    pub fn starting_at(start: DateTime<Local>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
            sleeps: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or_default();
        *self.now.lock().unwrap() += step;
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let before = clock.now();
        clock.sleep(Duration::from_secs(5));
        assert_eq!((clock.now() - before).num_seconds(), 5);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_stamp_format() {
        let clock = ManualClock::new();
        assert_eq!(clock.stamp(), "20240601_120000");
    }
}
