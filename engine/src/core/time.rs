use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the unix epoch. Respawn due times and lock expiries use it.
pub type Timestamp = u64;

pub const MINUTE: u64 = 60;
pub const HOUR: u64 = 60 * MINUTE;
pub const DAY: u64 = 24 * HOUR;
pub const WEEK: u64 = 7 * DAY;

/// Source of the current game time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Used by tests and deterministic simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, seconds: u64) -> Timestamp {
        self.now.fetch_add(seconds, Ordering::SeqCst) + seconds
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Accumulates tick deltas until an interval has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTimer {
    interval: Duration,
    current: Duration,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            current: Duration::ZERO,
        }
    }

    pub fn update(&mut self, diff: Duration) {
        self.current += diff;
    }

    pub fn passed(&self) -> bool {
        self.current >= self.interval
    }

    /// Consume one elapsed interval, keeping any overshoot.
    pub fn reset(&mut self) {
        if self.current >= self.interval {
            self.current = match self.interval.as_nanos() {
                0 => Duration::ZERO,
                n => Duration::from_nanos((self.current.as_nanos() % n) as u64),
            };
        }
    }

    /// Start over with a new interval.
    pub fn restart(&mut self, interval: Duration) {
        self.interval = interval;
        self.current = Duration::ZERO;
    }

    pub fn set_current(&mut self, current: Duration) {
        self.current = current;
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_timer_keeps_overshoot() {
        // Given
        let mut timer = IntervalTimer::new(Duration::from_millis(100));

        // When
        timer.update(Duration::from_millis(60));
        assert!(!timer.passed());
        timer.update(Duration::from_millis(70));

        // Then
        assert!(timer.passed());
        timer.reset();
        assert_eq!(timer.current(), Duration::from_millis(30));
        assert!(!timer.passed());
    }

    #[test]
    fn zero_interval_always_passes() {
        let mut timer = IntervalTimer::new(Duration::ZERO);
        assert!(timer.passed());
        timer.update(Duration::from_millis(5));
        timer.reset();
        assert_eq!(timer.current(), Duration::ZERO);
        assert!(timer.passed());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.advance(300), 1_300);
        assert_eq!(clock.now(), 1_300);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }
}
