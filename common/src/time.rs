//! Time utilities for SheetFX.
//!
//! Everything that asks "how old is this rate table" goes through [`Clock`]
//! so tests can move time forward without sleeping.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Check if something recorded at `recorded_at` is older than `ttl` at `now`.
pub fn is_older_than(recorded_at: Timestamp, ttl: Duration, now: Timestamp) -> bool {
    now.signed_duration_since(recorded_at) > ttl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }

    #[test]
    fn test_is_older_than() {
        let now = Utc::now();
        let ttl = Duration::hours(2);

        assert!(!is_older_than(now - Duration::minutes(119), ttl, now));
        assert!(!is_older_than(now - ttl, ttl, now));
        assert!(is_older_than(now - Duration::minutes(121), ttl, now));
    }
}
