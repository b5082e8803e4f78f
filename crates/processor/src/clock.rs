//! Time source.
//!
//! Handlers and repositories read time through the scope's [`Clock`], never
//! through `Utc::now()`, so one scope can run against a fixed or shifted
//! clock without affecting any other.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Local, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn utc_now(&self) -> DateTime<Utc>;

    fn local_now(&self) -> DateTime<Local> {
        self.utc_now().with_timezone(&Local)
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// A clock stopped at `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn utc_now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_moves_only_when_advanced() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::at(start);

        assert_eq!(clock.utc_now(), start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.utc_now(), start + Duration::minutes(5));
        assert_eq!(clock.local_now(), clock.utc_now().with_timezone(&Local));
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.utc_now();
        assert!(clock.utc_now() >= first);
    }
}
