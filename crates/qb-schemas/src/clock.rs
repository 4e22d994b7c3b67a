//! Injectable time source.
//!
//! The simulated broker's T+1 ledger, the risk gate's trade-interval check
//! and the REST signer's `X-Timestamp` all depend on "now". Taking it from a
//! trait keeps those paths deterministic under test.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    /// Current local wall-clock time, second precision is sufficient.
    fn now(&self) -> NaiveDateTime;

    /// Current trading date.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Production clock reading the OS local time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Test clock pinned to an explicit instant; advance it by hand.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn at(date: NaiveDate, h: u32, m: u32, s: u32) -> Self {
        let now = date
            .and_hms_opt(h, m, s)
            .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).expect("midnight is valid"));
        Self::new(now)
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().expect("clock lock poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock lock poisoned");
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().expect("clock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::at(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 9, 30, 0);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        clock.advance(Duration::days(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
