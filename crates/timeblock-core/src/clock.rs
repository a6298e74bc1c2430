//! Injectable time source.
//!
//! The engine never reads the system clock directly; every scheduling
//! decision flows through a [`Clock`] so tests run against a fixed instant.

use std::sync::Mutex;

use chrono::{DateTime, Duration, DurationRound, Utc};

/// Source of "now" for the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time. The only place the engine touches `Utc::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Round an instant up to the next multiple of `step` (e.g. the next quarter
/// hour). An instant already on the boundary is returned unchanged.
pub fn round_up(at: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    if step <= Duration::zero() {
        return at;
    }
    match at.duration_trunc(step) {
        Ok(floor) if floor == at => at,
        Ok(floor) => floor + step,
        Err(_) => at,
    }
}
