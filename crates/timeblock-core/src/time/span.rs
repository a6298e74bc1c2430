//! Half-open time intervals.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: u32 = 86_400;

/// An immutable half-open interval `[start, end)` of absolute instants.
///
/// Zero-length spans are legal and denote point markers (e.g. a due instant).
/// Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timespan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Timespan {
    /// Create a new span. `end` below `start` violates the invariant; debug
    /// builds assert, release builds keep the values as given.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start <= end, "timespan end before start");
        Self { start, end }
    }

    /// A zero-length span marking a single instant.
    pub fn point(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the instant falls inside the span (`start` inclusive, `end`
    /// exclusive).
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Whether `other` lies entirely inside this span.
    pub fn contains_span(&self, other: &Timespan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Half-open overlap test: touching spans do not intersect.
    pub fn intersects(&self, other: &Timespan) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The overlapping part of two spans, if any.
    pub fn intersection(&self, other: &Timespan) -> Option<Timespan> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            Some(Timespan::new(start, end))
        } else {
            None
        }
    }

    /// Extend the span symmetrically by `padding` on both sides.
    pub fn padded(&self, padding: Duration) -> Timespan {
        Timespan::new(self.start - padding, self.end + padding)
    }

    /// Seconds from midnight of the start instant's clock.
    fn clock_start(&self) -> u32 {
        self.start.time().num_seconds_from_midnight()
    }

    /// Seconds from midnight of the end instant's clock. A span running up to
    /// the next midnight reads as end-of-day rather than zero.
    fn clock_end(&self) -> u32 {
        let secs = self.end.time().num_seconds_from_midnight();
        if secs == 0 && self.end > self.start {
            SECS_PER_DAY
        } else {
            secs
        }
    }

    /// Clock-only containment: compares time-of-day and ignores the date.
    ///
    /// Only meaningful when both spans lie within a single calendar day of
    /// the same frame; the availability constraint guarantees this because
    /// allowed daily windows never cross midnight.
    pub fn clock_contains(&self, other: &Timespan) -> bool {
        self.clock_start() <= other.clock_start() && other.clock_end() <= self.clock_end()
    }

    /// Clock-only overlap test, same restrictions as [`clock_contains`].
    ///
    /// [`clock_contains`]: Timespan::clock_contains
    pub fn clock_intersects(&self, other: &Timespan) -> bool {
        self.clock_start() < other.clock_end() && other.clock_start() < self.clock_end()
    }

    /// Whether `other` starts earlier in the day than this span does.
    pub fn clock_overflows_start(&self, other: &Timespan) -> bool {
        other.clock_start() < self.clock_start()
    }

    /// Whether `other` ends later in the day than this span does.
    pub fn clock_overflows_end(&self, other: &Timespan) -> bool {
        other.clock_end() > self.clock_end()
    }

    /// Cut the span at every local midnight of `tz`, yielding pieces that
    /// each lie within one local calendar day.
    pub fn split_by_day(&self, tz: Tz) -> Vec<Timespan> {
        let mut pieces = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let cut = local_midnight_after(cursor, tz).min(self.end);
            if cut <= cursor {
                break;
            }
            pieces.push(Timespan::new(cursor, cut));
            cursor = cut;
        }
        pieces
    }
}

/// The first local midnight of `tz` strictly after `at`.
///
/// Zones that skip midnight on a DST day fall back to the earliest valid
/// local instant of that day, or a flat 24 h step if the date arithmetic
/// overflows.
pub(crate) fn local_midnight_after(at: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = at.with_timezone(&tz);
    let next = match local.date_naive().succ_opt() {
        Some(day) => day,
        None => return at + Duration::days(1),
    };
    let midnight = next.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(instant) => instant.with_timezone(&Utc),
        None => at + Duration::days(1),
    }
}
