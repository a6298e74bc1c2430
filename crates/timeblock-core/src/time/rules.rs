//! Availability constraints and slot rules.
//!
//! An [`Availability`] bounds *where* free time may legally fall (a timezone
//! plus allowed daily clock-windows); a [`SlotRule`] chain bounds *what* a
//! single placed block may look like. Rules consume a candidate span and may
//! accept it, shrink it, or reject it.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::span::Timespan;

/// A daily window of allowed time, e.g. 08:00-16:30.
///
/// Windows must lie within a single calendar day; a window crossing midnight
/// is not representable. This is an explicit limitation of the availability
/// model, not a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ClockWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Materialize the window on a calendar date, in the local wall frame.
    fn on_date_local(&self, date: NaiveDate) -> Timespan {
        Timespan::new(
            relabel_local(date.and_time(self.start)),
            relabel_local(date.and_time(self.end)),
        )
    }
}

/// A timezone plus the ordered daily clock-windows where free time may fall.
///
/// An empty window list means the whole day is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub timezone: Tz,
    pub windows: Vec<ClockWindow>,
}

impl Availability {
    pub fn new(timezone: Tz, windows: Vec<ClockWindow>) -> Self {
        Self { timezone, windows }
    }

    /// Whole-day availability in the given zone.
    pub fn unconstrained(timezone: Tz) -> Self {
        Self { timezone, windows: Vec::new() }
    }

    /// Clip a free fragment against the allowed daily windows.
    ///
    /// The fragment is split at local midnights; each piece is compared
    /// clock-wise against every window materialized on that piece's date and
    /// trimmed to the overlap. A piece with no overlapping window contributes
    /// nothing.
    pub fn clip(&self, fragment: Timespan) -> Vec<Timespan> {
        if self.windows.is_empty() {
            return if fragment.is_empty() { Vec::new() } else { vec![fragment] };
        }
        let mut allowed = Vec::new();
        for piece in fragment.split_by_day(self.timezone) {
            let date = piece.start.with_timezone(&self.timezone).date_naive();
            let local_piece = to_local_frame(&piece, self.timezone);
            for window in &self.windows {
                if !window.is_valid() {
                    continue;
                }
                let local_window = window.on_date_local(date);
                if !local_window.clock_intersects(&local_piece) {
                    continue;
                }
                let start = if local_window.clock_overflows_start(&local_piece) {
                    local_window.start
                } else {
                    local_piece.start
                };
                let end = if local_window.clock_overflows_end(&local_piece) {
                    local_window.end
                } else {
                    local_piece.end
                };
                if start >= end {
                    continue;
                }
                if let Some(span) = from_local_frame(&Timespan::new(start, end), self.timezone) {
                    allowed.push(span);
                }
            }
        }
        allowed
    }
}

/// Re-label a UTC instant as its local wall-clock naive value, so clock
/// comparisons against same-day local windows are exact.
fn to_local_frame(span: &Timespan, tz: Tz) -> Timespan {
    Timespan::new(
        relabel_local(span.start.with_timezone(&tz).naive_local()),
        relabel_local(span.end.with_timezone(&tz).naive_local()),
    )
}

fn relabel_local(naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// Convert a wall-frame span back to real UTC instants. Returns `None` when
/// a DST gap swallows one of the endpoints.
fn from_local_frame(span: &Timespan, tz: Tz) -> Option<Timespan> {
    let start = tz.from_local_datetime(&span.start.naive_utc()).earliest()?;
    let end = tz.from_local_datetime(&span.end.naive_utc()).earliest()?;
    let (start, end) = (start.with_timezone(&Utc), end.with_timezone(&Utc));
    if start < end {
        Some(Timespan::new(start, end))
    } else {
        None
    }
}

/// A single link in the slot-rule chain.
///
/// Each rule consumes a candidate span and may shrink or reject it; the
/// window search applies the chain to every free fragment in order.
pub trait SlotRule {
    fn check(&self, span: &Timespan) -> Option<Timespan>;
}

/// Bounds how long a single placed block may be. A zero bound is ignored:
/// `DurationRule::new(zero, zero)` accepts any span unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationRule {
    pub minimum: Duration,
    pub maximum: Duration,
}

impl DurationRule {
    pub fn new(minimum: Duration, maximum: Duration) -> Self {
        Self { minimum, maximum }
    }
}

impl SlotRule for DurationRule {
    fn check(&self, span: &Timespan) -> Option<Timespan> {
        let duration = span.duration();
        if duration < self.minimum {
            return None;
        }
        if self.maximum > Duration::zero() && duration > self.maximum {
            return Some(Timespan::new(span.start, span.start + self.maximum));
        }
        Some(*span)
    }
}
