//! Mutable scheduling workspace.
//!
//! A [`TimeWindow`] is built once per scheduling attempt: populated with busy
//! intervals from every relevant user's calendars, asked to derive the free
//! intervals under an availability constraint, then consumed destructively by
//! the slot search. It is never persisted.

use chrono::{DateTime, Duration, Utc};

use super::rules::{Availability, SlotRule};
use super::span::Timespan;

/// Busy/free workspace over a `[start, end)` boundary.
///
/// The busy list is kept sorted and non-overlapping at all times; inserted
/// spans are padded by the window's padding amount and coalesced with any
/// entry they overlap or touch. The free list is derived on demand by
/// [`compute_free`] and consumed in place by [`find_time_slot`].
///
/// [`compute_free`]: TimeWindow::compute_free
/// [`find_time_slot`]: TimeWindow::find_time_slot
#[derive(Debug, Clone)]
pub struct TimeWindow {
    bounds: Timespan,
    padding: Duration,
    busy: Vec<Timespan>,
    free: Option<Vec<Timespan>>,
    free_total: Duration,
}

impl TimeWindow {
    pub fn new(bounds: Timespan, padding: Duration) -> Self {
        Self {
            bounds,
            padding,
            busy: Vec::new(),
            free: None,
            free_total: Duration::zero(),
        }
    }

    pub fn bounds(&self) -> Timespan {
        self.bounds
    }

    pub fn padding(&self) -> Duration {
        self.padding
    }

    pub fn busy(&self) -> &[Timespan] {
        &self.busy
    }

    /// The derived free fragments, empty until [`compute_free`] has run.
    ///
    /// [`compute_free`]: TimeWindow::compute_free
    pub fn free_fragments(&self) -> &[Timespan] {
        self.free.as_deref().unwrap_or(&[])
    }

    /// Total free time left in the window.
    pub fn free_duration(&self) -> Duration {
        self.free_total
    }

    /// Insert a busy interval, padded on both sides and clamped to the
    /// window boundary, merging with every existing entry it overlaps or
    /// touches. Any previously derived free list is invalidated.
    pub fn add_to_busy(&mut self, span: Timespan) {
        self.free = None;
        self.free_total = Duration::zero();

        let padded = match span.padded(self.padding).intersection(&self.bounds) {
            Some(clamped) => clamped,
            None => return,
        };
        if padded.is_empty() {
            return;
        }

        // Entries strictly before the new span keep their place; everything
        // from the first touching entry to the last touching entry collapses
        // into one coalesced interval.
        let first = self.busy.partition_point(|entry| entry.end < padded.start);
        let last = self.busy.partition_point(|entry| entry.start <= padded.end);
        let merged = if first < last {
            Timespan::new(
                self.busy[first].start.min(padded.start),
                self.busy[last - 1].end.max(padded.end),
            )
        } else {
            padded
        };
        self.busy.splice(first..last, [merged]);
    }

    /// Derive the free list: the complement of busy within the boundary,
    /// each gap then clipped against the availability constraint's allowed
    /// daily windows. The result and the total free duration are cached.
    pub fn compute_free(&mut self, availability: &Availability) -> Duration {
        let mut free = Vec::new();
        let mut cursor = self.bounds.start;
        for entry in &self.busy {
            if entry.start > cursor {
                free.extend(availability.clip(Timespan::new(cursor, entry.start)));
            }
            cursor = cursor.max(entry.end);
        }
        if cursor < self.bounds.end {
            free.extend(availability.clip(Timespan::new(cursor, self.bounds.end)));
        }
        free.sort_by_key(|fragment| fragment.start);
        self.free_total = total(&free);
        self.free = Some(free);
        self.free_total
    }

    /// Scan the free list in order and return the first fragment accepted by
    /// the whole rule chain.
    ///
    /// The consumed part is removed from the free list in place: a fragment
    /// the chain shrank leaves its remainder at the same position, advanced
    /// past the used portion, so repeated calls make monotonic progress.
    /// Returns `None` once no fragment satisfies the chain.
    pub fn find_time_slot(&mut self, rules: &[&dyn SlotRule]) -> Option<Timespan> {
        let free = self.free.as_mut()?;
        for index in 0..free.len() {
            let fragment = free[index];
            let mut candidate = fragment;
            let mut accepted = true;
            for rule in rules {
                match rule.check(&candidate) {
                    Some(next) => candidate = next,
                    None => {
                        accepted = false;
                        break;
                    }
                }
            }
            if !accepted {
                continue;
            }
            if candidate.end < fragment.end {
                free[index] = Timespan::new(candidate.end, fragment.end);
            } else {
                free.remove(index);
            }
            self.free_total = self.free_total - candidate.duration();
            return Some(candidate);
        }
        None
    }

    /// A derived window whose free list is the subset of this window's free
    /// fragments lying fully inside `[from, to)`, with recomputed total.
    pub fn preferred_window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> TimeWindow {
        let bounds = Timespan::new(
            from.max(self.bounds.start).min(self.bounds.end),
            to.min(self.bounds.end).max(self.bounds.start),
        );
        let free: Vec<Timespan> = self
            .free_fragments()
            .iter()
            .filter(|fragment| from <= fragment.start && fragment.end <= to)
            .copied()
            .collect();
        let free_total = total(&free);
        TimeWindow {
            bounds,
            padding: self.padding,
            busy: Vec::new(),
            free: Some(free),
            free_total,
        }
    }
}

fn total(fragments: &[Timespan]) -> Duration {
    fragments
        .iter()
        .fold(Duration::zero(), |sum, fragment| sum + fragment.duration())
}
