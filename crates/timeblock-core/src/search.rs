//! Slot search: turning a workload duration into scheduled work units.
//!
//! The search is greedy and heuristic, not exact. Short windows are filled
//! directly, front to back; on top of that the window is partitioned into
//! three contiguous thirds and the search recurses into the middle, right,
//! and left third in that order, so placed work spreads across the whole
//! horizon instead of piling up at the start.

use chrono::Duration;

use crate::config::PlannerConfig;
use crate::model::WorkUnit;
use crate::time::{DurationRule, SlotRule, TimeWindow};

/// Place up to `need` of work into the window's free fragments.
///
/// Every returned unit lies inside a free fragment the window held on
/// entry, the units are pairwise disjoint, and their workloads sum to at
/// most `need` (and at most the window's free budget). Any unmet remainder
/// is the caller's to record.
pub fn find_work_unit_times(
    window: &mut TimeWindow,
    need: Duration,
    config: &PlannerConfig,
) -> Vec<WorkUnit> {
    let mut found = Vec::new();
    if need <= Duration::zero() || window.free_duration() <= Duration::zero() {
        return found;
    }
    let bounds = window.bounds();
    let mut remaining = need;

    // Short horizons are consumed directly; longer ones only through the
    // partition below, which keeps any single stretch from soaking up the
    // whole workload.
    if bounds.duration() < config.direct_fill_horizon() {
        while remaining > Duration::zero() && window.free_duration() > Duration::zero() {
            let rule = DurationRule::new(
                config.min_chunk().min(remaining),
                config.max_chunk().min(remaining),
            );
            let rules: [&dyn SlotRule; 1] = [&rule];
            match window.find_time_slot(&rules) {
                Some(span) => {
                    remaining = remaining - span.duration();
                    found.push(WorkUnit::scheduled(span));
                }
                None => break,
            }
        }
    }

    if remaining > Duration::zero() {
        let third = bounds.duration() / 3;
        if third >= config.recursion_floor() {
            let first_cut = bounds.start + third;
            let second_cut = first_cut + third;
            let parts = [
                (first_cut, second_cut),
                (second_cut, bounds.end),
                (bounds.start, first_cut),
            ];
            for (from, to) in parts {
                if remaining <= Duration::zero() {
                    break;
                }
                let mut part = window.preferred_window(from, to);
                for unit in find_work_unit_times(&mut part, remaining, config) {
                    remaining = remaining - unit.workload;
                    found.push(unit);
                }
            }
        }
    }

    found
}
