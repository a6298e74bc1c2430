//! Tasks and their scheduled work units.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::duration_secs;
use super::event::Event;
use crate::time::Timespan;

/// One scheduled block of work contributing toward a task's total workload.
///
/// Work units only exist inside a [`Task`], ordered by scheduled start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: String,
    pub event: Event,
    #[serde(with = "duration_secs")]
    pub workload: Duration,
    pub done: bool,
}

impl WorkUnit {
    /// A freshly placed unit: a blocking event over `span`, its workload
    /// equal to the span's duration.
    pub fn scheduled(span: Timespan) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event: Event::blocking(span),
            workload: span.duration(),
            done: false,
        }
    }
}

/// A unit of the user's work, scheduled onto one or more calendars.
///
/// Mutated exclusively through the planning service under the task's
/// advisory lock; persisted by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub collaborator_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Overall requested workload for the task.
    #[serde(with = "duration_secs")]
    pub workload_total: Duration,
    pub is_done: bool,
    /// The due-date marker event; its span start is the due instant.
    pub due: Event,
    #[serde(default)]
    pub work_units: Vec<WorkUnit>,
    /// Workload that could not be placed yet; retried by the maintenance
    /// sweep.
    #[serde(with = "duration_secs")]
    pub not_scheduled: Duration,
    #[serde(default)]
    pub deleted: bool,
}

impl Task {
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        workload_total: Duration,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            collaborator_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            workload_total,
            is_done: false,
            due: Event::marker(Timespan::point(due_at)),
            work_units: Vec::new(),
            not_scheduled: Duration::zero(),
            deleted: false,
        }
    }

    /// The instant the task is due; scheduling windows end here.
    pub fn due_start(&self) -> DateTime<Utc> {
        self.due.span.start
    }

    /// Sum of all unit workloads, done or not.
    pub fn scheduled_workload(&self) -> Duration {
        self.work_units
            .iter()
            .fold(Duration::zero(), |sum, unit| sum + unit.workload)
    }

    /// Insert a unit keeping the list ordered by scheduled start time.
    pub fn insert_unit(&mut self, unit: WorkUnit) {
        let position = self
            .work_units
            .partition_point(|existing| existing.event.span.start <= unit.event.span.start);
        self.work_units.insert(position, unit);
    }

    pub fn remove_unit(&mut self, unit_id: &str) -> Option<WorkUnit> {
        let index = self.work_units.iter().position(|unit| unit.id == unit_id)?;
        Some(self.work_units.remove(index))
    }

    pub fn unit(&self, unit_id: &str) -> Option<&WorkUnit> {
        self.work_units.iter().find(|unit| unit.id == unit_id)
    }

    /// Whether the given provider event id belongs to the due-date event.
    pub fn is_due_link(&self, provider_event_id: &str) -> bool {
        self.due.linked_to(provider_event_id)
    }

    /// The unit whose event carries the given provider event id.
    pub fn unit_by_link(&self, provider_event_id: &str) -> Option<&WorkUnit> {
        self.work_units
            .iter()
            .find(|unit| unit.event.linked_to(provider_event_id))
    }

    /// Apply an external edit. Only the fields a caller may legally write
    /// are carried by [`TaskPatch`]; identity and bookkeeping fields cannot
    /// be patched. Returns what follow-up the planning service owes.
    pub fn apply(&mut self, patch: TaskPatch, now: DateTime<Utc>) -> PatchOutcome {
        let mut outcome = PatchOutcome::default();
        if let Some(name) = patch.name {
            if name != self.name {
                self.name = name;
                outcome.retitle = true;
            }
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(tags) = patch.tags {
            if tags != self.tags {
                self.tags = tags;
                outcome.retitle = true;
            }
        }
        if let Some(workload) = patch.workload_total {
            if workload != self.workload_total {
                self.workload_total = workload;
                outcome.replan = true;
            }
        }
        if let Some(due_at) = patch.due_at {
            if due_at != self.due_start() {
                self.due.span = Timespan::point(due_at);
                outcome.replan = true;
                outcome.due_moved = true;
            }
        }
        if let Some(is_done) = patch.is_done {
            self.is_done = is_done;
        }
        self.updated_at = now;
        outcome
    }
}

/// The externally writable fields of a task.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub workload_total: Option<Duration>,
    pub due_at: Option<DateTime<Utc>>,
    pub is_done: Option<bool>,
}

/// What the planning service must do after a patch was applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Workload or due date changed; the schedule must be recomputed.
    pub replan: bool,
    /// Display fields changed; event titles must be re-rendered.
    pub retitle: bool,
    /// The due instant itself moved; due events need a date update.
    pub due_moved: bool,
}
