//! Scheduling orchestrator.
//!
//! The [`Planner`] is the only writer of task schedules. Every public
//! operation acquires the task's advisory lock for its whole duration,
//! builds a [`TimeWindow`] from the relevant users' calendars, runs the slot
//! search where needed, and pushes the outcome to the calendar provider and
//! the task store.
//!
//! Multi-user simplifications, kept on purpose: free time is computed under
//! the *first* relevant user's availability constraint (per-collaborator
//! constraints are not merged), and busy-interval gathering is sequential.

pub mod sync;

use std::sync::Arc;

use chrono::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::calendar::CalendarRepository;
use crate::clock::{round_up, Clock};
use crate::config::PlannerConfig;
use crate::error::{CoreError, LockError, Result, ValidationError};
use crate::lock::{release_or_warn, LockGuard, LockProvider};
use crate::model::{Event, Task, TaskPatch, User};
use crate::search::find_work_unit_times;
use crate::store::{TaskStore, UserStore};
use crate::time::{TimeWindow, Timespan};
use crate::title;

/// Display name of the calendar the engine creates for its work blocks.
const TASK_CALENDAR_NAME: &str = "Timeblock";

/// The scheduling service.
///
/// Cheap to clone; all collaborators are shared behind `Arc`.
#[derive(Clone)]
pub struct Planner {
    tasks: Arc<dyn TaskStore>,
    users: Arc<dyn UserStore>,
    calendar: Arc<dyn CalendarRepository>,
    locks: Arc<dyn LockProvider>,
    clock: Arc<dyn Clock>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        users: Arc<dyn UserStore>,
        calendar: Arc<dyn CalendarRepository>,
        locks: Arc<dyn LockProvider>,
        clock: Arc<dyn Clock>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            tasks,
            users,
            calendar,
            locks,
            clock,
            config,
        }
    }

    /// Place the task's outstanding workload on the relevant users'
    /// calendars, or shrink an over-scheduled task back down to its
    /// requested workload. Returns the persisted task.
    pub async fn schedule_task(&self, task: &Task, cancel: &CancellationToken) -> Result<Task> {
        let guard = self.lock_task(&task.id, cancel).await?;
        let result = self.schedule_task_locked(task.clone(), cancel).await;
        release_or_warn(guard).await;
        result
    }

    /// Tear one work unit off its current slot and place its workload
    /// again. The task is re-read under the lock; the caller's copy may be
    /// stale.
    pub async fn reschedule_work_unit(
        &self,
        task: &Task,
        unit_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Task> {
        let guard = self.lock_task(&task.id, cancel).await?;
        let result = self.reschedule_unit_locked(&task.id, unit_id, cancel).await;
        release_or_warn(guard).await;
        result
    }

    /// Apply an external edit to the task, then perform whatever follow-up
    /// the changed fields demand: re-rendered titles, a moved due event,
    /// and a replan when workload or due date changed.
    pub async fn update_task(
        &self,
        task_id: &str,
        patch: TaskPatch,
        cancel: &CancellationToken,
    ) -> Result<Task> {
        let guard = self.lock_task(task_id, cancel).await?;
        let result = self.update_task_locked(task_id, patch, cancel).await;
        release_or_warn(guard).await;
        result
    }

    /// Push an already-changed event to every relevant user's calendar.
    /// No search is re-run.
    pub async fn update_event(
        &self,
        task: &Task,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let guard = self.lock_task(&task.id, cancel).await?;
        let result = async {
            let users = self.relevant_users(task).await?;
            self.update_event_everywhere(event, &users, None).await
        }
        .await;
        release_or_warn(guard).await;
        result
    }

    /// Re-render the task's event titles and push them out; work-unit
    /// events are included only when `update_units` is set.
    pub async fn update_task_title(
        &self,
        task: &Task,
        update_units: bool,
        cancel: &CancellationToken,
    ) -> Result<Task> {
        let guard = self.lock_task(&task.id, cancel).await?;
        let result = self
            .update_task_title_locked(task.clone(), update_units)
            .await;
        release_or_warn(guard).await;
        result
    }

    /// Remove the task from the store, then delete every one of its events
    /// from every relevant user's calendar.
    pub async fn delete_task(&self, task: &Task, cancel: &CancellationToken) -> Result<()> {
        let guard = self.lock_task(&task.id, cancel).await?;
        let result = async {
            let users = self.relevant_users(task).await?;
            self.delete_task_locked(task, &users).await
        }
        .await;
        release_or_warn(guard).await;
        result
    }

    // --- locked bodies ---

    async fn schedule_task_locked(
        &self,
        mut task: Task,
        cancel: &CancellationToken,
    ) -> Result<Task> {
        self.ensure_live(cancel)?;
        let mut users = self.relevant_users(&task).await?;
        let needed = task.workload_total - task.scheduled_workload();

        if needed > Duration::zero() {
            let mut window = self.build_window(&task, &users).await?;
            self.ensure_live(cancel)?;
            let units = find_work_unit_times(&mut window, needed, &self.config);
            let mut placed = Duration::zero();
            for mut unit in units {
                unit.event.title = title::work_unit_title(&task);
                self.create_event_links(&mut unit.event, &mut users).await?;
                placed = placed + unit.workload;
                task.insert_unit(unit);
            }
            task.not_scheduled = needed - placed;
            info!(
                task_id = %task.id,
                placed_minutes = placed.num_minutes(),
                unplaced_minutes = task.not_scheduled.num_minutes(),
                "scheduled task workload"
            );
            self.ensure_due_links(&mut task, &mut users).await?;
            task.updated_at = self.clock.now();
            self.tasks.update(&task).await?;
        } else {
            // The task shrank or was over-scheduled. Persist the trimmed
            // unit list first, then touch the calendars.
            let trim = shrink_units(&mut task, -needed);
            task.not_scheduled = Duration::zero();
            self.ensure_due_links(&mut task, &mut users).await?;
            task.updated_at = self.clock.now();
            self.tasks.update(&task).await?;
            for unit in &trim.deleted {
                self.delete_event_everywhere(&unit.event, &users).await?;
            }
            for unit in &trim.updated {
                self.update_event_everywhere(&unit.event, &users, None).await?;
            }
        }
        Ok(task)
    }

    async fn reschedule_unit_locked(
        &self,
        task_id: &str,
        unit_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Task> {
        self.ensure_live(cancel)?;
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::TaskVanished(task_id.to_owned()))?;
        let unit = task.remove_unit(unit_id).ok_or_else(|| {
            ValidationError::UnknownWorkUnit {
                task_id: task_id.to_owned(),
                unit_id: unit_id.to_owned(),
            }
        })?;
        let mut users = self.relevant_users(&task).await?;
        self.delete_event_everywhere(&unit.event, &users).await?;

        let mut window = self.build_window(&task, &users).await?;
        self.ensure_live(cancel)?;
        let replacement = find_work_unit_times(&mut window, unit.workload, &self.config);
        let mut placed = Duration::zero();
        for mut new_unit in replacement {
            new_unit.event.title = title::work_unit_title(&task);
            self.create_event_links(&mut new_unit.event, &mut users).await?;
            placed = placed + new_unit.workload;
            task.insert_unit(new_unit);
        }
        let shortfall = unit.workload - placed;
        if shortfall > Duration::zero() {
            task.not_scheduled = task.not_scheduled + shortfall;
            debug!(
                task_id = %task.id,
                unit_id,
                shortfall_minutes = shortfall.num_minutes(),
                "rescheduled unit only partially"
            );
        }
        task.updated_at = self.clock.now();
        self.tasks.update(&task).await?;
        Ok(task)
    }

    async fn update_task_locked(
        &self,
        task_id: &str,
        patch: TaskPatch,
        cancel: &CancellationToken,
    ) -> Result<Task> {
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::TaskVanished(task_id.to_owned()))?;
        let outcome = task.apply(patch, self.clock.now());
        let users = self.relevant_users(&task).await?;

        if outcome.retitle {
            task.due.title = title::due_title(&task);
            self.update_event_everywhere(&task.due, &users, None).await?;
            let unit_title = title::work_unit_title(&task);
            for unit in &mut task.work_units {
                unit.event.title = unit_title.clone();
            }
            for unit in &task.work_units {
                self.update_event_everywhere(&unit.event, &users, None).await?;
            }
        }
        if outcome.due_moved {
            self.update_event_everywhere(&task.due, &users, None).await?;
        }
        self.tasks.update(&task).await?;

        if outcome.due_moved {
            task = self.reschedule_units_after_due(task, cancel).await?;
        }
        if outcome.replan {
            task = self.schedule_task_locked(task, cancel).await?;
        }
        Ok(task)
    }

    async fn update_task_title_locked(&self, mut task: Task, update_units: bool) -> Result<Task> {
        let users = self.relevant_users(&task).await?;
        task.due.title = title::due_title(&task);
        self.update_event_everywhere(&task.due, &users, None).await?;
        if update_units {
            let unit_title = title::work_unit_title(&task);
            for unit in &mut task.work_units {
                unit.event.title = unit_title.clone();
            }
            for unit in &task.work_units {
                self.update_event_everywhere(&unit.event, &users, None).await?;
            }
        }
        task.updated_at = self.clock.now();
        self.tasks.update(&task).await?;
        Ok(task)
    }

    async fn delete_task_locked(&self, task: &Task, users: &[User]) -> Result<()> {
        self.tasks.delete(&task.id).await?;
        for unit in &task.work_units {
            self.delete_event_everywhere(&unit.event, users).await?;
        }
        self.delete_event_everywhere(&task.due, users).await?;
        info!(task_id = %task.id, "deleted task and its calendar events");
        Ok(())
    }

    /// Reschedule every not-done unit that now ends past the due instant.
    /// Assumes the task's lock is held and the task is persisted.
    async fn reschedule_units_after_due(
        &self,
        mut task: Task,
        cancel: &CancellationToken,
    ) -> Result<Task> {
        let due = task.due_start();
        let task_id = task.id.clone();
        let late: Vec<String> = task
            .work_units
            .iter()
            .filter(|unit| !unit.done && unit.event.span.end > due)
            .map(|unit| unit.id.clone())
            .collect();
        for unit_id in late {
            task = self.reschedule_unit_locked(&task_id, &unit_id, cancel).await?;
        }
        Ok(task)
    }

    // --- window and user plumbing ---

    /// The task owner's record first, then each collaborator's. A
    /// collaborator who is not a confirmed contact of the owner fails the
    /// whole operation before any side effect.
    async fn relevant_users(&self, task: &Task) -> Result<Vec<User>> {
        let owner = self
            .users
            .get(&task.owner_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownUser(task.owner_id.clone()))?;
        let mut users = vec![owner];
        for collaborator_id in &task.collaborator_ids {
            if !users[0].confirmed_contact(collaborator_id) {
                return Err(ValidationError::NotAContact {
                    owner_id: task.owner_id.clone(),
                    collaborator_id: collaborator_id.clone(),
                }
                .into());
            }
            let collaborator = self
                .users
                .get(collaborator_id)
                .await?
                .ok_or_else(|| ValidationError::UnknownUser(collaborator_id.clone()))?;
            users.push(collaborator);
        }
        Ok(users)
    }

    /// A fresh window from "now, rounded up" to the task's due instant,
    /// loaded with every relevant user's busy time and the owner's
    /// availability constraint.
    async fn build_window(&self, task: &Task, users: &[User]) -> Result<TimeWindow> {
        let start = round_up(self.clock.now(), self.config.rounding());
        let bounds = Timespan::new(start, task.due_start().max(start));
        let padding = users
            .iter()
            .map(|user| user.busy_padding)
            .max()
            .unwrap_or_else(Duration::zero);
        let mut window = TimeWindow::new(bounds, padding);
        // Sequential on purpose; parallel gathering would need synchronized
        // insertion into the shared window.
        for user in users {
            self.calendar.add_busy_to_window(user, &mut window).await?;
        }
        window.compute_free(&users[0].availability());
        debug!(
            task_id = %task.id,
            free_minutes = window.free_duration().num_minutes(),
            "built scheduling window"
        );
        Ok(window)
    }

    /// The calendar this engine writes the user's work blocks into,
    /// creating it on first use.
    async fn task_calendar_id(&self, user: &mut User) -> Result<String> {
        if let Some(id) = &user.task_calendar_id {
            return Ok(id.clone());
        }
        let id = self.calendar.create_calendar(user, TASK_CALENDAR_NAME).await?;
        user.task_calendar_id = Some(id.clone());
        self.users.update(user).await?;
        Ok(id)
    }

    /// Create the event in every relevant user's task calendar that does
    /// not hold it yet, collecting the persisted links.
    async fn create_event_links(&self, event: &mut Event, users: &mut [User]) -> Result<()> {
        for user in users.iter_mut() {
            if event.has_link_for(&user.id) {
                continue;
            }
            let calendar_id = self.task_calendar_id(user).await?;
            let link = self.calendar.new_event(user, &calendar_id, event).await?;
            event.links.push(link);
        }
        Ok(())
    }

    /// Make sure the due-date marker exists in every relevant user's
    /// calendar; only missing links are created.
    async fn ensure_due_links(&self, task: &mut Task, users: &mut [User]) -> Result<()> {
        let rendered = title::due_title(task);
        if task.due.title.is_empty() {
            task.due.title = rendered;
        }
        let mut due = task.due.clone();
        self.create_event_links(&mut due, users).await?;
        task.due = due;
        Ok(())
    }

    /// Push an event update to every relevant user holding a link, with an
    /// optional user to skip (the one whose calendar the change came from).
    async fn update_event_everywhere(
        &self,
        event: &Event,
        users: &[User],
        skip_user_id: Option<&str>,
    ) -> Result<()> {
        for user in users {
            if skip_user_id == Some(user.id.as_str()) {
                continue;
            }
            if let Some(link) = event.link_for(&user.id) {
                self.calendar.update_event(user, link, event).await?;
            }
        }
        Ok(())
    }

    /// Delete an event from every relevant user's calendar, with an
    /// optional user to skip.
    async fn delete_event_everywhere(&self, event: &Event, users: &[User]) -> Result<()> {
        self.delete_event_except(event, users, None).await
    }

    async fn delete_event_except(
        &self,
        event: &Event,
        users: &[User],
        skip_user_id: Option<&str>,
    ) -> Result<()> {
        for user in users {
            if skip_user_id == Some(user.id.as_str()) {
                continue;
            }
            if let Some(link) = event.link_for(&user.id) {
                self.calendar.delete_event(user, link).await?;
            }
        }
        Ok(())
    }

    async fn lock_task(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>> {
        self.locks
            .acquire(&task_key(task_id), self.config.lock_ttl(), false, cancel)
            .await
            .map_err(|error| match error {
                LockError::Cancelled => CoreError::Cancelled,
                other => other.into(),
            })
    }

    fn ensure_live(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }
}

fn task_key(task_id: &str) -> String {
    format!("task/{task_id}")
}

/// Units taken off or cut down by a shrink pass, in the order the calendars
/// must be touched.
#[derive(Debug, Default)]
struct ShrinkOutcome {
    updated: Vec<crate::model::WorkUnit>,
    deleted: Vec<crate::model::WorkUnit>,
}

/// Walk the unit list backward and remove `excess` of scheduled workload.
///
/// Not-done units are trimmed at the end or dropped whole, carrying the
/// remainder forward. A done unit keeps its calendar block; it absorbs
/// excess by shrinking only its recorded workload.
fn shrink_units(task: &mut Task, excess: Duration) -> ShrinkOutcome {
    let mut outcome = ShrinkOutcome::default();
    let mut remainder = excess;
    let mut index = task.work_units.len();
    while index > 0 && remainder > Duration::zero() {
        index -= 1;
        let unit = &mut task.work_units[index];
        if unit.done {
            let absorbed = unit.workload.min(remainder);
            unit.workload = unit.workload - absorbed;
            remainder = remainder - absorbed;
            continue;
        }
        if remainder < unit.workload {
            unit.event.span =
                Timespan::new(unit.event.span.start, unit.event.span.end - remainder);
            unit.workload = unit.workload - remainder;
            remainder = Duration::zero();
            outcome.updated.push(unit.clone());
        } else {
            remainder = remainder - unit.workload;
            outcome.deleted.push(task.work_units.remove(index));
        }
    }
    outcome
}
