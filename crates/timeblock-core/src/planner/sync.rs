//! Calendar sync reconciliation.
//!
//! Users move, delete, and add events outside this system; the reconciler
//! consumes a provider-driven stream of those changes and updates the
//! affected tasks to match. Each change is dispatched concurrently, but the
//! terminal updated-user signal is only returned once every dispatched
//! reconciliation has finished, so the caller always observes a state at
//! least as fresh as every processed event.
//!
//! Failures are isolated per event: one change failing to reconcile is
//! logged and skipped. Store and lock failures stop the whole batch.

use chrono::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Planner;
use crate::calendar::{EventChange, SyncSignals};
use crate::error::{CalendarError, CoreError, LockError, Result};
use crate::lock::release_or_warn;
use crate::model::User;
use crate::time::Timespan;

/// Depth of the change queue between the provider and the dispatch loop.
const SYNC_EVENT_QUEUE: usize = 64;

/// What a reconciled linked event still owes once the task lock is gone.
enum Reconciled {
    Done,
    /// A work unit moved; other units overlapping its new span must be
    /// swept, outside the lock.
    SweepSpan {
        span: Timespan,
        exclude_unit_id: String,
    },
}

impl Planner {
    /// Run one incremental sync of the user's calendar and reconcile every
    /// reported change. Returns the user record with refreshed sync state.
    pub async fn sync_calendar(
        &self,
        user: &User,
        calendar_id: &str,
        cancel: &CancellationToken,
    ) -> Result<User> {
        self.ensure_live(cancel)?;
        let (event_tx, mut event_rx) = mpsc::channel(SYNC_EVENT_QUEUE);
        let (error_tx, mut error_rx) = mpsc::channel(4);
        let (user_tx, user_rx) = oneshot::channel();
        let signals = SyncSignals {
            events: event_tx,
            errors: error_tx,
            updated_user: user_tx,
        };
        let producer = self.calendar.sync_events(calendar_id, user, signals);
        tokio::pin!(producer);

        let mut dispatched: JoinSet<Result<()>> = JoinSet::new();
        let mut producer_done = false;
        let mut errors_open = true;
        let batch: Result<()> = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(CoreError::Cancelled),
                result = &mut producer, if !producer_done => {
                    if let Err(error) = result {
                        break Err(error.into());
                    }
                    producer_done = true;
                }
                error = error_rx.recv(), if errors_open => match error {
                    Some(error) => break Err(error.into()),
                    None => errors_open = false,
                },
                change = event_rx.recv() => match change {
                    Some(change) => {
                        let planner = self.clone();
                        let user_id = user.id.clone();
                        let cancel = cancel.clone();
                        dispatched.spawn(async move {
                            planner
                                .process_task_event_change(change, &user_id, &cancel)
                                .await
                        });
                    }
                    // The stream is over, but a terminal error may still be
                    // queued behind the last event.
                    None => match error_rx.try_recv() {
                        Ok(error) => break Err(error.into()),
                        Err(_) => break Ok(()),
                    },
                },
            }
        };
        if let Err(error) = batch {
            dispatched.shutdown().await;
            return Err(error);
        }
        if !producer_done {
            let finished = tokio::select! {
                _ = cancel.cancelled() => Err(CoreError::Cancelled),
                result = &mut producer => result.map_err(CoreError::from),
            };
            if let Err(error) = finished {
                dispatched.shutdown().await;
                return Err(error);
            }
        }
        // Join every dispatched reconciliation before reporting completion.
        self.join_dispatched(&mut dispatched).await?;
        let updated = user_rx
            .await
            .map_err(|_| CalendarError::SyncIncomplete)?;
        info!(calendar_id, user_id = %user.id, "calendar sync complete");
        Ok(updated)
    }

    /// Reconcile one externally-changed calendar event for `user_id`.
    ///
    /// An event with no persisted link is a foreign change: it can only
    /// collide with scheduled work or free room up. A linked event is
    /// reconciled under its task's lock; the unscheduled sweep always runs
    /// afterwards, once the lock is gone.
    pub async fn process_task_event_change(
        &self,
        change: EventChange,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let linked = self
            .tasks
            .find_by_calendar_event_id(&change.provider_event_id)
            .await?;
        let result = match linked {
            None => {
                if change.occupies_time() {
                    if let Some(span) = change.span {
                        self.check_for_intersecting_work_units(user_id, span, None, cancel)
                            .await
                    } else {
                        Ok(())
                    }
                } else {
                    // A deletion or recurrence seed only frees room; the
                    // sweep below picks it up.
                    Ok(())
                }
            }
            Some(task) => {
                let guard = self.lock_task(&task.id, cancel).await?;
                let outcome = self
                    .reconcile_linked_event(&task.id, &change, user_id, cancel)
                    .await;
                release_or_warn(guard).await;
                match outcome {
                    Ok(Reconciled::Done) => Ok(()),
                    Ok(Reconciled::SweepSpan {
                        span,
                        exclude_unit_id,
                    }) => {
                        self.check_for_intersecting_work_units(
                            user_id,
                            span,
                            Some(&exclude_unit_id),
                            cancel,
                        )
                        .await
                    }
                    Err(error) => Err(error),
                }
            }
        };
        let sweep = self.look_for_unscheduled_tasks(user_id, cancel).await;
        match (result, sweep) {
            (Ok(()), sweep) => sweep,
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(sweep_error)) => {
                warn!(%sweep_error, "unscheduled sweep failed after a reconciliation error");
                Err(error)
            }
        }
    }

    /// Reschedule every work unit of the user's tasks that overlaps `span`,
    /// excluding the unit named by `exclude_unit_id`. This is the sweep
    /// that keeps the engine's own blocks from silently colliding with
    /// externally placed events.
    pub async fn check_for_intersecting_work_units(
        &self,
        user_id: &str,
        span: Timespan,
        exclude_unit_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let affected = self
            .tasks
            .find_intersecting_with_event(user_id, span, exclude_unit_id)
            .await?;
        for task in affected {
            let colliding: Vec<String> = task
                .work_units
                .iter()
                .filter(|unit| {
                    !unit.done
                        && Some(unit.id.as_str()) != exclude_unit_id
                        && unit.event.span.intersects(&span)
                })
                .map(|unit| unit.id.clone())
                .collect();
            for unit_id in colliding {
                match self.reschedule_work_unit(&task, &unit_id, cancel).await {
                    Ok(_) => {
                        info!(task_id = %task.id, %unit_id, "moved work unit off a conflicting event");
                    }
                    Err(error) if error.stops_sync_batch() => return Err(error),
                    Err(error) => {
                        warn!(task_id = %task.id, %unit_id, %error, "could not move conflicting work unit");
                    }
                }
            }
        }
        Ok(())
    }

    /// Retry scheduling for the user's tasks that still carry unplaced
    /// workload. Single-flight and rate-limited: the pass runs behind a
    /// short-TTL lock taken with `try_once`, and a refused acquisition
    /// means a sweep ran recently, which is success.
    pub async fn look_for_unscheduled_tasks(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let guard = match self
            .locks
            .acquire(&sweep_key(user_id), self.config.sweep_lock_ttl(), true, cancel)
            .await
        {
            Ok(guard) => guard,
            Err(LockError::Busy(_)) => {
                debug!(user_id, "unscheduled sweep ran recently; skipping");
                return Ok(());
            }
            Err(LockError::Cancelled) => return Err(CoreError::Cancelled),
            Err(error) => return Err(error.into()),
        };
        let result = self.sweep_unscheduled(user_id, cancel).await;
        // Dropped unreleased on purpose: the lock TTL is the pause between
        // sweeps.
        drop(guard);
        result
    }

    async fn sweep_unscheduled(&self, user_id: &str, cancel: &CancellationToken) -> Result<()> {
        let page_size = self.config.sweep_page_size;
        let mut page = 0;
        loop {
            self.ensure_live(cancel)?;
            let batch = self
                .tasks
                .find_unscheduled_tasks(user_id, page, page_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            for task in batch {
                match self.schedule_task(&task, cancel).await {
                    Ok(replanned) => {
                        debug!(
                            task_id = %replanned.id,
                            unplaced_minutes = replanned.not_scheduled.num_minutes(),
                            "sweep replanned task"
                        );
                    }
                    Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                    Err(CoreError::Store(error)) => return Err(error.into()),
                    Err(error) => {
                        warn!(task_id = %task.id, %error, "sweep could not replan task");
                    }
                }
            }
            if batch_len < page_size {
                break;
            }
            page += 1;
        }
        Ok(())
    }

    /// Reconcile a change to an event this system owns. Assumes the task's
    /// lock is held.
    async fn reconcile_linked_event(
        &self,
        task_id: &str,
        change: &EventChange,
        origin_user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Reconciled> {
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::TaskVanished(task_id.to_owned()))?;
        let users = self.relevant_users(&task).await?;

        if task.is_due_link(&change.provider_event_id) {
            if change.deleted {
                // The due event is the task's anchor; deleting it deletes
                // the task.
                self.delete_task_locked(&task, &users).await?;
                return Ok(Reconciled::Done);
            }
            let Some(new_span) = change.span else {
                return Ok(Reconciled::Done);
            };
            if new_span.start == task.due_start() {
                return Ok(Reconciled::Done);
            }
            task.due.span = Timespan::point(new_span.start);
            self.update_event_everywhere(&task.due, &users, Some(origin_user_id))
                .await?;
            task.updated_at = self.clock.now();
            self.tasks.update(&task).await?;
            info!(task_id, due = %task.due_start(), "adopted externally moved due date");
            self.reschedule_units_after_due(task, cancel).await?;
            return Ok(Reconciled::Done);
        }

        let (unit_id, old_span) = match task.unit_by_link(&change.provider_event_id) {
            Some(unit) => (unit.id.clone(), unit.event.span),
            None => return Ok(Reconciled::Done),
        };
        if change.deleted {
            let Some(removed) = task.remove_unit(&unit_id) else {
                return Ok(Reconciled::Done);
            };
            self.delete_event_except(&removed.event, &users, Some(origin_user_id))
                .await?;
            task.workload_total =
                (task.workload_total - removed.workload).max(Duration::zero());
            task.updated_at = self.clock.now();
            self.tasks.update(&task).await?;
            info!(task_id, %unit_id, "dropped work unit after external deletion");
            return Ok(Reconciled::Done);
        }
        let Some(new_span) = change.span else {
            return Ok(Reconciled::Done);
        };
        if new_span == old_span {
            return Ok(Reconciled::Done);
        }
        let Some(mut unit) = task.remove_unit(&unit_id) else {
            return Ok(Reconciled::Done);
        };
        let old_workload = unit.workload;
        unit.event.span = new_span;
        unit.workload = new_span.duration();
        task.workload_total = (task.workload_total + (unit.workload - old_workload))
            .max(Duration::zero());
        self.update_event_everywhere(&unit.event, &users, Some(origin_user_id))
            .await?;
        task.insert_unit(unit);
        task.updated_at = self.clock.now();
        self.tasks.update(&task).await?;
        info!(task_id, %unit_id, "adopted externally moved work unit");
        Ok(Reconciled::SweepSpan {
            span: new_span,
            exclude_unit_id: unit_id,
        })
    }

    async fn join_dispatched(&self, dispatched: &mut JoinSet<Result<()>>) -> Result<()> {
        let mut fatal: Option<CoreError> = None;
        while let Some(joined) = dispatched.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) if error.stops_sync_batch() => {
                    // Keep draining so the join guarantee holds even while
                    // the batch is failing.
                    if fatal.is_none() {
                        fatal = Some(error);
                    }
                }
                Ok(Err(error)) => {
                    warn!(%error, "event reconciliation failed; continuing batch");
                }
                Err(join_error) => {
                    warn!(%join_error, "event reconciliation task aborted");
                }
            }
        }
        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn sweep_key(user_id: &str) -> String {
    format!("sweep/{user_id}")
}
