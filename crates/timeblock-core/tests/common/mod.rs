//! In-memory collaborator fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use timeblock_core::calendar::{Calendar, CalendarRepository, EventChange, SyncSignals};
use timeblock_core::clock::FixedClock;
use timeblock_core::error::{CalendarError, StoreError};
use timeblock_core::lock::KeyedLocks;
use timeblock_core::model::{CalendarConnection, Contact, Event, EventLink, Task, User};
use timeblock_core::store::{TaskStore, UserStore};
use timeblock_core::time::{ClockWindow, TimeWindow, Timespan};
use timeblock_core::{Planner, PlannerConfig};

pub fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, h, m, 0).unwrap()
}

pub fn span(day: u32, sh: u32, sm: u32, eh: u32, em: u32) -> Timespan {
    Timespan::new(at(day, sh, sm), at(day, eh, em))
}

/// A user working 09:00-17:00 UTC with a preconnected calendar.
pub fn workday_user(id: &str) -> User {
    let mut user = User::new(id, id, chrono_tz::UTC);
    user.day_windows.push(ClockWindow::new(
        chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
    ));
    user.task_calendar_id = Some(format!("cal-{id}"));
    user.calendars.push(CalendarConnection {
        calendar_id: format!("cal-{id}"),
        provider: "fake".into(),
        sync_state: serde_json::Value::Null,
    });
    user
}

pub fn confirmed_contact(user: &mut User, contact_id: &str) {
    user.contacts.push(Contact {
        user_id: contact_id.into(),
        confirmed: true,
    });
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
    unscheduled_queries: AtomicUsize,
}

impl InMemoryTaskStore {
    pub fn insert(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
    }

    /// Read the record even when soft-deleted.
    pub fn raw(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(task_id).cloned()
    }

    pub fn unscheduled_queries(&self) -> usize {
        self.unscheduled_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        self.insert(task.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .get(task_id)
            .filter(|task| !task.deleted)
            .cloned())
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        self.insert(task.clone());
        Ok(())
    }

    async fn delete(&self, task_id: &str) -> Result<(), StoreError> {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            task.deleted = true;
        }
        Ok(())
    }

    async fn find_by_calendar_event_id(
        &self,
        provider_event_id: &str,
    ) -> Result<Option<Task>, StoreError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| !task.deleted)
            .find(|task| {
                task.due.linked_to(provider_event_id)
                    || task
                        .work_units
                        .iter()
                        .any(|unit| unit.event.linked_to(provider_event_id))
            })
            .cloned())
    }

    async fn find_intersecting_with_event(
        &self,
        user_id: &str,
        span: Timespan,
        exclude_unit_id: Option<&str>,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| !task.deleted)
            .filter(|task| {
                task.owner_id == user_id
                    || task.collaborator_ids.iter().any(|id| id == user_id)
            })
            .filter(|task| {
                task.work_units.iter().any(|unit| {
                    Some(unit.id.as_str()) != exclude_unit_id
                        && unit.event.span.intersects(&span)
                })
            })
            .cloned()
            .collect())
    }

    async fn find_unscheduled_tasks(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Task>, StoreError> {
        self.unscheduled_queries.fetch_add(1, Ordering::SeqCst);
        let mut matches: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| {
                !task.deleted
                    && task.owner_id == user_id
                    && task.not_scheduled > Duration::zero()
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl InMemoryUserStore {
    pub fn insert(&self, user: User) {
        self.users.lock().unwrap().insert(user.id.clone(), user);
    }

    pub fn fetch(&self, user_id: &str) -> Option<User> {
        self.users.lock().unwrap().get(user_id).cloned()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        self.insert(user.clone());
        Ok(())
    }

    async fn find_by_auth_state(&self, state_token: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|user| {
                user.calendars
                    .iter()
                    .any(|connection| connection.sync_state == serde_json::json!(state_token))
            })
            .cloned())
    }
}

#[derive(Debug, Clone)]
pub struct CreatedEvent {
    pub user_id: String,
    pub calendar_id: String,
    pub event: Event,
}

/// Fake provider: injectable foreign busy time, a live event store (events
/// created through the repository block later window builds, like a real
/// calendar), recorded writes, and a scripted incremental sync.
#[derive(Default)]
pub struct FakeCalendar {
    busy: Mutex<HashMap<String, Vec<Timespan>>>,
    events: Mutex<HashMap<String, CreatedEvent>>,
    created: Mutex<Vec<CreatedEvent>>,
    updated: Mutex<Vec<(EventLink, Event)>>,
    deleted: Mutex<Vec<EventLink>>,
    changes: Mutex<Vec<EventChange>>,
    sync_error: Mutex<Option<CalendarError>>,
    next_event_id: AtomicUsize,
}

impl FakeCalendar {
    pub fn set_busy(&self, user_id: &str, spans: Vec<Timespan>) {
        self.busy.lock().unwrap().insert(user_id.into(), spans);
    }

    pub fn add_busy(&self, user_id: &str, span: Timespan) {
        self.busy
            .lock()
            .unwrap()
            .entry(user_id.into())
            .or_default()
            .push(span);
    }

    pub fn queue_change(&self, change: EventChange) {
        self.changes.lock().unwrap().push(change);
    }

    pub fn fail_sync_with(&self, error: CalendarError) {
        *self.sync_error.lock().unwrap() = Some(error);
    }

    pub fn created(&self) -> Vec<CreatedEvent> {
        self.created.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<(EventLink, Event)> {
        self.updated.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<EventLink> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarRepository for FakeCalendar {
    async fn create_calendar(&self, user: &User, _name: &str) -> Result<String, CalendarError> {
        Ok(format!("cal-{}", user.id))
    }

    async fn new_event(
        &self,
        user: &User,
        calendar_id: &str,
        event: &Event,
    ) -> Result<EventLink, CalendarError> {
        let number = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let link = EventLink {
            user_id: user.id.clone(),
            calendar_id: calendar_id.to_owned(),
            provider_event_id: format!("evt-{number}"),
        };
        let record = CreatedEvent {
            user_id: user.id.clone(),
            calendar_id: calendar_id.to_owned(),
            event: event.clone(),
        };
        self.events
            .lock()
            .unwrap()
            .insert(link.provider_event_id.clone(), record.clone());
        self.created.lock().unwrap().push(record);
        Ok(link)
    }

    async fn update_event(
        &self,
        _user: &User,
        link: &EventLink,
        event: &Event,
    ) -> Result<(), CalendarError> {
        if let Some(record) = self.events.lock().unwrap().get_mut(&link.provider_event_id) {
            record.event = event.clone();
        }
        self.updated
            .lock()
            .unwrap()
            .push((link.clone(), event.clone()));
        Ok(())
    }

    async fn delete_event(&self, _user: &User, link: &EventLink) -> Result<(), CalendarError> {
        // Deleting an event that is already gone is success; the fake never
        // fails here either way.
        self.events.lock().unwrap().remove(&link.provider_event_id);
        self.deleted.lock().unwrap().push(link.clone());
        Ok(())
    }

    async fn add_busy_to_window(
        &self,
        user: &User,
        window: &mut TimeWindow,
    ) -> Result<(), CalendarError> {
        let mut spans = self
            .busy
            .lock()
            .unwrap()
            .get(&user.id)
            .cloned()
            .unwrap_or_default();
        spans.extend(
            self.events
                .lock()
                .unwrap()
                .values()
                .filter(|record| record.user_id == user.id && record.event.blocking)
                .map(|record| record.event.span),
        );
        for span in spans {
            window.add_to_busy(span);
        }
        Ok(())
    }

    async fn sync_events(
        &self,
        _calendar_id: &str,
        user: &User,
        signals: SyncSignals,
    ) -> Result<(), CalendarError> {
        let changes: Vec<EventChange> = self.changes.lock().unwrap().clone();
        for change in changes {
            if signals.events.send(change).await.is_err() {
                break;
            }
        }
        let error = self.sync_error.lock().unwrap().take();
        if let Some(error) = error {
            let _ = signals.errors.send(error).await;
            return Ok(());
        }
        let mut updated = user.clone();
        for connection in &mut updated.calendars {
            connection.sync_state = serde_json::json!({ "cursor": "refreshed" });
        }
        let _ = signals.updated_user.send(updated);
        Ok(())
    }

    async fn calendars_of_interest(
        &self,
        user: &User,
    ) -> Result<HashMap<String, Calendar>, CalendarError> {
        let id = format!("cal-{}", user.id);
        Ok(HashMap::from([(
            id.clone(),
            Calendar {
                id,
                name: user.name.clone(),
                primary: true,
            },
        )]))
    }
}

pub struct Harness {
    pub planner: Planner,
    pub tasks: Arc<InMemoryTaskStore>,
    pub users: Arc<InMemoryUserStore>,
    pub calendar: Arc<FakeCalendar>,
    pub clock: Arc<FixedClock>,
    pub cancel: CancellationToken,
}

/// A planner over in-memory fakes, with the clock parked on
/// 2025-03-10 08:00 UTC and fast lock backoff.
pub fn harness() -> Harness {
    let tasks = Arc::new(InMemoryTaskStore::default());
    let users = Arc::new(InMemoryUserStore::default());
    let calendar = Arc::new(FakeCalendar::default());
    let clock = Arc::new(FixedClock::new(at(10, 8, 0)));
    let locks = Arc::new(
        KeyedLocks::new(clock.clone())
            .with_backoff(std::time::Duration::from_millis(2), 100),
    );
    let planner = Planner::new(
        tasks.clone(),
        users.clone(),
        calendar.clone(),
        locks,
        clock.clone(),
        PlannerConfig::default(),
    );
    Harness {
        planner,
        tasks,
        users,
        calendar,
        clock,
        cancel: CancellationToken::new(),
    }
}
