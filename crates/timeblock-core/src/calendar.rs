//! Calendar provider contract.
//!
//! Everything provider-specific hides behind [`CalendarRepository`]; the
//! engine sees calendars only as a source of busy time, a sink for the
//! events it creates, and a push-based stream of external changes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::CalendarError;
use crate::model::{Event, EventLink, User};
use crate::time::{TimeWindow, Timespan};

/// One calendar visible on a user's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    pub id: String,
    pub name: String,
    /// The connection's primary calendar.
    pub primary: bool,
}

/// One externally-observed change to a calendar event, as pushed by an
/// incremental sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventChange {
    pub calendar_id: String,
    pub provider_event_id: String,
    /// The event's span after the change; absent for deletions and for
    /// recurrence seeds, which occupy no concrete time themselves.
    pub span: Option<Timespan>,
    pub deleted: bool,
    /// The original entry of a recurring series.
    pub recurrence_seed: bool,
    pub title: Option<String>,
}

impl EventChange {
    /// Whether the changed event now occupies concrete calendar time that
    /// could collide with scheduled work.
    pub fn occupies_time(&self) -> bool {
        !self.deleted && !self.recurrence_seed && self.span.is_some()
    }
}

/// The three independent signals of one incremental sync run.
///
/// The provider pushes changed events and recoverable errors while it works,
/// then reports the user record with refreshed sync state (cursor, channel
/// expiry) through the terminal `updated_user` signal.
pub struct SyncSignals {
    pub events: mpsc::Sender<EventChange>,
    pub errors: mpsc::Sender<CalendarError>,
    pub updated_user: oneshot::Sender<User>,
}

/// Abstract calendar provider.
///
/// Callers cancel in-flight work by dropping the returned future; every
/// method must tolerate that.
#[async_trait]
pub trait CalendarRepository: Send + Sync {
    /// Create a calendar on the user's connection and return its id.
    async fn create_calendar(&self, user: &User, name: &str) -> Result<String, CalendarError>;

    /// Persist an engine-owned event into the given calendar; the returned
    /// link names where the provider stored it.
    async fn new_event(
        &self,
        user: &User,
        calendar_id: &str,
        event: &Event,
    ) -> Result<EventLink, CalendarError>;

    /// Push an already-changed event (span or title) to the provider copy
    /// behind `link`.
    async fn update_event(
        &self,
        user: &User,
        link: &EventLink,
        event: &Event,
    ) -> Result<(), CalendarError>;

    /// Delete the provider copy behind `link`. An event that is already
    /// gone remotely counts as success.
    async fn delete_event(&self, user: &User, link: &EventLink) -> Result<(), CalendarError>;

    /// Report the user's busy intervals from every calendar of interest into
    /// the window.
    async fn add_busy_to_window(
        &self,
        user: &User,
        window: &mut TimeWindow,
    ) -> Result<(), CalendarError>;

    /// Run one incremental sync of `calendar_id`, pushing its results
    /// through `signals`. Resolves once the provider has nothing more to
    /// push; the terminal updated-user signal must fire before that.
    async fn sync_events(
        &self,
        calendar_id: &str,
        user: &User,
        signals: SyncSignals,
    ) -> Result<(), CalendarError>;

    /// The calendars whose busy time this user's scheduling must respect,
    /// by calendar id.
    async fn calendars_of_interest(
        &self,
        user: &User,
    ) -> Result<HashMap<String, Calendar>, CalendarError>;
}
