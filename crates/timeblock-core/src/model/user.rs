//! Users and their scheduling-relevant settings.

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::duration_secs;
use crate::time::{Availability, ClockWindow};

/// A contact relationship. Only confirmed contacts may collaborate on a
/// task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: String,
    pub confirmed: bool,
}

/// One connected external calendar.
///
/// `sync_state` is provider-specific and opaque to the engine (cursor,
/// channel id, expiry); it is refreshed by the terminal signal of an
/// incremental sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConnection {
    pub calendar_id: String,
    pub provider: String,
    #[serde(default)]
    pub sync_state: serde_json::Value,
}

/// Scheduling-relevant user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub timezone: Tz,
    /// Allowed daily clock-windows; empty means the whole day.
    #[serde(default)]
    pub day_windows: Vec<ClockWindow>,
    /// Minimum spacing kept around this user's busy blocks.
    #[serde(with = "duration_secs")]
    pub busy_padding: Duration,
    /// The calendar the engine writes work blocks into, once created.
    #[serde(default)]
    pub task_calendar_id: Option<String>,
    #[serde(default)]
    pub calendars: Vec<CalendarConnection>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, timezone: Tz) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            timezone,
            day_windows: Vec::new(),
            busy_padding: Duration::zero(),
            task_calendar_id: None,
            calendars: Vec::new(),
            contacts: Vec::new(),
        }
    }

    /// This user's availability constraint for free-time computation.
    pub fn availability(&self) -> Availability {
        Availability::new(self.timezone, self.day_windows.clone())
    }

    pub fn confirmed_contact(&self, user_id: &str) -> bool {
        self.contacts
            .iter()
            .any(|contact| contact.user_id == user_id && contact.confirmed)
    }
}
