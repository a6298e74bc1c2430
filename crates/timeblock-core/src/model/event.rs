//! Calendar events and their provider links.

use serde::{Deserialize, Serialize};

use crate::time::Timespan;

/// Where one user's copy of an event lives: which external calendar holds it
/// and under which provider-assigned identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
    pub user_id: String,
    pub calendar_id: String,
    pub provider_event_id: String,
}

/// A calendar event owned by the engine.
///
/// Blocking events occupy calendar real estate and are excluded from free
/// time; non-blocking events are purely informational (the due-date marker).
/// Once scheduling succeeds the event carries one persisted link per
/// relevant user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub span: Timespan,
    pub blocking: bool,
    pub deleted: bool,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub links: Vec<EventLink>,
}

impl Event {
    /// A blocking event occupying the given span.
    pub fn blocking(span: Timespan) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            span,
            blocking: true,
            deleted: false,
            title: String::new(),
            description: String::new(),
            links: Vec::new(),
        }
    }

    /// An informational, non-blocking event (e.g. a due-date marker).
    pub fn marker(span: Timespan) -> Self {
        Self {
            blocking: false,
            ..Self::blocking(span)
        }
    }

    pub fn link_for(&self, user_id: &str) -> Option<&EventLink> {
        self.links.iter().find(|link| link.user_id == user_id)
    }

    pub fn has_link_for(&self, user_id: &str) -> bool {
        self.link_for(user_id).is_some()
    }

    /// Whether any persisted link carries this provider event id.
    pub fn linked_to(&self, provider_event_id: &str) -> bool {
        self.links
            .iter()
            .any(|link| link.provider_event_id == provider_event_id)
    }
}
