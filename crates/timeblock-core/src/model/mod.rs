//! Domain model: events, tasks, work units, and users.

pub mod event;
pub mod task;
pub mod user;

pub use event::{Event, EventLink};
pub use task::{PatchOutcome, Task, TaskPatch, WorkUnit};
pub use user::{CalendarConnection, Contact, User};

/// Serde adapter storing a `chrono::Duration` as whole seconds.
pub(crate) mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(seconds))
    }
}
