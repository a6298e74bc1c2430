//! Error hierarchy for the scheduling engine.
//!
//! Errors are grouped per collaborator domain so callers can tell a bad
//! request apart from a failing backend: validation errors carry no side
//! effects, collaborator errors are propagated (auth failures are
//! distinguishable so the caller can prompt reconnection), and consistency
//! errors mark state that changed underneath a locked operation. Partial
//! scheduling is *not* an error; it is recorded on the task and retried by
//! the maintenance sweep.

use thiserror::Error;

/// Top-level error type of the scheduling engine.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed or unauthorized input; nothing was attempted.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Task or user store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Calendar provider failure.
    #[error("calendar error: {0}")]
    Calendar(#[from] CalendarError),

    /// Advisory lock failure.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Configuration failure.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The task disappeared between reload and update, due to a concurrent
    /// deletion. Surfaced, not retried.
    #[error("task '{0}' vanished during a locked operation")]
    TaskVanished(String),

    /// The caller's cancellation token fired mid-operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Whether a sync batch must stop on this error instead of isolating it
    /// to the one event being reconciled. Store and lock failures poison the
    /// whole batch; everything else is logged and skipped.
    pub fn stops_sync_batch(&self) -> bool {
        matches!(
            self,
            CoreError::Store(_) | CoreError::Lock(_) | CoreError::Cancelled
        )
    }
}

/// Input errors; surfaced to the caller before any side effect.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("user '{0}' does not exist")]
    UnknownUser(String),

    #[error("work unit '{unit_id}' does not belong to task '{task_id}'")]
    UnknownWorkUnit { task_id: String, unit_id: String },

    /// A collaborator may only be scheduled with if they are a confirmed
    /// contact of the task owner.
    #[error("user '{collaborator_id}' is not a confirmed contact of '{owner_id}'")]
    NotAContact {
        owner_id: String,
        collaborator_id: String,
    },
}

/// Task/user store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record '{0}' not found")]
    NotFound(String),

    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Calendar provider failures.
#[derive(Error, Debug)]
pub enum CalendarError {
    /// The stored credentials were rejected; the user must reconnect the
    /// calendar before scheduling can touch it again.
    #[error("calendar '{calendar_id}' authorization is no longer valid")]
    AuthInvalid { calendar_id: String },

    #[error("calendar provider failure: {0}")]
    Provider(String),

    /// The incremental sync ended without its terminal updated-user signal.
    #[error("calendar sync ended without completing")]
    SyncIncomplete,
}

/// Advisory lock failures. Failing to acquire is recoverable.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock '{0}' is held elsewhere")]
    Busy(String),

    #[error("lock backend failure: {0}")]
    Backend(String),

    #[error("lock wait cancelled")]
    Cancelled,
}

/// Configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Result alias used throughout the engine.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
