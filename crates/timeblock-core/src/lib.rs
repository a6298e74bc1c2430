//! # Timeblock Core Library
//!
//! Scheduling engine that places a user's work on their calendar: given a
//! task with a due instant and a total workload, it finds free time across
//! one or more people's calendars and creates work blocks that sum to the
//! required workload without ever overlapping existing commitments, then
//! keeps that schedule consistent as the calendars change externally.
//!
//! ## Architecture
//!
//! - **Time algebra** ([`time`]): pure interval data structures — spans,
//!   busy/free windows, availability constraints
//! - **Slot search** ([`search`]): turns a workload duration into concrete
//!   work units, spread across the scheduling horizon
//! - **Orchestrator** ([`planner`]): schedules, reschedules, retitles, and
//!   deletes tasks under per-task advisory locks
//! - **Sync reconciler** ([`planner::sync`]): reacts to externally-changed
//!   calendar events and repairs the affected tasks
//!
//! Persistence, the concrete calendar provider, and lock brokering live
//! behind the trait contracts in [`store`], [`calendar`], and [`lock`];
//! this crate is a library consumed by an HTTP layer it knows nothing
//! about.

pub mod calendar;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod model;
pub mod planner;
pub mod search;
pub mod store;
pub mod time;
pub mod title;

pub use calendar::{Calendar, CalendarRepository, EventChange, SyncSignals};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::PlannerConfig;
pub use error::{
    CalendarError, ConfigError, CoreError, LockError, Result, StoreError, ValidationError,
};
pub use lock::{
    InMemoryLeaseBackend, KeyedLocks, LeaseBackend, LeaseLocks, LockGuard, LockProvider,
};
pub use model::{Event, EventLink, Task, TaskPatch, User, WorkUnit};
pub use planner::Planner;
pub use store::{TaskStore, UserStore};
pub use time::{Availability, ClockWindow, DurationRule, SlotRule, TimeWindow, Timespan};
