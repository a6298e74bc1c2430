//! Task and user persistence contracts.
//!
//! The engine only speaks to these traits; the concrete document store is a
//! deployment concern. Tasks are soft-deleted: a deleted task keeps its
//! record but is excluded from every query here unless noted otherwise.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Task, User};
use crate::time::Timespan;

/// Task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetch a task by id. `None` covers both unknown and soft-deleted ids.
    async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    async fn update(&self, task: &Task) -> Result<(), StoreError>;

    /// Soft-delete: the record stays but drops out of every query.
    async fn delete(&self, task_id: &str) -> Result<(), StoreError>;

    /// The task whose due-date event or work unit carries the given
    /// provider event id in one of its persisted links.
    async fn find_by_calendar_event_id(
        &self,
        provider_event_id: &str,
    ) -> Result<Option<Task>, StoreError>;

    /// Tasks of `user_id` with a work unit overlapping `span`, excluding the
    /// unit named by `exclude_unit_id`.
    async fn find_intersecting_with_event(
        &self,
        user_id: &str,
        span: Timespan,
        exclude_unit_id: Option<&str>,
    ) -> Result<Vec<Task>, StoreError>;

    /// One page of the user's tasks with workload still waiting to be
    /// placed (`not_scheduled` above zero). Pages are zero-based.
    async fn find_unscheduled_tasks(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Task>, StoreError>;
}

/// User persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    async fn update(&self, user: &User) -> Result<(), StoreError>;

    /// Identity-linking lookup used while completing a calendar provider's
    /// authorization flow.
    async fn find_by_auth_state(&self, state_token: &str) -> Result<Option<User>, StoreError>;
}
