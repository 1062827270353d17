use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::Result,
    models::{
        EventType, JsonMap, Lock, Project, ProjectStatus, Task, TaskEvent, TaskStatus, User,
        UserRole, Webhook, WebhookService, Workspace, WorkspaceMember,
    },
};

/// Aggregate task counters reported by [`TaskStore::task_stats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskStats {
    pub total_tasks: i64,
    pub tasks_by_status: HashMap<String, i64>,
    pub tasks_by_service: HashMap<String, i64>,
    /// Mean wall-clock duration of completed tasks, in milliseconds.
    pub avg_completion_time_ms: f64,
}

/// Cross-entity counters for the dashboard surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub total_workspaces: i64,
    pub total_projects: i64,
    pub total_users: i64,
    pub active_locks: i64,
    #[serde(flatten)]
    pub tasks: TaskStats,
}

/// Task persistence operations.
///
/// Implementations must be thread-safe. All returned values are immutable
/// snapshots; callers never observe backing rows.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Upsert a task by id, overwriting all fields.
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// Fetch a task snapshot by id.
    ///
    /// # Returns
    /// * `Ok(Some(Task))` - The task if found
    /// * `Ok(None)` - If no task exists with that id
    /// * `Err(Error::Storage)` - If the database operation fails
    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// All tasks, most recently created first.
    async fn get_all_tasks(&self) -> Result<Vec<Task>>;

    /// Tasks in the given status, ordered by `(priority ASC, created_at ASC)`.
    async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    /// Tasks belonging to a project, optionally filtered by status, ordered
    /// by `(priority ASC, created_at ASC)`.
    async fn get_tasks_by_project(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>>;

    /// Move a task to `status`, optionally recording a result or error.
    ///
    /// Side effects: the first transition into `Running` stamps
    /// `started_at`; any transition into a terminal state stamps
    /// `completed_at`.
    ///
    /// # Returns
    /// * `Ok(Some(Task))` - The post-update snapshot
    /// * `Ok(None)` - If no task exists with that id
    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<Task>>;

    /// Atomically increment the task's version counter, returning the new
    /// value. Used for optimistic concurrency control.
    async fn update_task_version(&self, id: &str) -> Result<i64>;

    /// Delete a task. Returns whether a row was removed.
    async fn delete_task(&self, id: &str) -> Result<bool>;

    /// Aggregate task counters.
    async fn task_stats(&self) -> Result<TaskStats>;
}

/// Append-only task event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event row and return the persisted snapshot.
    async fn create_task_event(
        &self,
        event_id: &str,
        task_id: &str,
        event_type: EventType,
        user_id: Option<&str>,
        details: JsonMap,
    ) -> Result<TaskEvent>;

    /// Events for a task, most recent first.
    async fn get_task_events(&self, task_id: &str, limit: i64) -> Result<Vec<TaskEvent>>;

    /// Recent events across all tasks, most recent first.
    async fn get_recent_events(&self, limit: i64) -> Result<Vec<TaskEvent>>;
}

/// Leased-lock rows. The at-most-one-holder invariant is enforced here;
/// the lock manager adds waiting and TTL policy on top.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Try to take the lock on `(resource_type, resource_id)`.
    ///
    /// In one transaction: expired rows are reaped; if a live row for the
    /// tuple survives, `Ok(None)` is returned; otherwise the new lock row
    /// is inserted and returned.
    async fn acquire_lock(
        &self,
        lock_id: &str,
        resource_type: &str,
        resource_id: &str,
        holder_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Lock>>;

    /// Delete the lock row if both id and holder match. Returns whether a
    /// row was removed.
    async fn release_lock(&self, lock_id: &str, holder_id: &str) -> Result<bool>;

    /// Current lock on a resource, after reaping expired rows.
    async fn get_lock(&self, resource_type: &str, resource_id: &str) -> Result<Option<Lock>>;

    /// All live locks, optionally filtered by holder. Reaps expired rows
    /// first.
    async fn get_active_locks(&self, holder_id: Option<&str>) -> Result<Vec<Lock>>;
}

/// User account persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Fails with `Error::Conflict` on a duplicate email.
    async fn create_user(
        &self,
        user_id: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        role: UserRole,
    ) -> Result<User>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Lookup by email, returning the stored password hash alongside the
    /// snapshot for the out-of-scope authentication layer.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<(User, String)>>;

    async fn update_last_login(&self, id: &str) -> Result<()>;
}

/// Workspace and membership persistence.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn create_workspace(
        &self,
        workspace_id: &str,
        name: &str,
        owner_id: Option<&str>,
        settings: JsonMap,
    ) -> Result<Workspace>;

    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>>;

    /// Workspaces the user is a member of, ordered by name.
    async fn get_workspaces_for_user(&self, user_id: &str) -> Result<Vec<Workspace>>;

    /// Update name and/or settings; `None` fields are left unchanged.
    /// Stamps `updated_at`.
    async fn update_workspace(
        &self,
        id: &str,
        name: Option<String>,
        settings: Option<JsonMap>,
    ) -> Result<Option<Workspace>>;

    /// Hard delete; cascades to projects, tasks, members and webhooks.
    async fn delete_workspace(&self, id: &str) -> Result<bool>;

    /// Upsert a membership row.
    async fn add_workspace_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        role: UserRole,
    ) -> Result<()>;

    async fn remove_workspace_member(&self, workspace_id: &str, user_id: &str) -> Result<bool>;

    /// Members joined with user name/email, ordered by join time.
    async fn get_workspace_members(&self, workspace_id: &str) -> Result<Vec<WorkspaceMember>>;

    async fn is_workspace_member(&self, workspace_id: &str, user_id: &str) -> Result<bool>;
}

/// Project persistence. Listing excludes soft-deleted rows.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(
        &self,
        project_id: &str,
        workspace_id: &str,
        name: &str,
        description: &str,
        settings: JsonMap,
    ) -> Result<Project>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    /// Projects in a workspace excluding `deleted` ones, ordered by name.
    async fn get_projects_in_workspace(&self, workspace_id: &str) -> Result<Vec<Project>>;

    /// Update the given fields; `None` fields are left unchanged. Stamps
    /// `updated_at`.
    async fn update_project(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
        status: Option<ProjectStatus>,
        settings: Option<JsonMap>,
    ) -> Result<Option<Project>>;

    /// Soft delete: flips status to `deleted`. Returns whether a row was
    /// affected.
    async fn delete_project(&self, id: &str) -> Result<bool>;
}

/// Webhook subscription persistence.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Insert a webhook. When `events` is `None` the webhook subscribes to
    /// every event kind.
    async fn create_webhook(
        &self,
        webhook_id: &str,
        workspace_id: &str,
        service: WebhookService,
        url: &str,
        events: Option<Vec<EventType>>,
    ) -> Result<Webhook>;

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>>;

    /// All webhooks for a workspace, oldest first.
    async fn get_webhooks_for_workspace(&self, workspace_id: &str) -> Result<Vec<Webhook>>;

    /// Active webhooks in the workspace whose subscription set contains
    /// `event_type`.
    async fn get_active_webhooks_for_event(
        &self,
        workspace_id: &str,
        event_type: EventType,
    ) -> Result<Vec<Webhook>>;

    async fn update_webhook(
        &self,
        id: &str,
        url: Option<String>,
        events: Option<Vec<EventType>>,
        active: Option<bool>,
    ) -> Result<Option<Webhook>>;

    async fn delete_webhook(&self, id: &str) -> Result<bool>;
}

/// The full durable store crossed by every component. One implementation
/// backs the whole server process (single writer).
#[async_trait]
pub trait Store:
    TaskStore
    + EventStore
    + LockStore
    + UserStore
    + WorkspaceStore
    + ProjectStore
    + WebhookStore
{
    /// Connectivity probe for health endpoints.
    async fn health_check(&self) -> Result<()>;

    /// Cross-entity counters merged with [`TaskStore::task_stats`].
    async fn dashboard_stats(&self) -> Result<DashboardStats>;
}
