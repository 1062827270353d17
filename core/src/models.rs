use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque key-value map used for task metadata, workspace/project settings
/// and event details.
pub type JsonMap = serde_json::Map<String, Value>;

/// Reserved workspace id seeded by the initial migration. Cannot be deleted.
pub const DEFAULT_WORKSPACE_ID: &str = "default";

/// Reserved project id seeded by the initial migration. Cannot be deleted.
pub const DEFAULT_PROJECT_ID: &str = "default";

/// A unit of work tracked by the orchestrator.
///
/// Tasks carry an opaque JSON payload addressed at an external worker via
/// the `service` tag; the core schedules them but never executes them.
/// Lower `priority` values are scheduled first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    /// Owning project, if any. Tasks created before the tenancy migration
    /// are backfilled into the reserved default project.
    pub project_id: Option<String>,
    pub name: String,
    pub description: String,
    /// Tag identifying the worker/adapter that executes the payload.
    pub service: String,
    pub payload: Value,
    /// Lower value = higher priority.
    pub priority: i64,
    pub status: TaskStatus,
    /// Ids of tasks that must complete before this one becomes ready.
    pub dependencies: Vec<String>,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    /// Stamped on the first transition into `Running`, never cleared.
    pub started_at: Option<DateTime<Utc>>,
    /// Stamped on any transition into a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: i64,
    /// Monotonic counter for optimistic concurrency control.
    pub version: i64,
    pub created_by: Option<String>,
}

/// Task lifecycle states.
///
/// The normal flow is `Pending → Running → Completed`. A task demoted for
/// retry goes `Running → Queued`, and `Queued` behaves like `Pending` for
/// scheduling purposes. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is one of the terminal states. Terminal tasks are
    /// never re-scheduled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits moving to `new`.
    pub fn can_transition_to(self, new: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, new) {
            (current, next) if current == next => false,

            (Pending, Queued | Running | Cancelled) => true,
            (Queued, Running | Cancelled) => true,
            // Running → Queued is the retry demotion path.
            (Running, Completed | Failed | Queued) => true,

            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data transfer object for registering new tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    /// Caller-supplied id. A fresh UUID is assigned when absent; supplying
    /// an id lets callers re-register a known task idempotently.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub service: String,
    #[serde(default = "default_payload")]
    pub payload: Value,
    /// Lower value = higher priority. `None` takes the queue's configured
    /// default.
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: JsonMap,
    pub project_id: Option<String>,
    pub created_by: Option<String>,
}

fn default_payload() -> Value {
    Value::Object(JsonMap::new())
}

impl NewTask {
    /// Minimal constructor; everything else takes its default.
    pub fn new(name: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            service: service.into(),
            payload: default_payload(),
            priority: None,
            dependencies: Vec::new(),
            metadata: JsonMap::new(),
            project_id: None,
            created_by: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Append-only audit record of a task lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    pub id: String,
    pub task_id: String,
    pub event_type: EventType,
    pub user_id: Option<String>,
    pub details: JsonMap,
    pub created_at: DateTime<Utc>,
}

/// Task lifecycle event kinds.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Started,
    Completed,
    Failed,
    Cancelled,
    Updated,
    Assigned,
    Comment,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Updated => "updated",
            Self::Assigned => "assigned",
            Self::Comment => "comment",
        }
    }

    /// Every event kind, in declaration order. Used as the default webhook
    /// subscription set.
    pub fn all() -> Vec<EventType> {
        vec![
            Self::Created,
            Self::Started,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
            Self::Updated,
            Self::Assigned,
            Self::Comment,
        ]
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leased exclusive lock on an application-defined resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lock {
    pub id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    /// Lease expiry. A lock with no expiry is held until released.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Lock {
    /// Whether the lease has lapsed as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry < now)
    }
}

/// Registered outbound webhook belonging to a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    pub id: String,
    pub workspace_id: String,
    pub service: WebhookService,
    pub url: String,
    /// Event kinds this webhook subscribes to.
    pub events: Vec<EventType>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Supported webhook delivery services.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookService {
    Slack,
    Discord,
}

impl WebhookService {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Discord => "discord",
        }
    }
}

impl std::fmt::Display for WebhookService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered user account. The password hash is never part of the
/// snapshot; `UserStore::get_user_by_email` returns it separately for the
/// out-of-scope authentication layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Role a user holds globally or within a workspace.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Member,
    Viewer,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level tenancy unit. Workspaces own projects, members and webhooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub settings: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Workspace membership row joined with the member's user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceMember {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub role: UserRole,
    pub joined_at: DateTime<Utc>,
}

/// Project inside a workspace. Deletion is soft (status flip); the
/// reserved `default` project cannot be deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: String,
    pub status: ProjectStatus,
    pub settings: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
    Deleted,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row in the `_migrations` ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub description: String,
}

/// Authenticated identity on whose behalf an operation runs. Resolved by
/// the out-of-scope transport layer; the core only consumes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Principal {
    pub user_id: String,
    pub role: UserRole,
}
