use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use maestro_core::{
    error::{Error, Result},
    models::{
        EventType, JsonMap, Lock, Project, ProjectStatus, Task, TaskEvent, TaskStatus, User,
        UserRole, Webhook, WebhookService, Workspace,
    },
};

/// Serialize a timestamp for storage: RFC 3339, UTC, microsecond
/// precision. Fixed width keeps lexicographic text ordering chronological.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(format_ts)
}

/// Parse a stored timestamp strictly. A malformed value is a storage
/// fault, never a silent default.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| Error::Storage(format!("invalid timestamp '{raw}': {err}")))
}

pub fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

pub fn status_to_string(status: TaskStatus) -> &'static str {
    status.as_str()
}

pub fn string_to_status(raw: &str) -> Result<TaskStatus> {
    match raw {
        "pending" => Ok(TaskStatus::Pending),
        "queued" => Ok(TaskStatus::Queued),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        _ => Err(Error::Storage(format!("invalid task status in database: {raw}"))),
    }
}

pub fn string_to_event_type(raw: &str) -> Result<EventType> {
    match raw {
        "created" => Ok(EventType::Created),
        "started" => Ok(EventType::Started),
        "completed" => Ok(EventType::Completed),
        "failed" => Ok(EventType::Failed),
        "cancelled" => Ok(EventType::Cancelled),
        "updated" => Ok(EventType::Updated),
        "assigned" => Ok(EventType::Assigned),
        "comment" => Ok(EventType::Comment),
        _ => Err(Error::Storage(format!("invalid event type in database: {raw}"))),
    }
}

pub fn string_to_role(raw: &str) -> Result<UserRole> {
    match raw {
        "admin" => Ok(UserRole::Admin),
        "member" => Ok(UserRole::Member),
        "viewer" => Ok(UserRole::Viewer),
        _ => Err(Error::Storage(format!("invalid user role in database: {raw}"))),
    }
}

pub fn string_to_project_status(raw: &str) -> Result<ProjectStatus> {
    match raw {
        "active" => Ok(ProjectStatus::Active),
        "archived" => Ok(ProjectStatus::Archived),
        "deleted" => Ok(ProjectStatus::Deleted),
        _ => Err(Error::Storage(format!("invalid project status in database: {raw}"))),
    }
}

/// Parse a webhook service tag. Unknown services are rejected so a bad
/// row cannot route traffic to an unsupported adapter.
pub fn string_to_service(raw: &str) -> Result<WebhookService> {
    match raw {
        "slack" => Ok(WebhookService::Slack),
        "discord" => Ok(WebhookService::Discord),
        _ => Err(Error::Validation(format!("unsupported webhook service: {raw}"))),
    }
}

pub fn parse_json_value(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|err| Error::Storage(format!("invalid JSON column: {err}")))
}

pub fn parse_json_map(raw: &str) -> Result<JsonMap> {
    match parse_json_value(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(Error::Storage(format!(
            "expected JSON object column, got {other}"
        ))),
    }
}

pub fn parse_string_array(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|err| Error::Storage(format!("invalid JSON array: {err}")))
}

/// Map a sqlx error onto the core error kinds.
pub fn sqlx_error_to_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            if message.contains("UNIQUE constraint failed") {
                if message.contains("users.email") {
                    return Error::Conflict("email already registered".to_string());
                }
                return Error::Conflict(format!("unique constraint violated: {message}"));
            }
            Error::Storage(format!("database constraint error: {message}"))
        }
        sqlx::Error::PoolTimedOut => Error::Storage("connection pool timeout".to_string()),
        sqlx::Error::Io(io_err) => Error::Storage(format!("database I/O error: {io_err}")),
        _ => Error::Storage(format!("database operation failed: {err}")),
    }
}

pub fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status_raw: String = row.get("status");
    let created_at: String = row.get("created_at");
    let started_at: Option<String> = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");
    let payload: String = row.get("payload");
    let dependencies: String = row.get("dependencies");
    let metadata: String = row.get("metadata");
    let result: Option<String> = row.get("result");

    Ok(Task {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        description: row.get("description"),
        service: row.get("service"),
        payload: parse_json_value(&payload)?,
        priority: row.get("priority"),
        status: string_to_status(&status_raw)?,
        dependencies: parse_string_array(&dependencies)?,
        metadata: parse_json_map(&metadata)?,
        created_at: parse_ts(&created_at)?,
        started_at: parse_opt_ts(started_at)?,
        completed_at: parse_opt_ts(completed_at)?,
        result: result.as_deref().map(parse_json_value).transpose()?,
        error: row.get("error"),
        retry_count: row.get("retry_count"),
        version: row.get("version"),
        created_by: row.get("created_by"),
    })
}

pub fn row_to_event(row: &SqliteRow) -> Result<TaskEvent> {
    let event_type_raw: String = row.get("event_type");
    let details: String = row.get("details");
    let created_at: String = row.get("created_at");

    Ok(TaskEvent {
        id: row.get("id"),
        task_id: row.get("task_id"),
        event_type: string_to_event_type(&event_type_raw)?,
        user_id: row.get("user_id"),
        details: parse_json_map(&details)?,
        created_at: parse_ts(&created_at)?,
    })
}

pub fn row_to_lock(row: &SqliteRow) -> Result<Lock> {
    let acquired_at: String = row.get("acquired_at");
    let expires_at: Option<String> = row.get("expires_at");

    Ok(Lock {
        id: row.get("id"),
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        holder_id: row.get("holder_id"),
        acquired_at: parse_ts(&acquired_at)?,
        expires_at: parse_opt_ts(expires_at)?,
    })
}

pub fn row_to_user(row: &SqliteRow) -> Result<User> {
    let role_raw: String = row.get("role");
    let created_at: String = row.get("created_at");
    let last_login: Option<String> = row.get("last_login");

    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        role: string_to_role(&role_raw)?,
        created_at: parse_ts(&created_at)?,
        last_login: parse_opt_ts(last_login)?,
    })
}

pub fn row_to_workspace(row: &SqliteRow) -> Result<Workspace> {
    let settings: String = row.get("settings");
    let created_at: String = row.get("created_at");
    let updated_at: Option<String> = row.get("updated_at");

    Ok(Workspace {
        id: row.get("id"),
        name: row.get("name"),
        owner_id: row.get("owner_id"),
        settings: parse_json_map(&settings)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_opt_ts(updated_at)?,
    })
}

pub fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let status_raw: String = row.get("status");
    let settings: String = row.get("settings");
    let created_at: String = row.get("created_at");
    let updated_at: Option<String> = row.get("updated_at");

    Ok(Project {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        description: row.get("description"),
        status: string_to_project_status(&status_raw)?,
        settings: parse_json_map(&settings)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_opt_ts(updated_at)?,
    })
}

pub fn row_to_webhook(row: &SqliteRow) -> Result<Webhook> {
    let service_raw: String = row.get("service");
    let events_raw: String = row.get("events");
    let active: i64 = row.get("active");
    let created_at: String = row.get("created_at");

    let events = parse_string_array(&events_raw)?
        .iter()
        .map(|name| string_to_event_type(name))
        .collect::<Result<Vec<EventType>>>()?;

    Ok(Webhook {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        service: string_to_service(&service_raw)?,
        url: row.get("url"),
        events,
        active: active != 0,
        created_at: parse_ts(&created_at)?,
    })
}
