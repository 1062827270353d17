use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

use maestro_core::{
    error::{Error, Result},
    models::{
        EventType, JsonMap, Lock, Project, ProjectStatus, Task, TaskEvent, TaskStatus, User,
        UserRole, Webhook, WebhookService, Workspace, WorkspaceMember,
    },
    store::{
        DashboardStats, EventStore, LockStore, ProjectStore, Store, TaskStats, TaskStore,
        UserStore, WebhookStore, WorkspaceStore,
    },
};

use crate::common::{
    format_opt_ts, format_ts, row_to_event, row_to_lock, row_to_project, row_to_task, row_to_user,
    row_to_webhook, row_to_workspace, sqlx_error_to_error, status_to_string, string_to_role,
};
use crate::migrations::{MigrationManager, MigrationStatus};

const TASK_COLUMNS: &str = "id, name, description, service, payload, priority, status, \
     dependencies, metadata, created_at, started_at, completed_at, result, error, retry_count, \
     project_id, created_by, version";

/// SQLite implementation of the Maestro store traits.
///
/// Single-writer embedded database behind a connection pool: WAL journal
/// mode for file databases, foreign keys on, busy timeout for the write
/// lock. All timestamps are stored as RFC 3339 text in UTC.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the given SQLite database URL (file path or `:memory:`),
    /// creating the file if needed.
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_url = if database_url.starts_with(":memory:") || database_url.starts_with("sqlite://")
        {
            database_url.to_string()
        } else {
            format!("sqlite://{database_url}")
        };

        let in_memory = db_url.contains(":memory:");

        if !in_memory && !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            Sqlite::create_database(&db_url).await.map_err(|err| {
                tracing::error!(error = %err, "error creating database");
                Error::Storage(format!("failed to create database: {err}"))
            })?;
            tracing::info!("database created");
        }

        let connect_options = if in_memory {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_url)
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        } else {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(db_url.replace("sqlite://", ""))
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        };

        // An in-memory database is per-connection; a pool of one keeps
        // every caller on the same database.
        let pool = if in_memory {
            sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(connect_options)
                .await
        } else {
            SqlitePool::connect_with(connect_options).await
        }
        .map_err(sqlx_error_to_error)?;

        Ok(Self { pool })
    }

    /// Bootstrap the base schema and bring the migration ledger current.
    ///
    /// Must complete before the store accepts traffic; a failure here is
    /// fatal at startup. Returns the migration names applied in this run.
    pub async fn migrate(&self) -> Result<Vec<String>> {
        for statement in [
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT DEFAULT '',
                service TEXT NOT NULL,
                payload TEXT DEFAULT '{}',
                priority INTEGER DEFAULT 5,
                status TEXT DEFAULT 'pending',
                dependencies TEXT DEFAULT '[]',
                metadata TEXT DEFAULT '{}',
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                result TEXT,
                error TEXT,
                retry_count INTEGER DEFAULT 0
            )",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(sqlx_error_to_error)?;
        }

        let applied = MigrationManager::new().migrate(&self.pool).await?;
        tracing::info!(applied = applied.len(), "database migrations completed");
        Ok(applied)
    }

    /// Ledger versus registry view of the schema state.
    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        MigrationManager::new().status(&self.pool).await
    }

    /// Access to the underlying pool, for tests that need raw SQL.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn reap_expired_locks(&self) -> Result<()> {
        sqlx::query("DELETE FROM locks WHERE expires_at IS NOT NULL AND expires_at < ?")
            .bind(format_ts(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO tasks (
                id, name, description, service, payload, priority, status,
                dependencies, metadata, created_at, started_at, completed_at,
                result, error, retry_count, project_id, created_by, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.service)
        .bind(task.payload.to_string())
        .bind(task.priority)
        .bind(status_to_string(task.status))
        .bind(serde_json::to_string(&task.dependencies).unwrap_or_else(|_| "[]".to_string()))
        .bind(Value::Object(task.metadata.clone()).to_string())
        .bind(format_ts(task.created_at))
        .bind(format_opt_ts(task.started_at))
        .bind(format_opt_ts(task.completed_at))
        .bind(task.result.as_ref().map(|value| value.to_string()))
        .bind(&task.error)
        .bind(task.retry_count)
        .bind(&task.project_id)
        .bind(&task.created_by)
        .bind(task.version)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? \
             ORDER BY priority, created_at, id"
        ))
        .bind(status_to_string(status))
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn get_tasks_by_project(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ? AND status = ? \
                     ORDER BY priority, created_at, id"
                ))
                .bind(project_id)
                .bind(status_to_string(status))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ? \
                     ORDER BY priority, created_at, id"
                ))
                .bind(project_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<Task>> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let started_at = match (status, task.started_at) {
            (TaskStatus::Running, None) => Some(now),
            (_, existing) => existing,
        };
        let completed_at = if status.is_terminal() {
            Some(now)
        } else {
            task.completed_at
        };

        let row = sqlx::query(&format!(
            "UPDATE tasks SET status = ?, started_at = ?, completed_at = ?, result = ?, error = ? \
             WHERE id = ? RETURNING {TASK_COLUMNS}"
        ))
        .bind(status_to_string(status))
        .bind(format_opt_ts(started_at))
        .bind(format_opt_ts(completed_at))
        .bind(result.as_ref().map(|value| value.to_string()))
        .bind(&error)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        row_to_task(&row).map(Some)
    }

    async fn update_task_version(&self, id: &str) -> Result<i64> {
        let row = sqlx::query("UPDATE tasks SET version = version + 1 WHERE id = ? RETURNING version")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        Ok(row.map(|row| row.get("version")).unwrap_or(0))
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        let outcome = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn task_stats(&self) -> Result<TaskStats> {
        let status_rows = sqlx::query("SELECT status, COUNT(*) AS count FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;
        let tasks_by_status: HashMap<String, i64> = status_rows
            .iter()
            .map(|row| (row.get("status"), row.get("count")))
            .collect();

        let service_rows =
            sqlx::query("SELECT service, COUNT(*) AS count FROM tasks GROUP BY service")
                .fetch_all(&self.pool)
                .await
                .map_err(sqlx_error_to_error)?;
        let tasks_by_service: HashMap<String, i64> = service_rows
            .iter()
            .map(|row| (row.get("service"), row.get("count")))
            .collect();

        let total_row = sqlx::query("SELECT COUNT(*) AS total FROM tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;
        let total_tasks: i64 = total_row.get("total");

        let avg_row = sqlx::query(
            "SELECT AVG((julianday(completed_at) - julianday(started_at)) * 86400000) AS avg_ms \
             FROM tasks \
             WHERE status = 'completed' AND started_at IS NOT NULL AND completed_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;
        let avg_completion_time_ms: Option<f64> = avg_row.get("avg_ms");

        Ok(TaskStats {
            total_tasks,
            tasks_by_status,
            tasks_by_service,
            avg_completion_time_ms: avg_completion_time_ms.unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn create_task_event(
        &self,
        event_id: &str,
        task_id: &str,
        event_type: EventType,
        user_id: Option<&str>,
        details: JsonMap,
    ) -> Result<TaskEvent> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO task_events (id, task_id, event_type, user_id, details, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event_id)
        .bind(task_id)
        .bind(event_type.as_str())
        .bind(user_id)
        .bind(Value::Object(details.clone()).to_string())
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        Ok(TaskEvent {
            id: event_id.to_string(),
            task_id: task_id.to_string(),
            event_type,
            user_id: user_id.map(|id| id.to_string()),
            details,
            created_at: now,
        })
    }

    async fn get_task_events(&self, task_id: &str, limit: i64) -> Result<Vec<TaskEvent>> {
        let rows = sqlx::query(
            "SELECT id, task_id, event_type, user_id, details, created_at FROM task_events \
             WHERE task_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_event).collect()
    }

    async fn get_recent_events(&self, limit: i64) -> Result<Vec<TaskEvent>> {
        let rows = sqlx::query(
            "SELECT id, task_id, event_type, user_id, details, created_at FROM task_events \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_event).collect()
    }
}

#[async_trait]
impl LockStore for SqliteStore {
    async fn acquire_lock(
        &self,
        lock_id: &str,
        resource_type: &str,
        resource_id: &str,
        holder_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Lock>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_error)?;

        sqlx::query("DELETE FROM locks WHERE expires_at IS NOT NULL AND expires_at < ?")
            .bind(format_ts(now))
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_error)?;

        let existing =
            sqlx::query("SELECT id FROM locks WHERE resource_type = ? AND resource_id = ?")
                .bind(resource_type)
                .bind(resource_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(sqlx_error_to_error)?;

        if existing.is_some() {
            // Keep the expiry reap even when this acquire loses; dropping
            // the transaction would roll it back.
            tx.commit().await.map_err(sqlx_error_to_error)?;
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO locks (id, resource_type, resource_id, holder_id, acquired_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(lock_id)
        .bind(resource_type)
        .bind(resource_id)
        .bind(holder_id)
        .bind(format_ts(now))
        .bind(format_opt_ts(expires_at))
        .execute(&mut *tx)
        .await
        .map_err(sqlx_error_to_error)?;

        tx.commit().await.map_err(sqlx_error_to_error)?;

        Ok(Some(Lock {
            id: lock_id.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at,
        }))
    }

    async fn release_lock(&self, lock_id: &str, holder_id: &str) -> Result<bool> {
        let outcome = sqlx::query("DELETE FROM locks WHERE id = ? AND holder_id = ?")
            .bind(lock_id)
            .bind(holder_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn get_lock(&self, resource_type: &str, resource_id: &str) -> Result<Option<Lock>> {
        self.reap_expired_locks().await?;

        let row = sqlx::query(
            "SELECT id, resource_type, resource_id, holder_id, acquired_at, expires_at \
             FROM locks WHERE resource_type = ? AND resource_id = ?",
        )
        .bind(resource_type)
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        row.as_ref().map(row_to_lock).transpose()
    }

    async fn get_active_locks(&self, holder_id: Option<&str>) -> Result<Vec<Lock>> {
        self.reap_expired_locks().await?;

        let rows = match holder_id {
            Some(holder_id) => {
                sqlx::query(
                    "SELECT id, resource_type, resource_id, holder_id, acquired_at, expires_at \
                     FROM locks WHERE holder_id = ?",
                )
                .bind(holder_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, resource_type, resource_id, holder_id, acquired_at, expires_at \
                     FROM locks",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_lock).collect()
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn create_user(
        &self,
        user_id: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        role: UserRole,
    ) -> Result<User> {
        if email.trim().is_empty() {
            return Err(Error::empty_field("email"));
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (id, email, name, password_hash, role, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        Ok(User {
            id: user_id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            role,
            created_at: now,
            last_login: None,
        })
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, name, role, created_at, last_login FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<(User, String)>> {
        let row = sqlx::query(
            "SELECT id, email, name, password_hash, role, created_at, last_login \
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        match row {
            Some(row) => {
                let user = row_to_user(&row)?;
                let password_hash: String = row.get("password_hash");
                Ok(Some((user, password_hash)))
            }
            None => Ok(None),
        }
    }

    async fn update_last_login(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(format_ts(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for SqliteStore {
    async fn create_workspace(
        &self,
        workspace_id: &str,
        name: &str,
        owner_id: Option<&str>,
        settings: JsonMap,
    ) -> Result<Workspace> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO workspaces (id, name, owner_id, settings, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(name)
        .bind(owner_id)
        .bind(Value::Object(settings.clone()).to_string())
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        Ok(Workspace {
            id: workspace_id.to_string(),
            name: name.to_string(),
            owner_id: owner_id.map(|id| id.to_string()),
            settings,
            created_at: now,
            updated_at: None,
        })
    }

    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query(
            "SELECT id, name, owner_id, settings, created_at, updated_at \
             FROM workspaces WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        row.as_ref().map(row_to_workspace).transpose()
    }

    async fn get_workspaces_for_user(&self, user_id: &str) -> Result<Vec<Workspace>> {
        let rows = sqlx::query(
            "SELECT w.id, w.name, w.owner_id, w.settings, w.created_at, w.updated_at \
             FROM workspaces w \
             JOIN workspace_members wm ON w.id = wm.workspace_id \
             WHERE wm.user_id = ? \
             ORDER BY w.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_workspace).collect()
    }

    async fn update_workspace(
        &self,
        id: &str,
        name: Option<String>,
        settings: Option<JsonMap>,
    ) -> Result<Option<Workspace>> {
        let Some(workspace) = self.get_workspace(id).await? else {
            return Ok(None);
        };

        let new_name = name.unwrap_or(workspace.name);
        let new_settings = settings.unwrap_or(workspace.settings);

        sqlx::query("UPDATE workspaces SET name = ?, settings = ?, updated_at = ? WHERE id = ?")
            .bind(&new_name)
            .bind(Value::Object(new_settings).to_string())
            .bind(format_ts(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        self.get_workspace(id).await
    }

    async fn delete_workspace(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_error)?;

        // tasks.project_id carries no foreign key (the column was added to
        // a pre-existing table), so the project cascade is done by hand;
        // task_events then cascade from tasks.
        sqlx::query(
            "DELETE FROM tasks WHERE project_id IN (SELECT id FROM projects WHERE workspace_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(sqlx_error_to_error)?;

        let outcome = sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_error)?;

        tx.commit().await.map_err(sqlx_error_to_error)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn add_workspace_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        role: UserRole,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO workspace_members (workspace_id, user_id, role, joined_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        Ok(())
    }

    async fn remove_workspace_member(&self, workspace_id: &str, user_id: &str) -> Result<bool> {
        let outcome =
            sqlx::query("DELETE FROM workspace_members WHERE workspace_id = ? AND user_id = ?")
                .bind(workspace_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(sqlx_error_to_error)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn get_workspace_members(&self, workspace_id: &str) -> Result<Vec<WorkspaceMember>> {
        let rows = sqlx::query(
            "SELECT wm.user_id, wm.role, wm.joined_at, u.name AS user_name, u.email AS user_email \
             FROM workspace_members wm \
             JOIN users u ON wm.user_id = u.id \
             WHERE wm.workspace_id = ? \
             ORDER BY wm.joined_at",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        rows.iter()
            .map(|row| {
                let role_raw: String = row.get("role");
                let joined_at: String = row.get("joined_at");
                Ok(WorkspaceMember {
                    user_id: row.get("user_id"),
                    user_name: row.get("user_name"),
                    user_email: row.get("user_email"),
                    role: string_to_role(&role_raw)?,
                    joined_at: crate::common::parse_ts(&joined_at)?,
                })
            })
            .collect()
    }

    async fn is_workspace_member(&self, workspace_id: &str, user_id: &str) -> Result<bool> {
        let row =
            sqlx::query("SELECT 1 FROM workspace_members WHERE workspace_id = ? AND user_id = ?")
                .bind(workspace_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(sqlx_error_to_error)?;

        Ok(row.is_some())
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn create_project(
        &self,
        project_id: &str,
        workspace_id: &str,
        name: &str,
        description: &str,
        settings: JsonMap,
    ) -> Result<Project> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO projects (id, workspace_id, name, description, settings, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(workspace_id)
        .bind(name)
        .bind(description)
        .bind(Value::Object(settings.clone()).to_string())
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        Ok(Project {
            id: project_id.to_string(),
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: ProjectStatus::Active,
            settings,
            created_at: now,
            updated_at: None,
        })
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, description, status, settings, created_at, updated_at \
             FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        row.as_ref().map(row_to_project).transpose()
    }

    async fn get_projects_in_workspace(&self, workspace_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, description, status, settings, created_at, updated_at \
             FROM projects \
             WHERE workspace_id = ? AND status != 'deleted' \
             ORDER BY name",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_project).collect()
    }

    async fn update_project(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
        status: Option<ProjectStatus>,
        settings: Option<JsonMap>,
    ) -> Result<Option<Project>> {
        let Some(project) = self.get_project(id).await? else {
            return Ok(None);
        };

        let new_name = name.unwrap_or(project.name);
        let new_description = description.unwrap_or(project.description);
        let new_status = status.unwrap_or(project.status);
        let new_settings = settings.unwrap_or(project.settings);

        sqlx::query(
            "UPDATE projects SET name = ?, description = ?, status = ?, settings = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&new_name)
        .bind(&new_description)
        .bind(new_status.as_str())
        .bind(Value::Object(new_settings).to_string())
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        self.get_project(id).await
    }

    async fn delete_project(&self, id: &str) -> Result<bool> {
        let outcome = sqlx::query("UPDATE projects SET status = 'deleted' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        Ok(outcome.rows_affected() > 0)
    }
}

#[async_trait]
impl WebhookStore for SqliteStore {
    async fn create_webhook(
        &self,
        webhook_id: &str,
        workspace_id: &str,
        service: WebhookService,
        url: &str,
        events: Option<Vec<EventType>>,
    ) -> Result<Webhook> {
        let events = events.unwrap_or_else(EventType::all);
        let events_json = serde_json::to_string(
            &events.iter().map(|event| event.as_str()).collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO webhooks (id, workspace_id, service, url, events, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(webhook_id)
        .bind(workspace_id)
        .bind(service.as_str())
        .bind(url)
        .bind(events_json)
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        Ok(Webhook {
            id: webhook_id.to_string(),
            workspace_id: workspace_id.to_string(),
            service,
            url: url.to_string(),
            events,
            active: true,
            created_at: now,
        })
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, service, url, events, active, created_at \
             FROM webhooks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        row.as_ref().map(row_to_webhook).transpose()
    }

    async fn get_webhooks_for_workspace(&self, workspace_id: &str) -> Result<Vec<Webhook>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, service, url, events, active, created_at \
             FROM webhooks WHERE workspace_id = ? ORDER BY created_at",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        rows.iter().map(row_to_webhook).collect()
    }

    async fn get_active_webhooks_for_event(
        &self,
        workspace_id: &str,
        event_type: EventType,
    ) -> Result<Vec<Webhook>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, service, url, events, active, created_at \
             FROM webhooks WHERE workspace_id = ? AND active = 1 ORDER BY created_at",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        // Subscription sets are JSON arrays; filter in code rather than
        // leaning on SQLite's JSON support.
        let webhooks = rows
            .iter()
            .map(row_to_webhook)
            .collect::<Result<Vec<Webhook>>>()?;
        Ok(webhooks
            .into_iter()
            .filter(|webhook| webhook.events.contains(&event_type))
            .collect())
    }

    async fn update_webhook(
        &self,
        id: &str,
        url: Option<String>,
        events: Option<Vec<EventType>>,
        active: Option<bool>,
    ) -> Result<Option<Webhook>> {
        let Some(webhook) = self.get_webhook(id).await? else {
            return Ok(None);
        };

        let new_url = url.unwrap_or(webhook.url);
        let new_events = events.unwrap_or(webhook.events);
        let new_active = active.unwrap_or(webhook.active);
        let events_json = serde_json::to_string(
            &new_events
                .iter()
                .map(|event| event.as_str())
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        sqlx::query("UPDATE webhooks SET url = ?, events = ?, active = ? WHERE id = ?")
            .bind(&new_url)
            .bind(events_json)
            .bind(i64::from(new_active))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        self.get_webhook(id).await
    }

    async fn delete_webhook(&self, id: &str) -> Result<bool> {
        let outcome = sqlx::query("DELETE FROM webhooks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        Ok(outcome.rows_affected() > 0)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;
        Ok(())
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let workspaces_row = sqlx::query("SELECT COUNT(*) AS count FROM workspaces")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        let projects_row =
            sqlx::query("SELECT COUNT(*) AS count FROM projects WHERE status != 'deleted'")
                .fetch_one(&self.pool)
                .await
                .map_err(sqlx_error_to_error)?;

        let users_row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_error)?;

        let locks_row = sqlx::query(
            "SELECT COUNT(*) AS count FROM locks WHERE expires_at IS NULL OR expires_at > ?",
        )
        .bind(format_ts(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_error)?;

        Ok(DashboardStats {
            total_workspaces: workspaces_row.get("count"),
            total_projects: projects_row.get("count"),
            total_users: users_row.get("count"),
            active_locks: locks_row.get("count"),
            tasks: self.task_stats().await?,
        })
    }
}
