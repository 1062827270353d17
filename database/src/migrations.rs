use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use maestro_core::{
    error::{Error, Result},
    models::{MigrationRecord, DEFAULT_PROJECT_ID, DEFAULT_WORKSPACE_ID},
};

use crate::common::{format_ts, parse_ts, sqlx_error_to_error};

/// Function applying one migration inside an open transaction.
pub type ApplyFn = for<'a> fn(
    &'a mut Transaction<'static, Sqlite>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// One forward-only schema migration. `apply` runs inside a single
/// transaction together with the ledger insert, so a failed migration is
/// never recorded as applied.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub description: &'static str,
    apply: ApplyFn,
}

impl Migration {
    pub fn new(
        version: i64,
        name: &'static str,
        description: &'static str,
        apply: ApplyFn,
    ) -> Self {
        Self {
            version,
            name,
            description,
            apply,
        }
    }
}

/// A registered migration that has not been applied yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingMigration {
    pub version: i64,
    pub name: String,
    pub description: String,
}

/// Ledger versus registry view of the schema state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<PendingMigration>,
}

/// Applies numbered migrations in order and gates startup on the ledger
/// being current. Forward-only: there are no down-migrations.
pub struct MigrationManager {
    migrations: Vec<Migration>,
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationManager {
    pub fn new() -> Self {
        Self {
            migrations: vec![Migration {
                version: 1,
                name: "phase2_schema",
                description:
                    "Add tenancy tables: workspaces, projects, users, members, locks, events, webhooks",
                apply: apply_phase2,
            }],
        }
    }

    /// Build a manager over an explicit migration list. Used by tests to
    /// exercise failure and ordering behavior.
    pub fn with_migrations(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Apply every registered migration with `version > current`, in
    /// order. Returns the names of the migrations applied in this run.
    ///
    /// # Errors
    /// `Error::MigrationFailed` on any failure; the offending migration's
    /// transaction is rolled back and nothing later is attempted.
    pub async fn migrate(&self, pool: &SqlitePool) -> Result<Vec<String>> {
        self.ensure_ledger(pool).await?;
        let current_version = self.current_version(pool).await?;

        tracing::info!(
            current_version,
            available_migrations = self.migrations.len(),
            "migration check"
        );

        let mut applied = Vec::new();

        for migration in &self.migrations {
            if migration.version <= current_version {
                continue;
            }

            tracing::info!(
                version = migration.version,
                name = migration.name,
                "applying migration"
            );

            let mut tx = pool.begin().await.map_err(sqlx_error_to_error)?;

            let outcome = async {
                (migration.apply)(&mut tx).await?;
                sqlx::query(
                    "INSERT INTO _migrations (version, name, applied_at, description) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(migration.version)
                .bind(migration.name)
                .bind(format_ts(Utc::now()))
                .bind(migration.description)
                .execute(&mut *tx)
                .await
                .map_err(sqlx_error_to_error)?;
                Ok::<(), Error>(())
            }
            .await;

            match outcome {
                Ok(()) => {
                    tx.commit().await.map_err(|err| {
                        Error::MigrationFailed(format!(
                            "migration {} ({}) failed to commit: {err}",
                            migration.version, migration.name
                        ))
                    })?;
                    applied.push(migration.name.to_string());
                    tracing::info!(
                        version = migration.version,
                        name = migration.name,
                        "migration applied"
                    );
                }
                Err(err) => {
                    // Dropping the transaction rolls it back.
                    drop(tx);
                    tracing::error!(
                        version = migration.version,
                        name = migration.name,
                        error = %err,
                        "migration failed"
                    );
                    return Err(Error::MigrationFailed(format!(
                        "migration {} ({}) failed: {err}",
                        migration.version, migration.name
                    )));
                }
            }
        }

        Ok(applied)
    }

    /// Applied ledger rows plus the registered migrations still pending.
    pub async fn status(&self, pool: &SqlitePool) -> Result<MigrationStatus> {
        self.ensure_ledger(pool).await?;
        let current_version = self.current_version(pool).await?;

        let rows = sqlx::query(
            "SELECT version, name, applied_at, description FROM _migrations ORDER BY version",
        )
        .fetch_all(pool)
        .await
        .map_err(sqlx_error_to_error)?;

        let mut applied = Vec::with_capacity(rows.len());
        for row in rows {
            let applied_at: String = row.get("applied_at");
            applied.push(MigrationRecord {
                version: row.get("version"),
                name: row.get("name"),
                applied_at: parse_ts(&applied_at)?,
                description: row.get("description"),
            });
        }

        let pending = self
            .migrations
            .iter()
            .filter(|migration| migration.version > current_version)
            .map(|migration| PendingMigration {
                version: migration.version,
                name: migration.name.to_string(),
                description: migration.description.to_string(),
            })
            .collect();

        Ok(MigrationStatus { applied, pending })
    }

    async fn ensure_ledger(&self, pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                description TEXT DEFAULT ''
            )",
        )
        .execute(pool)
        .await
        .map_err(sqlx_error_to_error)?;
        Ok(())
    }

    async fn current_version(&self, pool: &SqlitePool) -> Result<i64> {
        let row = sqlx::query("SELECT MAX(version) AS version FROM _migrations")
            .fetch_one(pool)
            .await
            .map_err(sqlx_error_to_error)?;
        let version: Option<i64> = row.get("version");
        Ok(version.unwrap_or(0))
    }
}

fn apply_phase2<'a>(
    tx: &'a mut Transaction<'static, Sqlite>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(migration_001_phase2_schema(tx))
}

/// Tenancy schema: workspaces, projects, users, memberships, locks, task
/// events and webhooks, plus tenancy columns on the pre-existing `tasks`
/// table and the reserved default workspace/project backfill.
async fn migration_001_phase2_schema(tx: &mut Transaction<'static, Sqlite>) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner_id TEXT,
            settings TEXT DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT DEFAULT '',
            status TEXT DEFAULT 'active',
            settings TEXT DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
        )",
        "CREATE INDEX IF NOT EXISTS idx_projects_workspace ON projects(workspace_id)",
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT DEFAULT 'member',
            created_at TEXT NOT NULL,
            last_login TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)",
        "CREATE TABLE IF NOT EXISTS workspace_members (
            workspace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT DEFAULT 'member',
            joined_at TEXT NOT NULL,
            PRIMARY KEY (workspace_id, user_id),
            FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        "CREATE TABLE IF NOT EXISTS project_members (
            project_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT DEFAULT 'member',
            permissions TEXT DEFAULT '[]',
            joined_at TEXT NOT NULL,
            PRIMARY KEY (project_id, user_id),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        "CREATE TABLE IF NOT EXISTS locks (
            id TEXT PRIMARY KEY,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            holder_id TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            expires_at TEXT,
            UNIQUE(resource_type, resource_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_locks_resource ON locks(resource_type, resource_id)",
        "CREATE INDEX IF NOT EXISTS idx_locks_holder ON locks(holder_id)",
        "CREATE TABLE IF NOT EXISTS task_events (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            user_id TEXT,
            details TEXT DEFAULT '{}',
            created_at TEXT NOT NULL,
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
        )",
        "CREATE INDEX IF NOT EXISTS idx_task_events_task ON task_events(task_id)",
        "CREATE INDEX IF NOT EXISTS idx_task_events_type ON task_events(event_type)",
        "CREATE TABLE IF NOT EXISTS webhooks (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            service TEXT NOT NULL,
            url TEXT NOT NULL,
            events TEXT DEFAULT '[]',
            active INTEGER DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
        )",
        "CREATE INDEX IF NOT EXISTS idx_webhooks_workspace ON webhooks(workspace_id)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(&mut **tx)
            .await
            .map_err(sqlx_error_to_error)?;
    }

    // Tenancy columns on the pre-existing tasks table. SQLite cannot add
    // a column idempotently, so consult the live schema first.
    let columns: Vec<String> = sqlx::query("PRAGMA table_info(tasks)")
        .fetch_all(&mut **tx)
        .await
        .map_err(sqlx_error_to_error)?
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    for (column, ddl) in [
        ("project_id", "ALTER TABLE tasks ADD COLUMN project_id TEXT"),
        ("created_by", "ALTER TABLE tasks ADD COLUMN created_by TEXT"),
        (
            "version",
            "ALTER TABLE tasks ADD COLUMN version INTEGER DEFAULT 1",
        ),
    ] {
        if !columns.iter().any(|name| name == column) {
            sqlx::query(ddl)
                .execute(&mut **tx)
                .await
                .map_err(sqlx_error_to_error)?;
        }
    }

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_created_by ON tasks(created_by)",
    ] {
        sqlx::query(statement)
            .execute(&mut **tx)
            .await
            .map_err(sqlx_error_to_error)?;
    }

    // Reserved default workspace/project, seeded idempotently, and the
    // project backfill for tasks created before tenancy existed.
    let now = format_ts(Utc::now());

    sqlx::query(
        "INSERT OR IGNORE INTO workspaces (id, name, settings, created_at) VALUES (?, ?, '{}', ?)",
    )
    .bind(DEFAULT_WORKSPACE_ID)
    .bind("Default Workspace")
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(sqlx_error_to_error)?;

    sqlx::query(
        "INSERT OR IGNORE INTO projects (id, workspace_id, name, description, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(DEFAULT_PROJECT_ID)
    .bind(DEFAULT_WORKSPACE_ID)
    .bind("Default Project")
    .bind("Default project for tasks predating workspaces")
    .bind(&now)
    .execute(&mut **tx)
    .await
    .map_err(sqlx_error_to_error)?;

    sqlx::query("UPDATE tasks SET project_id = ? WHERE project_id IS NULL")
        .bind(DEFAULT_PROJECT_ID)
        .execute(&mut **tx)
        .await
        .map_err(sqlx_error_to_error)?;

    Ok(())
}
