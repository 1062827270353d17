use std::future::Future;
use std::pin::Pin;

use maestro_core::{
    error::Result,
    models::{DEFAULT_PROJECT_ID, DEFAULT_WORKSPACE_ID},
    store::{ProjectStore, TaskStore, WorkspaceStore},
    Error,
};
use maestro_database::{Migration, MigrationManager, SqliteStore};
use sqlx::{Row, Sqlite, Transaction};

type ApplyResult<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

#[tokio::test]
async fn migrate_brings_ledger_current() {
    let store = SqliteStore::new(":memory:").await.unwrap();

    let applied = store.migrate().await.unwrap();
    assert_eq!(applied, vec!["phase2_schema".to_string()]);

    let status = store.migration_status().await.unwrap();
    assert_eq!(status.applied.len(), 1);
    assert_eq!(status.applied[0].version, 1);
    assert_eq!(status.applied[0].name, "phase2_schema");
    assert!(status.pending.is_empty());
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let store = SqliteStore::new(":memory:").await.unwrap();

    store.migrate().await.unwrap();
    let first = store.migration_status().await.unwrap();

    // A second run applies nothing and leaves the ledger untouched.
    let reapplied = store.migrate().await.unwrap();
    assert!(reapplied.is_empty());

    let second = store.migration_status().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn reserved_defaults_are_seeded() {
    let store = SqliteStore::new(":memory:").await.unwrap();
    store.migrate().await.unwrap();

    let workspace = store
        .get_workspace(DEFAULT_WORKSPACE_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(workspace.name, "Default Workspace");

    let project = store
        .get_project(DEFAULT_PROJECT_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.workspace_id, DEFAULT_WORKSPACE_ID);
}

#[tokio::test]
async fn legacy_tasks_are_backfilled_into_default_project() {
    let store = SqliteStore::new(":memory:").await.unwrap();

    // Recreate the pre-tenancy schema by hand and insert a legacy row
    // before any migration runs.
    sqlx::query(
        "CREATE TABLE tasks (
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
    )
    .execute(store.pool())
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO tasks (id, name, service, created_at) \
         VALUES ('legacy-1', 'old task', 'compute', '2024-01-01T00:00:00.000000Z')",
    )
    .execute(store.pool())
    .await
    .unwrap();

    store.migrate().await.unwrap();

    let task = store.get_task("legacy-1").await.unwrap().unwrap();
    assert_eq!(task.project_id.as_deref(), Some(DEFAULT_PROJECT_ID));
    assert_eq!(task.version, 1);
}

#[tokio::test]
async fn failed_migration_rolls_back_and_is_not_recorded() {
    let store = SqliteStore::new(":memory:").await.unwrap();
    store.migrate().await.unwrap();

    fn broken_apply(tx: &mut Transaction<'static, Sqlite>) -> ApplyResult<'_> {
        Box::pin(async move {
            sqlx::query("CREATE TABLE half_done (id TEXT PRIMARY KEY)")
                .execute(&mut **tx)
                .await
                .map_err(|err| Error::Storage(err.to_string()))?;
            Err(Error::Storage("simulated failure".to_string()))
        })
    }

    let manager = MigrationManager::with_migrations(vec![Migration::new(
        2,
        "broken",
        "creates a table, then dies",
        broken_apply,
    )]);

    let err = manager.migrate(store.pool()).await.unwrap_err();
    assert!(matches!(err, Error::MigrationFailed(_)));

    // The ledger never saw version 2, and the partial table rolled back.
    let status = manager.status(store.pool()).await.unwrap();
    assert!(status.applied.iter().all(|record| record.version != 2));
    assert_eq!(status.pending.len(), 1);

    let table = sqlx::query(
        "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'half_done'",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(table.get::<i64, _>("count"), 0);
}

#[tokio::test]
async fn migrations_apply_in_version_order() {
    let store = SqliteStore::new(":memory:").await.unwrap();
    store.migrate().await.unwrap();

    fn create_table(tx: &mut Transaction<'static, Sqlite>) -> ApplyResult<'_> {
        Box::pin(async move {
            sqlx::query("CREATE TABLE ordering_a (id TEXT)")
                .execute(&mut **tx)
                .await
                .map_err(|err| Error::Storage(err.to_string()))?;
            Ok(())
        })
    }

    fn insert_row(tx: &mut Transaction<'static, Sqlite>) -> ApplyResult<'_> {
        Box::pin(async move {
            // Depends on the table from version 2.
            sqlx::query("INSERT INTO ordering_a (id) VALUES ('x')")
                .execute(&mut **tx)
                .await
                .map_err(|err| Error::Storage(err.to_string()))?;
            Ok(())
        })
    }

    let manager = MigrationManager::with_migrations(vec![
        Migration::new(2, "second", "", create_table),
        Migration::new(3, "third", "", insert_row),
    ]);

    let applied = manager.migrate(store.pool()).await.unwrap();
    assert_eq!(applied, vec!["second".to_string(), "third".to_string()]);
}
