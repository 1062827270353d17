use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use maestro_core::{
    store::Store, EventPublisher, LockManager, ProjectHub, ProjectManager, QueueConfig, TaskQueue,
    WebhookNotifier, WorkspaceManager,
};
use maestro_database::SqliteStore;

use crate::config::Config;

/// Fully wired orchestration core.
///
/// Built once at startup by [`initialize_app`]; nothing here is a global.
/// The transport layer borrows what it needs from this struct.
pub struct App {
    pub store: Arc<SqliteStore>,
    pub queue: Arc<TaskQueue>,
    pub publisher: Arc<EventPublisher>,
    pub locks: LockManager,
    pub hub: Arc<ProjectHub>,
    pub notifier: Arc<WebhookNotifier>,
    pub workspaces: WorkspaceManager,
    pub projects: ProjectManager,
}

/// Create the database directory for file-backed databases.
pub fn ensure_database_directory(database_url: &str) -> Result<()> {
    let path = database_url.trim_start_matches("sqlite://");
    if path.contains(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {parent:?}"))?;
        }
    }

    Ok(())
}

/// Composition root: connect the store, gate on migrations, and wire every
/// component together.
///
/// The publisher learns about the hub and the notifier here, by
/// registration, so neither of them ever references the publisher back.
pub async fn initialize_app(config: &Config) -> Result<App> {
    let database_url = config.database_url();
    ensure_database_directory(&database_url)?;

    let store = Arc::new(
        SqliteStore::new(&database_url)
            .await
            .context("failed to open database")?,
    );

    // Migration failures are fatal: the core must not accept traffic over
    // a stale schema.
    let applied = store
        .migrate()
        .await
        .context("schema migration failed; aborting startup")?;
    if !applied.is_empty() {
        tracing::info!(applied = ?applied, "applied schema migrations");
    }

    let store_dyn: Arc<dyn Store> = store.clone();

    let publisher = Arc::new(EventPublisher::new(store_dyn.clone()));

    let notifier = Arc::new(
        WebhookNotifier::new(
            store_dyn.clone(),
            Duration::from_secs(config.webhook.timeout_seconds),
            config.webhook.max_retries,
        )
        .context("failed to build webhook notifier")?,
    );
    publisher.set_notifier(notifier.clone());

    let hub = Arc::new(ProjectHub::new());
    let hub_sink = hub.clone();
    publisher.set_ws_broadcast(Arc::new(move |project_id, message| {
        let hub = hub_sink.clone();
        Box::pin(async move {
            hub.broadcast(&project_id, message);
            Ok(())
        })
    }));

    let queue = Arc::new(TaskQueue::new(
        store_dyn.clone(),
        publisher.clone(),
        QueueConfig {
            max_concurrent: config.queue.max_concurrent_tasks,
            default_priority: config.queue.default_priority,
            max_retries: config.queue.max_retries,
        },
    ));
    queue
        .initialize()
        .await
        .context("failed to initialize task queue")?;

    let locks = LockManager::new(store_dyn.clone());
    let workspaces = WorkspaceManager::new(store_dyn.clone());
    let projects = ProjectManager::new(store_dyn, workspaces.clone());

    tracing::info!("orchestration core initialized");

    Ok(App {
        store,
        queue,
        publisher,
        locks,
        hub,
        notifier,
        workspaces,
        projects,
    })
}
