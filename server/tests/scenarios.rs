//! End-to-end scenarios over the real SQLite store: the full path from
//! registration through scheduling, events and webhook fan-out.

use std::time::Duration;

use maestro_core::{
    models::{EventType, TaskStatus, WebhookService},
    store::{EventStore, ProjectStore, WebhookStore, WorkspaceStore},
    AcquireOptions, Error, NewTask,
};
use maestro_server::{initialize_app, App, Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

async fn test_app() -> App {
    let mut config = Config::default();
    config.database.url = Some(":memory:".to_string());
    config.queue.max_concurrent_tasks = 5;
    // Fast webhook attempts so failed deliveries do not slow tests down.
    config.webhook.timeout_seconds = 2;
    config.webhook.max_retries = 1;
    initialize_app(&config).await.unwrap()
}

/// Minimal HTTP fixture: accepts POSTs, hands each request body to the
/// test, responds 200.
async fn spawn_http_fixture() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handle_fixture_conn(socket, tx.clone()));
        }
    });

    (format!("http://{addr}/webhook"), rx)
}

async fn handle_fixture_conn(mut socket: tokio::net::TcpStream, tx: mpsc::UnboundedSender<String>) {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        match socket.read(&mut tmp).await {
            Ok(0) => return,
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = buf.windows(4).position(|window| window == b"\r\n\r\n") {
                    break pos + 4;
                }
            }
            Err(_) => return,
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        match socket.read(&mut tmp).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(_) => break,
        }
    }

    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    let _ = tx.send(body);
    let _ = socket
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
        .await;
    let _ = socket.shutdown().await;
}

async fn event_kinds(app: &App, task_id: &str) -> Vec<EventType> {
    // Fan-out is asynchronous but the durable append is not; still, give
    // the dispatcher a beat so late assertions about side effects hold.
    let mut events = app.store.get_task_events(task_id, 50).await.unwrap();
    events.reverse();
    events.iter().map(|event| event.event_type).collect()
}

// E1: linear chain A <- B.
#[tokio::test]
async fn linear_chain_runs_in_order() {
    let app = test_app().await;

    let a_ids = app
        .queue
        .register(vec![NewTask::new("A", "compute").with_priority(5)])
        .await
        .unwrap();
    let a_id = a_ids[0].clone();
    let b_ids = app
        .queue
        .register(vec![NewTask::new("B", "compute")
            .with_priority(5)
            .with_dependencies(vec![a_id.clone()])])
        .await
        .unwrap();
    let b_id = b_ids[0].clone();

    let first = app.queue.get_next().await.unwrap().unwrap();
    assert_eq!(first.id, a_id);
    assert_eq!(first.status, TaskStatus::Running);

    app.queue
        .complete(&a_id, Some(serde_json::json!({"ok": true})))
        .await
        .unwrap();

    let second = app.queue.get_next().await.unwrap().unwrap();
    assert_eq!(second.id, b_id);

    assert_eq!(
        event_kinds(&app, &a_id).await,
        vec![EventType::Created, EventType::Started, EventType::Completed]
    );
    assert_eq!(
        event_kinds(&app, &b_id).await,
        vec![EventType::Created, EventType::Started]
    );
}

// E2: equal priorities tie-break by registration time.
#[tokio::test]
async fn priority_ties_break_by_age() {
    let app = test_app().await;

    let a_id = app
        .queue
        .register(vec![NewTask::new("A", "compute").with_priority(5)])
        .await
        .unwrap()[0]
        .clone();
    let b_id = app
        .queue
        .register(vec![NewTask::new("B", "compute").with_priority(5)])
        .await
        .unwrap()[0]
        .clone();

    assert_eq!(app.queue.get_next().await.unwrap().unwrap().id, a_id);
    assert_eq!(app.queue.get_next().await.unwrap().unwrap().id, b_id);
}

// E3: transient failure, retry, success.
#[tokio::test]
async fn retry_then_success() {
    let app = test_app().await;

    let id = app
        .queue
        .register(vec![NewTask::new("T", "compute")])
        .await
        .unwrap()[0]
        .clone();

    let running = app.queue.get_next().await.unwrap().unwrap();
    assert_eq!(running.id, id);

    let retried = app
        .queue
        .fail(&id, "transient", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retried.status, TaskStatus::Queued);
    assert_eq!(retried.retry_count, 1);

    let rerun = app.queue.get_next().await.unwrap().unwrap();
    assert_eq!(rerun.id, id);
    assert_eq!(rerun.status, TaskStatus::Running);

    let done = app.queue.complete(&id, None).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
}

// E4: re-registration closing a cycle is rejected; the graph keeps the
// original tasks.
#[tokio::test]
async fn cycle_rejected_with_graph_intact() {
    let app = test_app().await;

    app.queue
        .register(vec![NewTask::new("A", "compute").with_id("task-a")])
        .await
        .unwrap();
    app.queue
        .register(vec![NewTask::new("B", "compute")
            .with_id("task-b")
            .with_dependencies(vec!["task-a".to_string()])])
        .await
        .unwrap();

    let err = app
        .queue
        .register(vec![NewTask::new("A-replacement", "compute")
            .with_id("task-a")
            .with_dependencies(vec!["task-b".to_string()])])
        .await
        .unwrap_err();
    assert!(err.is_cycle());

    // Only original A and B exist, and the chain still schedules.
    assert_eq!(app.queue.get_all_tasks().await.unwrap().len(), 2);
    assert_eq!(app.queue.get_next().await.unwrap().unwrap().id, "task-a");
}

// E5: lock contention with wait across a lease expiry.
#[tokio::test]
async fn lock_contention_with_wait() {
    let app = test_app().await;

    app.locks
        .acquire("task", "T-42", "holder-x", AcquireOptions::ttl(2))
        .await
        .unwrap();

    // A third party observes X's lock while the lease is live.
    let current = app.locks.get("task", "T-42").await.unwrap().unwrap();
    assert_eq!(current.holder_id, "holder-x");

    // Y outlives the 2s lease within its 5s budget.
    let lock = app
        .locks
        .acquire(
            "task",
            "T-42",
            "holder-y",
            AcquireOptions {
                wait: true,
                wait_timeout: Duration::from_secs(5),
                ..AcquireOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(lock.holder_id, "holder-y");
}

// E6: webhook fan-out honors the per-webhook event filter.
#[tokio::test]
async fn webhook_fanout_filter() {
    let app = test_app().await;
    let (url, mut requests) = spawn_http_fixture().await;

    app.store
        .create_workspace("ws-1", "Workspace W", None, Default::default())
        .await
        .unwrap();
    app.store
        .create_project("p-1", "ws-1", "Project P", "", Default::default())
        .await
        .unwrap();
    app.store
        .create_webhook(
            "wh-1",
            "ws-1",
            WebhookService::Slack,
            &url,
            Some(vec![EventType::Completed]),
        )
        .await
        .unwrap();

    let id = app
        .queue
        .register(vec![NewTask::new("Render report", "compute").with_project("p-1")])
        .await
        .unwrap()[0]
        .clone();

    // Registration and dequeue publish `created` and `started`; the
    // webhook subscribes to neither.
    app.queue.get_next().await.unwrap().unwrap();

    app.queue.complete(&id, None).await.unwrap();

    let body = tokio::time::timeout(Duration::from_secs(10), requests.recv())
        .await
        .expect("webhook request never arrived")
        .unwrap();
    assert!(body.contains("Render report"));
    assert!(body.contains(&id[..8.min(id.len())]));
    assert!(body.contains("Completed"));

    // Exactly one request: started/created were filtered out.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(requests.try_recv().is_err());
}

// Property 8: a restart reproduces the persisted state, modulo the
// documented running -> queued demotion.
#[tokio::test]
async fn restart_round_trip_preserves_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("maestro.sqlite").display());

    let mut config = Config::default();
    config.database.url = Some(url.clone());

    let (running_id, pending_id) = {
        let app = initialize_app(&config).await.unwrap();
        let running_id = app
            .queue
            .register(vec![NewTask::new("in flight", "compute")])
            .await
            .unwrap()[0]
            .clone();
        let pending_id = app
            .queue
            .register(vec![NewTask::new("waiting", "compute")
                .with_dependencies(vec![running_id.clone()])])
            .await
            .unwrap()[0]
            .clone();
        app.queue.get_next().await.unwrap().unwrap();
        (running_id, pending_id)
    };

    // Second process over the same database.
    let app = initialize_app(&config).await.unwrap();

    let recovered = app.queue.get_task(&running_id).await.unwrap().unwrap();
    assert_eq!(recovered.status, TaskStatus::Queued);
    assert!(recovered
        .metadata
        .contains_key(maestro_core::queue::RECOVERED_FROM_RUNNING_KEY));

    let waiting = app.queue.get_task(&pending_id).await.unwrap().unwrap();
    assert_eq!(waiting.status, TaskStatus::Pending);

    // The recovered task schedules first; its dependent follows.
    assert_eq!(app.queue.get_next().await.unwrap().unwrap().id, running_id);
    app.queue.complete(&running_id, None).await.unwrap();
    assert_eq!(app.queue.get_next().await.unwrap().unwrap().id, pending_id);
}

// Cancelling a running task is refused end-to-end.
#[tokio::test]
async fn cancel_running_rejected() {
    let app = test_app().await;

    let id = app
        .queue
        .register(vec![NewTask::new("T", "compute")])
        .await
        .unwrap()[0]
        .clone();
    app.queue.get_next().await.unwrap().unwrap();

    let err = app.queue.cancel(&id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition(_, _)));
    assert_eq!(
        app.queue.get_task(&id).await.unwrap().unwrap().status,
        TaskStatus::Running
    );
}
