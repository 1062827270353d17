use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use maestro_core::error::Error;
use maestro_core::models::EventType;
use maestro_core::store::EventStore;
use maestro_core::{EventContext, EventPublisher};
use maestro_mocks::MockStore;

fn publisher_with_store() -> (EventPublisher, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    (EventPublisher::new(store.clone()), store)
}

#[tokio::test]
async fn publish_appends_to_durable_log() {
    let (publisher, store) = publisher_with_store();

    let event = publisher
        .publish(EventType::Created, "t-1", EventContext::default())
        .await
        .unwrap();
    assert_eq!(event.task_id, "t-1");
    assert_eq!(event.event_type, EventType::Created);

    let stored = store.get_task_events("t-1", 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, event.id);
}

#[tokio::test]
async fn handlers_receive_events() {
    let (publisher, _store) = publisher_with_store();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_handler = seen.clone();
    publisher.register_handler(
        "counter",
        Arc::new(move |_event_type, _task_id, _details| {
            let seen = seen_in_handler.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    );

    publisher
        .publish(EventType::Started, "t-1", EventContext::default())
        .await
        .unwrap();

    // Fan-out is asynchronous; poll briefly.
    for _ in 0..50 {
        if seen.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_handler_does_not_reach_publisher() {
    let (publisher, _store) = publisher_with_store();

    publisher.register_handler(
        "broken",
        Arc::new(|_event_type, _task_id, _details| {
            Box::pin(async { Err(Error::Validation("boom".into())) })
        }),
    );

    // The publish itself succeeds; the handler failure is only logged.
    publisher
        .publish(EventType::Completed, "t-1", EventContext::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn ws_sink_receives_project_scoped_events() {
    let (publisher, _store) = publisher_with_store();

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
    publisher.set_ws_broadcast(Arc::new(move |project_id, message| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send((project_id, message));
            Ok(())
        })
    }));

    // No project id: the sink must stay silent.
    publisher
        .publish(EventType::Created, "t-0", EventContext::default())
        .await
        .unwrap();

    publisher
        .publish(
            EventType::Completed,
            "t-1",
            EventContext {
                project_id: Some("p-1".to_string()),
                ..EventContext::default()
            },
        )
        .await
        .unwrap();

    let (project_id, message) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project_id, "p-1");
    assert_eq!(message["type"], "task_event");
    assert_eq!(message["event_type"], "completed");
    assert_eq!(message["task_id"], "t-1");

    // The projectless event never arrived.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unregistered_handler_stops_receiving() {
    let (publisher, _store) = publisher_with_store();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_handler = seen.clone();
    publisher.register_handler(
        "counter",
        Arc::new(move |_e, _t, _d| {
            let seen = seen_in_handler.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    );
    publisher.unregister_handler("counter");

    publisher
        .publish(EventType::Created, "t-1", EventContext::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failure_helper_records_error_detail() {
    let (publisher, store) = publisher_with_store();

    publisher
        .task_failed("t-1", "timeout talking to worker", EventContext::default())
        .await
        .unwrap();

    let events = store.get_task_events("t-1", 10).await.unwrap();
    assert_eq!(events[0].event_type, EventType::Failed);
    assert_eq!(
        events[0].details.get("error").and_then(|v| v.as_str()),
        Some("timeout talking to worker")
    );
}
