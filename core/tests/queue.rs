use std::sync::Arc;

use maestro_core::models::{EventType, NewTask, TaskStatus};
use maestro_core::queue::RECOVERED_FROM_RUNNING_KEY;
use maestro_core::store::{EventStore, TaskStore};
use maestro_core::{Error, EventPublisher, QueueConfig, TaskQueue};
use maestro_mocks::MockStore;

fn queue_with(config: QueueConfig) -> (Arc<TaskQueue>, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    let publisher = Arc::new(EventPublisher::new(store.clone()));
    (
        Arc::new(TaskQueue::new(store.clone(), publisher, config)),
        store,
    )
}

fn queue() -> (Arc<TaskQueue>, Arc<MockStore>) {
    queue_with(QueueConfig::default())
}

#[tokio::test]
async fn register_assigns_ids_and_persists() {
    let (queue, store) = queue();

    let ids = queue
        .register(vec![NewTask::new("build", "compute")])
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let task = store.get_task(&ids[0]).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 5);
    assert_eq!(task.version, 1);
}

#[tokio::test]
async fn register_applies_default_priority() {
    let (queue, store) = queue_with(QueueConfig {
        default_priority: 2,
        ..QueueConfig::default()
    });

    let ids = queue
        .register(vec![
            NewTask::new("defaulted", "compute"),
            NewTask::new("explicit", "compute").with_priority(7),
        ])
        .await
        .unwrap();

    assert_eq!(store.get_task(&ids[0]).await.unwrap().unwrap().priority, 2);
    assert_eq!(store.get_task(&ids[1]).await.unwrap().unwrap().priority, 7);
}

#[tokio::test]
async fn cycle_rejected_and_graph_preserved() {
    let (queue, store) = queue();

    queue
        .register(vec![NewTask::new("a", "compute").with_id("task-a")])
        .await
        .unwrap();
    queue
        .register(vec![NewTask::new("b", "compute")
            .with_id("task-b")
            .with_dependencies(vec!["task-a".to_string()])])
        .await
        .unwrap();

    // Re-registering a with a dependency on b closes the loop.
    let err = queue
        .register(vec![NewTask::new("a'", "compute")
            .with_id("task-a")
            .with_dependencies(vec!["task-b".to_string()])])
        .await
        .unwrap_err();
    assert!(err.is_cycle());

    // Only the original two tasks exist, and the chain still runs.
    assert_eq!(store.get_all_tasks().await.unwrap().len(), 2);
    let next = queue.get_next().await.unwrap().unwrap();
    assert_eq!(next.id, "task-a");
}

#[tokio::test]
async fn self_dependency_rejected_at_registration() {
    let (queue, store) = queue();

    let err = queue
        .register(vec![NewTask::new("selfish", "compute")
            .with_id("loop")
            .with_dependencies(vec!["loop".to_string()])])
        .await
        .unwrap_err();
    assert!(err.is_cycle());
    assert!(store.get_all_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn get_next_respects_priority_and_age() {
    let (queue, _store) = queue();

    queue
        .register(vec![NewTask::new("first", "compute").with_priority(5)])
        .await
        .unwrap();
    queue
        .register(vec![NewTask::new("second", "compute").with_priority(5)])
        .await
        .unwrap();
    queue
        .register(vec![NewTask::new("urgent", "compute").with_priority(1)])
        .await
        .unwrap();

    let first = queue.get_next().await.unwrap().unwrap();
    assert_eq!(first.name, "urgent");
    let second = queue.get_next().await.unwrap().unwrap();
    assert_eq!(second.name, "first");
    let third = queue.get_next().await.unwrap().unwrap();
    assert_eq!(third.name, "second");
}

#[tokio::test]
async fn get_next_marks_running_and_stamps_started_at() {
    let (queue, _store) = queue();

    queue
        .register(vec![NewTask::new("work", "compute")])
        .await
        .unwrap();

    let task = queue.get_next().await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert!(task.started_at.is_some());
    assert_eq!(queue.running_count().await, 1);
}

#[tokio::test]
async fn concurrency_cap_enforced() {
    let (queue, _store) = queue_with(QueueConfig {
        max_concurrent: 2,
        ..QueueConfig::default()
    });

    for i in 0..4 {
        queue
            .register(vec![NewTask::new(format!("t{i}"), "compute")])
            .await
            .unwrap();
    }

    assert!(queue.get_next().await.unwrap().is_some());
    assert!(queue.get_next().await.unwrap().is_some());
    // Cap of two reached.
    assert!(queue.get_next().await.unwrap().is_none());
    assert_eq!(queue.running_count().await, 2);
}

#[tokio::test]
async fn dependency_gate_holds_until_completion() {
    let (queue, _store) = queue();

    let ids = queue
        .register(vec![NewTask::new("a", "compute")])
        .await
        .unwrap();
    let a_id = ids[0].clone();
    queue
        .register(vec![
            NewTask::new("b", "compute").with_dependencies(vec![a_id.clone()])
        ])
        .await
        .unwrap();

    let first = queue.get_next().await.unwrap().unwrap();
    assert_eq!(first.id, a_id);
    // b is not ready while a runs.
    assert!(queue.get_next().await.unwrap().is_none());

    queue
        .complete(&a_id, Some(serde_json::json!({"ok": true})))
        .await
        .unwrap();

    let second = queue.get_next().await.unwrap().unwrap();
    assert_eq!(second.name, "b");
}

#[tokio::test]
async fn complete_frees_a_slot() {
    let (queue, _store) = queue_with(QueueConfig {
        max_concurrent: 1,
        ..QueueConfig::default()
    });

    let ids = queue
        .register(vec![
            NewTask::new("a", "compute"),
            NewTask::new("b", "compute"),
        ])
        .await
        .unwrap();

    let running = queue.get_next().await.unwrap().unwrap();
    assert!(queue.get_next().await.unwrap().is_none());

    queue.complete(&running.id, None).await.unwrap();
    assert_eq!(queue.running_count().await, 0);

    let next = queue.get_next().await.unwrap().unwrap();
    assert!(ids.contains(&next.id));
}

#[tokio::test]
async fn fail_requeues_within_retry_budget() {
    let (queue, _store) = queue_with(QueueConfig {
        max_retries: 2,
        ..QueueConfig::default()
    });

    let ids = queue
        .register(vec![NewTask::new("flaky", "compute")])
        .await
        .unwrap();
    let id = ids[0].clone();

    queue.get_next().await.unwrap().unwrap();
    let retried = queue.fail(&id, "transient", true).await.unwrap().unwrap();
    assert_eq!(retried.status, TaskStatus::Queued);
    assert_eq!(retried.retry_count, 1);

    // Eligible again.
    let again = queue.get_next().await.unwrap().unwrap();
    assert_eq!(again.id, id);

    let done = queue.complete(&id, None).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn fail_exhausted_is_terminal() {
    let (queue, _store) = queue_with(QueueConfig {
        max_retries: 1,
        ..QueueConfig::default()
    });

    let ids = queue
        .register(vec![NewTask::new("doomed", "compute")])
        .await
        .unwrap();
    let id = ids[0].clone();

    queue.get_next().await.unwrap().unwrap();
    queue.fail(&id, "once", true).await.unwrap();
    queue.get_next().await.unwrap().unwrap();
    let failed = queue.fail(&id, "twice", true).await.unwrap().unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("twice"));
    assert!(failed.completed_at.is_some());
    assert!(queue.get_next().await.unwrap().is_none());
}

#[tokio::test]
async fn failed_dependency_blocks_dependents() {
    let (queue, _store) = queue_with(QueueConfig {
        max_retries: 0,
        ..QueueConfig::default()
    });

    let ids = queue
        .register(vec![NewTask::new("a", "compute")])
        .await
        .unwrap();
    let a_id = ids[0].clone();
    queue
        .register(vec![
            NewTask::new("b", "compute").with_dependencies(vec![a_id.clone()])
        ])
        .await
        .unwrap();

    queue.get_next().await.unwrap().unwrap();
    queue.fail(&a_id, "fatal", true).await.unwrap();

    // b stays blocked forever; the queue never auto-cancels it.
    assert!(queue.get_next().await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_only_from_pending_or_queued() {
    let (queue, _store) = queue();

    let ids = queue
        .register(vec![NewTask::new("a", "compute")])
        .await
        .unwrap();
    let id = ids[0].clone();

    let running = queue.get_next().await.unwrap().unwrap();
    assert_eq!(running.id, id);

    let err = queue.cancel(&id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition(_, _)));

    queue.complete(&id, None).await.unwrap();

    let ids = queue
        .register(vec![NewTask::new("b", "compute")])
        .await
        .unwrap();
    let cancelled = queue.cancel(&ids[0]).await.unwrap().unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert!(queue.get_next().await.unwrap().is_none());
}

#[tokio::test]
async fn initialize_demotes_running_tasks() {
    let (queue, store) = queue();

    let ids = queue
        .register(vec![NewTask::new("orphan", "compute")])
        .await
        .unwrap();
    let id = ids[0].clone();
    queue.get_next().await.unwrap().unwrap();

    // Simulate a process restart with a fresh queue over the same store.
    let publisher = Arc::new(EventPublisher::new(store.clone()));
    let restarted = TaskQueue::new(store.clone(), publisher, QueueConfig::default());
    restarted.initialize().await.unwrap();

    let task = store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.metadata.contains_key(RECOVERED_FROM_RUNNING_KEY));
    // started_at from the first run survives the demotion.
    assert!(task.started_at.is_some());

    // The recovered task is schedulable again.
    let next = restarted.get_next().await.unwrap().unwrap();
    assert_eq!(next.id, id);
}

#[tokio::test]
async fn initialize_seeds_completed_set() {
    let (queue, store) = queue();

    let ids = queue
        .register(vec![NewTask::new("a", "compute")])
        .await
        .unwrap();
    let a_id = ids[0].clone();
    queue
        .register(vec![
            NewTask::new("b", "compute").with_dependencies(vec![a_id.clone()])
        ])
        .await
        .unwrap();

    queue.get_next().await.unwrap().unwrap();
    queue.complete(&a_id, None).await.unwrap();

    let publisher = Arc::new(EventPublisher::new(store.clone()));
    let restarted = TaskQueue::new(store.clone(), publisher, QueueConfig::default());
    restarted.initialize().await.unwrap();

    let next = restarted.get_next().await.unwrap().unwrap();
    assert_eq!(next.name, "b");
}

#[tokio::test]
async fn failed_dependency_still_blocks_after_restart() {
    let (queue, store) = queue_with(QueueConfig {
        max_retries: 0,
        ..QueueConfig::default()
    });

    let a_id = queue
        .register(vec![NewTask::new("a", "compute")])
        .await
        .unwrap()[0]
        .clone();
    queue
        .register(vec![
            NewTask::new("b", "compute").with_dependencies(vec![a_id.clone()])
        ])
        .await
        .unwrap();

    queue.get_next().await.unwrap().unwrap();
    queue.fail(&a_id, "fatal", true).await.unwrap();

    let publisher = Arc::new(EventPublisher::new(store.clone()));
    let restarted = TaskQueue::new(store.clone(), publisher, QueueConfig::default());
    restarted.initialize().await.unwrap();

    // The failed task blocks its dependent in the rebuilt graph too.
    assert!(restarted.get_next().await.unwrap().is_none());
}

#[tokio::test]
async fn lifecycle_events_follow_state_machine_order() {
    let (queue, store) = queue();

    let ids = queue
        .register(vec![NewTask::new("journey", "compute")])
        .await
        .unwrap();
    let id = ids[0].clone();

    queue.get_next().await.unwrap().unwrap();
    queue
        .complete(&id, Some(serde_json::json!({"ok": true})))
        .await
        .unwrap();

    // Most recent first in the log; reverse for the append order.
    let mut events = store.get_task_events(&id, 10).await.unwrap();
    events.reverse();
    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![EventType::Created, EventType::Started, EventType::Completed]
    );
}

#[tokio::test]
async fn execution_order_is_topological() {
    let (queue, _store) = queue();

    let ids = queue
        .register(vec![NewTask::new("a", "compute")])
        .await
        .unwrap();
    let a_id = ids[0].clone();
    let ids = queue
        .register(vec![
            NewTask::new("b", "compute").with_dependencies(vec![a_id.clone()])
        ])
        .await
        .unwrap();
    let b_id = ids[0].clone();

    let order = queue.execution_order().await.unwrap();
    let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
    assert!(pos(&a_id) < pos(&b_id));
}

#[tokio::test]
async fn stats_blend_store_and_scheduler() {
    let (queue, _store) = queue();

    queue
        .register(vec![
            NewTask::new("a", "compute"),
            NewTask::new("b", "index"),
        ])
        .await
        .unwrap();
    queue.get_next().await.unwrap().unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.tasks.total_tasks, 2);
    assert_eq!(stats.active_tasks, 1);
    assert_eq!(stats.max_concurrent, 5);
}
