use std::sync::Arc;
use std::time::Duration;

use maestro_core::locks::MAX_TTL_SECONDS;
use maestro_core::store::TaskStore;
use maestro_core::{AcquireOptions, Error, LockManager};
use maestro_mocks::MockStore;

fn manager() -> LockManager {
    LockManager::new(Arc::new(MockStore::new()))
}

#[tokio::test]
async fn acquire_and_release() {
    let locks = manager();

    let lock = locks
        .acquire("task", "t-1", "alice", AcquireOptions::default())
        .await
        .unwrap();
    assert_eq!(lock.resource_type, "task");
    assert_eq!(lock.holder_id, "alice");
    assert!(lock.expires_at.is_some());

    assert!(locks.is_locked("task", "t-1").await.unwrap());
    locks.release(&lock.id, "alice").await.unwrap();
    assert!(!locks.is_locked("task", "t-1").await.unwrap());
}

#[tokio::test]
async fn second_acquire_fails_without_wait() {
    let locks = manager();

    locks
        .acquire("task", "t-1", "alice", AcquireOptions::default())
        .await
        .unwrap();

    let err = locks
        .acquire("task", "t-1", "bob", AcquireOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AcquisitionFailed(_)));
    assert!(format!("{err}").contains("alice"));
}

#[tokio::test]
async fn release_by_non_holder_rejected() {
    let locks = manager();

    let lock = locks
        .acquire("task", "t-1", "alice", AcquireOptions::default())
        .await
        .unwrap();

    let err = locks.release(&lock.id, "bob").await.unwrap_err();
    assert!(matches!(err, Error::NotHeld(_)));
    assert!(locks.is_locked("task", "t-1").await.unwrap());
}

#[tokio::test]
async fn waiter_succeeds_after_expiry() {
    let locks = manager();

    locks
        .acquire("task", "t-42", "x", AcquireOptions::ttl(1))
        .await
        .unwrap();

    // Visible to a reader while the lease is live.
    let current = locks.get("task", "t-42").await.unwrap().unwrap();
    assert_eq!(current.holder_id, "x");

    let lock = locks
        .acquire(
            "task",
            "t-42",
            "y",
            AcquireOptions {
                wait: true,
                wait_timeout: Duration::from_secs(5),
                ..AcquireOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(lock.holder_id, "y");
}

#[tokio::test]
async fn wait_times_out_under_live_lease() {
    let locks = manager();

    locks
        .acquire("task", "t-1", "alice", AcquireOptions::default())
        .await
        .unwrap();

    let err = locks
        .acquire(
            "task",
            "t-1",
            "bob",
            AcquireOptions {
                wait: true,
                wait_timeout: Duration::from_millis(300),
                ..AcquireOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AcquisitionFailed(_)));
}

#[tokio::test]
async fn ttl_clamped_to_ceiling() {
    let locks = manager();

    let lock = locks
        .acquire("task", "t-1", "alice", AcquireOptions::ttl(86_400))
        .await
        .unwrap();

    let lease = lock.expires_at.unwrap() - lock.acquired_at;
    assert!(lease <= chrono::Duration::seconds(MAX_TTL_SECONDS + 1));
}

#[tokio::test]
async fn extend_keeps_lock_id() {
    let locks = manager();

    let lock = locks
        .acquire("task", "t-1", "alice", AcquireOptions::ttl(60))
        .await
        .unwrap();

    let extended = locks.extend(&lock.id, "alice", 600).await.unwrap();
    assert_eq!(extended.id, lock.id);
    assert!(extended.expires_at.unwrap() > lock.expires_at.unwrap());
}

#[tokio::test]
async fn extend_by_non_holder_rejected() {
    let locks = manager();

    let lock = locks
        .acquire("task", "t-1", "alice", AcquireOptions::default())
        .await
        .unwrap();

    let err = locks.extend(&lock.id, "bob", 600).await.unwrap_err();
    assert!(matches!(err, Error::NotHeld(_)));
}

#[tokio::test]
async fn guard_releases_on_explicit_release() {
    let locks = manager();

    let guard = locks
        .hold("task", "t-1", "alice", AcquireOptions::default())
        .await
        .unwrap();
    assert!(locks.is_locked("task", "t-1").await.unwrap());

    guard.release().await.unwrap();
    assert!(!locks.is_locked("task", "t-1").await.unwrap());
}

#[tokio::test]
async fn guard_releases_on_drop() {
    let locks = manager();

    {
        let _guard = locks
            .hold("task", "t-1", "alice", AcquireOptions::default())
            .await
            .unwrap();
        assert!(locks.is_locked("task", "t-1").await.unwrap());
    }

    // Drop schedules the release on the runtime; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!locks.is_locked("task", "t-1").await.unwrap());
}

#[tokio::test]
async fn version_check_and_increment() {
    let store = Arc::new(MockStore::new());
    let locks = LockManager::new(store.clone());

    let task = maestro_mocks::sample_task("t-1");
    store.save_task(&task).await.unwrap();

    assert!(locks.check_version("t-1", 1).await.unwrap());
    assert_eq!(locks.increment_version("t-1").await.unwrap(), 2);
    assert!(!locks.check_version("t-1", 1).await.unwrap());
    assert!(locks.check_version("t-1", 2).await.unwrap());
}
