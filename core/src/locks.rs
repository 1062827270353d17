use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    models::Lock,
    store::Store,
};

/// Default lease length when the caller does not specify one.
pub const DEFAULT_TTL_SECONDS: i64 = 300;
/// Hard ceiling on lease length; longer requests are clamped, not rejected.
pub const MAX_TTL_SECONDS: i64 = 3600;

/// Options for [`LockManager::acquire`].
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Lease TTL in seconds; clamped to `[0, MAX_TTL_SECONDS]`. `None`
    /// selects [`DEFAULT_TTL_SECONDS`].
    pub ttl_seconds: Option<i64>,
    /// Whether to poll for the lock instead of failing immediately.
    pub wait: bool,
    /// Wall-clock deadline for `wait = true`.
    pub wait_timeout: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            ttl_seconds: None,
            wait: false,
            wait_timeout: Duration::from_secs(30),
        }
    }
}

impl AcquireOptions {
    pub fn ttl(seconds: i64) -> Self {
        Self {
            ttl_seconds: Some(seconds),
            ..Self::default()
        }
    }

    pub fn waiting(timeout: Duration) -> Self {
        Self {
            wait: true,
            wait_timeout: timeout,
            ..Self::default()
        }
    }
}

/// Mediates exclusive access to application-defined resources via leased
/// locks.
///
/// The manager is stateless: every lock lives in the store, so any process
/// sharing the database observes the same leases. Expired rows are reaped
/// opportunistically on every read and write. Concurrent waiters poll with
/// exponential backoff; strict FIFO ordering is not guaranteed.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn Store>,
}

impl LockManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Acquire a lock on `(resource_type, resource_id)` for `holder_id`.
    ///
    /// # Errors
    /// `Error::AcquisitionFailed` if the resource is held by someone else
    /// and either `wait` is false or the wait deadline elapses.
    pub async fn acquire(
        &self,
        resource_type: &str,
        resource_id: &str,
        holder_id: &str,
        options: AcquireOptions,
    ) -> Result<Lock> {
        let ttl_seconds = options
            .ttl_seconds
            .unwrap_or(DEFAULT_TTL_SECONDS)
            .clamp(0, MAX_TTL_SECONDS);
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds);
        let lock_id = Uuid::new_v4().to_string();

        let lock = if options.wait {
            self.acquire_with_retry(
                &lock_id,
                resource_type,
                resource_id,
                holder_id,
                expires_at,
                options.wait_timeout,
            )
            .await?
        } else {
            self.store
                .acquire_lock(
                    &lock_id,
                    resource_type,
                    resource_id,
                    holder_id,
                    Some(expires_at),
                )
                .await?
        };

        match lock {
            Some(lock) => {
                tracing::info!(
                    lock_id = %lock.id,
                    resource_type = %resource_type,
                    resource_id = %resource_id,
                    holder_id = %holder_id,
                    ttl_seconds,
                    "lock acquired"
                );
                Ok(lock)
            }
            None => {
                let holder_info = match self.store.get_lock(resource_type, resource_id).await? {
                    Some(current) => format!(" (held by {})", current.holder_id),
                    None => String::new(),
                };
                Err(Error::AcquisitionFailed(format!(
                    "resource {resource_type}:{resource_id} is already locked{holder_info}"
                )))
            }
        }
    }

    /// Poll for the lock with exponential backoff (100ms doubling to a 1s
    /// cap) until the deadline.
    async fn acquire_with_retry(
        &self,
        lock_id: &str,
        resource_type: &str,
        resource_id: &str,
        holder_id: &str,
        expires_at: chrono::DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Option<Lock>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut retry_delay = Duration::from_millis(100);

        loop {
            let lock = self
                .store
                .acquire_lock(
                    lock_id,
                    resource_type,
                    resource_id,
                    holder_id,
                    Some(expires_at),
                )
                .await?;

            if lock.is_some() {
                return Ok(lock);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(retry_delay.min(deadline - now)).await;
            retry_delay = (retry_delay * 2).min(Duration::from_secs(1));
        }
    }

    /// Release a lock. Only the current holder may release.
    ///
    /// # Errors
    /// `Error::NotHeld` if the lock does not exist or is held by someone
    /// else.
    pub async fn release(&self, lock_id: &str, holder_id: &str) -> Result<()> {
        let released = self.store.release_lock(lock_id, holder_id).await?;

        if !released {
            return Err(Error::NotHeld(format!(
                "lock {lock_id} is not held by {holder_id}"
            )));
        }

        tracing::info!(lock_id = %lock_id, holder_id = %holder_id, "lock released");
        Ok(())
    }

    /// Extend a lease by releasing and reacquiring under the same lock id.
    ///
    /// A race is possible if the lease already expired: another holder may
    /// grab the resource between the release and the reacquire, which
    /// surfaces as `Error::AcquisitionFailed`.
    pub async fn extend(
        &self,
        lock_id: &str,
        holder_id: &str,
        additional_seconds: i64,
    ) -> Result<Lock> {
        let locks = self.store.get_active_locks(Some(holder_id)).await?;
        let lock = locks
            .into_iter()
            .find(|lock| lock.id == lock_id)
            .ok_or_else(|| {
                Error::NotHeld(format!("lock {lock_id} not found for holder {holder_id}"))
            })?;

        self.store.release_lock(lock_id, holder_id).await?;

        let new_expires = Utc::now() + chrono::Duration::seconds(additional_seconds);
        let new_lock = self
            .store
            .acquire_lock(
                lock_id,
                &lock.resource_type,
                &lock.resource_id,
                holder_id,
                Some(new_expires),
            )
            .await?
            .ok_or_else(|| {
                Error::AcquisitionFailed(format!(
                    "failed to extend lock {lock_id}: resource was grabbed by another holder"
                ))
            })?;

        tracing::info!(
            lock_id = %lock_id,
            holder_id = %holder_id,
            new_expires_at = %new_expires.to_rfc3339(),
            "lock extended"
        );

        Ok(new_lock)
    }

    /// Current lock on a resource, if any.
    pub async fn get(&self, resource_type: &str, resource_id: &str) -> Result<Option<Lock>> {
        self.store.get_lock(resource_type, resource_id).await
    }

    pub async fn is_locked(&self, resource_type: &str, resource_id: &str) -> Result<bool> {
        Ok(self.get(resource_type, resource_id).await?.is_some())
    }

    /// All live locks held by `holder_id`.
    pub async fn locks_by_holder(&self, holder_id: &str) -> Result<Vec<Lock>> {
        self.store.get_active_locks(Some(holder_id)).await
    }

    /// All live locks.
    pub async fn all_locks(&self) -> Result<Vec<Lock>> {
        self.store.get_active_locks(None).await
    }

    /// Acquire a lock and wrap it in a guard that releases on every exit
    /// path, including drops during error unwinding.
    pub async fn hold(
        &self,
        resource_type: &str,
        resource_id: &str,
        holder_id: &str,
        options: AcquireOptions,
    ) -> Result<LockGuard> {
        let lock = self
            .acquire(resource_type, resource_id, holder_id, options)
            .await?;

        Ok(LockGuard {
            store: self.store.clone(),
            lock,
            released: false,
        })
    }

    // Optimistic-locking counterpart to the leased locks above: callers
    // compare `Task::version` and bump it to implement compare-and-swap.

    /// Whether the task's stored version matches `expected_version`.
    pub async fn check_version(&self, task_id: &str, expected_version: i64) -> Result<bool> {
        Ok(self
            .store
            .get_task(task_id)
            .await?
            .map(|task| task.version == expected_version)
            .unwrap_or(false))
    }

    /// Increment the task's version, returning the new value.
    pub async fn increment_version(&self, task_id: &str) -> Result<i64> {
        self.store.update_task_version(task_id).await
    }
}

/// Scope tying a lease to a region of code.
///
/// Call [`LockGuard::release`] for an orderly release; if the guard is
/// dropped without one (early return, `?`, panic unwind), the release is
/// spawned onto the runtime. Either way an already-expired lease is a
/// silent no-op.
pub struct LockGuard {
    store: Arc<dyn Store>,
    lock: Lock,
    released: bool,
}

impl LockGuard {
    /// The held lock's snapshot.
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Release the lease now. Skips silently if the lease already expired
    /// or was reclaimed.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let removed = self
            .store
            .release_lock(&self.lock.id, &self.lock.holder_id)
            .await?;

        if !removed {
            tracing::warn!(
                lock_id = %self.lock.id,
                reason = "not_held",
                "lock release skipped"
            );
        }

        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = self.store.clone();
        let lock_id = self.lock.id.clone();
        let holder_id = self.lock.holder_id.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match store.release_lock(&lock_id, &holder_id).await {
                        Ok(true) => {}
                        Ok(false) => tracing::debug!(
                            lock_id = %lock_id,
                            "lock already expired before guard release"
                        ),
                        Err(err) => tracing::warn!(
                            lock_id = %lock_id,
                            error = %err,
                            "failed to release lock from guard"
                        ),
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    lock_id = %lock_id,
                    "lock guard dropped outside a runtime; lease left to expire"
                );
            }
        }
    }
}
