use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    graph::DependencyGraph,
    models::{NewTask, Task, TaskStatus},
    publisher::{EventContext, EventPublisher},
    store::{Store, TaskStats},
};

/// Metadata key stamped on tasks found `running` at startup and demoted
/// back to `queued` (the previous process died mid-execution).
pub const RECOVERED_FROM_RUNNING_KEY: &str = "recovered_from_running_at";

/// Scheduling knobs for the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Ceiling on simultaneously running tasks.
    pub max_concurrent: usize,
    /// Priority assigned to registrations that do not specify one.
    pub default_priority: i64,
    /// Retry budget for failing tasks.
    pub max_retries: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            default_priority: 5,
            max_retries: 3,
        }
    }
}

/// Queue counters blending store aggregates with scheduler state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub tasks: TaskStats,
    pub queue_depth: usize,
    pub active_tasks: usize,
    pub max_concurrent: usize,
    pub ready_tasks: usize,
}

struct QueueState {
    graph: DependencyGraph,
    running_count: usize,
}

/// Priority task queue with dependency awareness.
///
/// Binds the dependency graph and the store into the orchestration
/// engine: registration, dequeue under the concurrency cap, completion,
/// retry, cancellation. One internal mutex serializes every mutating
/// operation so the `running_count` and state-transition invariants hold;
/// read-only calls go straight to the store.
pub struct TaskQueue {
    store: Arc<dyn Store>,
    publisher: Arc<EventPublisher>,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn Store>, publisher: Arc<EventPublisher>, config: QueueConfig) -> Self {
        Self {
            store,
            publisher,
            config,
            state: Mutex::new(QueueState {
                graph: DependencyGraph::new(),
                running_count: 0,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Rebuild scheduler state from the store.
    ///
    /// Non-terminal tasks rejoin the graph (cycles are logged and
    /// skipped); tasks found `running` are demoted to `queued` and
    /// stamped with [`RECOVERED_FROM_RUNNING_KEY`]; completed ids seed
    /// the graph's completed set so surviving dependents can become
    /// ready.
    pub async fn initialize(&self) -> Result<()> {
        let tasks = self.store.get_all_tasks().await?;
        let task_count = tasks.len();
        let mut state = self.state.lock().await;

        for task in tasks {
            match task.status {
                TaskStatus::Pending | TaskStatus::Queued => {
                    if let Err(err) = state.graph.add(&task) {
                        tracing::error!(task_id = %task.id, error = %err, "cycle detected loading task");
                    }
                }
                TaskStatus::Running => {
                    let recovered = self.demote_recovered(&task).await?;
                    if let Err(err) = state.graph.add(&recovered) {
                        tracing::error!(task_id = %recovered.id, error = %err, "cycle detected loading task");
                    }
                }
                TaskStatus::Completed => {
                    state.graph.mark_complete(&task.id);
                }
                // Failed tasks rejoin the graph as blockers: their
                // dependents must stay un-ready across restarts.
                TaskStatus::Failed => {
                    if let Err(err) = state.graph.add(&task) {
                        tracing::error!(task_id = %task.id, error = %err, "cycle detected loading task");
                    }
                }
                TaskStatus::Cancelled => {}
            }
        }

        tracing::info!(
            task_count,
            graph_stats = ?state.graph.stats(),
            "task queue initialized"
        );

        Ok(())
    }

    async fn demote_recovered(&self, task: &Task) -> Result<Task> {
        tracing::warn!(
            task_id = %task.id,
            "task found running at startup; demoting to queued"
        );

        let mut demoted = self
            .store
            .update_task_status(&task.id, TaskStatus::Queued, None, None)
            .await?
            .ok_or_else(|| Error::task_not_found(&task.id))?;

        demoted.metadata.insert(
            RECOVERED_FROM_RUNNING_KEY.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        self.store.save_task(&demoted).await?;

        Ok(demoted)
    }

    /// Register a batch of tasks, returning their assigned ids.
    ///
    /// The whole batch is admitted into the graph before anything is
    /// persisted, so callers get a synchronous `Error::Cycle` and the
    /// graph is left untouched on rejection.
    pub async fn register(&self, creates: Vec<NewTask>) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;

        let mut tasks: Vec<Task> = Vec::with_capacity(creates.len());
        for create in creates {
            if create.name.trim().is_empty() {
                return Err(Error::empty_field("name"));
            }
            if create.service.trim().is_empty() {
                return Err(Error::empty_field("service"));
            }

            tasks.push(Task {
                id: create
                    .id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                project_id: create.project_id,
                name: create.name,
                description: create.description,
                service: create.service,
                payload: create.payload,
                priority: create.priority.unwrap_or(self.config.default_priority),
                status: TaskStatus::Pending,
                dependencies: create.dependencies,
                metadata: create.metadata,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                result: None,
                error: None,
                retry_count: 0,
                version: 1,
                created_by: create.created_by,
            });
        }

        // Admission pass: validate the whole batch against the graph.
        let mut admitted: Vec<&Task> = Vec::with_capacity(tasks.len());
        for task in &tasks {
            if let Err(err) = state.graph.add(task) {
                for rollback in admitted {
                    state.graph.remove(&rollback.id);
                }
                return Err(err);
            }
            admitted.push(task);
        }

        // Persistence pass.
        for (index, task) in tasks.iter().enumerate() {
            if let Err(err) = self.store.save_task(task).await {
                // Withdraw everything that will not make it to the store.
                for unpersisted in &tasks[index..] {
                    state.graph.remove(&unpersisted.id);
                }
                return Err(err);
            }

            tracing::info!(
                task_id = %task.id,
                name = %task.name,
                service = %task.service,
                "task registered"
            );
        }

        let mut task_ids = Vec::with_capacity(tasks.len());
        for task in &tasks {
            self.emit(task, QueueEvent::Created).await;
            task_ids.push(task.id.clone());
        }

        Ok(task_ids)
    }

    /// Dequeue the next ready task, marking it running.
    ///
    /// Returns `Ok(None)` when the concurrency cap is reached or nothing
    /// is ready.
    pub async fn get_next(&self) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;

        if state.running_count >= self.config.max_concurrent {
            return Ok(None);
        }

        let ready = state.graph.ready();
        let Some(task) = ready
            .into_iter()
            .find(|task| task.status.can_transition_to(TaskStatus::Running))
        else {
            return Ok(None);
        };

        let updated = self
            .store
            .update_task_status(&task.id, TaskStatus::Running, None, None)
            .await?
            .ok_or_else(|| Error::task_not_found(&task.id))?;

        state.graph.update_status(&task.id, TaskStatus::Running);
        state.running_count += 1;

        tracing::info!(
            task_id = %updated.id,
            name = %updated.name,
            running_count = state.running_count,
            "task dequeued"
        );

        self.emit(&updated, QueueEvent::Started).await;

        Ok(Some(updated))
    }

    /// Mark a task completed, unblocking its dependents.
    pub async fn complete(&self, task_id: &str, result: Option<Value>) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;

        let Some(task) = self.store.get_task(task_id).await? else {
            tracing::warn!(task_id = %task_id, "task not found for completion");
            return Ok(None);
        };

        if !task.status.can_transition_to(TaskStatus::Completed) {
            tracing::warn!(
                task_id = %task_id,
                status = %task.status,
                "completing a task that is not running"
            );
        }

        let updated = self
            .store
            .update_task_status(task_id, TaskStatus::Completed, result.clone(), None)
            .await?;

        state.graph.mark_complete(task_id);
        state.graph.update_status(task_id, TaskStatus::Completed);
        state.running_count = state.running_count.saturating_sub(1);

        tracing::info!(
            task_id = %task_id,
            running_count = state.running_count,
            "task completed"
        );

        if let Some(ref updated) = updated {
            self.emit(updated, QueueEvent::Completed(result)).await;
        }

        Ok(updated)
    }

    /// Record a task failure.
    ///
    /// While the retry budget lasts (and `retry` is true) the task goes
    /// back to `queued` and becomes eligible again; otherwise it moves to
    /// terminal `failed`. Dependents of a terminally failed task are left
    /// pending forever; callers may cancel them explicitly.
    pub async fn fail(&self, task_id: &str, error: &str, retry: bool) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;

        let Some(mut task) = self.store.get_task(task_id).await? else {
            tracing::warn!(task_id = %task_id, "task not found for failure");
            return Ok(None);
        };

        state.running_count = state.running_count.saturating_sub(1);

        if retry && task.retry_count < self.config.max_retries {
            if !task.status.can_transition_to(TaskStatus::Queued) {
                tracing::warn!(
                    task_id = %task_id,
                    status = %task.status,
                    "requeueing a task that is not running"
                );
            }
            task.retry_count += 1;
            task.status = TaskStatus::Queued;
            self.store.save_task(&task).await?;
            state.graph.update_status(task_id, TaskStatus::Queued);

            tracing::info!(
                task_id = %task_id,
                retry_count = task.retry_count,
                max_retries = self.config.max_retries,
                "task queued for retry"
            );

            return Ok(Some(task));
        }

        let updated = self
            .store
            .update_task_status(task_id, TaskStatus::Failed, None, Some(error.to_string()))
            .await?;
        state.graph.update_status(task_id, TaskStatus::Failed);

        tracing::error!(task_id = %task_id, error = %error, "task failed");

        if let Some(ref updated) = updated {
            self.emit(updated, QueueEvent::Failed(error.to_string()))
                .await;
        }

        Ok(updated)
    }

    /// Cancel a pending or queued task.
    ///
    /// # Errors
    /// `Error::InvalidTransition` for running or terminal tasks; the
    /// queue never interrupts in-flight work.
    pub async fn cancel(&self, task_id: &str) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;

        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };

        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            tracing::warn!(
                task_id = %task_id,
                status = %task.status,
                "cannot cancel task in this state"
            );
            return Err(Error::invalid_transition(
                task.status,
                TaskStatus::Cancelled,
            ));
        }

        let updated = self
            .store
            .update_task_status(task_id, TaskStatus::Cancelled, None, None)
            .await?;
        state.graph.remove(task_id);

        tracing::info!(task_id = %task_id, "task cancelled");

        if let Some(ref updated) = updated {
            self.emit(updated, QueueEvent::Cancelled).await;
        }

        Ok(updated)
    }

    /// Read a task snapshot. Bypasses the queue mutex.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.store.get_task(task_id).await
    }

    /// All tasks, most recent first. Bypasses the queue mutex.
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        self.store.get_all_tasks().await
    }

    /// Planned execution order of the contained tasks.
    pub async fn execution_order(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        state.graph.topo_sort()
    }

    /// Ids of tasks that directly depend on the given one.
    pub async fn dependents_of(&self, task_id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state.graph.dependents_of(task_id).into_iter().collect()
    }

    /// Number of tasks waiting to execute.
    pub async fn queue_depth(&self) -> usize {
        let state = self.state.lock().await;
        state.graph.stats().pending_tasks
    }

    /// Number of currently running tasks.
    pub async fn running_count(&self) -> usize {
        let state = self.state.lock().await;
        state.running_count
    }

    /// Aggregate queue statistics.
    pub async fn stats(&self) -> Result<QueueStats> {
        let tasks = self.store.task_stats().await?;
        let state = self.state.lock().await;
        let graph_stats = state.graph.stats();

        Ok(QueueStats {
            tasks,
            queue_depth: graph_stats.pending_tasks,
            active_tasks: state.running_count,
            max_concurrent: self.config.max_concurrent,
            ready_tasks: graph_stats.ready_tasks,
        })
    }

    /// Publish a lifecycle event for a transition that just happened.
    ///
    /// Event logging is subordinate to the state change: a publish
    /// failure is logged and swallowed so the transition's outcome still
    /// reaches the caller.
    async fn emit(&self, task: &Task, event: QueueEvent) {
        let mut ctx = EventContext {
            user_id: task.created_by.clone(),
            project_id: task.project_id.clone(),
            task_name: Some(task.name.clone()),
            ..EventContext::default()
        };

        // Resolve the owning workspace for webhook routing.
        if let Some(project_id) = &task.project_id {
            match self.store.get_project(project_id).await {
                Ok(Some(project)) => {
                    ctx.workspace_id = Some(project.workspace_id);
                    ctx.project_name = Some(project.name);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        task_id = %task.id,
                        project_id = %project_id,
                        error = %err,
                        "failed to resolve project for event routing"
                    );
                }
            }
        }

        let outcome = match event {
            QueueEvent::Created => self.publisher.task_created(&task.id, ctx).await,
            QueueEvent::Started => self.publisher.task_started(&task.id, ctx).await,
            QueueEvent::Completed(result) => {
                self.publisher.task_completed(&task.id, result, ctx).await
            }
            QueueEvent::Failed(error) => self.publisher.task_failed(&task.id, &error, ctx).await,
            QueueEvent::Cancelled => self.publisher.task_cancelled(&task.id, ctx).await,
        };

        if let Err(err) = outcome {
            tracing::error!(task_id = %task.id, error = %err, "failed to publish lifecycle event");
        }
    }
}

enum QueueEvent {
    Created,
    Started,
    Completed(Option<Value>),
    Failed(String),
    Cancelled,
}
