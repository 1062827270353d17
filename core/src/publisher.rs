use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{EventType, JsonMap, TaskEvent},
    notifier::WebhookNotifier,
    store::Store,
};

/// Future returned by in-process event handlers and the WebSocket sink.
pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// In-process subscriber invoked for every published event.
pub type EventHandler = Arc<dyn Fn(EventType, String, JsonMap) -> DispatchFuture + Send + Sync>;

/// Message sink the WebSocket hub registers at startup. Called with the
/// target project id and the frame to broadcast.
pub type BroadcastFn = Arc<dyn Fn(String, Value) -> DispatchFuture + Send + Sync>;

/// How many fan-out jobs may sit behind the dispatcher before new ones
/// are dropped (and logged). Keeps background work bounded.
const FANOUT_QUEUE_CAPACITY: usize = 256;

/// Optional routing and attribution context for a published event.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub user_id: Option<String>,
    /// Enables webhook fan-out when present together with `task_name`.
    pub workspace_id: Option<String>,
    /// Enables WebSocket fan-out when present.
    pub project_id: Option<String>,
    pub task_name: Option<String>,
    pub project_name: Option<String>,
    pub details: Option<JsonMap>,
}

struct FanoutJob {
    event_type: EventType,
    task_id: String,
    workspace_id: Option<String>,
    project_id: Option<String>,
    task_name: Option<String>,
    project_name: Option<String>,
    details: JsonMap,
}

#[derive(Default)]
struct Registry {
    handlers: Mutex<HashMap<String, EventHandler>>,
    ws_broadcast: Mutex<Option<BroadcastFn>>,
    notifier: Mutex<Option<Arc<WebhookNotifier>>>,
}

/// Central choke-point for task lifecycle events.
///
/// `publish` synchronously appends the event to the durable log, then
/// hands fan-out (in-process handlers, WebSocket broadcast, webhook
/// notifications) to a single supervised dispatcher task behind a
/// fixed-capacity queue. A failure in any fan-out leg is logged and never
/// reaches the publishing caller; the event log is the authoritative
/// record.
pub struct EventPublisher {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    fanout_tx: mpsc::Sender<FanoutJob>,
}

impl EventPublisher {
    /// Create the publisher and spawn its fan-out dispatcher on the
    /// current runtime.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let registry = Arc::new(Registry::default());
        let (fanout_tx, fanout_rx) = mpsc::channel(FANOUT_QUEUE_CAPACITY);

        tokio::spawn(run_dispatcher(registry.clone(), fanout_rx));

        Self {
            store,
            registry,
            fanout_tx,
        }
    }

    /// Register a named in-process handler. A later registration under the
    /// same name replaces the earlier one.
    pub fn register_handler(&self, name: impl Into<String>, handler: EventHandler) {
        self.registry
            .handlers
            .lock()
            .expect("handler registry poisoned")
            .insert(name.into(), handler);
    }

    /// Remove a named handler. Unknown names are a no-op.
    pub fn unregister_handler(&self, name: &str) {
        self.registry
            .handlers
            .lock()
            .expect("handler registry poisoned")
            .remove(name);
    }

    /// Install the WebSocket broadcast sink. Installed once at startup by
    /// the composition root; the hub never references the publisher.
    pub fn set_ws_broadcast(&self, broadcast: BroadcastFn) {
        *self
            .registry
            .ws_broadcast
            .lock()
            .expect("broadcast slot poisoned") = Some(broadcast);
    }

    /// Install the webhook notifier.
    pub fn set_notifier(&self, notifier: Arc<WebhookNotifier>) {
        *self
            .registry
            .notifier
            .lock()
            .expect("notifier slot poisoned") = Some(notifier);
    }

    /// Publish an event: append it to the durable log, then enqueue the
    /// fan-out job.
    ///
    /// # Errors
    /// `Error::Storage` if the durable append fails; fan-out problems are
    /// logged, never returned.
    pub async fn publish(
        &self,
        event_type: EventType,
        task_id: &str,
        ctx: EventContext,
    ) -> Result<TaskEvent> {
        let event_id = Uuid::new_v4().to_string();
        let details = ctx.details.unwrap_or_default();

        let event = self
            .store
            .create_task_event(
                &event_id,
                task_id,
                event_type,
                ctx.user_id.as_deref(),
                details.clone(),
            )
            .await?;

        tracing::info!(
            event_id = %event_id,
            event_type = %event_type,
            task_id = %task_id,
            user_id = ?ctx.user_id,
            "event published"
        );

        let job = FanoutJob {
            event_type,
            task_id: task_id.to_string(),
            workspace_id: ctx.workspace_id,
            project_id: ctx.project_id,
            task_name: ctx.task_name,
            project_name: ctx.project_name,
            details,
        };

        if let Err(err) = self.fanout_tx.try_send(job) {
            tracing::warn!(
                event_id = %event_id,
                error = %err,
                "fan-out queue rejected job; event remains in the durable log"
            );
        }

        Ok(event)
    }

    // Convenience wrappers for the common lifecycle events.

    pub async fn task_created(&self, task_id: &str, ctx: EventContext) -> Result<TaskEvent> {
        self.publish(EventType::Created, task_id, ctx).await
    }

    pub async fn task_started(&self, task_id: &str, ctx: EventContext) -> Result<TaskEvent> {
        self.publish(EventType::Started, task_id, ctx).await
    }

    pub async fn task_completed(
        &self,
        task_id: &str,
        result: Option<Value>,
        mut ctx: EventContext,
    ) -> Result<TaskEvent> {
        if let Some(result) = result {
            let details = ctx.details.get_or_insert_with(JsonMap::new);
            details.insert("result".to_string(), result);
        }
        self.publish(EventType::Completed, task_id, ctx).await
    }

    pub async fn task_failed(
        &self,
        task_id: &str,
        error: &str,
        mut ctx: EventContext,
    ) -> Result<TaskEvent> {
        let details = ctx.details.get_or_insert_with(JsonMap::new);
        details.insert("error".to_string(), Value::String(error.to_string()));
        self.publish(EventType::Failed, task_id, ctx).await
    }

    pub async fn task_cancelled(&self, task_id: &str, ctx: EventContext) -> Result<TaskEvent> {
        self.publish(EventType::Cancelled, task_id, ctx).await
    }
}

/// Drains the fan-out queue. One job at a time: ordering within the queue
/// is preserved, and a slow webhook cannot spawn unbounded work.
async fn run_dispatcher(registry: Arc<Registry>, mut rx: mpsc::Receiver<FanoutJob>) {
    while let Some(job) = rx.recv().await {
        dispatch(&registry, job).await;
    }
    tracing::debug!("event fan-out dispatcher stopped");
}

async fn dispatch(registry: &Registry, job: FanoutJob) {
    // 1. In-process handlers.
    let handlers: Vec<(String, EventHandler)> = registry
        .handlers
        .lock()
        .expect("handler registry poisoned")
        .iter()
        .map(|(name, handler)| (name.clone(), handler.clone()))
        .collect();

    for (name, handler) in handlers {
        if let Err(err) = handler(job.event_type, job.task_id.clone(), job.details.clone()).await {
            tracing::error!(handler = %name, error = %err, "event handler failed");
        }
    }

    // 2. WebSocket broadcast, keyed by project.
    if let Some(project_id) = &job.project_id {
        let broadcast = registry
            .ws_broadcast
            .lock()
            .expect("broadcast slot poisoned")
            .clone();
        if let Some(broadcast) = broadcast {
            let message = json!({
                "type": "task_event",
                "event_type": job.event_type,
                "task_id": job.task_id,
                "details": Value::Object(job.details.clone()),
            });
            if let Err(err) = broadcast(project_id.clone(), message).await {
                tracing::error!(project_id = %project_id, error = %err, "ws broadcast failed");
            }
        }
    }

    // 3. Webhook notifications, keyed by workspace.
    if let (Some(workspace_id), Some(task_name)) = (&job.workspace_id, &job.task_name) {
        let notifier = registry
            .notifier
            .lock()
            .expect("notifier slot poisoned")
            .clone();
        if let Some(notifier) = notifier {
            // Already on the dispatcher; no second layer of background.
            let sent = notifier
                .notify(
                    workspace_id,
                    job.event_type,
                    &job.task_id,
                    task_name,
                    job.project_name.as_deref(),
                    Some(job.details.clone()),
                    false,
                )
                .await;
            if let Err(err) = sent {
                tracing::error!(workspace_id = %workspace_id, error = %err, "webhook fan-out failed");
            }
        }
    }
}
