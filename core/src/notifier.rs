use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::{
    adapters::{DiscordAdapter, NotificationAdapter, SlackAdapter},
    error::Result,
    models::{EventType, JsonMap, Webhook, WebhookService},
    store::Store,
};

/// Default per-attempt HTTP timeout for webhook posts.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
/// Default delivery attempts per webhook.
pub const DEFAULT_WEBHOOK_MAX_RETRIES: u32 = 3;

/// Outcome of a [`WebhookNotifier::notify`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Fan-out was scheduled in the background. The correlation id appears
    /// in the delivery logs so callers can tell "dispatched" apart from
    /// "no webhooks registered".
    Background { correlation_id: String },
    /// Fan-out ran to completion; one success flag per webhook, in
    /// webhook order.
    Delivered(Vec<bool>),
}

/// Formats and posts per-event payloads to the webhooks registered for a
/// workspace, with bounded retry per webhook.
pub struct WebhookNotifier {
    store: Arc<dyn Store>,
    client: reqwest::Client,
    max_retries: u32,
}

impl WebhookNotifier {
    /// Build a notifier with its own HTTP client. `timeout` bounds each
    /// delivery attempt.
    pub fn new(store: Arc<dyn Store>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| crate::error::Error::Validation(format!("http client: {err}")))?;

        Ok(Self {
            store,
            client,
            max_retries,
        })
    }

    /// Deliver an event to every active, subscribed webhook of the
    /// workspace.
    ///
    /// With `background = true` the sends are spawned and the call returns
    /// immediately with a correlation id; otherwise it awaits every send
    /// and returns the per-webhook outcome list.
    #[allow(clippy::too_many_arguments)]
    pub async fn notify(
        &self,
        workspace_id: &str,
        event_type: EventType,
        task_id: &str,
        task_name: &str,
        project_name: Option<&str>,
        details: Option<JsonMap>,
        background: bool,
    ) -> Result<NotifyOutcome> {
        let webhooks = self
            .store
            .get_active_webhooks_for_event(workspace_id, event_type)
            .await?;

        if webhooks.is_empty() {
            tracing::debug!(
                workspace_id = %workspace_id,
                event_type = %event_type,
                "no webhooks subscribed to event"
            );
            return Ok(NotifyOutcome::Delivered(Vec::new()));
        }

        tracing::info!(
            workspace_id = %workspace_id,
            event_type = %event_type,
            webhook_count = webhooks.len(),
            "sending webhook notifications"
        );

        let details = details.unwrap_or_default();

        if background {
            let correlation_id = Uuid::new_v4().to_string();
            let sender = BackgroundSend {
                client: self.client.clone(),
                max_retries: self.max_retries,
                webhooks,
                event_type,
                task_id: task_id.to_string(),
                task_name: task_name.to_string(),
                project_name: project_name.map(|name| name.to_string()),
                details,
                correlation_id: correlation_id.clone(),
            };
            tokio::spawn(sender.run());
            return Ok(NotifyOutcome::Background { correlation_id });
        }

        let mut results = Vec::with_capacity(webhooks.len());
        for webhook in &webhooks {
            results.push(
                send_to_webhook(
                    &self.client,
                    self.max_retries,
                    webhook,
                    event_type,
                    task_id,
                    task_name,
                    project_name,
                    &details,
                )
                .await,
            );
        }

        Ok(NotifyOutcome::Delivered(results))
    }

    /// Send a synthetic `created` event to the webhook's configured URL.
    pub async fn test_webhook(&self, webhook: &Webhook) -> bool {
        let mut details = JsonMap::new();
        details.insert(
            "message".to_string(),
            serde_json::Value::String("This is a test notification from Maestro".to_string()),
        );

        send_to_webhook(
            &self.client,
            self.max_retries,
            webhook,
            EventType::Created,
            "test-task-id",
            "Test Notification",
            Some("Test Project"),
            &details,
        )
        .await
    }
}

struct BackgroundSend {
    client: reqwest::Client,
    max_retries: u32,
    webhooks: Vec<Webhook>,
    event_type: EventType,
    task_id: String,
    task_name: String,
    project_name: Option<String>,
    details: JsonMap,
    correlation_id: String,
}

impl BackgroundSend {
    async fn run(self) {
        let mut successes = 0usize;
        let mut failures = 0usize;

        for webhook in &self.webhooks {
            let sent = send_to_webhook(
                &self.client,
                self.max_retries,
                webhook,
                self.event_type,
                &self.task_id,
                &self.task_name,
                self.project_name.as_deref(),
                &self.details,
            )
            .await;
            if sent {
                successes += 1;
            } else {
                failures += 1;
            }
        }

        if failures > 0 {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                successes,
                failures,
                "background webhook fan-out partially failed"
            );
        } else {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                successes,
                "background webhook fan-out complete"
            );
        }
    }
}

fn create_adapter(
    service: WebhookService,
    url: &str,
    client: reqwest::Client,
    max_retries: u32,
) -> Box<dyn NotificationAdapter> {
    match service {
        WebhookService::Slack => Box::new(SlackAdapter::new(url, client, max_retries)),
        WebhookService::Discord => Box::new(DiscordAdapter::new(url, client, max_retries)),
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_to_webhook(
    client: &reqwest::Client,
    max_retries: u32,
    webhook: &Webhook,
    event_type: EventType,
    task_id: &str,
    task_name: &str,
    project_name: Option<&str>,
    details: &JsonMap,
) -> bool {
    let adapter = create_adapter(webhook.service, &webhook.url, client.clone(), max_retries);

    let sent = adapter
        .send_notification(event_type, task_id, task_name, project_name, details)
        .await;

    if sent {
        tracing::debug!(
            webhook_id = %webhook.id,
            service = %webhook.service,
            "webhook notification sent"
        );
    } else {
        tracing::warn!(
            webhook_id = %webhook.id,
            service = %webhook.service,
            "webhook notification failed"
        );
    }

    sent
}
