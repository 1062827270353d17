use async_trait::async_trait;
use serde_json::{json, Value};

use super::{event_color, event_emoji, preview, status_text, NotificationAdapter};
use crate::models::{EventType, JsonMap};

/// Sends task notifications to a Discord webhook, formatted as embeds.
pub struct DiscordAdapter {
    webhook_url: String,
    client: reqwest::Client,
    max_retries: u32,
    bot_name: String,
}

impl DiscordAdapter {
    pub fn new(webhook_url: impl Into<String>, client: reqwest::Client, max_retries: u32) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client,
            max_retries,
            bot_name: "Maestro".to_string(),
        }
    }

    pub fn with_bot_name(mut self, bot_name: impl Into<String>) -> Self {
        self.bot_name = bot_name.into();
        self
    }

    async fn post_payload(&self, payload: &Value) -> bool {
        for attempt in 1..=self.max_retries {
            let outcome = self
                .client
                .post(&self.webhook_url)
                .json(payload)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            match outcome {
                Ok(response) => {
                    tracing::debug!(
                        status = %response.status(),
                        "discord notification sent"
                    );
                    return true;
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "discord notification failed"
                    );
                    if attempt == self.max_retries {
                        tracing::error!(error = %err, "discord notification retries exhausted");
                    }
                }
            }
        }

        false
    }

    fn format_message(
        &self,
        event_type: EventType,
        task_id: &str,
        task_name: &str,
        project_name: Option<&str>,
        details: &JsonMap,
    ) -> Value {
        let emoji = event_emoji(event_type);
        let status = status_text(event_type);
        let short_id: String = task_id.chars().take(8).collect();

        let mut fields = vec![
            json!({"name": "Task", "value": task_name, "inline": true}),
            json!({"name": "ID", "value": format!("`{short_id}...`"), "inline": true}),
        ];

        if let Some(name) = project_name {
            fields.push(json!({"name": "Project", "value": name, "inline": true}));
        }

        if let Some(error) = details.get("error") {
            fields.push(json!({
                "name": "Error",
                "value": format!("```{}```", preview(error, 200)),
                "inline": false,
            }));
        }
        if let Some(result) = details.get("result") {
            fields.push(json!({
                "name": "Result",
                "value": preview(result, 200),
                "inline": false,
            }));
        }
        if let Some(user) = details.get("user") {
            fields.push(json!({"name": "By", "value": preview(user, 100), "inline": true}));
        }

        json!({
            "username": self.bot_name,
            "embeds": [{
                "title": format!("{emoji} Task {status}"),
                "color": event_color(event_type),
                "fields": fields,
                "footer": {"text": "Maestro Task Orchestrator"},
            }],
        })
    }
}

#[async_trait]
impl NotificationAdapter for DiscordAdapter {
    async fn health_check(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    async fn send_notification(
        &self,
        event_type: EventType,
        task_id: &str,
        task_name: &str,
        project_name: Option<&str>,
        details: &JsonMap,
    ) -> bool {
        let payload = self.format_message(event_type, task_id, task_name, project_name, details);
        self.post_payload(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_carries_task_identity() {
        let adapter =
            DiscordAdapter::new("https://discord.test/api/webhooks/1", reqwest::Client::new(), 3);
        let payload = adapter.format_message(
            EventType::Failed,
            "7f3b9c1d-aaaa-bbbb-cccc-ddddeeeeffff",
            "Index corpus",
            Some("Search"),
            &{
                let mut details = JsonMap::new();
                details.insert("error".to_string(), Value::String("disk full".to_string()));
                details
            },
        );

        assert_eq!(payload["username"], "Maestro");
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "\u{274C} Task Failed");
        let text = payload.to_string();
        assert!(text.contains("Index corpus"));
        assert!(text.contains("7f3b9c1d"));
        assert!(text.contains("disk full"));
        assert!(text.contains("Search"));
    }
}
