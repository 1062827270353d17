use async_trait::async_trait;
use serde_json::{json, Value};

use super::{event_color, event_emoji, preview, status_text, NotificationAdapter};
use crate::models::{EventType, JsonMap};

/// Sends task notifications to a Slack incoming webhook, formatted as
/// attachment blocks.
pub struct SlackAdapter {
    webhook_url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl SlackAdapter {
    pub fn new(webhook_url: impl Into<String>, client: reqwest::Client, max_retries: u32) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client,
            max_retries,
        }
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
                        "slack notification sent"
                    );
                    return true;
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "slack notification failed"
                    );
                    if attempt == self.max_retries {
                        tracing::error!(error = %err, "slack notification retries exhausted");
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
        let color = format!("#{:06X}", event_color(event_type));
        let status = status_text(event_type);

        let location = match project_name {
            Some(name) => format!("in *{name}*"),
            None => String::new(),
        };
        let short_id: String = task_id.chars().take(8).collect();

        let mut blocks = vec![
            json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("{emoji} *Task {status}* {location}"),
                },
            }),
            json!({
                "type": "section",
                "fields": [
                    {"type": "mrkdwn", "text": format!("*Task:*\n{task_name}")},
                    {"type": "mrkdwn", "text": format!("*ID:*\n`{short_id}...`")},
                ],
            }),
        ];

        let mut detail_lines: Vec<String> = Vec::new();
        if let Some(error) = details.get("error") {
            detail_lines.push(format!("*Error:* {}", preview(error, 200)));
        }
        if let Some(result) = details.get("result") {
            detail_lines.push(format!("*Result:* {}", preview(result, 100)));
        }
        if let Some(user) = details.get("user") {
            detail_lines.push(format!("*By:* {}", preview(user, 100)));
        }
        if !detail_lines.is_empty() {
            blocks.push(json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": detail_lines.join("\n")},
            }));
        }

        json!({
            "attachments": [
                {"color": color, "blocks": blocks}
            ]
        })
    }
}

#[async_trait]
impl NotificationAdapter for SlackAdapter {
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
