//! Outbound webhook adapters.
//!
//! Each delivery service shares the same capability surface: a cheap
//! health probe plus a formatted send. The notifier selects the adapter
//! from the webhook row; nothing else in the core touches these types.

mod discord;
mod slack;

pub use discord::DiscordAdapter;
pub use slack::SlackAdapter;

use async_trait::async_trait;

use crate::models::{EventType, JsonMap};

/// Capability surface shared by every webhook delivery service.
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    /// Whether the adapter is usable. Does not call the remote service.
    async fn health_check(&self) -> bool;

    /// Format and deliver one event notification. Returns whether the
    /// delivery eventually succeeded within the retry budget.
    async fn send_notification(
        &self,
        event_type: EventType,
        task_id: &str,
        task_name: &str,
        project_name: Option<&str>,
        details: &JsonMap,
    ) -> bool;
}

/// Emoji used by both services for each event kind.
pub(crate) fn event_emoji(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Created => "\u{1F195}",
        EventType::Started => "\u{25B6}\u{FE0F}",
        EventType::Completed => "\u{2705}",
        EventType::Failed => "\u{274C}",
        EventType::Cancelled => "\u{1F6AB}",
        EventType::Updated => "\u{270F}\u{FE0F}",
        EventType::Assigned => "\u{1F464}",
        EventType::Comment => "\u{1F4AC}",
    }
}

/// Accent color for each event kind, as a 24-bit RGB value.
pub(crate) fn event_color(event_type: EventType) -> u32 {
    match event_type {
        EventType::Created => 0x36A64F,
        EventType::Started => 0x2196F3,
        EventType::Completed => 0x4CAF50,
        EventType::Failed => 0xF44336,
        EventType::Cancelled => 0x9E9E9E,
        EventType::Updated => 0xFF9800,
        EventType::Assigned => 0x9C27B0,
        EventType::Comment => 0x00BCD4,
    }
}

/// Uppercase the first letter of an event name for display.
pub(crate) fn status_text(event_type: EventType) -> String {
    let name = event_type.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Compact preview of a detail value for message bodies.
pub(crate) fn preview(value: &serde_json::Value, max_len: usize) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.len() > max_len {
        let mut end = max_len;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    } else {
        text
    }
}
