use std::sync::Arc;
use std::time::Duration;

use maestro_core::models::{EventType, WebhookService};
use maestro_core::notifier::{DEFAULT_WEBHOOK_MAX_RETRIES, DEFAULT_WEBHOOK_TIMEOUT};
use maestro_core::store::WebhookStore;
use maestro_core::{NotifyOutcome, WebhookNotifier};
use maestro_mocks::MockStore;

#[tokio::test]
async fn no_webhooks_yields_empty_delivered() {
    let store = Arc::new(MockStore::new());
    let notifier = WebhookNotifier::new(store, DEFAULT_WEBHOOK_TIMEOUT, DEFAULT_WEBHOOK_MAX_RETRIES)
        .unwrap();

    let outcome = notifier
        .notify(
            "ws-1",
            EventType::Completed,
            "t-1",
            "Some task",
            None,
            None,
            false,
        )
        .await
        .unwrap();
    assert_eq!(outcome, NotifyOutcome::Delivered(Vec::new()));
}

#[tokio::test]
async fn background_returns_correlation_id() {
    let store = Arc::new(MockStore::new());
    store
        .create_webhook(
            "wh-1",
            "ws-1",
            WebhookService::Slack,
            // Unroutable address: delivery fails, scheduling still works.
            "http://127.0.0.1:9/webhook",
            Some(vec![EventType::Completed]),
        )
        .await
        .unwrap();

    let notifier = WebhookNotifier::new(store, Duration::from_millis(200), 1).unwrap();
    let outcome = notifier
        .notify(
            "ws-1",
            EventType::Completed,
            "t-1",
            "Some task",
            None,
            None,
            true,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, NotifyOutcome::Background { .. }));
}

#[tokio::test]
async fn unsubscribed_event_sends_nothing() {
    let store = Arc::new(MockStore::new());
    store
        .create_webhook(
            "wh-1",
            "ws-1",
            WebhookService::Slack,
            "http://127.0.0.1:9/webhook",
            Some(vec![EventType::Completed]),
        )
        .await
        .unwrap();

    let notifier = WebhookNotifier::new(store, Duration::from_millis(200), 1).unwrap();
    let outcome = notifier
        .notify(
            "ws-1",
            EventType::Started,
            "t-1",
            "Some task",
            None,
            None,
            false,
        )
        .await
        .unwrap();
    // The webhook only subscribes to `completed`.
    assert_eq!(outcome, NotifyOutcome::Delivered(Vec::new()));
}
