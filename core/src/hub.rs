use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Handle identifying one client connection inside the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Default)]
struct HubState {
    /// project id -> connections subscribed to it.
    subscriptions: HashMap<String, HashSet<ConnectionId>>,
    /// connection -> outbound frame sender owned by the transport pump.
    senders: HashMap<ConnectionId, mpsc::UnboundedSender<String>>,
}

/// In-process fan-out table for real-time project updates.
///
/// The hub never touches sockets: the transport registers a connection,
/// pumps the returned receiver to the wire, and feeds inbound text frames
/// to [`ProjectHub::handle_client_message`]. Broadcasts serialize the
/// frame once and drop connections whose receiver has gone away. The hub
/// does not buffer per client beyond the channel; no replay is provided.
#[derive(Default)]
pub struct ProjectHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl ProjectHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection subscribed to `project_id`.
    ///
    /// The returned receiver yields serialized frames, starting with the
    /// `connected` greeting.
    pub fn connect(&self, project_id: &str) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let conn_id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        let total = {
            let mut state = self.state.lock().expect("hub state poisoned");
            state.senders.insert(conn_id, tx.clone());
            let subscribers = state
                .subscriptions
                .entry(project_id.to_string())
                .or_default();
            subscribers.insert(conn_id);
            subscribers.len()
        };

        let greeting = json!({
            "type": "connected",
            "project_id": project_id,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let _ = tx.send(greeting.to_string());

        tracing::info!(
            connection = %conn_id,
            project_id = %project_id,
            total_connections = total,
            "websocket connected"
        );

        (conn_id, rx)
    }

    /// Subscribe an existing connection to an additional project.
    pub fn subscribe(&self, conn_id: ConnectionId, project_id: &str) -> bool {
        let mut state = self.state.lock().expect("hub state poisoned");
        if !state.senders.contains_key(&conn_id) {
            return false;
        }
        state
            .subscriptions
            .entry(project_id.to_string())
            .or_default()
            .insert(conn_id);
        true
    }

    /// Remove a connection from one project's set, dropping the set when
    /// it empties.
    pub fn disconnect(&self, conn_id: ConnectionId, project_id: &str) {
        let remaining = {
            let mut state = self.state.lock().expect("hub state poisoned");
            if let Some(subscribers) = state.subscriptions.get_mut(project_id) {
                subscribers.remove(&conn_id);
                if subscribers.is_empty() {
                    state.subscriptions.remove(project_id);
                }
            }
            let still_subscribed = state
                .subscriptions
                .values()
                .any(|subscribers| subscribers.contains(&conn_id));
            if !still_subscribed {
                state.senders.remove(&conn_id);
            }
            state
                .subscriptions
                .get(project_id)
                .map(|subscribers| subscribers.len())
                .unwrap_or(0)
        };

        tracing::info!(
            connection = %conn_id,
            project_id = %project_id,
            remaining_connections = remaining,
            "websocket disconnected"
        );
    }

    /// Drop a connection from every project it subscribes to.
    pub fn drop_connection(&self, conn_id: ConnectionId) {
        let mut state = self.state.lock().expect("hub state poisoned");
        state.senders.remove(&conn_id);
        state.subscriptions.retain(|_, subscribers| {
            subscribers.remove(&conn_id);
            !subscribers.is_empty()
        });
    }

    /// Broadcast a message to every connection subscribed to the project.
    ///
    /// Stamps a fresh `timestamp`, serializes once, and purges connections
    /// whose transport pump has gone away.
    pub fn broadcast(&self, project_id: &str, mut message: Value) {
        let targets: Vec<(ConnectionId, mpsc::UnboundedSender<String>)> = {
            let state = self.state.lock().expect("hub state poisoned");
            match state.subscriptions.get(project_id) {
                Some(subscribers) => subscribers
                    .iter()
                    .filter_map(|conn_id| {
                        state
                            .senders
                            .get(conn_id)
                            .map(|tx| (*conn_id, tx.clone()))
                    })
                    .collect(),
                None => return,
            }
        };

        if targets.is_empty() {
            return;
        }

        if let Some(object) = message.as_object_mut() {
            object.insert(
                "timestamp".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        let frame = message.to_string();

        let mut failed: Vec<ConnectionId> = Vec::new();
        for (conn_id, tx) in &targets {
            if tx.send(frame.clone()).is_err() {
                tracing::warn!(
                    connection = %conn_id,
                    project_id = %project_id,
                    "websocket send failed"
                );
                failed.push(*conn_id);
            }
        }

        if !failed.is_empty() {
            let mut state = self.state.lock().expect("hub state poisoned");
            for conn_id in &failed {
                state.senders.remove(conn_id);
                state.subscriptions.retain(|_, subscribers| {
                    subscribers.remove(conn_id);
                    !subscribers.is_empty()
                });
            }
        }

        tracing::debug!(
            project_id = %project_id,
            sent_count = targets.len() - failed.len(),
            failed_count = failed.len(),
            "websocket broadcast complete"
        );
    }

    /// Broadcast a message to every connected client.
    pub fn broadcast_all(&self, message: Value) {
        let project_ids: Vec<String> = {
            let state = self.state.lock().expect("hub state poisoned");
            state.subscriptions.keys().cloned().collect()
        };

        for project_id in project_ids {
            self.broadcast(&project_id, message.clone());
        }
    }

    /// Handle one inbound text frame from a client.
    ///
    /// Supports `{"type":"ping"}` and `{"type":"subscribe","project_id":…}`.
    /// Malformed JSON elicits an `error` frame; the connection stays open.
    pub fn handle_client_message(&self, conn_id: ConnectionId, raw: &str) {
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => {
                self.send_to(
                    conn_id,
                    json!({
                        "type": "error",
                        "message": "Invalid JSON",
                        "timestamp": Utc::now().to_rfc3339(),
                    }),
                );
                return;
            }
        };

        match parsed.get("type").and_then(|t| t.as_str()) {
            Some("ping") => {
                self.send_to(
                    conn_id,
                    json!({
                        "type": "pong",
                        "timestamp": Utc::now().to_rfc3339(),
                    }),
                );
            }
            Some("subscribe") => {
                if let Some(project_id) = parsed.get("project_id").and_then(|p| p.as_str()) {
                    if self.subscribe(conn_id, project_id) {
                        self.send_to(
                            conn_id,
                            json!({
                                "type": "subscribed",
                                "project_id": project_id,
                                "timestamp": Utc::now().to_rfc3339(),
                            }),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    /// Number of connections, optionally scoped to one project.
    pub fn connection_count(&self, project_id: Option<&str>) -> usize {
        let state = self.state.lock().expect("hub state poisoned");
        match project_id {
            Some(project_id) => state
                .subscriptions
                .get(project_id)
                .map(|subscribers| subscribers.len())
                .unwrap_or(0),
            None => state.senders.len(),
        }
    }

    /// Project ids with at least one connection.
    pub fn project_ids(&self) -> Vec<String> {
        let state = self.state.lock().expect("hub state poisoned");
        state.subscriptions.keys().cloned().collect()
    }

    fn send_to(&self, conn_id: ConnectionId, message: Value) {
        let tx = {
            let state = self.state.lock().expect("hub state poisoned");
            state.senders.get(&conn_id).cloned()
        };
        if let Some(tx) = tx {
            let _ = tx.send(message.to_string());
        }
    }
}
