//! WebSocket pubsub client for `programSubscribe` with auto-reconnect.
//!
//! A background task owns the connection. Callers talk to it over a command
//! channel. Each subscription gets a local id that stays stable across
//! reconnects; the server-assigned id is remapped every time the task
//! re-subscribes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use chainsync_core::ports::{ProgramSubscription, SubscriptionId};
use chainsync_core::types::{Commitment, SlotNotification};

use crate::error::TransportError;
use crate::wire::{self, JsonRpcResponse};

/// Configuration for the pubsub client.
#[derive(Debug, Clone)]
pub struct PubsubConfig {
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
    /// How long to wait for the server to confirm a subscription.
    pub request_timeout: Duration,
    /// Capacity of each subscription's notification queue.
    pub notification_buffer: usize,
}

impl Default for PubsubConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            notification_buffer: 1_024,
        }
    }
}

type Reply = oneshot::Sender<Result<(), TransportError>>;

enum Command {
    Subscribe {
        local: u64,
        params: Value,
        notifications: mpsc::Sender<SlotNotification>,
        reply: Reply,
    },
    Unsubscribe {
        local: u64,
    },
    Close,
}

/// WebSocket client for program account notifications.
pub struct PubsubClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_local: AtomicU64,
    config: PubsubConfig,
}

impl PubsubClient {
    /// Start the background task for `url`. The connection is established
    /// lazily and retried with backoff.
    pub fn connect(url: impl Into<String>, config: PubsubConfig) -> Self {
        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task_url = url.clone();
        let task_config = config.clone();

        tokio::spawn(async move {
            ws_task(task_url, cmd_rx, task_config).await;
        });

        Self {
            url,
            cmd_tx,
            next_local: AtomicU64::new(1),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to every account owned by `program_id`.
    pub async fn program_subscribe(
        &self,
        program_id: &str,
        commitment: Commitment,
    ) -> Result<ProgramSubscription, TransportError> {
        let local = self.next_local.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.notification_buffer.max(1));
        let (reply, confirmed) = oneshot::channel();

        self.cmd_tx
            .send(Command::Subscribe {
                local,
                params: json!([program_id, { "commitment": commitment, "encoding": "base64" }]),
                notifications: tx,
                reply,
            })
            .map_err(|_| TransportError::Closed)?;

        let timeout = self.config.request_timeout;
        match time::timeout(timeout, confirmed).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(TransportError::Closed),
            Err(_) => {
                let _ = self.cmd_tx.send(Command::Unsubscribe { local });
                return Err(TransportError::Timeout {
                    ms: timeout.as_millis() as u64,
                });
            }
        }

        Ok(ProgramSubscription {
            id: SubscriptionId(local),
            notifications: rx,
        })
    }

    /// Drop a subscription. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.cmd_tx
            .send(Command::Unsubscribe { local: id.0 })
            .map_err(|_| TransportError::Closed)
    }
}

impl Drop for PubsubClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

// ─── Subscription bookkeeping ─────────────────────────────────────────────────

struct Entry {
    params: Value,
    tx: mpsc::Sender<SlotNotification>,
    server: Option<u64>,
}

enum Pending {
    Subscribe { local: u64, reply: Option<Reply> },
    Unsubscribe,
}

/// Connection-independent subscription state owned by the background task.
#[derive(Default)]
struct SubscriptionTable {
    entries: HashMap<u64, Entry>,
    by_server: HashMap<u64, u64>,
    pending: HashMap<u64, Pending>,
    next_request: u64,
}

impl SubscriptionTable {
    fn request_id(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    /// Track a new subscription and return the request to send.
    fn subscribe(
        &mut self,
        local: u64,
        params: Value,
        tx: mpsc::Sender<SlotNotification>,
        reply: Option<Reply>,
    ) -> Value {
        self.entries.insert(
            local,
            Entry {
                params: params.clone(),
                tx,
                server: None,
            },
        );
        self.subscribe_request(local, params, reply)
    }

    fn subscribe_request(&mut self, local: u64, params: Value, reply: Option<Reply>) -> Value {
        let id = self.request_id();
        self.pending.insert(id, Pending::Subscribe { local, reply });
        json!({ "jsonrpc": "2.0", "id": id, "method": "programSubscribe", "params": params })
    }

    /// Forget a subscription. Returns the unsubscribe request when the server
    /// knows about it.
    fn unsubscribe(&mut self, local: u64) -> Option<Value> {
        let entry = self.entries.remove(&local)?;
        let server = entry.server?;
        self.by_server.remove(&server);
        let id = self.request_id();
        self.pending.insert(id, Pending::Unsubscribe);
        Some(json!({ "jsonrpc": "2.0", "id": id, "method": "programUnsubscribe", "params": [server] }))
    }

    fn on_response(&mut self, resp: JsonRpcResponse) {
        let Some(id) = resp.id else { return };
        let Some(Pending::Subscribe { local, reply }) = self.pending.remove(&id) else {
            return;
        };
        let outcome = match resp.into_result() {
            Ok(result) => match result.as_u64() {
                Some(server) => match self.entries.get_mut(&local) {
                    Some(entry) => {
                        entry.server = Some(server);
                        self.by_server.insert(server, local);
                        Ok(())
                    }
                    None => Err(TransportError::Closed),
                },
                None => Err(TransportError::WebSocket(format!(
                    "unexpected subscription id {result}"
                ))),
            },
            Err(e) => Err(TransportError::Rpc(e)),
        };
        if outcome.is_err() {
            self.entries.remove(&local);
        }
        match reply {
            Some(reply) => {
                let _ = reply.send(outcome);
            }
            None => {
                if let Err(e) = outcome {
                    tracing::warn!(local, error = %e, "Re-subscribe failed");
                }
            }
        }
    }

    fn on_notification(&mut self, params: &Value) {
        let Some((server, notification)) = wire::decode_program_notification(params) else {
            tracing::debug!("Unrecognized programNotification payload");
            return;
        };
        let Some(&local) = self.by_server.get(&server) else {
            return;
        };
        let Some(entry) = self.entries.get(&local) else {
            return;
        };
        match entry.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(local, slot = n.slot, "Notification queue full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.entries.remove(&local);
                self.by_server.remove(&server);
            }
        }
    }

    /// Server ids die with the connection. Returns the requests that restore
    /// every live subscription on a fresh one.
    fn resubscribe_all(&mut self) -> Vec<Value> {
        self.by_server.clear();
        let mut replies: HashMap<u64, Reply> = HashMap::new();
        for (_, pending) in self.pending.drain() {
            if let Pending::Subscribe {
                local,
                reply: Some(reply),
            } = pending
            {
                replies.insert(local, reply);
            }
        }
        let live: Vec<(u64, Value)> = self
            .entries
            .iter_mut()
            .map(|(local, entry)| {
                entry.server = None;
                (*local, entry.params.clone())
            })
            .collect();
        live.into_iter()
            .map(|(local, params)| {
                let reply = replies.remove(&local);
                self.subscribe_request(local, params, reply)
            })
            .collect()
    }

    fn handle_text(&mut self, text: &str) {
        let Ok(val) = serde_json::from_str::<Value>(text) else {
            tracing::debug!("failed to parse WS message as JSON");
            return;
        };
        if val.get("method").and_then(Value::as_str) == Some("programNotification") {
            if let Some(params) = val.get("params") {
                self.on_notification(params);
            }
            return;
        }
        if let Ok(resp) = serde_json::from_value::<JsonRpcResponse>(val) {
            self.on_response(resp);
        }
    }
}

// ─── Background task ──────────────────────────────────────────────────────────

async fn ws_task(url: String, mut cmd_rx: mpsc::UnboundedReceiver<Command>, config: PubsubConfig) {
    let mut table = SubscriptionTable::default();
    let mut backoff = config.reconnect_initial;

    loop {
        tracing::info!(url = %url, "connecting via WebSocket");

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "WS connect failed, retrying in {backoff:?}");
                time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.reconnect_max);
                continue;
            }
        };
        backoff = config.reconnect_initial;
        let (mut sink, mut stream) = ws_stream.split();

        let mut connected = true;
        for req in table.resubscribe_all() {
            if sink.send(Message::Text(req.to_string())).await.is_err() {
                connected = false;
                break;
            }
        }

        while connected {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let outgoing = match cmd {
                        None | Some(Command::Close) => return,
                        Some(Command::Subscribe { local, params, notifications, reply }) => {
                            Some(table.subscribe(local, params, notifications, Some(reply)))
                        }
                        Some(Command::Unsubscribe { local }) => table.unsubscribe(local),
                    };
                    if let Some(req) = outgoing {
                        if sink.send(Message::Text(req.to_string())).await.is_err() {
                            connected = false;
                        }
                    }
                }
                msg = stream.next() => {
                    match msg {
                        None | Some(Ok(Message::Close(_))) => connected = false,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WS receive error");
                            connected = false;
                        }
                        Some(Ok(Message::Text(text))) => table.handle_text(text.as_str()),
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        tracing::warn!(url = %url, "WS disconnected, reconnecting in {backoff:?}");
        time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}
