//! Streaming subscription engine.
//!
//! # Responsibilities
//! - Run each Subscribe session as a duplex WebSocket task
//! - Dispatch ONCE / POLL / STREAM subscription-list modes
//! - Enforce the SAMPLE interval floor
//! - Fan tree changes out to ON_CHANGE subscribers
//!
//! # Design Decisions
//! - Delivery to a STREAM client goes through its private outbound queue,
//!   written by the sampling/on-change producers and drained by the
//!   socket writer loop
//! - TARGET_DEFINED falls back to ON_CHANGE; the server attempts no
//!   per-leaf heuristics
//! - Teardown removes the client from every path's subscriber list by
//!   linear scan with swap-remove

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::observability::metrics;
use crate::server::collector::{collect, DataType};
use crate::server::error::ProtocolError;
use crate::server::service::AppState;
use crate::tree::{Notification, Path};

/// How a subscription list is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListMode {
    Once,
    Poll,
    Stream,
}

/// Per-leaf delivery mode within a STREAM subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionMode {
    #[default]
    TargetDefined,
    OnChange,
    Sample,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub path: String,
    #[serde(default)]
    pub mode: SubscriptionMode,
    #[serde(default)]
    pub sample_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionList {
    pub mode: ListMode,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub subscription: Vec<Subscription>,
}

/// Inbound messages on a subscribe session.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ClientMessage {
    Subscribe(SubscriptionList),
    Poll {},
}

/// Outbound messages on a subscribe session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    Update(Notification),
    SyncResponse(bool),
    Error { code: String, message: String },
}

struct Registration {
    id: Uuid,
    path: Path,
    tx: mpsc::Sender<ServerMessage>,
}

/// Mapping from subscribed-path-string to the clients listening on it.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: DashMap<String, Vec<Registration>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: Uuid, path: Path, tx: mpsc::Sender<ServerMessage>) {
        self.subscribers
            .entry(path.to_string())
            .or_default()
            .push(Registration { id, path, tx });
        metrics::record_subscriptions(self.count());
    }

    /// Remove every registration of a client. Scan-and-compact; order
    /// within a list is not preserved.
    fn unregister(&self, id: Uuid) {
        for mut entry in self.subscribers.iter_mut() {
            let clients = entry.value_mut();
            let mut i = 0;
            while i < clients.len() {
                if clients[i].id == id {
                    clients.swap_remove(i);
                } else {
                    i += 1;
                }
            }
        }
        self.subscribers.retain(|_, clients| !clients.is_empty());
        metrics::record_subscriptions(self.count());
    }

    /// Re-emit to every on-change subscriber against a fresh snapshot.
    /// Driven off the apply path whenever the tree changes.
    pub fn notify_changed(&self, root: &Value) {
        for entry in self.subscribers.iter() {
            for client in entry.value() {
                let notif =
                    match collect(root, &Path::root(), &[client.path.clone()], DataType::All) {
                        Ok(n) => n,
                        // The subscribed node may have been deleted.
                        Err(_) => continue,
                    };
                if client.tx.try_send(ServerMessage::Update(notif)).is_err() {
                    tracing::debug!(client = %client.id, "dropping update for slow or closed client");
                }
            }
        }
    }

    pub fn count(&self) -> usize {
        self.subscribers.iter().map(|e| e.value().len()).sum()
    }
}

/// Upgrade to a WebSocket subscribe session.
pub async fn subscribe_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| session(socket, state))
}

/// One duplex session: reads subscription-list and poll messages, writes
/// notifications from the client's private queue.
async fn session(socket: WebSocket, state: AppState) {
    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.queue_depth);
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize stream message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tracing::debug!(session = %id, "subscribe session opened");

    let mut poll_list: Option<SubscriptionList> = None;
    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                send_error(
                    &tx,
                    &ProtocolError::InvalidArgument(format!("malformed message: {e}")),
                )
                .await;
                break;
            }
        };
        match parsed {
            ClientMessage::Subscribe(list) => {
                match dispatch(&state, id, &tx, &list).await {
                    Ok(true) => break, // ONCE: one snapshot, then close
                    Ok(false) => {
                        if list.mode == ListMode::Poll {
                            poll_list = Some(list);
                        }
                    }
                    Err(err) => {
                        send_error(&tx, &err).await;
                        break;
                    }
                }
            }
            ClientMessage::Poll {} => match &poll_list {
                Some(list) => {
                    if let Err(err) = send_snapshot(&state, &tx, list).await {
                        send_error(&tx, &err).await;
                        break;
                    }
                }
                None => {
                    send_error(
                        &tx,
                        &ProtocolError::InvalidArgument(
                            "poll without an active POLL subscription".to_string(),
                        ),
                    )
                    .await;
                    break;
                }
            },
        }
    }

    state.registry.unregister(id);
    drop(tx);
    let _ = writer.await;
    tracing::debug!(session = %id, "subscribe session closed");
}

/// Handle one inbound subscription list. Returns true when the session
/// should close (ONCE).
async fn dispatch(
    state: &AppState,
    id: Uuid,
    tx: &mpsc::Sender<ServerMessage>,
    list: &SubscriptionList,
) -> Result<bool, ProtocolError> {
    let prefix = Path::parse(&list.prefix)?;

    // Validate every sample interval before committing to anything.
    let mut intervals = Vec::with_capacity(list.subscription.len());
    for sub in &list.subscription {
        if sub.mode == SubscriptionMode::Sample && list.mode == ListMode::Stream {
            intervals.push(Some(effective_interval(
                Duration::from_secs(sub.sample_interval_secs),
                state.sample_floor,
            )?));
        } else {
            intervals.push(None);
        }
    }

    // All modes start with one snapshot followed by a sync response.
    send_snapshot(state, tx, list).await?;

    match list.mode {
        ListMode::Once => Ok(true),
        ListMode::Poll => Ok(false),
        ListMode::Stream => {
            for (sub, interval) in list.subscription.iter().zip(intervals) {
                let path = prefix.join(&Path::parse(&sub.path)?);
                match sub.mode {
                    SubscriptionMode::Sample => {
                        let interval = interval.expect("validated above");
                        spawn_sampler(state.clone(), path, tx.clone(), interval);
                    }
                    // TARGET_DEFINED falls back to ON_CHANGE.
                    SubscriptionMode::OnChange | SubscriptionMode::TargetDefined => {
                        state.registry.register(id, path, tx.clone());
                    }
                }
            }
            Ok(false)
        }
    }
}

/// Clamp a requested sample interval to the server floor.
///
/// Zero means "server default" and is substituted with the floor; a
/// nonzero interval below the floor is rejected.
fn effective_interval(requested: Duration, floor: Duration) -> Result<Duration, ProtocolError> {
    if requested.is_zero() {
        Ok(floor)
    } else if requested < floor {
        Err(ProtocolError::InvalidArgument(format!(
            "sample interval {:?} is below the server floor {:?}",
            requested, floor
        )))
    } else {
        Ok(requested)
    }
}

/// Take one snapshot via the collector and deliver it.
async fn send_snapshot(
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
    list: &SubscriptionList,
) -> Result<(), ProtocolError> {
    let prefix = Path::parse(&list.prefix)?;
    let mut paths = Vec::with_capacity(list.subscription.len());
    for sub in &list.subscription {
        paths.push(Path::parse(&sub.path)?);
    }

    let notification = {
        let tree = state.store.read().await;
        collect(&tree, &prefix, &paths, DataType::All)?
    };

    let _ = tx.send(ServerMessage::Update(notification)).await;
    let _ = tx.send(ServerMessage::SyncResponse(true)).await;
    Ok(())
}

/// Periodic sampling producer for one subscription. Ends when the client
/// queue closes.
fn spawn_sampler(
    state: AppState,
    path: Path,
    tx: mpsc::Sender<ServerMessage>,
    interval: Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let notification = {
                let tree = state.store.read().await;
                match collect(&tree, &Path::root(), &[path.clone()], DataType::All) {
                    Ok(n) => n,
                    Err(_) => continue,
                }
            };
            if tx.send(ServerMessage::Update(notification)).await.is_err() {
                break;
            }
        }
    });
}

async fn send_error(tx: &mpsc::Sender<ServerMessage>, err: &ProtocolError) {
    let _ = tx
        .send(ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        })
        .await;
}
