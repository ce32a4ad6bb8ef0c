//! WebSocket client for the `zentodo-cloud` hosted task store.
//!
//! [`WsTaskStore::connect`] opens one WebSocket connection and spawns a
//! writer task (draining an outbound queue) and a reader task (routing
//! replies to waiting requests and snapshots to their feeds). Malformed
//! frames are logged and skipped; the connection stays up.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use zentodo_proto::task::{NewTask, TaskId, TaskPatch, UserId};
use zentodo_proto::wire::{
    self, ClientMessage, RequestId, ServerMessage, SnapshotFilter, SubscriptionId,
};

use super::{Snapshot, StoreError, Subscription, TaskStore};

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Request and feed routing tables shared with the reader task.
#[derive(Default)]
struct Routes {
    pending: Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>,
    feeds: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<Snapshot>>>,
    connected: AtomicBool,
}

struct Inner {
    url: String,
    routes: Arc<Routes>,
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    next_request: AtomicU64,
    next_subscription: AtomicU64,
    request_timeout: Duration,
    reader: tokio::task::JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connection to a hosted task store.
#[derive(Clone)]
pub struct WsTaskStore {
    inner: Arc<Inner>,
}

impl WsTaskStore {
    /// Connects to the store at `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`] if the handshake does not finish within `connect_timeout`.
    /// - [`StoreError::Unreachable`] if the server cannot be reached.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "task store connect timed out");
                StoreError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, error = %e, "task store connect failed");
                StoreError::Unreachable(e.to_string())
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let routes = Arc::new(Routes {
            connected: AtomicBool::new(true),
            ..Routes::default()
        });
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        tokio::spawn(writer_loop(ws_sender, outgoing_rx, Arc::clone(&routes)));
        let reader = tokio::spawn(reader_loop(ws_reader, Arc::clone(&routes)));

        tracing::info!(url, "connected to task store");

        Ok(Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                routes,
                outgoing,
                next_request: AtomicU64::new(1),
                next_subscription: AtomicU64::new(1),
                request_timeout,
                reader,
            }),
        })
    }

    /// The store URL this handle is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Whether the WebSocket connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.routes.connected.load(Ordering::Relaxed)
    }

    fn next_request(&self) -> RequestId {
        RequestId(self.inner.next_request.fetch_add(1, Ordering::Relaxed))
    }

    /// Queues a request and waits for the matching reply.
    async fn call(&self, request: RequestId, msg: ClientMessage) -> Result<ServerMessage, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.inner.routes.pending.lock().insert(request, tx);

        if self.inner.outgoing.send(msg).is_err() {
            self.inner.routes.pending.lock().remove(&request);
            return Err(StoreError::ConnectionClosed);
        }

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(StoreError::ConnectionClosed),
            Err(_) => {
                self.inner.routes.pending.lock().remove(&request);
                tracing::warn!(%request, "task store request timed out");
                Err(StoreError::Timeout)
            }
        }
    }

    async fn call_ack(&self, request: RequestId, msg: ClientMessage) -> Result<(), StoreError> {
        match self.call(request, msg).await? {
            ServerMessage::Ack { .. } => Ok(()),
            ServerMessage::Rejected { failure, .. } => Err(failure.into()),
            other => Err(StoreError::Protocol(format!("{other:?}"))),
        }
    }
}

impl TaskStore for WsTaskStore {
    async fn authenticate(&self, user: Option<&UserId>) -> Result<(), StoreError> {
        let request = self.next_request();
        self.call_ack(
            request,
            ClientMessage::Authenticate {
                request,
                user: user.cloned(),
            },
        )
        .await
    }

    async fn insert(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let request = self.next_request();
        match self.call(request, ClientMessage::Insert { request, task }).await? {
            ServerMessage::Inserted { id, .. } => Ok(id),
            ServerMessage::Rejected { failure, .. } => Err(failure.into()),
            other => Err(StoreError::Protocol(format!("{other:?}"))),
        }
    }

    async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<(), StoreError> {
        let request = self.next_request();
        self.call_ack(
            request,
            ClientMessage::Update {
                request,
                id: id.clone(),
                patch,
            },
        )
        .await
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        let request = self.next_request();
        self.call_ack(
            request,
            ClientMessage::Delete {
                request,
                id: id.clone(),
            },
        )
        .await
    }

    async fn subscribe(&self, filter: SnapshotFilter) -> Result<Subscription, StoreError> {
        let request = self.next_request();
        let subscription =
            SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));

        // Registered before the request goes out: the first snapshot can
        // arrive ahead of the ack.
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.routes.feeds.lock().insert(subscription, tx);

        let result = self
            .call_ack(
                request,
                ClientMessage::Subscribe {
                    request,
                    subscription,
                    filter,
                },
            )
            .await;
        if let Err(e) = result {
            self.inner.routes.feeds.lock().remove(&subscription);
            return Err(e);
        }

        let routes = Arc::clone(&self.inner.routes);
        let outgoing = self.inner.outgoing.clone();
        Ok(Subscription::new(subscription, rx, move |subscription| {
            routes.feeds.lock().remove(&subscription);
            let _ = outgoing.send(ClientMessage::Unsubscribe { subscription });
        }))
    }
}

/// Drains the outbound queue onto the socket. Exits when every handle is gone.
async fn writer_loop(
    mut ws_sender: WsSender,
    mut outgoing: mpsc::UnboundedReceiver<ClientMessage>,
    routes: Arc<Routes>,
) {
    while let Some(msg) = outgoing.recv().await {
        let bytes = match wire::encode_client(&msg) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode task store request");
                continue;
            }
        };
        if let Err(e) = ws_sender.send(Message::Binary(bytes.into())).await {
            tracing::warn!(error = %e, "task store send failed");
            routes.connected.store(false, Ordering::Relaxed);
            break;
        }
    }
    let _ = ws_sender.close().await;
}

fn route_reply(routes: &Routes, reply: ServerMessage) {
    let request = match &reply {
        ServerMessage::Ack { request }
        | ServerMessage::Inserted { request, .. }
        | ServerMessage::Rejected { request, .. } => *request,
        ServerMessage::Snapshot { .. } => return,
    };
    let waiter = routes.pending.lock().remove(&request);
    match waiter {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => tracing::debug!(%request, "reply for abandoned request"),
    }
}

/// Routes replies to pending requests and snapshots to feeds.
///
/// On exit every pending request fails with `ConnectionClosed` and every
/// feed ends.
async fn reader_loop(mut ws_reader: WsReader, routes: Arc<Routes>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match wire::decode_server(&data) {
                Ok(ServerMessage::Snapshot {
                    subscription,
                    tasks,
                }) => {
                    let feeds = routes.feeds.lock();
                    if let Some(tx) = feeds.get(&subscription) {
                        let _ = tx.send(Snapshot {
                            subscription,
                            tasks,
                        });
                    } else {
                        tracing::debug!(%subscription, "snapshot for closed feed dropped");
                    }
                }
                Ok(reply) => route_reply(&routes, reply),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed task store frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("task store closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "task store read error");
                break;
            }
        }
    }
    routes.connected.store(false, Ordering::Relaxed);
    routes.pending.lock().clear();
    routes.feeds.lock().clear();
    tracing::info!("task store reader exiting");
}
