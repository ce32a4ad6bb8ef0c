//! Hosted task store server: shared state, WebSocket handler, and request
//! dispatch.
//!
//! Each WebSocket connection carries its own identity, set by
//! [`ClientMessage::Authenticate`]. Replies and snapshot pushes share one
//! outbound channel per connection, so they reach the client in the order
//! the store produced them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use zentodo_proto::task::UserId;
use zentodo_proto::wire::{self, ClientMessage, ServerMessage, StoreFailure};

use crate::collection::{ConnectionId, TaskCollection};

/// Shared server state.
pub struct ServerState {
    /// All task documents and live feeds.
    pub collection: TaskCollection,
    next_connection: AtomicU64,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates state with an empty default collection.
    #[must_use]
    pub fn new() -> Self {
        Self::with_collection(TaskCollection::new())
    }

    /// Creates state around a pre-configured collection.
    #[must_use]
    pub const fn with_collection(collection: TaskCollection) -> Self {
        Self {
            collection,
            next_connection: AtomicU64::new(1),
        }
    }

    fn allocate_connection(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handles a single WebSocket connection for its whole lifetime.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let connection = state.allocate_connection();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    tracing::info!(connection = connection.0, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let bytes = match wire::encode_server(&msg) {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(connection = connection.0, error = %e, "failed to encode reply");
                    continue;
                }
            };
            if ws_sender.send(Message::Binary(bytes.into())).await.is_err() {
                tracing::warn!(connection = connection.0, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        let mut user: Option<UserId> = None;
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => match wire::decode_client(&data) {
                    Ok(request) => {
                        dispatch(connection, &mut user, request, &reader_state, &tx).await;
                    }
                    Err(e) => {
                        tracing::warn!(connection = connection.0, error = %e, "malformed request, skipping");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(connection = connection.0, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    let closed = state.collection.drop_connection(connection).await;
    tracing::info!(connection = connection.0, feeds_closed = closed, "client disconnected");
}

/// Executes one client request and queues its reply.
async fn dispatch(
    connection: ConnectionId,
    user: &mut Option<UserId>,
    request: ClientMessage,
    state: &ServerState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let collection = &state.collection;
    let reply = match request {
        ClientMessage::Authenticate { request, user: next } => {
            if *user != next {
                let closed = collection.drop_connection(connection).await;
                tracing::info!(
                    connection = connection.0,
                    user = ?next,
                    feeds_closed = closed,
                    "identity changed"
                );
                *user = next;
            }
            ServerMessage::Ack { request }
        }
        ClientMessage::Insert { request, task } => {
            match collection.insert(user.as_ref(), task).await {
                Ok(id) => ServerMessage::Inserted { request, id },
                Err(failure) => rejected(connection, request, failure),
            }
        }
        ClientMessage::Update { request, id, patch } => {
            match collection.update(user.as_ref(), &id, patch).await {
                Ok(()) => ServerMessage::Ack { request },
                Err(failure) => rejected(connection, request, failure),
            }
        }
        ClientMessage::Delete { request, id } => {
            match collection.delete(user.as_ref(), &id).await {
                Ok(()) => ServerMessage::Ack { request },
                Err(failure) => rejected(connection, request, failure),
            }
        }
        ClientMessage::Subscribe {
            request,
            subscription,
            filter,
        } => match collection
            .subscribe(connection, user.as_ref(), subscription, &filter, tx.clone())
            .await
        {
            Ok(()) => ServerMessage::Ack { request },
            Err(failure) => rejected(connection, request, failure),
        },
        ClientMessage::Unsubscribe { subscription } => {
            collection.unsubscribe(connection, subscription).await;
            return;
        }
    };
    let _ = tx.send(reply);
}

fn rejected(
    connection: ConnectionId,
    request: wire::RequestId,
    failure: StoreFailure,
) -> ServerMessage {
    tracing::debug!(connection = connection.0, %request, %failure, "request rejected");
    ServerMessage::Rejected { request, failure }
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with a pre-configured [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "task store server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
