//! Task store abstraction.
//!
//! Defines the [`TaskStore`] trait for the hosted document store plus the
//! [`Subscription`] handle that carries snapshot pushes. Concrete stores:
//! - [`memory::MemoryTaskStore`] — in-process store for tests and demos
//! - [`remote::WsTaskStore`] — WebSocket client for `zentodo-cloud`
//!
//! The local blob used by local mode lives in [`blob`].

pub mod blob;
pub mod memory;
pub mod remote;

use std::future::Future;

use tokio::sync::mpsc;
use zentodo_proto::task::{NewTask, Task, TaskId, TaskPatch, UserId};
use zentodo_proto::wire::{CodecError, SnapshotFilter, StoreFailure, SubscriptionId};

/// Errors that can occur during task store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store refused the operation.
    #[error("store rejected request: {0}")]
    Rejected(#[from] StoreFailure),

    /// The connection to the store has been closed.
    #[error("connection to task store closed")]
    ConnectionClosed,

    /// The store did not answer in time.
    #[error("task store request timed out")]
    Timeout,

    /// The store could not be reached.
    #[error("task store unreachable: {0}")]
    Unreachable(String),

    /// The store sent a reply that does not fit the request.
    #[error("unexpected reply from task store: {0}")]
    Protocol(String),

    /// Wire encode/decode failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Local persistence I/O failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The local blob could not be (de)serialized.
    #[error("corrupt task blob: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One full-replacement push from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Feed that produced this snapshot.
    pub subscription: SubscriptionId,
    /// Every task currently in the feed's scope.
    pub tasks: Vec<Task>,
}

type CloseHook = Box<dyn FnOnce(SubscriptionId) + Send + Sync>;

/// A live, cancellable snapshot feed.
///
/// Closing (explicitly or by drop) closes the channel, discards anything
/// still buffered, and deregisters the feed with its store exactly once.
/// After close no snapshot from this feed can be observed.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Snapshot>,
    on_close: Option<CloseHook>,
}

impl Subscription {
    /// Wraps a snapshot channel. `on_close` runs once when the feed closes.
    pub fn new(
        id: SubscriptionId,
        rx: mpsc::UnboundedReceiver<Snapshot>,
        on_close: impl FnOnce(SubscriptionId) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            rx,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// This feed's id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the next buffered snapshot without waiting.
    pub fn try_next(&mut self) -> Option<Snapshot> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next snapshot. Returns `None` once the store side is gone.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Cancels the feed.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(on_close) = self.on_close.take() else {
            return;
        };
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        on_close(self.id);
        tracing::debug!(subscription = %self.id, "subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("open", &self.on_close.is_some())
            .finish()
    }
}

/// Hosted multi-tenant task document store.
///
/// Handles are cheap to clone; clones share one connection and one
/// authenticated identity. Writes resolve when the store has applied them.
/// Snapshots reflecting a write are delivered before the write resolves.
pub trait TaskStore: Clone + Send + Sync + 'static {
    /// Sets the identity this handle acts as. Cancels the handle's feeds
    /// when the identity changes.
    fn authenticate(
        &self,
        user: Option<&UserId>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Inserts a document and returns its store-assigned id.
    fn insert(&self, task: NewTask) -> impl Future<Output = Result<TaskId, StoreError>> + Send;

    /// Applies a partial update to a document.
    fn update(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Hard-deletes a document. Deleting a missing document succeeds.
    fn delete(&self, id: &TaskId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Opens a snapshot feed. The current snapshot is delivered first.
    fn subscribe(
        &self,
        filter: SnapshotFilter,
    ) -> impl Future<Output = Result<Subscription, StoreError>> + Send;
}
