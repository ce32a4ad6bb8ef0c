//! Wire protocol between `ZenTodo` clients and the hosted task store.
//!
//! Messages are postcard-encoded and carried in binary WebSocket frames.
//! Every client request carries a [`RequestId`] echoed in the reply.
//! Subscriptions are identified by a client-chosen [`SubscriptionId`] and
//! always deliver the full owner-scoped task set.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{NewTask, Task, TaskId, TaskPatch, UserId};

/// Error type for wire encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Correlates a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Identifies one live snapshot feed on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Which documents a subscription covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    /// Only tasks owned by this user.
    pub owner: Option<UserId>,
}

impl SnapshotFilter {
    /// Filter scoped to one owner.
    #[must_use]
    pub const fn owned_by(owner: UserId) -> Self {
        Self { owner: Some(owner) }
    }

    /// Returns `true` if the task falls inside this filter.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.owner
            .as_ref()
            .is_none_or(|owner| task.owner.as_ref() == Some(owner))
    }
}

/// Why the store refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreFailure {
    /// The connection has no authenticated identity.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The identity may not touch this document or query.
    #[error("permission denied")]
    PermissionDenied,
    /// No document with this id exists.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The owner has reached the per-owner document limit.
    #[error("task quota exceeded (max {limit} tasks)")]
    QuotaExceeded {
        /// Configured per-owner maximum.
        limit: usize,
    },
    /// The request was malformed.
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Messages sent by clients to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Set (or clear) the identity this connection acts as.
    ///
    /// Changing identity cancels every subscription on the connection.
    Authenticate {
        /// Request correlation id.
        request: RequestId,
        /// New identity, or `None` to sign out.
        user: Option<UserId>,
    },
    /// Insert a new document; the store assigns id and server timestamp.
    Insert {
        /// Request correlation id.
        request: RequestId,
        /// Document body.
        task: NewTask,
    },
    /// Apply a partial update to a document.
    Update {
        /// Request correlation id.
        request: RequestId,
        /// Target document.
        id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// Hard-delete a document. Deleting a missing document succeeds.
    Delete {
        /// Request correlation id.
        request: RequestId,
        /// Target document.
        id: TaskId,
    },
    /// Open a snapshot feed. The current snapshot is pushed as soon as the
    /// feed is registered and may arrive before the ack.
    Subscribe {
        /// Request correlation id.
        request: RequestId,
        /// Client-chosen feed id.
        subscription: SubscriptionId,
        /// Scope of the feed.
        filter: SnapshotFilter,
    },
    /// Close a snapshot feed. No reply.
    Unsubscribe {
        /// Feed to close.
        subscription: SubscriptionId,
    },
}

/// Messages sent by the store to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// The request succeeded.
    Ack {
        /// Request being answered.
        request: RequestId,
    },
    /// The insert succeeded and the document got this id.
    Inserted {
        /// Request being answered.
        request: RequestId,
        /// Store-assigned document id.
        id: TaskId,
    },
    /// The request failed.
    Rejected {
        /// Request being answered.
        request: RequestId,
        /// Reason for the failure.
        failure: StoreFailure,
    },
    /// Full current contents of a subscription's scope.
    Snapshot {
        /// Feed this snapshot belongs to.
        subscription: SubscriptionId,
        /// Every task in scope.
        tasks: Vec<Task>,
    },
}

/// Encodes a [`ClientMessage`] using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the message cannot be serialized.
pub fn encode_client(msg: &ClientMessage) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ClientMessage`] using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes are not a valid message.
pub fn decode_client(bytes: &[u8]) -> Result<ClientMessage, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ServerMessage`] using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the message cannot be serialized.
pub fn encode_server(msg: &ServerMessage) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ServerMessage`] using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes are not a valid message.
pub fn decode_server(bytes: &[u8]) -> Result<ServerMessage, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
