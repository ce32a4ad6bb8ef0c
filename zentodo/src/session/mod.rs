//! Sessions: explicitly opened and closed contexts that own a repository and
//! a view model and expose the presentation commands.
//!
//! - [`local::LocalSession`] — blob-backed, every command completes synchronously
//! - [`cloud::CloudSession`] — hosted store plus identity provider; writes run
//!   in the background and the view follows snapshot pushes
//!
//! Both publish [`SessionEvent`]s on an optional bounded channel. Events are
//! best-effort: when the receiver lags, events are dropped.

pub mod cloud;
pub mod local;

pub use cloud::{CloudSession, SessionError};
pub use local::LocalSession;

use std::fmt;

use tokio::sync::mpsc;
use zentodo_proto::task::TaskId;

use crate::identity::AuthState;
use crate::store::StoreError;

/// Which write a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Task creation.
    Insert,
    /// Completion toggle of a task.
    Toggle(TaskId),
    /// Deletion of a task.
    Delete(TaskId),
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "add task"),
            Self::Toggle(id) => write!(f, "toggle task {id}"),
            Self::Delete(id) => write!(f, "delete task {id}"),
        }
    }
}

/// A background write that the store refused or could not complete.
#[derive(Debug, thiserror::Error)]
#[error("{op} failed: {error}")]
pub struct WriteFailure {
    /// The write that failed.
    pub op: WriteOp,
    /// Why it failed.
    pub error: StoreError,
}

/// Notifications for the presentation layer.
#[derive(Debug)]
pub enum SessionEvent {
    /// Rows or stats were recomputed.
    ViewChanged,
    /// The identity state changed.
    AuthChanged(AuthState),
    /// A background write failed; shown as a transient notice.
    WriteFailed(WriteFailure),
}

/// Optional bounded event channel shared by both session kinds.
#[derive(Debug, Default)]
struct EventSink {
    tx: Option<mpsc::Sender<SessionEvent>>,
}

impl EventSink {
    fn subscribe(&mut self, buffer: usize) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.tx = Some(tx);
        rx
    }

    fn emit(&self, event: SessionEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::debug!(error = %e, "session event dropped");
        }
    }
}
