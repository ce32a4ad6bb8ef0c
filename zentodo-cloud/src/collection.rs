//! Multi-tenant task collection with owner-scoped snapshot feeds.
//!
//! The [`TaskCollection`] holds every user's task documents. Each mutation
//! pushes the full current task set of the affected owner to every feed
//! watching that owner. Documents live in memory only and are lost on
//! restart.
//!
//! Snapshots are computed and pushed while the document lock is held, so
//! the last snapshot a feed receives always reflects the latest state.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{RwLock, mpsc};
use zentodo_proto::task::{CreatedAt, NewTask, Task, TaskId, TaskPatch, UserId};
use zentodo_proto::wire::{ServerMessage, SnapshotFilter, StoreFailure, SubscriptionId};

/// Default maximum number of tasks a single owner may store.
pub const DEFAULT_MAX_TASKS_PER_OWNER: usize = 10_000;

/// Identifies one client connection to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// A registered snapshot feed.
struct Watcher {
    owner: UserId,
    sink: mpsc::UnboundedSender<ServerMessage>,
}

/// In-memory task documents for all owners.
pub struct TaskCollection {
    documents: RwLock<BTreeMap<TaskId, Task>>,
    watchers: RwLock<HashMap<(ConnectionId, SubscriptionId), Watcher>>,
    max_tasks_per_owner: usize,
    pending_snapshots: bool,
}

impl Default for TaskCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskCollection {
    /// Creates an empty collection with the default quota and pending
    /// snapshots enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_TASKS_PER_OWNER, true)
    }

    /// Creates an empty collection.
    ///
    /// With `pending_snapshots`, an insert first publishes the new document
    /// with an unresolved timestamp and then publishes it again stamped.
    #[must_use]
    pub fn with_config(max_tasks_per_owner: usize, pending_snapshots: bool) -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            watchers: RwLock::new(HashMap::new()),
            max_tasks_per_owner,
            pending_snapshots,
        }
    }

    /// Documents one owner may keep.
    #[must_use]
    pub const fn max_tasks_per_owner(&self) -> usize {
        self.max_tasks_per_owner
    }

    fn now_ms() -> u64 {
        u64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        )
        .unwrap_or(u64::MAX)
    }

    /// Inserts a document owned by `user`, assigning id and server timestamp.
    ///
    /// # Errors
    ///
    /// - [`StoreFailure::NotAuthenticated`] without an identity.
    /// - [`StoreFailure::PermissionDenied`] if the task names another owner.
    /// - [`StoreFailure::Invalid`] if the text is blank.
    /// - [`StoreFailure::QuotaExceeded`] if the owner is at the limit.
    pub async fn insert(
        &self,
        user: Option<&UserId>,
        task: NewTask,
    ) -> Result<TaskId, StoreFailure> {
        let user = user.ok_or(StoreFailure::NotAuthenticated)?;
        if task.owner.as_ref() != Some(user) {
            return Err(StoreFailure::PermissionDenied);
        }
        if task.text.trim().is_empty() {
            return Err(StoreFailure::Invalid("task text is empty".to_string()));
        }

        let mut documents = self.documents.write().await;
        let owned = documents
            .values()
            .filter(|t| t.owner.as_ref() == Some(user))
            .count();
        if owned >= self.max_tasks_per_owner {
            return Err(StoreFailure::QuotaExceeded {
                limit: self.max_tasks_per_owner,
            });
        }

        let id = TaskId::generate();
        let mut doc = Task::from_new(id.clone(), task);
        if self.pending_snapshots {
            doc.created_at = CreatedAt::Pending;
            documents.insert(id.clone(), doc.clone());
            self.publish(&documents, user).await;
        }
        doc.created_at = CreatedAt::At(Self::now_ms());
        documents.insert(id.clone(), doc);
        self.publish(&documents, user).await;
        drop(documents);

        tracing::debug!(task_id = %id, owner = %user, "task inserted");
        Ok(id)
    }

    /// Applies a patch to a document owned by `user`.
    ///
    /// # Errors
    ///
    /// - [`StoreFailure::NotAuthenticated`] without an identity.
    /// - [`StoreFailure::NotFound`] if no such document exists.
    /// - [`StoreFailure::PermissionDenied`] if another user owns it.
    pub async fn update(
        &self,
        user: Option<&UserId>,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(), StoreFailure> {
        let user = user.ok_or(StoreFailure::NotAuthenticated)?;
        let mut documents = self.documents.write().await;
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreFailure::NotFound(id.clone()))?;
        if doc.owner.as_ref() != Some(user) {
            return Err(StoreFailure::PermissionDenied);
        }
        patch.apply(doc);
        self.publish(&documents, user).await;
        Ok(())
    }

    /// Deletes a document owned by `user`. Deleting a missing document succeeds.
    ///
    /// # Errors
    ///
    /// - [`StoreFailure::NotAuthenticated`] without an identity.
    /// - [`StoreFailure::PermissionDenied`] if another user owns it.
    pub async fn delete(&self, user: Option<&UserId>, id: &TaskId) -> Result<(), StoreFailure> {
        let user = user.ok_or(StoreFailure::NotAuthenticated)?;
        let mut documents = self.documents.write().await;
        match documents.get(id) {
            None => {
                tracing::debug!(task_id = %id, "delete of missing task ignored");
                return Ok(());
            }
            Some(doc) if doc.owner.as_ref() != Some(user) => {
                return Err(StoreFailure::PermissionDenied);
            }
            Some(_) => {}
        }
        documents.remove(id);
        self.publish(&documents, user).await;
        Ok(())
    }

    /// Registers a snapshot feed and pushes the current snapshot to it.
    ///
    /// Only owner-scoped feeds for the caller's own tasks are allowed.
    ///
    /// # Errors
    ///
    /// - [`StoreFailure::NotAuthenticated`] without an identity.
    /// - [`StoreFailure::PermissionDenied`] if the filter is not scoped to `user`.
    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        user: Option<&UserId>,
        subscription: SubscriptionId,
        filter: &SnapshotFilter,
        sink: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<(), StoreFailure> {
        let user = user.ok_or(StoreFailure::NotAuthenticated)?;
        if filter.owner.as_ref() != Some(user) {
            return Err(StoreFailure::PermissionDenied);
        }

        let documents = self.documents.read().await;
        let mut watchers = self.watchers.write().await;
        let _ = sink.send(ServerMessage::Snapshot {
            subscription,
            tasks: Self::owned_by(&documents, user),
        });
        watchers.insert(
            (connection, subscription),
            Watcher {
                owner: user.clone(),
                sink,
            },
        );
        drop(watchers);
        drop(documents);

        tracing::debug!(connection = connection.0, %subscription, owner = %user, "feed opened");
        Ok(())
    }

    /// Closes one feed. Unknown feeds are ignored.
    pub async fn unsubscribe(&self, connection: ConnectionId, subscription: SubscriptionId) {
        if self
            .watchers
            .write()
            .await
            .remove(&(connection, subscription))
            .is_some()
        {
            tracing::debug!(connection = connection.0, %subscription, "feed closed");
        }
    }

    /// Closes every feed belonging to a connection, returning how many were closed.
    pub async fn drop_connection(&self, connection: ConnectionId) -> usize {
        let mut watchers = self.watchers.write().await;
        let before = watchers.len();
        watchers.retain(|(conn, _), _| *conn != connection);
        before - watchers.len()
    }

    /// Number of documents owned by `owner`.
    pub async fn count_owned(&self, owner: &UserId) -> usize {
        self.documents
            .read()
            .await
            .values()
            .filter(|t| t.owner.as_ref() == Some(owner))
            .count()
    }

    /// Number of live feeds.
    pub async fn feed_count(&self) -> usize {
        self.watchers.read().await.len()
    }

    fn owned_by(documents: &BTreeMap<TaskId, Task>, owner: &UserId) -> Vec<Task> {
        documents
            .values()
            .filter(|t| t.owner.as_ref() == Some(owner))
            .cloned()
            .collect()
    }

    /// Pushes the owner's full task set to every feed watching that owner.
    async fn publish(&self, documents: &BTreeMap<TaskId, Task>, owner: &UserId) {
        let watchers = self.watchers.read().await;
        let tasks = Self::owned_by(documents, owner);
        for ((_, subscription), watcher) in watchers.iter() {
            if watcher.owner == *owner {
                let _ = watcher.sink.send(ServerMessage::Snapshot {
                    subscription: *subscription,
                    tasks: tasks.clone(),
                });
            }
        }
    }
}
