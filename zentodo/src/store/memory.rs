//! In-process task store for tests and offline demos.
//!
//! [`MemoryTaskStore`] behaves like the hosted store: owner-scoped
//! permission checks, store-assigned ids, server timestamps published
//! first as pending and then stamped, and full-snapshot pushes to every
//! feed watching the affected owner. Each handle created with
//! [`MemoryTaskStore::connect`] acts as a separate device with its own
//! identity; clones of a handle share it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use zentodo_proto::task::{CreatedAt, NewTask, Task, TaskId, TaskPatch, UserId};
use zentodo_proto::wire::{SnapshotFilter, StoreFailure, SubscriptionId};

use super::{Snapshot, StoreError, Subscription, TaskStore};

struct Feed {
    device: u64,
    owner: UserId,
    tx: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct Collection {
    documents: BTreeMap<TaskId, Task>,
    feeds: HashMap<SubscriptionId, Feed>,
    failing: HashSet<TaskId>,
    unavailable: bool,
    last_stamp: u64,
}

impl Collection {
    fn stamp(&mut self) -> u64 {
        let now = u64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        )
        .unwrap_or(u64::MAX);
        self.last_stamp = now.max(self.last_stamp + 1);
        self.last_stamp
    }

    fn publish(&self, owner: &UserId) {
        let tasks: Vec<Task> = self
            .documents
            .values()
            .filter(|t| t.owner.as_ref() == Some(owner))
            .cloned()
            .collect();
        for (id, feed) in &self.feeds {
            if feed.owner == *owner {
                let _ = feed.tx.send(Snapshot {
                    subscription: *id,
                    tasks: tasks.clone(),
                });
            }
        }
    }

    fn check_available(&self, id: Option<&TaskId>) -> Result<(), StoreError> {
        if self.unavailable || id.is_some_and(|id| self.failing.contains(id)) {
            return Err(StoreError::Unreachable("injected store failure".to_string()));
        }
        Ok(())
    }
}

struct Shared {
    collection: Mutex<Collection>,
    next_device: AtomicU64,
    next_subscription: AtomicU64,
    pending_snapshots: bool,
}

/// A handle to an in-process multi-tenant task store.
#[derive(Clone)]
pub struct MemoryTaskStore {
    shared: Arc<Shared>,
    device: u64,
    user: Arc<Mutex<Option<UserId>>>,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskStore {
    /// Creates an empty store that publishes pending snapshots on insert.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pending_snapshots(true)
    }

    /// Creates an empty store. With `pending_snapshots` off, inserts are
    /// published once, already stamped.
    #[must_use]
    pub fn with_pending_snapshots(pending_snapshots: bool) -> Self {
        let shared = Arc::new(Shared {
            collection: Mutex::new(Collection::default()),
            next_device: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            pending_snapshots,
        });
        Self {
            shared,
            device: 0,
            user: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens another device on the same collection, starting anonymous.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            device: self.shared.next_device.fetch_add(1, Ordering::Relaxed),
            user: Arc::new(Mutex::new(None)),
        }
    }

    /// Every document in the collection, across all owners.
    #[must_use]
    pub fn documents(&self) -> Vec<Task> {
        self.shared
            .collection
            .lock()
            .documents
            .values()
            .cloned()
            .collect()
    }

    /// Number of open feeds across all devices.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.shared.collection.lock().feeds.len()
    }

    /// Makes every write touching `id` fail.
    pub fn fail_writes_to(&self, id: &TaskId) {
        self.shared.collection.lock().failing.insert(id.clone());
    }

    /// Makes every write and new subscription fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.collection.lock().unavailable = unavailable;
    }

    /// Pushes a snapshot of `owner`'s tasks to every feed watching `owner`,
    /// as the store would after an external change.
    pub fn republish(&self, owner: &UserId) {
        self.shared.collection.lock().publish(owner);
    }

    fn require_user(&self) -> Result<UserId, StoreError> {
        self.user
            .lock()
            .clone()
            .ok_or(StoreError::Rejected(StoreFailure::NotAuthenticated))
    }
}

impl TaskStore for MemoryTaskStore {
    async fn authenticate(&self, user: Option<&UserId>) -> Result<(), StoreError> {
        let mut current = self.user.lock();
        if current.as_ref() != user {
            let device = self.device;
            self.shared
                .collection
                .lock()
                .feeds
                .retain(|_, feed| feed.device != device);
            *current = user.cloned();
        }
        Ok(())
    }

    async fn insert(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let user = self.require_user()?;
        if task.owner.as_ref() != Some(&user) {
            return Err(StoreFailure::PermissionDenied.into());
        }
        if task.text.trim().is_empty() {
            return Err(StoreFailure::Invalid("task text is empty".to_string()).into());
        }

        let mut collection = self.shared.collection.lock();
        collection.check_available(None)?;
        let id = TaskId::generate();
        let mut doc = Task::from_new(id.clone(), task);
        if self.shared.pending_snapshots {
            doc.created_at = CreatedAt::Pending;
            collection.documents.insert(id.clone(), doc.clone());
            collection.publish(&user);
        }
        doc.created_at = CreatedAt::At(collection.stamp());
        collection.documents.insert(id.clone(), doc);
        collection.publish(&user);
        drop(collection);

        tracing::debug!(task_id = %id, owner = %user, "memory store insert");
        Ok(id)
    }

    async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<(), StoreError> {
        let user = self.require_user()?;
        let mut collection = self.shared.collection.lock();
        collection.check_available(Some(id))?;
        let doc = collection
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreFailure::NotFound(id.clone()))?;
        if doc.owner.as_ref() != Some(&user) {
            return Err(StoreFailure::PermissionDenied.into());
        }
        patch.apply(doc);
        collection.publish(&user);
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        let user = self.require_user()?;
        let mut collection = self.shared.collection.lock();
        collection.check_available(Some(id))?;
        match collection.documents.get(id) {
            None => return Ok(()),
            Some(doc) if doc.owner.as_ref() != Some(&user) => {
                return Err(StoreFailure::PermissionDenied.into());
            }
            Some(_) => {}
        }
        collection.documents.remove(id);
        collection.publish(&user);
        Ok(())
    }

    async fn subscribe(&self, filter: SnapshotFilter) -> Result<Subscription, StoreError> {
        let user = self.require_user()?;
        if filter.owner.as_ref() != Some(&user) {
            return Err(StoreFailure::PermissionDenied.into());
        }

        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut collection = self.shared.collection.lock();
        collection.check_available(None)?;
        let tasks = collection
            .documents
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        let _ = tx.send(Snapshot {
            subscription: id,
            tasks,
        });
        collection.feeds.insert(
            id,
            Feed {
                device: self.device,
                owner: user,
                tx,
            },
        );
        drop(collection);

        let shared = Arc::clone(&self.shared);
        Ok(Subscription::new(id, rx, move |id| {
            shared.collection.lock().feeds.remove(&id);
        }))
    }
}
