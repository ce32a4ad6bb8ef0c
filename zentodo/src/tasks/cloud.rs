//! Repository over a hosted task store.
//!
//! Writes are handed back as [`PendingWrite`] futures that complete on their
//! own; the visible set never changes because of a write. It changes only
//! when a snapshot from the current subscription is applied, and it is
//! replaced wholesale each time.
//!
//! Identity changes tear the old subscription down before anything else
//! happens, so a late push addressed to the previous identity can never
//! repopulate the visible set.

use std::future::Future;
use std::pin::Pin;

use zentodo_proto::task::{CreatedAt, NewTask, Task, TaskId, TaskPatch, UserId};
use zentodo_proto::wire::SnapshotFilter;

use super::{TaskDraft, TaskError};
use crate::identity::AuthState;
use crate::store::{Snapshot, StoreError, Subscription, TaskStore};

/// A store write in flight, independent of the repository.
pub type PendingWrite<T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'static>>;

/// Cloud-mode task repository.
pub struct CloudRepository<S: TaskStore> {
    store: S,
    auth: AuthState,
    subscription: Option<Subscription>,
    visible: Vec<Task>,
}

impl<S: TaskStore> CloudRepository<S> {
    /// Creates a repository in the [`AuthState::Unknown`] state.
    pub const fn new(store: S) -> Self {
        Self {
            store,
            auth: AuthState::Unknown,
            subscription: None,
            visible: Vec::new(),
        }
    }

    /// Current identity state.
    #[must_use]
    pub const fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// The visible set as of the last applied snapshot.
    #[must_use]
    pub fn visible(&self) -> &[Task] {
        &self.visible
    }

    /// The store handle.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Whether a live subscription is held.
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Moves to the identity `next`.
    ///
    /// The old subscription is closed and the visible set cleared before the
    /// store is told about the new identity. With an identity, a new
    /// subscription scoped to it is opened. Returns `false` if `next` is the
    /// identity already in effect.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if authenticating or subscribing fails.
    /// The repository is then left in [`AuthState::Unknown`] without a
    /// subscription, so creates are ignored and a later call with the same
    /// identity tries again.
    pub async fn set_auth(&mut self, next: Option<UserId>) -> Result<bool, TaskError> {
        let next = AuthState::from_identity(next);
        if next == self.auth {
            return Ok(false);
        }

        self.teardown();
        self.auth = AuthState::Unknown;

        let user = next.user().cloned();
        if let Err(e) = self.store.authenticate(user.as_ref()).await {
            tracing::warn!(auth = %next, error = %e, "identity change failed");
            return Err(e.into());
        }
        if let Some(user) = user {
            let subscription = match self.store.subscribe(SnapshotFilter::owned_by(user)).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::warn!(auth = %next, error = %e, "subscribe failed");
                    return Err(e.into());
                }
            };
            tracing::info!(subscription = %subscription.id(), "subscribed to task feed");
            self.subscription = Some(subscription);
        }

        self.auth = next;
        tracing::info!(auth = %self.auth, "identity changed");
        Ok(true)
    }

    /// Starts inserting a new task owned by the signed-in user.
    ///
    /// Returns `None` without touching the store when nobody is signed in.
    /// The task appears only once a snapshot containing it arrives.
    #[must_use]
    pub fn create(&self, draft: TaskDraft) -> Option<PendingWrite<TaskId>> {
        let Some(user) = self.auth.user() else {
            tracing::debug!("create ignored: no identity");
            return None;
        };
        let task = NewTask {
            text: draft.text,
            category: draft.category,
            priority: draft.priority,
            completed: false,
            created_at: CreatedAt::Pending,
            owner: Some(user.clone()),
        };
        let store = self.store.clone();
        Some(Box::pin(async move { store.insert(task).await }))
    }

    /// Starts flipping the completion flag of a visible task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] if the id is not in the visible set.
    pub fn toggle(&self, id: &TaskId) -> Result<PendingWrite<()>, TaskError> {
        let task = self
            .visible
            .iter()
            .find(|t| t.id == *id)
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;
        let patch = TaskPatch::completed(!task.completed);
        let store = self.store.clone();
        let id = id.clone();
        Ok(Box::pin(async move { store.update(&id, patch).await }))
    }

    /// Starts deleting a task. Deleting an unknown id succeeds at the store.
    #[must_use]
    pub fn remove(&self, id: &TaskId) -> PendingWrite<()> {
        let store = self.store.clone();
        let id = id.clone();
        Box::pin(async move { store.delete(&id).await })
    }

    /// Starts one delete per visible completed task.
    ///
    /// The deletes are independent: if some fail, the others still apply and
    /// nothing is rolled back.
    #[must_use]
    pub fn clear_completed(&self) -> Vec<(TaskId, PendingWrite<()>)> {
        self.visible
            .iter()
            .filter(|t| t.completed)
            .map(|t| (t.id.clone(), self.remove(&t.id)))
            .collect()
    }

    /// Replaces the visible set if `snapshot` came from the current
    /// subscription. Returns whether it was applied.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> bool {
        let current = self.subscription.as_ref().map(Subscription::id);
        if current != Some(snapshot.subscription) {
            tracing::debug!(
                subscription = %snapshot.subscription,
                count = snapshot.tasks.len(),
                "stale snapshot dropped"
            );
            return false;
        }
        self.visible = snapshot.tasks;
        true
    }

    /// Applies every buffered snapshot. Returns whether the visible set changed.
    pub fn drain_snapshots(&mut self) -> bool {
        let mut changed = false;
        while let Some(snapshot) = self.subscription.as_mut().and_then(Subscription::try_next) {
            changed |= self.apply_snapshot(snapshot);
        }
        changed
    }

    /// Waits for the next snapshot and applies it.
    ///
    /// Returns `false` immediately when no subscription is held, or once the
    /// feed has ended.
    pub async fn next_snapshot(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.next().await {
            Some(snapshot) => self.apply_snapshot(snapshot),
            None => {
                tracing::warn!("task feed ended");
                false
            }
        }
    }

    /// Closes the subscription and clears the visible set.
    pub fn close(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            tracing::info!(subscription = %subscription.id(), "unsubscribed from task feed");
            subscription.close();
        }
        self.visible.clear();
    }
}
