//! Cloud-mode session.
//!
//! Commands start store writes on a [`JoinSet`] and return immediately.
//! [`CloudSession::pump`] is the single place where state moves forward:
//! it follows identity changes, applies buffered snapshots, and reaps
//! finished writes, reporting failures as [`SessionEvent::WriteFailed`].

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use zentodo_proto::task::{Category, Priority, Task, TaskId, UserId};

use super::{EventSink, SessionEvent, WriteFailure, WriteOp};
use crate::identity::{AuthState, IdentityError, IdentityProvider};
use crate::store::{StoreError, TaskStore};
use crate::tasks::{CloudRepository, TaskDraft, TaskError};
use crate::view::{CategoryFilter, StatusFilter, Stats, ViewModel};

type WriteResult = (WriteOp, Result<(), StoreError>);

/// A cloud session over a hosted store and an identity provider.
pub struct CloudSession<S: TaskStore, I: IdentityProvider> {
    repo: CloudRepository<S>,
    identity: I,
    identity_rx: watch::Receiver<Option<UserId>>,
    view: ViewModel,
    writes: JoinSet<WriteResult>,
    events: EventSink,
}

impl<S: TaskStore, I: IdentityProvider> CloudSession<S, I> {
    /// Opens the session and settles on the provider's current identity,
    /// subscribing if someone is signed in.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if authenticating or subscribing fails.
    pub async fn open(store: S, identity: I) -> Result<Self, TaskError> {
        let mut identity_rx = identity.watch();
        let current = identity_rx.borrow_and_update().clone();
        let mut session = Self {
            repo: CloudRepository::new(store),
            identity,
            identity_rx,
            view: ViewModel::new(),
            writes: JoinSet::new(),
            events: EventSink::default(),
        };
        session.repo.set_auth(current).await?;
        session.repo.drain_snapshots();
        session.view.refresh(session.repo.visible());
        tracing::info!(auth = %session.repo.auth(), "cloud session opened");
        Ok(session)
    }

    /// Returns a receiver for session events, replacing any earlier one.
    pub fn subscribe_events(&mut self, buffer: usize) -> mpsc::Receiver<SessionEvent> {
        self.events.subscribe(buffer)
    }

    /// Current identity state.
    #[must_use]
    pub const fn auth(&self) -> &AuthState {
        self.repo.auth()
    }

    /// Filtered, ordered rows.
    #[must_use]
    pub fn rows(&self) -> &[Task] {
        self.view.rows()
    }

    /// Stats over the whole visible set.
    #[must_use]
    pub const fn stats(&self) -> Stats {
        self.view.stats()
    }

    /// The visible set, unfiltered.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        self.repo.visible()
    }

    /// The store handle.
    pub const fn store(&self) -> &S {
        self.repo.store()
    }

    /// Number of writes still in flight.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Changes the status filter.
    pub fn set_status_filter(&mut self, status: StatusFilter) {
        self.view.set_status_filter(status);
        self.events.emit(SessionEvent::ViewChanged);
    }

    /// Changes the category filter.
    pub fn set_category_filter(&mut self, category: CategoryFilter) {
        self.view.set_category_filter(category);
        self.events.emit(SessionEvent::ViewChanged);
    }

    /// Starts adding a task. Returns `false` if nobody is signed in, in
    /// which case nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TextEmpty`] for blank text.
    pub fn add_task(
        &mut self,
        text: &str,
        category: Category,
        priority: Priority,
    ) -> Result<bool, TaskError> {
        let draft = TaskDraft::new(text, category, priority)?;
        let Some(write) = self.repo.create(draft) else {
            return Ok(false);
        };
        self.spawn_write(WriteOp::Insert, async move { write.await.map(|_| ()) });
        Ok(true)
    }

    /// Starts flipping a task's completion flag.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] if the task is not visible.
    pub fn toggle_task(&mut self, id: &TaskId) -> Result<(), TaskError> {
        let write = self.repo.toggle(id)?;
        self.spawn_write(WriteOp::Toggle(id.clone()), write);
        Ok(())
    }

    /// Starts deleting a task.
    pub fn delete_task(&mut self, id: &TaskId) {
        let write = self.repo.remove(id);
        self.spawn_write(WriteOp::Delete(id.clone()), write);
    }

    /// Starts deleting every completed task. Returns how many deletes were
    /// started. The deletes succeed or fail independently.
    pub fn clear_completed(&mut self) -> usize {
        let writes = self.repo.clear_completed();
        let count = writes.len();
        for (id, write) in writes {
            self.spawn_write(WriteOp::Delete(id), write);
        }
        count
    }

    /// Signs in through the provider and subscribes for the new identity.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Identity`] if the provider fails.
    /// - [`SessionError::Task`] if subscribing fails.
    pub async fn sign_in(&mut self) -> Result<UserId, SessionError> {
        let user = self.identity.sign_in().await?;
        self.identity_rx.mark_unchanged();
        self.apply_identity(Some(user.clone())).await?;
        Ok(user)
    }

    /// Tears the subscription down, then signs out of the provider.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Task`] if the store refuses the identity change.
    /// - [`SessionError::Identity`] if the provider fails.
    pub async fn sign_out(&mut self) -> Result<(), SessionError> {
        self.apply_identity(None).await?;
        self.identity.sign_out().await?;
        self.identity_rx.mark_unchanged();
        Ok(())
    }

    /// Moves state forward without waiting: follows an identity change (or
    /// retries one that failed), applies buffered snapshots, and reaps
    /// finished writes. Returns whether the view changed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if following an identity change fails.
    pub async fn pump(&mut self) -> Result<bool, TaskError> {
        let mut changed = false;
        // Unknown means the last identity change failed; follow the provider again.
        let unresolved = matches!(self.repo.auth(), AuthState::Unknown);
        if unresolved || self.identity_rx.has_changed().unwrap_or(false) {
            let next = self.identity_rx.borrow_and_update().clone();
            changed |= self.apply_identity(next).await?;
        }
        while let Some(joined) = self.writes.try_join_next() {
            self.reap(joined);
        }
        if self.repo.drain_snapshots() {
            self.refresh();
            changed = true;
        }
        Ok(changed)
    }

    /// Waits for every in-flight write, then pumps.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if following an identity change fails.
    pub async fn settle(&mut self) -> Result<bool, TaskError> {
        while let Some(joined) = self.writes.join_next().await {
            self.reap(joined);
        }
        self.pump().await
    }

    /// Waits for the next snapshot push and applies it. Returns `false` if
    /// there is no live feed.
    pub async fn wait_for_snapshot(&mut self) -> bool {
        let applied = self.repo.next_snapshot().await;
        if applied {
            self.refresh();
        }
        applied
    }

    /// Ends the session: closes the feed and abandons in-flight writes.
    /// Call [`settle`](Self::settle) first to let writes finish.
    pub fn close(mut self) {
        self.repo.close();
        if !self.writes.is_empty() {
            tracing::warn!(pending = self.writes.len(), "closing with writes in flight");
        }
        self.writes.abort_all();
        tracing::info!("cloud session closed");
    }

    async fn apply_identity(&mut self, next: Option<UserId>) -> Result<bool, TaskError> {
        let result = self.repo.set_auth(next).await;
        // The old feed is gone even if the new one failed to open.
        self.refresh();
        let switched = result?;
        if switched {
            self.repo.drain_snapshots();
            self.refresh();
            self.events
                .emit(SessionEvent::AuthChanged(self.repo.auth().clone()));
        }
        Ok(switched)
    }

    fn spawn_write(
        &mut self,
        op: WriteOp,
        write: impl std::future::Future<Output = Result<(), StoreError>> + Send + 'static,
    ) {
        tracing::debug!(%op, "write started");
        self.writes.spawn(async move { (op, write.await) });
    }

    fn reap(&self, joined: Result<WriteResult, tokio::task::JoinError>) {
        match joined {
            Ok((op, Ok(()))) => tracing::debug!(%op, "write applied"),
            Ok((op, Err(error))) => {
                tracing::warn!(%op, %error, "write failed");
                self.events
                    .emit(SessionEvent::WriteFailed(WriteFailure { op, error }));
            }
            Err(e) => tracing::warn!(error = %e, "write task aborted"),
        }
    }

    fn refresh(&mut self) {
        self.view.refresh(self.repo.visible());
        self.events.emit(SessionEvent::ViewChanged);
    }
}

/// Errors from identity commands.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The identity provider failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The repository could not follow the identity change.
    #[error(transparent)]
    Task(#[from] TaskError),
}
