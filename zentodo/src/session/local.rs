//! Local-mode session.

use tokio::sync::mpsc;
use zentodo_proto::task::{Category, Priority, Task, TaskId};

use super::{EventSink, SessionEvent};
use crate::store::blob::BlobStore;
use crate::tasks::{LocalRepository, TaskDraft, TaskError};
use crate::view::{CategoryFilter, StatusFilter, Stats, ViewModel};

/// A local session over a blob store. Single implicit user.
pub struct LocalSession<B: BlobStore> {
    repo: LocalRepository<B>,
    view: ViewModel,
    events: EventSink,
}

impl<B: BlobStore> LocalSession<B> {
    /// Opens the session, loading (or seeding) the stored task array.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if the blob cannot be read or seeded.
    pub fn open(blob: B, key: &str, seed_examples: bool) -> Result<Self, TaskError> {
        let repo = LocalRepository::open(blob, key, seed_examples)?;
        let mut view = ViewModel::new();
        view.refresh(repo.visible());
        tracing::info!(key, tasks = repo.visible().len(), "local session opened");
        Ok(Self {
            repo,
            view,
            events: EventSink::default(),
        })
    }

    /// Returns a receiver for session events, replacing any earlier one.
    pub fn subscribe_events(&mut self, buffer: usize) -> mpsc::Receiver<SessionEvent> {
        self.events.subscribe(buffer)
    }

    /// Filtered, ordered rows.
    #[must_use]
    pub fn rows(&self) -> &[Task] {
        self.view.rows()
    }

    /// Stats over every task.
    #[must_use]
    pub const fn stats(&self) -> Stats {
        self.view.stats()
    }

    /// Every task, unfiltered, in storage order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        self.repo.visible()
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

    /// Adds a task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::TextEmpty`] for blank text; nothing changes.
    /// - [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn add_task(
        &mut self,
        text: &str,
        category: Category,
        priority: Priority,
    ) -> Result<Task, TaskError> {
        let draft = TaskDraft::new(text, category, priority)?;
        let task = self.repo.create(draft)?;
        self.refresh();
        Ok(task)
    }

    /// Flips a task's completion flag and returns the new state.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] for an unknown id.
    /// - [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn toggle_task(&mut self, id: &TaskId) -> Result<bool, TaskError> {
        let completed = self.repo.toggle(id)?;
        self.refresh();
        Ok(completed)
    }

    /// Deletes a task. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn delete_task(&mut self, id: &TaskId) -> Result<bool, TaskError> {
        let removed = self.repo.remove(id)?;
        if removed {
            self.refresh();
        }
        Ok(removed)
    }

    /// Deletes every completed task. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn clear_completed(&mut self) -> Result<usize, TaskError> {
        let removed = self.repo.clear_completed()?;
        if removed > 0 {
            self.refresh();
        }
        Ok(removed)
    }

    /// Ends the session and hands back the blob store.
    pub fn close(self) -> B {
        tracing::info!("local session closed");
        self.repo.into_blob()
    }

    fn refresh(&mut self) {
        self.view.refresh(self.repo.visible());
        self.events.emit(SessionEvent::ViewChanged);
    }
}
