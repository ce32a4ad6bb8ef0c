//! Blob-backed repository for local mode.
//!
//! The task array is loaded once when the repository opens and rewritten in
//! full on every mutation. Each mutation persists the new array first and
//! commits it in memory only if the write succeeded.

use std::time::{SystemTime, UNIX_EPOCH};

use zentodo_proto::task::{Category, CreatedAt, Priority, Task, TaskId};

use super::{TaskDraft, TaskError};
use crate::store::blob::BlobStore;

/// Local task repository over a [`BlobStore`].
pub struct LocalRepository<B: BlobStore> {
    blob: B,
    key: String,
    tasks: Vec<Task>,
    last_id: u64,
}

impl<B: BlobStore> LocalRepository<B> {
    /// Loads the task array stored under `key`.
    ///
    /// If nothing is stored and `seed_examples` is set, the two sample tasks
    /// are written and loaded instead.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if the blob cannot be read or written.
    pub fn open(blob: B, key: impl Into<String>, seed_examples: bool) -> Result<Self, TaskError> {
        let key = key.into();
        let mut repo = Self {
            blob,
            key,
            tasks: Vec::new(),
            last_id: 0,
        };
        match repo.blob.load(&repo.key)? {
            Some(tasks) => {
                tracing::info!(key = %repo.key, count = tasks.len(), "loaded local tasks");
                repo.last_id = tasks
                    .iter()
                    .filter_map(|t| t.id.as_str().parse::<u64>().ok())
                    .max()
                    .unwrap_or(0);
                repo.tasks = tasks;
            }
            None if seed_examples => {
                let now = now_ms();
                let seeds = vec![
                    seed_task(1, "整理桌面", Category::Life, Priority::Low, now),
                    seed_task(2, "完成项目报告", Category::Work, Priority::High, now),
                ];
                repo.commit(seeds)?;
                repo.last_id = 2;
                tracing::info!(key = %repo.key, "seeded sample tasks");
            }
            None => {}
        }
        Ok(repo)
    }

    /// The visible set, most recently created first.
    #[must_use]
    pub fn visible(&self) -> &[Task] {
        &self.tasks
    }

    /// Consumes the repository and returns the underlying blob store.
    pub fn into_blob(self) -> B {
        self.blob
    }

    /// Creates a task stamped with the current wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn create(&mut self, draft: TaskDraft) -> Result<Task, TaskError> {
        self.create_at(draft, now_ms())
    }

    /// Creates a task as of `now_ms` and prepends it to the visible set.
    ///
    /// The id is `now_ms`, bumped past the last issued id so ids stay unique.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn create_at(&mut self, draft: TaskDraft, now_ms: u64) -> Result<Task, TaskError> {
        let id = now_ms.max(self.last_id + 1);
        let task = Task {
            id: TaskId::from_millis(id),
            text: draft.text,
            category: draft.category,
            priority: draft.priority,
            completed: false,
            created_at: CreatedAt::At(now_ms),
            owner: None,
        };

        let mut next = Vec::with_capacity(self.tasks.len() + 1);
        next.push(task.clone());
        next.extend(self.tasks.iter().cloned());
        self.commit(next)?;
        self.last_id = id;

        tracing::debug!(task_id = %task.id, "local task created");
        Ok(task)
    }

    /// Flips the completion flag of a task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if no task has this id.
    /// - [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn toggle(&mut self, id: &TaskId) -> Result<bool, TaskError> {
        let index = self
            .tasks
            .iter()
            .position(|t| t.id == *id)
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;
        let mut next = self.tasks.clone();
        next[index].completed = !next[index].completed;
        let completed = next[index].completed;
        self.commit(next)?;
        Ok(completed)
    }

    /// Deletes a task. Removing an unknown id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn remove(&mut self, id: &TaskId) -> Result<bool, TaskError> {
        if !self.tasks.iter().any(|t| t.id == *id) {
            return Ok(false);
        }
        let next = self.tasks.iter().filter(|t| t.id != *id).cloned().collect();
        self.commit(next)?;
        Ok(true)
    }

    /// Deletes every completed task in one rewrite. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] if persisting fails; nothing changes.
    pub fn clear_completed(&mut self) -> Result<usize, TaskError> {
        let next: Vec<Task> = self.tasks.iter().filter(|t| !t.completed).cloned().collect();
        let removed = self.tasks.len() - next.len();
        if removed > 0 {
            self.commit(next)?;
        }
        Ok(removed)
    }

    fn commit(&mut self, next: Vec<Task>) -> Result<(), TaskError> {
        if let Err(e) = self.blob.save(&self.key, &next) {
            tracing::warn!(key = %self.key, error = %e, "failed to persist local tasks");
            return Err(e.into());
        }
        self.tasks = next;
        Ok(())
    }
}

fn seed_task(id: u64, text: &str, category: Category, priority: Priority, now: u64) -> Task {
    Task {
        id: TaskId::from_millis(id),
        text: text.to_string(),
        category,
        priority,
        completed: false,
        created_at: CreatedAt::At(now),
        owner: None,
    }
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
