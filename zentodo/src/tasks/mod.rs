//! Task repositories: the only code that mutates a task store.
//!
//! [`local::LocalRepository`] owns a blob-backed task array and applies
//! mutations synchronously. [`cloud::CloudRepository`] issues writes to a
//! hosted store and takes its visible set wholesale from snapshot pushes.

pub mod cloud;
pub mod local;

pub use cloud::{CloudRepository, PendingWrite};
pub use local::LocalRepository;

use thiserror::Error;
use zentodo_proto::task::{Category, Priority, TaskId};

use crate::store::StoreError;

/// Errors that can occur during task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task text is empty after trimming.
    #[error("task text cannot be empty")]
    TextEmpty,

    /// Task with the given ID is not in the visible set.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The task store failed; the visible set is unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validated input for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    text: String,
    category: Category,
    priority: Priority,
}

impl TaskDraft {
    /// Validates a new task. The text is kept as entered.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TextEmpty`] if `text` is blank.
    pub fn new(
        text: impl Into<String>,
        category: Category,
        priority: Priority,
    ) -> Result<Self, TaskError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(TaskError::TextEmpty);
        }
        Ok(Self {
            text,
            category,
            priority,
        })
    }

    /// Task text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Chosen category.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Chosen priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }
}
