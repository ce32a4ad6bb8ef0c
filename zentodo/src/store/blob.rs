//! Key-value blob persistence for local mode.
//!
//! The whole task array is stored as one JSON document under a single key,
//! loaded once at startup and rewritten in full on every mutation.
//!
//! Local ids are millisecond numbers and are written as JSON numbers, so a
//! blob reads `[{"id":1700000000000,"text":"...",...}]`. Ids that are not
//! plain numbers are written as strings. Both forms are accepted on load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zentodo_proto::task::{Category, CreatedAt, Priority, Task, TaskId, UserId};

use super::StoreError;

/// Default key the local task array is stored under.
pub const DEFAULT_KEY: &str = "zen_todo_tasks";

/// Synchronous key-value store holding serialized task arrays.
pub trait BlobStore {
    /// Reads the task array stored under `key`, or `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the blob cannot be read, or
    /// [`StoreError::Serialization`] if it is not a valid task array.
    fn load(&self, key: &str) -> Result<Option<Vec<Task>>, StoreError>;

    /// Replaces the task array stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the blob cannot be written.
    fn save(&mut self, key: &str, tasks: &[Task]) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredId {
    Millis(u64),
    Text(String),
}

impl From<&TaskId> for StoredId {
    fn from(id: &TaskId) -> Self {
        match id.as_str().parse::<u64>() {
            Ok(ms) if ms.to_string() == id.as_str() => Self::Millis(ms),
            _ => Self::Text(id.as_str().to_string()),
        }
    }
}

impl From<StoredId> for TaskId {
    fn from(id: StoredId) -> Self {
        match id {
            StoredId::Millis(ms) => Self::from_millis(ms),
            StoredId::Text(text) => Self::new(text),
        }
    }
}

/// One element of the persisted array.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTask {
    id: StoredId,
    text: String,
    category: Category,
    priority: Priority,
    completed: bool,
    created_at: CreatedAt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<UserId>,
}

impl From<&Task> for StoredTask {
    fn from(task: &Task) -> Self {
        Self {
            id: StoredId::from(&task.id),
            text: task.text.clone(),
            category: task.category,
            priority: task.priority,
            completed: task.completed,
            created_at: task.created_at,
            owner: task.owner.clone(),
        }
    }
}

impl From<StoredTask> for Task {
    fn from(stored: StoredTask) -> Self {
        Self {
            id: stored.id.into(),
            text: stored.text,
            category: stored.category,
            priority: stored.priority,
            completed: stored.completed,
            created_at: stored.created_at,
            owner: stored.owner,
        }
    }
}

fn encode_tasks(tasks: &[Task]) -> Result<String, StoreError> {
    let stored: Vec<StoredTask> = tasks.iter().map(StoredTask::from).collect();
    Ok(serde_json::to_string(&stored)?)
}

fn decode_tasks(raw: &str) -> Result<Vec<Task>, StoreError> {
    let stored: Vec<StoredTask> = serde_json::from_str(raw)?;
    Ok(stored.into_iter().map(Task::from).collect())
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the blobs.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl BlobStore for FileBlobStore {
    fn load(&self, key: &str) -> Result<Option<Vec<Task>>, StoreError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => decode_tasks(&contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, key: &str, tasks: &[Task]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = encode_tasks(tasks)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), count = tasks.len(), "task blob written");
        Ok(())
    }
}

/// In-memory blob store. Values are kept as serialized JSON.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    entries: HashMap<String, String>,
    fail_writes: bool,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a raw value under `key`.
    pub fn insert_raw(&mut self, key: &str, raw: impl Into<String>) {
        self.entries.insert(key.to_string(), raw.into());
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Makes every subsequent save fail with an I/O error.
    pub const fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, key: &str) -> Result<Option<Vec<Task>>, StoreError> {
        self.entries.get(key).map(|raw| decode_tasks(raw)).transpose()
    }

    fn save(&mut self, key: &str, tasks: &[Task]) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(std::io::Error::other("storage quota exceeded").into());
        }
        let json = encode_tasks(tasks)?;
        self.entries.insert(key.to_string(), json);
        Ok(())
    }
}
