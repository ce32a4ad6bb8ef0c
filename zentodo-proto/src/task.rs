//! Task model shared by the `ZenTodo` client and the hosted task store.
//!
//! A [`Task`] is the only entity. Its `created_at` is either a concrete
//! millisecond timestamp or [`CreatedAt::Pending`] while a server-assigned
//! timestamp has not yet been resolved. Categories and priorities are
//! closed label sets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a category or priority label cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label: {label}")]
pub struct ParseLabelError {
    /// Which label set was being parsed (`category` or `priority`).
    pub kind: &'static str,
    /// The rejected input.
    pub label: String,
}

/// Opaque task identifier.
///
/// Local tasks use a wall-clock millisecond value; hosted tasks use a
/// store-assigned UUID v7 document id. Both are carried as strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier derived from a millisecond timestamp (local mode).
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        Self(ms.to_string())
    }

    /// Fresh time-ordered document identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable opaque user identifier yielded by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed category label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Category {
    /// 工作
    #[default]
    #[serde(rename = "工作")]
    Work,
    /// 生活
    #[serde(rename = "生活")]
    Life,
    /// 学习
    #[serde(rename = "学习")]
    Study,
    /// 健康
    #[serde(rename = "健康")]
    Health,
    /// 杂项
    #[serde(rename = "杂项")]
    Misc,
}

impl Category {
    /// All categories in display order.
    pub const ALL: [Self; 5] = [Self::Work, Self::Life, Self::Study, Self::Health, Self::Misc];

    /// The user-facing label, which is also the stored value.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Work => "工作",
            Self::Life => "生活",
            Self::Study => "学习",
            Self::Health => "健康",
            Self::Misc => "杂项",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "工作" | "work" => Ok(Self::Work),
            "生活" | "life" => Ok(Self::Life),
            "学习" | "study" => Ok(Self::Study),
            "健康" | "health" => Ok(Self::Health),
            "杂项" | "misc" => Ok(Self::Misc),
            _ => Err(ParseLabelError {
                kind: "category",
                label: s.to_string(),
            }),
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// 高优
    High,
    /// 中等
    #[default]
    Medium,
    /// 低优
    Low,
}

impl Priority {
    /// Numeric rank used for ordering: high=3, medium=2, low=1.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    /// Short display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::High => "高优",
            Self::Medium => "中等",
            Self::Low => "低优",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" | "高优" => Ok(Self::High),
            "medium" | "中等" => Ok(Self::Medium),
            "low" | "低优" => Ok(Self::Low),
            _ => Err(ParseLabelError {
                kind: "priority",
                label: s.to_string(),
            }),
        }
    }
}

/// Creation time of a task.
///
/// Serialized as an optional millisecond timestamp: `null` means the
/// server has not assigned the timestamp yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum CreatedAt {
    /// Server assignment still outstanding.
    Pending,
    /// Milliseconds since the Unix epoch.
    At(u64),
}

impl CreatedAt {
    /// Value used by the view ordering; pending counts as the oldest possible time.
    #[must_use]
    pub const fn sort_key(self) -> u64 {
        match self {
            Self::Pending => 0,
            Self::At(ms) => ms,
        }
    }

    /// Returns `true` while the server timestamp is outstanding.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns the timestamp, if assigned.
    #[must_use]
    pub const fn millis(self) -> Option<u64> {
        match self {
            Self::Pending => None,
            Self::At(ms) => Some(ms),
        }
    }
}

impl From<Option<u64>> for CreatedAt {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Pending, Self::At)
    }
}

impl From<CreatedAt> for Option<u64> {
    fn from(value: CreatedAt) -> Self {
        value.millis()
    }
}

/// A trackable to-do item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique within the visible set.
    pub id: TaskId,
    /// User-entered text.
    pub text: String,
    /// Fixed category label.
    pub category: Category,
    /// Priority level.
    pub priority: Priority,
    /// Completion flag; the only field that changes after creation.
    pub completed: bool,
    /// Creation time, possibly pending server assignment.
    pub created_at: CreatedAt,
    /// Owning user in cloud mode; `None` for local tasks.
    #[serde(default)]
    pub owner: Option<UserId>,
}

impl Task {
    /// Attaches an identifier to a stored-but-unidentified task.
    #[must_use]
    pub fn from_new(id: TaskId, task: NewTask) -> Self {
        Self {
            id,
            text: task.text,
            category: task.category,
            priority: task.priority,
            completed: task.completed,
            created_at: task.created_at,
            owner: task.owner,
        }
    }
}

/// A task as handed to a store for insertion, before an id exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    /// User-entered text.
    pub text: String,
    /// Fixed category label.
    pub category: Category,
    /// Priority level.
    pub priority: Priority,
    /// Always `false` for new tasks.
    pub completed: bool,
    /// Client timestamp (local) or [`CreatedAt::Pending`] (cloud).
    pub created_at: CreatedAt,
    /// Creating user in cloud mode.
    #[serde(default)]
    pub owner: Option<UserId>,
}

/// A partial update to a stored task.
///
/// Completion is the only field with an update path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New completion state, if changing.
    pub completed: Option<bool>,
}

impl TaskPatch {
    /// Patch that sets the completion flag.
    #[must_use]
    pub const fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
        }
    }

    /// Applies the patch in place.
    pub const fn apply(&self, task: &mut Task) {
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}
