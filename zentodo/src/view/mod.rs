//! Filter and sort engine over the visible task set.
//!
//! [`derive_view`] is a pure function from tasks and filters to the ordered
//! rows shown to the user. [`ViewModel`] holds the current filters and
//! recomputes rows and [`Stats`] in full whenever the visible set or a
//! filter changes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use zentodo_proto::task::{Category, ParseLabelError, Task};

/// Completion filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    /// Every task.
    #[default]
    All,
    /// Incomplete tasks only.
    Active,
    /// Completed tasks only.
    Completed,
}

impl StatusFilter {
    /// Returns `true` if the task passes this filter.
    #[must_use]
    pub const fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" | "全部" => Ok(Self::All),
            "active" | "进行中" => Ok(Self::Active),
            "completed" | "done" | "已完成" => Ok(Self::Completed),
            _ => Err(ParseLabelError {
                kind: "status",
                label: s.to_string(),
            }),
        }
    }
}

/// Category filter: everything, or exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    /// Every category.
    #[default]
    All,
    /// Only tasks in this category.
    Only(Category),
}

impl CategoryFilter {
    /// Returns `true` if the task passes this filter.
    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Only(category) => task.category == category,
        }
    }
}

impl From<Option<Category>> for CategoryFilter {
    fn from(value: Option<Category>) -> Self {
        value.map_or(Self::All, Self::Only)
    }
}

/// Both filters, AND-combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Filters {
    /// Completion filter.
    pub status: StatusFilter,
    /// Category filter.
    pub category: CategoryFilter,
}

impl Filters {
    /// Returns `true` if the task passes both filters.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.matches(task) && self.category.matches(task)
    }
}

/// Display ordering: incomplete first, then priority high to low, then
/// newest first. A pending creation time counts as the oldest.
#[must_use]
pub fn compare_tasks(a: &Task, b: &Task) -> Ordering {
    a.completed
        .cmp(&b.completed)
        .then_with(|| b.priority.rank().cmp(&a.priority.rank()))
        .then_with(|| b.created_at.sort_key().cmp(&a.created_at.sort_key()))
}

/// Filters and sorts `tasks` into display rows.
#[must_use]
pub fn derive_view(tasks: &[Task], filters: Filters) -> Vec<Task> {
    let mut rows: Vec<Task> = tasks
        .iter()
        .filter(|t| filters.matches(t))
        .cloned()
        .collect();
    rows.sort_by(compare_tasks);
    rows
}

/// Counts over the whole visible set, independent of filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    /// Number of tasks.
    pub total: usize,
    /// Number of completed tasks.
    pub completed: usize,
    /// Number of incomplete tasks.
    pub active: usize,
}

impl Stats {
    /// Computes stats over `tasks`.
    #[must_use]
    pub fn of(tasks: &[Task]) -> Self {
        let completed = tasks.iter().filter(|t| t.completed).count();
        Self {
            total: tasks.len(),
            completed,
            active: tasks.len() - completed,
        }
    }

    /// Completion percentage rounded half up; 0 for an empty set.
    #[must_use]
    pub const fn percent(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        (200 * self.completed + self.total) / (2 * self.total)
    }

    /// Whether "clear completed" has anything to do.
    #[must_use]
    pub const fn has_completed(&self) -> bool {
        self.completed > 0
    }

    /// One-line progress summary.
    #[must_use]
    pub fn summary_line(&self) -> String {
        if self.active == 0 && self.total > 0 {
            "太棒了！所有任务已清空 🎉".to_string()
        } else {
            format!("你还有 {} 个任务待处理", self.active)
        }
    }
}

/// Current filters plus the rows and stats derived from the last refresh.
#[derive(Debug, Clone, Default)]
pub struct ViewModel {
    filters: Filters,
    tasks: Vec<Task>,
    rows: Vec<Task>,
    stats: Stats,
}

impl ViewModel {
    /// Creates an empty view with no filtering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the visible set and recomputes.
    pub fn refresh(&mut self, tasks: &[Task]) {
        tasks.clone_into(&mut self.tasks);
        self.recompute();
    }

    /// Changes the status filter and recomputes.
    pub fn set_status_filter(&mut self, status: StatusFilter) {
        self.filters.status = status;
        self.recompute();
    }

    /// Changes the category filter and recomputes.
    pub fn set_category_filter(&mut self, category: CategoryFilter) {
        self.filters.category = category;
        self.recompute();
    }

    /// Active filters.
    #[must_use]
    pub const fn filters(&self) -> Filters {
        self.filters
    }

    /// Filtered, ordered rows.
    #[must_use]
    pub fn rows(&self) -> &[Task] {
        &self.rows
    }

    /// Stats over the whole visible set.
    #[must_use]
    pub const fn stats(&self) -> Stats {
        self.stats
    }

    fn recompute(&mut self) {
        self.rows = derive_view(&self.tasks, self.filters);
        self.stats = Stats::of(&self.tasks);
    }
}
