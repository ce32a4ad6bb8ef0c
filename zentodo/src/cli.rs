//! Command-line presentation: subcommands, id lookup, and plain-text
//! rendering of the view.
//!
//! Each command runs against an open session and returns the text to print.
//! Ids can be given as any unambiguous prefix of what `list` shows.

use std::fmt::Write as _;

use tokio::sync::mpsc;
use zentodo_proto::task::{Category, CreatedAt, Priority, Task, TaskId};

use crate::config::{ClientConfig, ConfigError};
use crate::identity::IdentityProvider;
use crate::session::{
    CloudSession, LocalSession, SessionError, SessionEvent, WriteFailure,
};
use crate::store::blob::BlobStore;
use crate::store::{StoreError, TaskStore};
use crate::tasks::TaskError;
use crate::view::{CategoryFilter, StatusFilter, Stats};

/// Shortest id prefix shown by `list`.
const MIN_ID_WIDTH: usize = 6;

/// Subcommands of the `zentodo` binary.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add a task.
    Add {
        /// Task text; words are joined with spaces.
        #[arg(required = true)]
        text: Vec<String>,
        /// Category (工作/生活/学习/健康/杂项 or work/life/study/health/misc).
        #[arg(short, long)]
        category: Option<Category>,
        /// Priority (high, medium, low).
        #[arg(short, long)]
        priority: Option<Priority>,
    },
    /// List tasks, highest priority first.
    List {
        /// Completion filter (all, active, completed).
        #[arg(short, long, default_value_t = StatusFilter::All)]
        status: StatusFilter,
        /// Only show one category.
        #[arg(short, long)]
        category: Option<Category>,
    },
    /// Flip a task between active and completed.
    Toggle {
        /// Task id or unambiguous prefix.
        id: String,
    },
    /// Delete a task.
    Rm {
        /// Task id or unambiguous prefix.
        id: String,
    },
    /// Delete every completed task.
    ClearCompleted,
    /// Show progress.
    Stats,
}

impl Default for Command {
    fn default() -> Self {
        Self::List {
            status: StatusFilter::All,
            category: None,
        }
    }
}

/// Errors surfaced to the user by the CLI.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A repository command failed.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Signing in or out failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The store could not be reached.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No task id starts with the given text.
    #[error("no task matches id {0}")]
    UnknownId(String),

    /// More than one task id starts with the given text.
    #[error("id prefix {prefix} matches {count} tasks")]
    AmbiguousId {
        /// The text given.
        prefix: String,
        /// How many ids it matched.
        count: usize,
    },

    /// A cloud write was attempted without an identity.
    #[error("not signed in")]
    NotSignedIn,

    /// One or more background writes failed.
    #[error("{count} write(s) failed, first: {first}")]
    WritesFailed {
        /// Number of failed writes.
        count: usize,
        /// The first failure reported.
        first: WriteFailure,
    },
}

/// Finds the task whose id equals `input`, or else the single task whose id
/// starts with it.
///
/// # Errors
///
/// - [`CliError::UnknownId`] if nothing matches.
/// - [`CliError::AmbiguousId`] if the prefix matches several tasks.
pub fn resolve_id(tasks: &[Task], input: &str) -> Result<TaskId, CliError> {
    let input = input.trim();
    if let Some(task) = tasks.iter().find(|t| t.id.as_str() == input) {
        return Ok(task.id.clone());
    }
    if input.is_empty() {
        return Err(CliError::UnknownId(input.to_string()));
    }
    let mut matches = tasks.iter().filter(|t| t.id.as_str().starts_with(input));
    match (matches.next(), matches.count()) {
        (None, _) => Err(CliError::UnknownId(input.to_string())),
        (Some(task), 0) => Ok(task.id.clone()),
        (Some(_), rest) => Err(CliError::AmbiguousId {
            prefix: input.to_string(),
            count: rest + 1,
        }),
    }
}

/// Shortest prefix length, at least [`MIN_ID_WIDTH`], that tells every id
/// apart.
fn id_width(tasks: &[Task]) -> usize {
    let longest = tasks.iter().map(|t| t.id.as_str().len()).max().unwrap_or(0);
    let mut width = MIN_ID_WIDTH.min(longest);
    while width < longest {
        let mut prefixes: Vec<&str> = tasks
            .iter()
            .map(|t| prefix(t.id.as_str(), width))
            .collect();
        prefixes.sort_unstable();
        let before = prefixes.len();
        prefixes.dedup();
        if prefixes.len() == before {
            break;
        }
        width += 1;
    }
    width
}

fn prefix(id: &str, width: usize) -> &str {
    id.char_indices()
        .nth(width)
        .map_or(id, |(end, _)| &id[..end])
}

fn format_created(created_at: CreatedAt, format: &str) -> String {
    created_at
        .millis()
        .and_then(|ms| i64::try_from(ms).ok())
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(
            || "…".to_string(),
            |at| at.with_timezone(&chrono::Local).format(format).to_string(),
        )
}

/// Renders one row per task followed by the progress footer.
#[must_use]
pub fn render_list(rows: &[Task], stats: Stats, timestamp_format: &str) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        out.push_str("暂无任务\n");
    }
    let width = id_width(rows);
    for task in rows {
        let mark = if task.completed { "[x]" } else { "[ ]" };
        let _ = writeln!(
            out,
            "{mark} {id:<width$}  {priority}  {category}  {text}  {created}",
            id = prefix(task.id.as_str(), width),
            priority = task.priority.label(),
            category = task.category,
            text = task.text,
            created = format_created(task.created_at, timestamp_format),
        );
    }
    out.push_str(&render_stats(stats));
    out
}

/// Renders the summary line and completion percentage.
#[must_use]
pub fn render_stats(stats: Stats) -> String {
    format!(
        "{}\n完成度 {}% ({}/{})\n",
        stats.summary_line(),
        stats.percent(),
        stats.completed,
        stats.total
    )
}

/// Runs `command` against a local session.
///
/// # Errors
///
/// Returns [`CliError`] if the id cannot be resolved or the command fails.
pub fn execute_local<B: BlobStore>(
    session: &mut LocalSession<B>,
    command: &Command,
    config: &ClientConfig,
) -> Result<String, CliError> {
    let mut out = String::new();
    match command {
        Command::Add {
            text,
            category,
            priority,
        } => {
            let task = session.add_task(
                &text.join(" "),
                category.unwrap_or(config.default_category),
                priority.unwrap_or(config.default_priority),
            )?;
            let _ = writeln!(out, "已添加: {}", task.text);
        }
        Command::List { status, category } => {
            session.set_status_filter(*status);
            session.set_category_filter(CategoryFilter::from(*category));
        }
        Command::Toggle { id } => {
            let id = resolve_id(session.tasks(), id)?;
            let completed = session.toggle_task(&id)?;
            let _ = writeln!(out, "{}: {id}", toggle_word(completed));
        }
        Command::Rm { id } => {
            let id = resolve_id(session.tasks(), id)?;
            session.delete_task(&id)?;
            let _ = writeln!(out, "已删除: {id}");
        }
        Command::ClearCompleted => {
            let removed = session.clear_completed()?;
            let _ = writeln!(out, "已清除 {removed} 个已完成任务");
        }
        Command::Stats => return Ok(render_stats(session.stats())),
    }
    out.push_str(&render_list(
        session.rows(),
        session.stats(),
        &config.timestamp_format,
    ));
    Ok(out)
}

/// Runs `command` against a cloud session and waits for its writes to land.
///
/// # Errors
///
/// - [`CliError::NotSignedIn`] for a write without an identity.
/// - [`CliError::WritesFailed`] if the store refused any write.
/// - [`CliError::UnknownId`] or [`CliError::AmbiguousId`] for a bad id.
pub async fn execute_cloud<S: TaskStore, I: IdentityProvider>(
    session: &mut CloudSession<S, I>,
    command: &Command,
    config: &ClientConfig,
) -> Result<String, CliError> {
    let mut events = session.subscribe_events(config.event_buffer);
    let mut out = String::new();
    match command {
        Command::Add {
            text,
            category,
            priority,
        } => {
            let text = text.join(" ");
            let started = session.add_task(
                &text,
                category.unwrap_or(config.default_category),
                priority.unwrap_or(config.default_priority),
            )?;
            if !started {
                return Err(CliError::NotSignedIn);
            }
            let _ = writeln!(out, "已添加: {text}");
        }
        Command::List { status, category } => {
            session.set_status_filter(*status);
            session.set_category_filter(CategoryFilter::from(*category));
        }
        Command::Toggle { id } => {
            let id = resolve_id(session.tasks(), id)?;
            session.toggle_task(&id)?;
            session.settle().await?;
            let completed = session
                .tasks()
                .iter()
                .find(|t| t.id == id)
                .is_some_and(|t| t.completed);
            let _ = writeln!(out, "{}: {id}", toggle_word(completed));
        }
        Command::Rm { id } => {
            let id = resolve_id(session.tasks(), id)?;
            session.delete_task(&id);
            let _ = writeln!(out, "已删除: {id}");
        }
        Command::ClearCompleted => {
            let started = session.clear_completed();
            let _ = writeln!(out, "已清除 {started} 个已完成任务");
        }
        Command::Stats => {}
    }
    session.settle().await?;
    collect_failures(&mut events)?;

    if matches!(command, Command::Stats) {
        return Ok(render_stats(session.stats()));
    }
    out.push_str(&render_list(
        session.rows(),
        session.stats(),
        &config.timestamp_format,
    ));
    Ok(out)
}

fn collect_failures(events: &mut mpsc::Receiver<SessionEvent>) -> Result<(), CliError> {
    let mut first = None;
    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::WriteFailed(failure) = event {
            count += 1;
            if first.is_none() {
                first = Some(failure);
            }
        }
    }
    match first {
        Some(first) => Err(CliError::WritesFailed { count, first }),
        None => Ok(()),
    }
}

const fn toggle_word(completed: bool) -> &'static str {
    if completed { "已完成" } else { "未完成" }
}
