//! Integration tests for local mode.
//!
//! Drives a `LocalSession` end to end over in-memory and on-disk blob
//! stores: ordering after each command, filters, stats, persistence across
//! sessions, and failure atomicity of writes.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;

use zentodo::session::{LocalSession, SessionEvent};
use zentodo::store::StoreError;
use zentodo::store::blob::{BlobStore, DEFAULT_KEY, FileBlobStore, MemoryBlobStore};
use zentodo::tasks::TaskError;
use zentodo::view::{CategoryFilter, StatusFilter};
use zentodo_proto::task::{Category, Priority, Task};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn empty_session() -> LocalSession<MemoryBlobStore> {
    LocalSession::open(MemoryBlobStore::new(), DEFAULT_KEY, false).expect("open")
}

fn texts(rows: &[Task]) -> Vec<&str> {
    rows.iter().map(|t| t.text.as_str()).collect()
}

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("zentodo-it-{}", uuid::Uuid::now_v7().simple()))
}

// ---------------------------------------------------------------------------
// Ordering and commands
// ---------------------------------------------------------------------------

#[test]
fn add_toggle_delete_reorders_rows() {
    let mut session = empty_session();
    let a = session.add_task("A", Category::Work, Priority::High).unwrap();
    let b = session.add_task("B", Category::Life, Priority::Medium).unwrap();
    assert_eq!(texts(session.rows()), ["A", "B"]);

    assert!(session.toggle_task(&a.id).unwrap());
    assert_eq!(texts(session.rows()), ["B", "A"]);

    assert!(session.delete_task(&b.id).unwrap());
    assert_eq!(texts(session.rows()), ["A"]);
}

#[test]
fn newest_first_within_same_priority() {
    let mut session = empty_session();
    session.add_task("old", Category::Misc, Priority::Low).unwrap();
    session.add_task("new", Category::Misc, Priority::Low).unwrap();
    assert_eq!(texts(session.tasks()), ["new", "old"]);
    assert_eq!(texts(session.rows()), ["new", "old"]);
}

#[test]
fn text_is_stored_as_entered() {
    let mut session = empty_session();
    let task = session
        .add_task("  买牛奶 ", Category::Life, Priority::Low)
        .unwrap();
    assert_eq!(task.text, "  买牛奶 ");
    assert!(!task.completed);
    assert!(task.owner.is_none());
}

#[test]
fn blank_text_is_rejected() {
    let mut session = empty_session();
    let result = session.add_task("   ", Category::Work, Priority::High);
    assert!(matches!(result, Err(TaskError::TextEmpty)));
    assert!(session.tasks().is_empty());
}

#[test]
fn combined_filters() {
    let mut session = empty_session();
    let c = session.add_task("C", Category::Life, Priority::Medium).unwrap();
    session.add_task("B", Category::Work, Priority::Medium).unwrap();
    session.add_task("A", Category::Life, Priority::Medium).unwrap();
    session.toggle_task(&c.id).unwrap();

    session.set_status_filter(StatusFilter::Active);
    session.set_category_filter(CategoryFilter::Only(Category::Life));
    assert_eq!(texts(session.rows()), ["A"]);

    // Stats ignore filters.
    let stats = session.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.percent(), 33);
}

#[test]
fn clear_completed_keeps_active() {
    let mut session = empty_session();
    let a = session.add_task("A", Category::Work, Priority::Low).unwrap();
    let b = session.add_task("B", Category::Work, Priority::Low).unwrap();
    session.add_task("C", Category::Work, Priority::Low).unwrap();
    session.toggle_task(&a.id).unwrap();
    session.toggle_task(&b.id).unwrap();
    assert!(session.stats().has_completed());

    assert_eq!(session.clear_completed().unwrap(), 2);
    assert_eq!(texts(session.tasks()), ["C"]);
    assert!(!session.stats().has_completed());
    assert_eq!(session.clear_completed().unwrap(), 0);
}

#[test]
fn deleting_twice_is_not_an_error() {
    let mut session = empty_session();
    let a = session.add_task("A", Category::Work, Priority::Low).unwrap();
    assert!(session.delete_task(&a.id).unwrap());
    assert!(!session.delete_task(&a.id).unwrap());
}

#[test]
fn toggle_unknown_id_is_not_found() {
    let mut session = empty_session();
    let ghost = zentodo_proto::task::TaskId::new("404");
    assert!(matches!(
        session.toggle_task(&ghost),
        Err(TaskError::NotFound(_))
    ));
}

#[test]
fn commands_emit_view_changed() {
    let mut session = empty_session();
    let mut events = session.subscribe_events(8);
    session.add_task("A", Category::Work, Priority::Low).unwrap();
    session.set_status_filter(StatusFilter::Completed);
    assert!(matches!(events.try_recv(), Ok(SessionEvent::ViewChanged)));
    assert!(matches!(events.try_recv(), Ok(SessionEvent::ViewChanged)));
    assert!(events.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn first_run_is_seeded_once() {
    let session = LocalSession::open(MemoryBlobStore::new(), DEFAULT_KEY, true).unwrap();
    assert_eq!(texts(session.rows()), ["完成项目报告", "整理桌面"]);

    let mut blob = session.close();
    let raw = blob.raw(DEFAULT_KEY).unwrap().to_string();
    assert!(raw.contains("\"createdAt\""));

    // An emptied list stays empty on the next open.
    blob.save(DEFAULT_KEY, &[]).unwrap();
    let session = LocalSession::open(blob, DEFAULT_KEY, true).unwrap();
    assert!(session.tasks().is_empty());
}

#[test]
fn tasks_survive_reopen_on_disk() {
    let dir = temp_dir();

    let mut session = LocalSession::open(FileBlobStore::new(&dir), DEFAULT_KEY, false).unwrap();
    let a = session.add_task("写日记", Category::Life, Priority::Medium).unwrap();
    session.add_task("复习", Category::Study, Priority::High).unwrap();
    session.toggle_task(&a.id).unwrap();
    session.close();

    let session = LocalSession::open(FileBlobStore::new(&dir), DEFAULT_KEY, true).unwrap();
    assert_eq!(texts(session.rows()), ["复习", "写日记"]);
    assert!(session.rows()[1].completed);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn ids_stay_unique_after_reopen() {
    let mut session = empty_session();
    let first = session.add_task("A", Category::Work, Priority::Low).unwrap();
    let blob = session.close();

    let mut session = LocalSession::open(blob, DEFAULT_KEY, false).unwrap();
    let second = session.add_task("B", Category::Work, Priority::Low).unwrap();
    assert_ne!(first.id, second.id);
}

#[test]
fn corrupt_blob_fails_open() {
    let mut blob = MemoryBlobStore::new();
    blob.insert_raw(DEFAULT_KEY, "{not json");
    let result = LocalSession::open(blob, DEFAULT_KEY, true);
    assert!(matches!(
        result,
        Err(TaskError::Store(StoreError::Serialization(_)))
    ));
}

#[test]
fn failed_save_leaves_state_untouched() {
    let mut blob = MemoryBlobStore::new();
    blob.set_fail_writes(true);
    let mut session = LocalSession::open(blob, DEFAULT_KEY, false).unwrap();

    let result = session.add_task("A", Category::Work, Priority::Low);
    assert!(matches!(result, Err(TaskError::Store(StoreError::Io(_)))));
    assert!(session.tasks().is_empty());
    assert!(session.rows().is_empty());
    assert!(session.close().raw(DEFAULT_KEY).is_none());
}
