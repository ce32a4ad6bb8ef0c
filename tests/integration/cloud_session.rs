//! Integration tests for cloud mode against the in-process task store.
//!
//! Covers identity transitions, multi-device convergence, stale pushes after
//! sign-out, the non-atomic clear-completed fan-out, and write failures
//! surfacing as session events.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use zentodo::identity::{AuthState, IdentityProvider, StaticIdentityProvider};
use zentodo::session::{CloudSession, SessionError, SessionEvent, WriteOp};
use zentodo::store::StoreError;
use zentodo::store::memory::MemoryTaskStore;
use zentodo::tasks::TaskError;
use zentodo::view::{CategoryFilter, StatusFilter};
use zentodo_proto::task::{Category, Priority, Task, UserId};
use zentodo_proto::wire::StoreFailure;

type Session = CloudSession<MemoryTaskStore, StaticIdentityProvider>;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn alice() -> UserId {
    UserId::new("alice")
}

fn bob() -> UserId {
    UserId::new("bob")
}

async fn open_as(store: MemoryTaskStore, user: UserId) -> Session {
    CloudSession::open(store, StaticIdentityProvider::signed_in(user))
        .await
        .expect("open session")
}

async fn add(session: &mut Session, text: &str, priority: Priority) {
    assert!(session.add_task(text, Category::Work, priority).unwrap());
    session.settle().await.unwrap();
}

fn texts(rows: &[Task]) -> Vec<&str> {
    rows.iter().map(|t| t.text.as_str()).collect()
}

fn id_of(session: &Session, text: &str) -> zentodo_proto::task::TaskId {
    session
        .tasks()
        .iter()
        .find(|t| t.text == text)
        .map(|t| t.id.clone())
        .expect("task present")
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anonymous_session_ignores_add() {
    let store = MemoryTaskStore::new();
    let mut session = CloudSession::open(store, StaticIdentityProvider::new(Some(alice())))
        .await
        .unwrap();
    assert_eq!(session.auth(), &AuthState::Anonymous);

    assert!(!session.add_task("x", Category::Misc, Priority::Low).unwrap());
    assert_eq!(session.pending_writes(), 0);
    assert!(session.store().documents().is_empty());
}

#[tokio::test]
async fn sign_in_subscribes_and_sign_out_clears() {
    let store = MemoryTaskStore::new();
    let seeded = store.connect();
    let mut writer = open_as(seeded, alice()).await;
    add(&mut writer, "existing", Priority::Medium).await;

    let mut session = CloudSession::open(
        store.connect(),
        StaticIdentityProvider::new(Some(alice())),
    )
    .await
    .unwrap();
    let mut events = session.subscribe_events(16);

    assert_eq!(session.sign_in().await.unwrap(), alice());
    assert_eq!(session.auth(), &AuthState::Authenticated(alice()));
    assert_eq!(texts(session.rows()), ["existing"]);

    session.sign_out().await.unwrap();
    assert_eq!(session.auth(), &AuthState::Anonymous);
    assert!(session.rows().is_empty());
    assert_eq!(session.stats().total, 0);

    let mut auth_changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::AuthChanged(state) = event {
            auth_changes.push(state);
        }
    }
    assert_eq!(
        auth_changes,
        [AuthState::Authenticated(alice()), AuthState::Anonymous]
    );
}

#[tokio::test]
async fn stale_push_after_sign_out_is_dropped() {
    let store = MemoryTaskStore::new();
    let mut session = open_as(store.connect(), alice()).await;
    add(&mut session, "secret", Priority::High).await;

    session.sign_out().await.unwrap();
    assert!(session.rows().is_empty());

    // Another of alice's devices keeps writing; the signed-out session must
    // not see any of it.
    let mut other = open_as(store.connect(), alice()).await;
    add(&mut other, "more", Priority::Low).await;
    store.republish(&alice());

    assert!(!session.pump().await.unwrap());
    assert!(session.rows().is_empty());
    assert!(session.tasks().is_empty());
}

#[tokio::test]
async fn failed_sign_in_is_retried_on_pump() {
    let store = MemoryTaskStore::new();
    let mut writer = open_as(store.connect(), alice()).await;
    add(&mut writer, "existing", Priority::Medium).await;

    let mut session = CloudSession::open(
        store.connect(),
        StaticIdentityProvider::new(Some(alice())),
    )
    .await
    .unwrap();

    store.set_unavailable(true);
    assert!(matches!(
        session.sign_in().await,
        Err(SessionError::Task(TaskError::Store(StoreError::Unreachable(_))))
    ));
    assert_eq!(session.auth(), &AuthState::Unknown);
    assert!(!session.add_task("lost", Category::Work, Priority::Low).unwrap());
    assert!(session.pump().await.is_err());
    assert!(session.rows().is_empty());

    store.set_unavailable(false);
    assert!(session.pump().await.unwrap());
    assert_eq!(session.auth(), &AuthState::Authenticated(alice()));
    assert_eq!(texts(session.rows()), ["existing"]);
    assert_eq!(store.feed_count(), 2);
}

#[tokio::test]
async fn provider_identity_change_is_followed_on_pump() {
    let store = MemoryTaskStore::new();
    let mut as_bob = open_as(store.connect(), bob()).await;
    add(&mut as_bob, "bob's", Priority::Low).await;

    let provider = Arc::new(StaticIdentityProvider::signed_in(alice()));
    let mut session = CloudSession::open(store.connect(), Arc::clone(&provider))
        .await
        .unwrap();
    assert!(session.add_task("alice's", Category::Work, Priority::Low).unwrap());
    session.settle().await.unwrap();
    assert_eq!(texts(session.rows()), ["alice's"]);
    assert!(!session.pump().await.unwrap());

    provider.set_identity(Some(bob()));
    assert!(session.pump().await.unwrap());
    assert_eq!(session.auth(), &AuthState::Authenticated(bob()));
    assert_eq!(texts(session.rows()), ["bob's"]);

    provider.set_identity(None);
    assert!(session.pump().await.unwrap());
    assert_eq!(session.auth(), &AuthState::Anonymous);
    assert!(session.rows().is_empty());
    assert_eq!(store.feed_count(), 1);
}

#[tokio::test]
async fn owners_only_see_their_own_tasks() {
    let store = MemoryTaskStore::new();
    let mut as_alice = open_as(store.connect(), alice()).await;
    let mut as_bob = open_as(store.connect(), bob()).await;

    add(&mut as_alice, "a1", Priority::High).await;
    add(&mut as_bob, "b1", Priority::High).await;
    as_alice.pump().await.unwrap();

    assert_eq!(texts(as_alice.rows()), ["a1"]);
    assert_eq!(texts(as_bob.rows()), ["b1"]);
    assert_eq!(store.documents().len(), 2);
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn devices_converge_through_snapshots() {
    let store = MemoryTaskStore::new();
    let mut laptop = open_as(store.connect(), alice()).await;
    let mut phone = open_as(store.connect(), alice()).await;

    add(&mut laptop, "A", Priority::High).await;
    add(&mut laptop, "B", Priority::Medium).await;
    assert!(phone.pump().await.unwrap());
    assert_eq!(texts(phone.rows()), ["A", "B"]);

    let a = id_of(&phone, "A");
    phone.toggle_task(&a).unwrap();
    phone.settle().await.unwrap();
    assert_eq!(texts(phone.rows()), ["B", "A"]);

    laptop.pump().await.unwrap();
    assert_eq!(texts(laptop.rows()), ["B", "A"]);
    assert_eq!(laptop.stats().percent(), 50);

    let b = id_of(&laptop, "B");
    laptop.delete_task(&b);
    laptop.settle().await.unwrap();
    phone.pump().await.unwrap();
    assert_eq!(texts(phone.rows()), ["A"]);
}

#[tokio::test]
async fn created_task_appears_only_after_push() {
    let store = MemoryTaskStore::new();
    let mut session = open_as(store, alice()).await;

    assert!(session.add_task("late", Category::Study, Priority::Medium).unwrap());
    assert!(session.rows().is_empty());

    // The pending snapshot is applied first, then the stamped one.
    assert!(session.wait_for_snapshot().await);
    assert!(session.rows()[0].created_at.is_pending());
    assert!(session.wait_for_snapshot().await);
    assert!(!session.rows()[0].created_at.is_pending());
    session.settle().await.unwrap();
    assert_eq!(session.rows()[0].owner, Some(alice()));
}

#[tokio::test]
async fn filters_apply_to_pushed_rows() {
    let store = MemoryTaskStore::new();
    let mut session = open_as(store, alice()).await;
    assert!(session.add_task("run", Category::Health, Priority::Low).unwrap());
    assert!(session.add_task("email", Category::Work, Priority::High).unwrap());
    session.settle().await.unwrap();

    session.set_category_filter(CategoryFilter::Only(Category::Health));
    assert_eq!(texts(session.rows()), ["run"]);
    session.set_status_filter(StatusFilter::Completed);
    assert!(session.rows().is_empty());
    assert_eq!(session.stats().total, 2);
}

// ---------------------------------------------------------------------------
// Clear completed and failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_completed_removes_only_completed() {
    let store = MemoryTaskStore::new();
    let mut session = open_as(store.connect(), alice()).await;
    for text in ["A", "B", "C"] {
        add(&mut session, text, Priority::Medium).await;
    }
    for text in ["A", "B"] {
        let id = id_of(&session, text);
        session.toggle_task(&id).unwrap();
    }
    session.settle().await.unwrap();

    assert_eq!(session.clear_completed(), 2);
    session.settle().await.unwrap();

    assert_eq!(texts(session.rows()), ["C"]);
    let remaining: Vec<String> = store.documents().into_iter().map(|t| t.text).collect();
    assert_eq!(remaining, ["C"]);
}

#[tokio::test]
async fn clear_completed_partial_failure_leaves_mixed_state() {
    let store = MemoryTaskStore::new();
    let mut session = open_as(store.connect(), alice()).await;
    for text in ["A", "B", "C"] {
        add(&mut session, text, Priority::Medium).await;
    }
    let a = id_of(&session, "A");
    let b = id_of(&session, "B");
    session.toggle_task(&a).unwrap();
    session.toggle_task(&b).unwrap();
    session.settle().await.unwrap();

    let mut events = session.subscribe_events(16);
    store.fail_writes_to(&b);
    assert_eq!(session.clear_completed(), 2);
    session.settle().await.unwrap();

    let mut remaining = texts(session.rows());
    remaining.sort_unstable();
    assert_eq!(remaining, ["B", "C"]);

    let failures: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            SessionEvent::WriteFailed(failure) => Some(failure),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].op, WriteOp::Delete(b));
    assert!(matches!(failures[0].error, StoreError::Unreachable(_)));
}

#[tokio::test]
async fn toggle_of_invisible_task_is_not_found() {
    let store = MemoryTaskStore::new();
    let mut as_bob = open_as(store.connect(), bob()).await;
    add(&mut as_bob, "bob's", Priority::Low).await;
    let foreign = id_of(&as_bob, "bob's");

    let mut as_alice = open_as(store.connect(), alice()).await;
    assert!(matches!(
        as_alice.toggle_task(&foreign),
        Err(TaskError::NotFound(_))
    ));
}

#[tokio::test]
async fn deleting_another_owners_task_is_refused() {
    let store = MemoryTaskStore::new();
    let mut as_bob = open_as(store.connect(), bob()).await;
    add(&mut as_bob, "bob's", Priority::Low).await;
    let foreign = id_of(&as_bob, "bob's");

    let mut as_alice = open_as(store.connect(), alice()).await;
    let mut events = as_alice.subscribe_events(8);
    as_alice.delete_task(&foreign);
    as_alice.settle().await.unwrap();

    let refused = std::iter::from_fn(|| events.try_recv().ok()).any(|event| {
        matches!(
            event,
            SessionEvent::WriteFailed(ref f)
                if matches!(f.error, StoreError::Rejected(StoreFailure::PermissionDenied))
        )
    });
    assert!(refused);
    assert_eq!(store.documents().len(), 1);
}

#[tokio::test]
async fn close_releases_the_feed() {
    let store = MemoryTaskStore::new();
    let session = open_as(store.connect(), alice()).await;
    assert_eq!(store.feed_count(), 1);
    session.close();
    assert_eq!(store.feed_count(), 0);
}

#[tokio::test]
async fn sign_out_reaches_the_provider() {
    let store = MemoryTaskStore::new();
    let provider = Arc::new(StaticIdentityProvider::signed_in(alice()));
    let mut session = CloudSession::open(store.connect(), Arc::clone(&provider))
        .await
        .unwrap();
    add_shared(&mut session, "A").await;
    assert_eq!(session.rows().len(), 1);

    session.sign_out().await.unwrap();
    assert_eq!(provider.current_identity(), None);
    assert!(session.rows().is_empty());
    assert_eq!(store.feed_count(), 0);

    // The provider's own notification of the sign-out is not replayed.
    assert!(!session.pump().await.unwrap());
}

async fn add_shared(
    session: &mut CloudSession<MemoryTaskStore, Arc<StaticIdentityProvider>>,
    text: &str,
) {
    assert!(session.add_task(text, Category::Work, Priority::Low).unwrap());
    session.settle().await.unwrap();
}
