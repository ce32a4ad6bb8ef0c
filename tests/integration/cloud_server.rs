//! End-to-end tests: `CloudSession` over `WsTaskStore` against an in-process
//! `zentodo-cloud` server bound to `127.0.0.1:0`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use zentodo::identity::StaticIdentityProvider;
use zentodo::session::CloudSession;
use zentodo::store::remote::WsTaskStore;
use zentodo::store::{StoreError, TaskStore};
use zentodo_cloud::collection::TaskCollection;
use zentodo_cloud::server::{ServerState, start_server_with_state};
use zentodo_proto::task::{Category, CreatedAt, NewTask, Priority, Task, TaskId, UserId};
use zentodo_proto::wire::{SnapshotFilter, StoreFailure};

const TIMEOUT: Duration = Duration::from_secs(5);

type Session = CloudSession<WsTaskStore, StaticIdentityProvider>;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

async fn start(collection: TaskCollection) -> (String, Arc<ServerState>) {
    let state = Arc::new(ServerState::with_collection(collection));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("start server");
    (format!("ws://{addr}/ws"), state)
}

async fn connect(url: &str) -> WsTaskStore {
    WsTaskStore::connect(url, TIMEOUT, TIMEOUT)
        .await
        .expect("connect")
}

async fn open_as(url: &str, user: &str) -> Session {
    let store = connect(url).await;
    CloudSession::open(store, StaticIdentityProvider::signed_in(UserId::new(user)))
        .await
        .expect("open session")
}

fn new_task(owner: &str, text: &str) -> NewTask {
    NewTask {
        text: text.to_string(),
        category: Category::Misc,
        priority: Priority::Medium,
        completed: false,
        created_at: CreatedAt::Pending,
        owner: Some(UserId::new(owner)),
    }
}

fn texts(rows: &[Task]) -> Vec<&str> {
    rows.iter().map(|t| t.text.as_str()).collect()
}

/// Pumps until `done` holds or the timeout passes.
async fn pump_until(session: &mut Session, done: impl Fn(&Session) -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !done(session) {
            session.pump().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Sessions over the wire
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_toggle_delete_over_websocket() {
    let (url, _state) = start(TaskCollection::new()).await;
    let mut session = open_as(&url, "alice").await;
    assert!(session.rows().is_empty());

    assert!(session.add_task("A", Category::Work, Priority::High).unwrap());
    assert!(session.add_task("B", Category::Life, Priority::Medium).unwrap());
    session.settle().await.unwrap();
    assert_eq!(texts(session.rows()), ["A", "B"]);
    assert!(session.rows().iter().all(|t| !t.created_at.is_pending()));

    let a = session.rows()[0].id.clone();
    session.toggle_task(&a).unwrap();
    session.settle().await.unwrap();
    assert_eq!(texts(session.rows()), ["B", "A"]);

    let b = session.rows()[0].id.clone();
    session.delete_task(&b);
    session.settle().await.unwrap();
    assert_eq!(texts(session.rows()), ["A"]);
    assert_eq!(session.stats().percent(), 100);

    session.close();
}

#[tokio::test]
async fn second_device_receives_pushes() {
    let (url, _state) = start(TaskCollection::new()).await;
    let mut laptop = open_as(&url, "alice").await;
    let mut phone = open_as(&url, "alice").await;

    assert!(laptop.add_task("同步", Category::Study, Priority::Low).unwrap());
    laptop.settle().await.unwrap();

    pump_until(&mut phone, |s| {
        s.rows().len() == 1 && !s.rows()[0].created_at.is_pending()
    })
    .await;
    assert_eq!(texts(phone.rows()), ["同步"]);
}

#[tokio::test]
async fn clear_completed_over_websocket() {
    let (url, state) = start(TaskCollection::new()).await;
    let mut session = open_as(&url, "alice").await;
    for text in ["A", "B", "C"] {
        assert!(session.add_task(text, Category::Work, Priority::Medium).unwrap());
    }
    session.settle().await.unwrap();
    let completed: Vec<TaskId> = session
        .tasks()
        .iter()
        .filter(|t| t.text != "C")
        .map(|t| t.id.clone())
        .collect();
    for id in &completed {
        session.toggle_task(id).unwrap();
    }
    session.settle().await.unwrap();

    assert_eq!(session.clear_completed(), 2);
    session.settle().await.unwrap();
    assert_eq!(texts(session.rows()), ["C"]);
    assert_eq!(state.collection.count_owned(&UserId::new("alice")).await, 1);
}

#[tokio::test]
async fn sign_out_cancels_server_feed() {
    let (url, state) = start(TaskCollection::new()).await;
    let mut session = open_as(&url, "alice").await;
    assert!(session.add_task("A", Category::Work, Priority::High).unwrap());
    session.settle().await.unwrap();
    assert_eq!(state.collection.feed_count().await, 1);

    session.sign_out().await.unwrap();
    assert!(session.rows().is_empty());
    assert_eq!(state.collection.feed_count().await, 0);

    // Writes from another device do not reach the signed-out session.
    let mut other = open_as(&url, "alice").await;
    assert!(other.add_task("B", Category::Work, Priority::High).unwrap());
    other.settle().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.pump().await.unwrap();
    assert!(session.rows().is_empty());
}

#[tokio::test]
async fn pending_snapshot_precedes_stamped_one() {
    let (url, _state) = start(TaskCollection::new()).await;
    let mut session = open_as(&url, "alice").await;

    assert!(session.add_task("x", Category::Misc, Priority::Low).unwrap());
    assert!(tokio::time::timeout(TIMEOUT, session.wait_for_snapshot()).await.unwrap());
    assert!(session.rows()[0].created_at.is_pending());
    assert!(tokio::time::timeout(TIMEOUT, session.wait_for_snapshot()).await.unwrap());
    assert!(!session.rows()[0].created_at.is_pending());
}

// ---------------------------------------------------------------------------
// Store rules seen from the client
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insert_for_another_owner_is_denied() {
    let (url, _state) = start(TaskCollection::new()).await;
    let store = connect(&url).await;
    store.authenticate(Some(&UserId::new("alice"))).await.unwrap();

    let result = store.insert(new_task("bob", "not mine")).await;
    assert!(matches!(
        result,
        Err(StoreError::Rejected(StoreFailure::PermissionDenied))
    ));
}

#[tokio::test]
async fn anonymous_requests_are_refused() {
    let (url, _state) = start(TaskCollection::new()).await;
    let store = connect(&url).await;

    assert!(matches!(
        store.insert(new_task("alice", "x")).await,
        Err(StoreError::Rejected(StoreFailure::NotAuthenticated))
    ));
    assert!(matches!(
        store
            .subscribe(SnapshotFilter::owned_by(UserId::new("alice")))
            .await,
        Err(StoreError::Rejected(StoreFailure::NotAuthenticated))
    ));
}

#[tokio::test]
async fn subscribing_to_another_owner_is_denied() {
    let (url, state) = start(TaskCollection::new()).await;
    let store = connect(&url).await;
    store.authenticate(Some(&UserId::new("alice"))).await.unwrap();

    let result = store
        .subscribe(SnapshotFilter::owned_by(UserId::new("bob")))
        .await;
    assert!(matches!(
        result,
        Err(StoreError::Rejected(StoreFailure::PermissionDenied))
    ));
    assert_eq!(state.collection.feed_count().await, 0);
}

#[tokio::test]
async fn quota_is_enforced_per_owner() {
    let (url, _state) = start(TaskCollection::with_config(1, true)).await;
    let store = connect(&url).await;
    store.authenticate(Some(&UserId::new("alice"))).await.unwrap();

    store.insert(new_task("alice", "one")).await.unwrap();
    assert!(matches!(
        store.insert(new_task("alice", "two")).await,
        Err(StoreError::Rejected(StoreFailure::QuotaExceeded { limit: 1 }))
    ));

    store.authenticate(Some(&UserId::new("bob"))).await.unwrap();
    store.insert(new_task("bob", "one")).await.unwrap();
}

#[tokio::test]
async fn update_of_missing_task_is_not_found_and_delete_is_ok() {
    let (url, _state) = start(TaskCollection::new()).await;
    let store = connect(&url).await;
    store.authenticate(Some(&UserId::new("alice"))).await.unwrap();
    let ghost = TaskId::new("ghost");

    assert!(matches!(
        store
            .update(&ghost, zentodo_proto::task::TaskPatch::completed(true))
            .await,
        Err(StoreError::Rejected(StoreFailure::NotFound(_)))
    ));
    store.delete(&ghost).await.unwrap();
}

#[tokio::test]
async fn server_timestamp_overrides_client_value() {
    let (url, _state) = start(TaskCollection::with_config(10, false)).await;
    let store = connect(&url).await;
    let alice = UserId::new("alice");
    store.authenticate(Some(&alice)).await.unwrap();
    let mut feed = store
        .subscribe(SnapshotFilter::owned_by(alice.clone()))
        .await
        .unwrap();
    assert!(feed.next().await.unwrap().tasks.is_empty());

    let mut task = new_task("alice", "stamped");
    task.created_at = CreatedAt::At(1);
    store.insert(task).await.unwrap();

    let snapshot = tokio::time::timeout(TIMEOUT, feed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.tasks.len(), 1);
    assert!(snapshot.tasks[0].created_at.sort_key() > 1);
}

#[tokio::test]
async fn connect_to_closed_port_is_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WsTaskStore::connect(&format!("ws://{addr}/ws"), TIMEOUT, TIMEOUT).await;
    assert!(matches!(result, Err(StoreError::Unreachable(_))));
}
