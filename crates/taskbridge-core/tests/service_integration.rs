//! Integration tests for the pass lifecycle: replacement, cancellation and
//! the enable/sign-in switches.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

use common::{FakeTasks, StaticToken};
use taskbridge_core::{
    IdentityMapper, LocalStore, MemoryStore, Reconciler, SyncError, SyncService, SyncStatus,
    TokenSource,
};

struct Fixture {
    fake: Arc<FakeTasks>,
    store: Arc<MemoryStore>,
    service: SyncService,
    _dir: TempDir,
}

fn fixture(enabled: bool) -> Fixture {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeTasks::new());
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(
        fake.clone(),
        Arc::new(StaticToken::signed_in()),
        store.clone(),
    );
    let mapper = IdentityMapper::new_with_path(dir.path().join("mappings.json"));
    Fixture {
        fake,
        store,
        service: SyncService::new(reconciler, mapper, enabled),
        _dir: dir,
    }
}

async fn wait_for_status(service: &SyncService, pred: impl Fn(&SyncStatus) -> bool) -> SyncStatus {
    let mut rx = service.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
        .await
        .expect("status never arrived")
        .expect("status channel closed")
        .clone();
    status
}

/// A token source with a bug in it.
struct ExplodingToken;

#[async_trait]
impl TokenSource for ExplodingToken {
    async fn current_token(&self) -> Result<String, SyncError> {
        panic!("token source exploded");
    }
}

#[tokio::test]
async fn test_panicking_pass_publishes_error_instead_of_syncing_forever() {
    let dir = TempDir::new().unwrap();
    let reconciler = Reconciler::new(
        Arc::new(FakeTasks::new()),
        Arc::new(ExplodingToken),
        Arc::new(MemoryStore::new()),
    );
    let mapper = IdentityMapper::new_with_path(dir.path().join("mappings.json"));
    let service = SyncService::new(reconciler, mapper, true);

    let report = service.sync_now().await.expect("a dead pass still reports");

    match &report.status {
        SyncStatus::Error(msg) => assert!(msg.contains("sync pass failed"), "{msg}"),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(report.stats.is_empty());
    assert_eq!(service.status(), report.status);

    // The service is still usable afterwards.
    assert!(service.trigger().await);
    service.wait_idle().await;
    assert!(!service.status().is_syncing());
}

#[tokio::test]
async fn test_sync_now_reports_and_publishes_status() {
    let f = fixture(true);
    let list = f.fake.seed_list("Work");
    f.fake.seed_task(&list, "Plan", None);

    let report = f.service.sync_now().await.expect("pass should finish");

    assert!(matches!(report.status, SyncStatus::Success(_)));
    assert_eq!(report.stats.tasks_downloaded, 1);
    assert_eq!(f.service.status(), report.status);
    assert_eq!(f.service.last_report(), Some(report));
}

#[tokio::test]
async fn test_trigger_replaces_in_flight_pass() {
    let f = fixture(true);
    let list = f.fake.seed_list("Work");
    f.fake.seed_task(&list, "Plan", None);
    let (entered, release) = f.fake.park_next_list_tasks();

    assert!(f.service.trigger().await);
    entered.notified().await;
    assert!(f.service.status().is_syncing());

    let service = f.service.clone();
    let replacement = tokio::spawn(async move { service.trigger().await });
    // Let the replacement cancel the parked pass before it resumes.
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_one();

    assert!(replacement.await.unwrap());
    f.service.wait_idle().await;

    let status = f.service.status();
    assert!(matches!(status, SyncStatus::Success(_)), "{status:?}");
    let report = f.service.last_report().unwrap();
    // The superseded pass already brought the task in; no duplicate.
    assert_eq!(report.stats.tasks_downloaded, 0);
    let lists = f.store.lists().unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(f.store.tasks(&lists[0].id).unwrap().len(), 1);
    assert_eq!(f.fake.count_calls("list_tasks"), 2);
}

#[tokio::test]
async fn test_disabled_service_ignores_triggers() {
    let f = fixture(false);
    f.fake.seed_list("Work");

    assert!(!f.service.trigger().await);
    assert_eq!(f.service.sync_now().await, None);
    assert_eq!(f.service.status(), SyncStatus::Idle);
    assert!(f.fake.calls().is_empty());

    f.service.enable().await;
    f.service.wait_idle().await;
    assert!(matches!(f.service.status(), SyncStatus::Success(_)));
    assert_eq!(f.store.lists().unwrap().len(), 1);

    f.service.disable().await;
    assert!(!f.service.is_enabled());
    assert_eq!(f.service.status(), SyncStatus::Idle);
}

#[tokio::test]
async fn test_disable_cancels_running_pass() {
    let f = fixture(true);
    let list = f.fake.seed_list("Work");
    f.fake.seed_task(&list, "Plan", None);
    let (entered, release) = f.fake.park_next_list_tasks();

    f.service.trigger().await;
    entered.notified().await;

    let service = f.service.clone();
    let disabling = tokio::spawn(async move { service.disable().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_one();
    disabling.await.unwrap();

    assert_eq!(f.service.status(), SyncStatus::Idle);
    assert_eq!(f.service.last_report(), None);
}

#[tokio::test]
async fn test_sign_in_changes_drive_passes() {
    let f = fixture(true);
    f.fake.seed_list("Work");
    let (signed_in, rx) = watch::channel(false);
    let follower = f.service.follow_sign_in(rx);

    signed_in.send_replace(true);
    let status = wait_for_status(&f.service, |s| matches!(s, SyncStatus::Success(_))).await;
    assert!(matches!(status, SyncStatus::Success(_)));

    signed_in.send_replace(false);
    wait_for_status(&f.service, |s| *s == SyncStatus::Idle).await;

    drop(signed_in);
    tokio::time::timeout(Duration::from_secs(5), follower)
        .await
        .expect("follower should stop when the sender is gone")
        .unwrap();
}

#[tokio::test]
async fn test_enable_while_signed_out_stays_idle() {
    let f = fixture(false);
    let (_signed_in, rx) = watch::channel(false);
    let _follower = f.service.follow_sign_in(rx);

    f.service.enable().await;
    f.service.wait_idle().await;

    assert_eq!(f.service.status(), SyncStatus::Idle);
    assert!(f.fake.calls().is_empty());
}
