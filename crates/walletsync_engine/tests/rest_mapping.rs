//! End-to-end tests of the REST gateway, served in-process by the mock remote.

use std::sync::Arc;
use walletsync_engine::{
    CancelToken, CascadeOutcome, GatewayError, HttpGateway, LoopbackClient, ManualConnectivity,
    MockGateway, PullOutcome, Reconciler, RemoteDelete, RemoteGateway,
};
use walletsync_testkit::prelude::*;

type RestGateway = HttpGateway<LoopbackClient<Arc<MockGateway>>>;

fn rest_over(remote: &Arc<MockGateway>) -> RestGateway {
    HttpGateway::new("http://wallet.test/api/", LoopbackClient::new(Arc::clone(remote))).unwrap()
}

#[tokio::test]
async fn full_cycle_over_rest() {
    let remote = Arc::new(MockGateway::new());
    let store = Arc::new(RecordStore::open_in_memory().unwrap());
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::new(rest_over(&remote)),
        Arc::new(ManualConnectivity::new(true)),
    );
    let user = sample_user();
    store.insert_category(sample_category(&user, "Books")).unwrap();
    let expense = store
        .insert_expense(sample_expense(&user, 2).with_image("https://img.example.com/r1.jpg"))
        .unwrap();

    let report = reconciler.run(&user, &CancelToken::new()).await.unwrap();
    assert_eq!(report.push.created, 2);
    assert!(report.pull.is_applied());

    let listed = remote.remote_expenses(&user);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].store_name, expense.store_name);
    assert_eq!(listed[0].amount, expense.amount);
    assert_eq!(listed[0].date, expense.date);
    assert_eq!(listed[0].image_url.as_deref(), Some("https://img.example.com/r1.jpg"));
    let local = store.get_expense(expense.local_id).unwrap();
    assert_eq!(local.remote_id, listed[0].remote_id);
    assert_eq!(local.sync_state, SyncState::Synced);

    // A second run finds nothing to change.
    let report = reconciler.run(&user, &CancelToken::new()).await.unwrap();
    assert_eq!(report.push.pushed(), 0);
    let PullOutcome::Applied(pull) = report.pull else {
        panic!("pull was not applied");
    };
    assert_eq!(pull.applied(), 0);

    let report = reconciler.delete_expense(&user, expense.local_id).await.unwrap();
    assert_eq!(report.remote, RemoteDelete::Deleted);
    assert_eq!(report.cascade, CascadeOutcome::Deleted);
    assert!(remote.remote_expenses(&user).is_empty());
    assert!(remote.remote_categories(&user).is_empty());
}

#[tokio::test]
async fn status_codes_become_rejections() {
    let remote = Arc::new(MockGateway::new());
    let gateway = rest_over(&remote);
    let user = sample_user();

    let err = gateway
        .delete_expense(&RemoteId::new("missing"), &user)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ServerRejected { status: 404, .. }));

    remote.reject_all(Some(503));
    let err = gateway.list_categories(&user).await.unwrap_err();
    assert!(matches!(err, GatewayError::ServerRejected { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn lost_acknowledgment_is_a_timeout() {
    let remote = Arc::new(MockGateway::new());
    let gateway = rest_over(&remote);
    let user = sample_user();
    let store = RecordStore::open_in_memory().unwrap();
    let expense = store.insert_expense(sample_expense(&user, 0)).unwrap();

    remote.lose_next_acks(1);
    let err = gateway.create_expense(&expense).await.unwrap_err();
    assert_eq!(err, GatewayError::Timeout);
    assert_eq!(remote.remote_expenses(&user).len(), 1);
}

#[tokio::test]
async fn user_ids_with_reserved_characters_round_trip() {
    let remote = Arc::new(MockGateway::new());
    let gateway = rest_over(&remote);
    let user = UserId::new("ana maria/ü");
    let store = RecordStore::open_in_memory().unwrap();
    let category = store
        .insert_category(sample_category(&user, "Rent & bills"))
        .unwrap();

    let id = gateway.create_category(&category).await.unwrap().unwrap();
    let listed = gateway.list_categories(&user).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].remote_id, id);
    assert_eq!(listed[0].user_id, user);
    assert_eq!(listed[0].name, "Rent & bills");

    gateway.delete_category(&id, &user).await.unwrap();
    assert!(remote.remote_categories(&user).is_empty());
}

#[tokio::test]
async fn creates_without_id_are_reported_as_such() {
    let remote = Arc::new(MockGateway::new());
    remote.omit_ids_on_create(true);
    let gateway = rest_over(&remote);
    let store = RecordStore::open_in_memory().unwrap();
    let category = store
        .insert_category(sample_category(&sample_user(), "Travel"))
        .unwrap();

    assert_eq!(gateway.create_category(&category).await.unwrap(), None);
    assert_eq!(remote.remote_categories(&sample_user()).len(), 1);
}
