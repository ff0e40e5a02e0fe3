//! Integration tests for the reconciliation flow.
//!
//! These tests drive full passes against a wiremock desired state source
//! and a `MockBackend`:
//! 1. Fetch the desired state
//! 2. Diff against tracked games
//! 3. Recreate added games, delete removed ones

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use arena_game_creator::backend::BackendCall;
use arena_game_creator::{
    DesiredStateClient, FetchError, MockBackend, ReconcileStats, ReconcilerConfig, ReconciliationController,
};
use arena_id::GameId;
use serde_json::{json, Value};
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GAMES_PATH: &str = "/players/api/games/";

fn game(id: &str) -> GameId {
    GameId::parse(id).unwrap()
}

fn games(ids: &[&str]) -> BTreeSet<GameId> {
    ids.iter().map(|id| game(id)).collect()
}

fn test_config(server: &MockServer) -> ReconcilerConfig {
    ReconcilerConfig {
        poll_interval: Duration::from_millis(50),
        concurrency: 3,
        backend_timeout: Duration::from_secs(1),
        callback_base_url: format!("{}{}", server.uri(), GAMES_PATH),
        recreate_on_config_change: false,
    }
}

fn controller(
    server: &MockServer,
    backend: Arc<MockBackend>,
    config: ReconcilerConfig,
) -> ReconciliationController {
    controller_with_fetch_timeout(server, backend, config, Duration::from_secs(2))
}

fn controller_with_fetch_timeout(
    server: &MockServer,
    backend: Arc<MockBackend>,
    config: ReconcilerConfig,
    fetch_timeout: Duration,
) -> ReconciliationController {
    let source =
        DesiredStateClient::new(format!("{}{}", server.uri(), GAMES_PATH), fetch_timeout).unwrap();
    ReconciliationController::new(source, backend, config)
}

async fn serve(server: &MockServer, desired: Value) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path(GAMES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(desired))
        .mount(server)
        .await;
}

fn tracked(controller: &ReconciliationController) -> BTreeSet<GameId> {
    controller.tracker().snapshot().iter().cloned().collect()
}

fn sorted(mut ids: Vec<GameId>) -> Vec<GameId> {
    ids.sort();
    ids
}

#[tokio::test]
async fn new_games_are_recreated_with_callback_url() {
    let server = MockServer::start().await;
    serve(
        &server,
        json!({"1": {"name": "Level 1"}, "2": {"name": "Open world"}}),
    )
    .await;
    let backend = Arc::new(MockBackend::new());
    let controller = controller(&server, backend.clone(), test_config(&server));

    let stats = controller.reconcile_once().await.unwrap();

    assert_eq!(
        stats,
        ReconcileStats {
            added: 2,
            ..ReconcileStats::default()
        }
    );
    assert_eq!(tracked(&controller), games(&["1", "2"]));
    assert_eq!(sorted(backend.creates()), vec![game("1"), game("2")]);
    assert_eq!(backend.running(), games(&["1", "2"]));

    let config = backend.created_config(&game("1")).unwrap();
    assert_eq!(config["name"], "Level 1");
    assert_eq!(
        config["GAME_API_URL"],
        format!("{}{}1/", server.uri(), GAMES_PATH)
    );

    // No removal batch ran; the deletes below are the recreate's own
    // best-effort pre-deletes.
    assert_eq!(stats.removed, 0);

    // Each create is preceded by a best-effort delete of the same game.
    let calls = backend.calls();
    for id in ["1", "2"] {
        let delete = calls
            .iter()
            .position(|c| *c == BackendCall::Delete(game(id)))
            .unwrap();
        let create = calls
            .iter()
            .position(|c| matches!(c, BackendCall::Create(g, _) if *g == game(id)))
            .unwrap();
        assert!(delete < create);
    }
}

#[tokio::test]
async fn unknown_games_are_deleted() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}, "2": {}})).await;
    let backend = Arc::new(MockBackend::new());
    let controller = controller(&server, backend.clone(), test_config(&server));
    controller.reconcile_once().await.unwrap();
    let calls_before = backend.calls().len();

    serve(&server, json!({"1": {}})).await;
    let stats = controller.reconcile_once().await.unwrap();

    assert_eq!(stats.added, 0);
    assert_eq!(stats.removed, 1);
    assert_eq!(tracked(&controller), games(&["1"]));
    // Game 1 is left alone: the only new call is the delete of game 2.
    assert_eq!(
        backend.calls()[calls_before..].to_vec(),
        vec![BackendCall::Delete(game("2"))]
    );
    assert_eq!(backend.running(), games(&["1"]));
}

#[tokio::test]
async fn steady_state_issues_no_calls() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}})).await;
    let backend = Arc::new(MockBackend::new());
    let controller = controller(&server, backend.clone(), test_config(&server));
    controller.reconcile_once().await.unwrap();
    let calls_before = backend.calls().len();

    let stats = controller.reconcile_once().await.unwrap();

    assert!(stats.is_noop());
    assert_eq!(backend.calls().len(), calls_before);
}

#[tokio::test]
async fn failed_fetch_leaves_tracked_set_unchanged() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}})).await;
    let backend = Arc::new(MockBackend::new());
    let controller = controller(&server, backend.clone(), test_config(&server));
    controller.reconcile_once().await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .and(path(GAMES_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(GAMES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"2": {}})))
        .mount(&server)
        .await;
    let calls_before = backend.calls().len();

    assert!(controller.reconcile_once().await.is_err());
    assert_eq!(tracked(&controller), games(&["1"]));
    assert_eq!(backend.calls().len(), calls_before);

    // The next pass fetches afresh and proceeds normally.
    let stats = controller.reconcile_once().await.unwrap();
    assert_eq!((stats.added, stats.removed), (1, 1));
    assert_eq!(tracked(&controller), games(&["2"]));
}

#[tokio::test]
async fn stalled_fetch_times_out_and_skips_pass() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}})).await;
    let backend = Arc::new(MockBackend::new());
    let controller = controller_with_fetch_timeout(
        &server,
        backend.clone(),
        test_config(&server),
        Duration::from_millis(200),
    );
    controller.reconcile_once().await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .and(path(GAMES_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"2": {}}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let calls_before = backend.calls().len();

    let started = std::time::Instant::now();
    let err = controller.reconcile_once().await.unwrap_err();

    assert!(matches!(err, FetchError::Transport(ref e) if e.is_timeout()));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(tracked(&controller), games(&["1"]));
    assert_eq!(backend.calls().len(), calls_before);
}

#[tokio::test]
async fn malformed_document_is_a_failed_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GAMES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;
    let backend = Arc::new(MockBackend::new());
    let controller = controller(&server, backend.clone(), test_config(&server));

    assert!(controller.reconcile_once().await.is_err());
    assert!(controller.tracker().is_empty());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn create_failure_is_isolated_and_retried() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}, "2": {}, "3": {}})).await;
    let backend = Arc::new(MockBackend::new());
    backend.fail_create_for(&game("1"));
    let controller = controller(&server, backend.clone(), test_config(&server));

    let stats = controller.reconcile_once().await.unwrap();

    assert_eq!(stats.added, 3);
    assert_eq!(stats.create_failures, 1);
    assert_eq!(sorted(backend.creates()), vec![game("1"), game("2"), game("3")]);
    assert_eq!(backend.running(), games(&["2", "3"]));

    // Once the backend recovers, the next pass recreates the failed game.
    backend.clear_failures();
    let stats = controller.reconcile_once().await.unwrap();

    assert_eq!(stats.added, 0);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.create_failures, 0);
    assert_eq!(backend.running(), games(&["1", "2", "3"]));

    let stats = controller.reconcile_once().await.unwrap();
    assert!(stats.is_noop());
}

#[tokio::test]
async fn failed_pre_delete_does_not_block_create() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}})).await;
    let backend = Arc::new(MockBackend::new());
    backend.fail_delete_for(&game("1"));
    let controller = controller(&server, backend.clone(), test_config(&server));

    let stats = controller.reconcile_once().await.unwrap();

    assert_eq!(stats.create_failures, 0);
    assert_eq!(backend.running(), games(&["1"]));
}

#[tokio::test]
async fn delete_failure_is_isolated_and_retried() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}, "2": {}, "3": {}})).await;
    let backend = Arc::new(MockBackend::new());
    let controller = controller(&server, backend.clone(), test_config(&server));
    controller.reconcile_once().await.unwrap();

    backend.fail_delete_for(&game("2"));
    serve(&server, json!({})).await;
    let stats = controller.reconcile_once().await.unwrap();

    assert_eq!(stats.removed, 3);
    assert_eq!(stats.delete_failures, 1);
    assert_eq!(backend.running(), games(&["2"]));
    // Still running, so still tracked for the next pass.
    assert_eq!(tracked(&controller), games(&["2"]));

    backend.clear_failures();
    let stats = controller.reconcile_once().await.unwrap();
    assert_eq!(stats.removed, 1);
    assert!(backend.running().is_empty());
    assert!(controller.tracker().is_empty());
}

#[tokio::test]
async fn backend_calls_are_bounded_by_timeout() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}})).await;
    let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(500)));
    let config = ReconcilerConfig {
        backend_timeout: Duration::from_millis(50),
        ..test_config(&server)
    };
    let controller = controller(&server, backend.clone(), config);

    let stats = tokio::time::timeout(Duration::from_secs(2), controller.reconcile_once())
        .await
        .expect("pass should not hang on a slow backend")
        .unwrap();

    assert_eq!(stats.create_failures, 1);
}

#[tokio::test]
async fn config_change_ignored_by_default() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {"name": "before"}})).await;
    let backend = Arc::new(MockBackend::new());
    let controller = controller(&server, backend.clone(), test_config(&server));
    controller.reconcile_once().await.unwrap();

    serve(&server, json!({"1": {"name": "after"}})).await;
    let stats = controller.reconcile_once().await.unwrap();

    assert!(stats.is_noop());
    assert_eq!(backend.created_config(&game("1")).unwrap()["name"], "before");
}

#[tokio::test]
async fn config_change_recreates_when_enabled() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {"name": "before"}, "2": {"name": "same"}})).await;
    let backend = Arc::new(MockBackend::new());
    let config = ReconcilerConfig {
        recreate_on_config_change: true,
        ..test_config(&server)
    };
    let controller = controller(&server, backend.clone(), config);
    controller.reconcile_once().await.unwrap();

    serve(&server, json!({"2": {"name": "same"}, "1": {"name": "after"}})).await;
    let stats = controller.reconcile_once().await.unwrap();

    assert_eq!(stats.changed, 1);
    assert_eq!(backend.created_config(&game("1")).unwrap()["name"], "after");
    assert_eq!(
        backend.creates().iter().filter(|id| **id == game("2")).count(),
        1
    );
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let server = MockServer::start().await;
    serve(&server, json!({"1": {}})).await;
    let backend = Arc::new(MockBackend::new());
    let config = ReconcilerConfig {
        poll_interval: Duration::from_secs(60),
        ..test_config(&server)
    };
    let controller = Arc::new(controller(&server, backend.clone(), config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.run(shutdown_rx).await }
    });

    // Let the first pass finish; the loop is then in its long idle sleep.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.running(), games(&["1"]));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("reconciler should stop during its idle sleep")
        .unwrap();
}

#[tokio::test]
async fn run_survives_failed_passes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GAMES_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(GAMES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"1": {}})))
        .mount(&server)
        .await;
    let backend = Arc::new(MockBackend::new());
    let controller = Arc::new(controller(&server, backend.clone(), test_config(&server)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.run(shutdown_rx).await }
    });

    tokio::time::timeout(Duration::from_secs(2), async {
        while !backend.running().contains(&game("1")) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("loop should recover after failed fetches");

    drop(shutdown_tx);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
