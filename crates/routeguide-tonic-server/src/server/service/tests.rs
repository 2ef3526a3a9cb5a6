use crate::server::{config::ServerConfig, serve, service::handler::RouteGuideService};
use core::time::Duration;
use routeguide_tonic_client::{ClientConfig, OperationStatus, RouteGuideCaller};
use routeguide_tonic_core::{
    Error, FeatureStore,
    geo::{Bounds, Location, haversine},
    proto::{Point, Rectangle, RouteNote},
};
use std::net::SocketAddr;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::Code;

const DB: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../data/route_guide_db.json");

struct TestServer {
    addr: SocketAddr,
    service: RouteGuideService,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let store = FeatureStore::load(DB).unwrap();
        let service = RouteGuideService::new(store, config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(serve(
            service.clone(),
            TcpListenerStream::new(listener),
            async move {
                let _ = stopped.await;
            },
        ));

        Self {
            addr,
            service,
            stop: Some(stop),
            handle,
        }
    }

    async fn caller(&self) -> RouteGuideCaller {
        RouteGuideCaller::connect(ClientConfig::new(format!("http://{}", self.addr)))
            .await
            .unwrap()
    }

    /// Signals shutdown without waiting for it.
    fn begin_shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    async fn stop(mut self) {
        self.begin_shutdown();
        self.handle.await.unwrap().unwrap();
    }
}

fn default_config() -> ServerConfig {
    ServerConfig {
        shutdown_timeout: Some(Duration::from_millis(500)),
        ..ServerConfig::default()
    }
}

fn point(latitude: i32, longitude: i32) -> Point {
    Point {
        latitude,
        longitude,
    }
}

fn note(latitude: i32, longitude: i32, message: &str) -> RouteNote {
    RouteNote {
        location: Some(point(latitude, longitude)),
        message: message.to_string(),
    }
}

fn messages(notes: &[RouteNote]) -> Vec<&str> {
    notes.iter().map(|n| n.message.as_str()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn get_feature_returns_named_or_empty() {
    let server = TestServer::start(default_config()).await;
    let caller = server.caller().await;

    let found = caller.get_feature(point(409_146_138, -746_188_906)).await.unwrap();
    assert_eq!(
        found.name,
        "Berkshire Valley Management Area Trail, Jefferson, NJ, USA"
    );

    let missing = caller.get_feature(point(0, 0)).await.unwrap();
    assert!(missing.name.is_empty());
    assert_eq!(missing.location, Some(point(0, 0)));

    // Unnamed records in the database are not features.
    let unnamed = caller.get_feature(point(404_701_380, -744_781_745)).await.unwrap();
    assert!(unnamed.name.is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn list_features_matches_the_store_for_either_corner_order() {
    let server = TestServer::start(default_config()).await;
    let caller = server.caller().await;

    let lo = point(400_000_000, -750_000_000);
    let hi = point(420_000_000, -730_000_000);
    let expected: Vec<_> = server
        .service
        .store()
        .iter_within(Bounds::from_corners(Location::from(&lo), Location::from(&hi)))
        .cloned()
        .collect();
    assert!(!expected.is_empty());

    let forward = caller
        .list_features(Rectangle {
            lo: Some(lo.clone()),
            hi: Some(hi.clone()),
        })
        .await
        .unwrap();
    let reversed = caller
        .list_features(Rectangle {
            lo: Some(hi),
            hi: Some(lo),
        })
        .await
        .unwrap();

    assert_eq!(forward, expected);
    assert_eq!(reversed, expected);
    assert!(forward.iter().all(|f| !f.name.is_empty()));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn list_features_over_an_empty_region_is_empty() {
    let server = TestServer::start(default_config()).await;
    let caller = server.caller().await;

    let features = caller
        .list_features(Rectangle {
            lo: Some(point(10, 10)),
            hi: Some(point(20, 20)),
        })
        .await
        .unwrap();
    assert!(features.is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn record_route_summarizes_the_drained_stream() {
    let server = TestServer::start(default_config()).await;
    let caller = server.caller().await;

    let empty = caller.record_route(Vec::new()).await.unwrap();
    assert_eq!(empty.point_count, 0);
    assert_eq!(empty.feature_count, 0);
    assert_eq!(empty.distance, 0);

    let a = point(409_146_138, -746_188_906);
    let b = point(413_628_156, -749_015_468);
    let c = point(1, 1);
    let expected = haversine(Location::from(&a), Location::from(&b))
        + haversine(Location::from(&b), Location::from(&c));

    let summary = caller.record_route([a, b, c]).await.unwrap();
    assert_eq!(summary.point_count, 3);
    assert_eq!(summary.feature_count, 2);
    assert!((f64::from(summary.distance) - expected).abs() <= 1.0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn route_chat_replays_prior_notes_at_the_same_point() {
    let server = TestServer::start(default_config()).await;
    let caller = server.caller().await;

    let replies = caller
        .route_chat([note(1, 1, "N1"), note(1, 1, "N2"), note(2, 2, "N3")])
        .await
        .unwrap();
    assert_eq!(messages(&replies), ["N1"]);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_chats_share_the_log() {
    let server = TestServer::start(default_config()).await;
    let alice = server.caller().await;
    let bob = server.caller().await;

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    let mut alice_replies = alice.route_chat_stream(ReceiverStream::new(rx)).await.unwrap();

    tx.send(note(3, 3, "a1")).await.unwrap();
    tx.send(note(3, 3, "a2")).await.unwrap();
    let first = alice_replies.message().await.unwrap().unwrap();
    assert_eq!(first.message, "a1");

    let bob_replies = bob.route_chat([note(3, 3, "b1")]).await.unwrap();
    assert_eq!(messages(&bob_replies), ["a1", "a2"]);

    tx.send(note(3, 3, "a3")).await.unwrap();
    drop(tx);

    let mut rest = Vec::new();
    while let Some(reply) = alice_replies.message().await.unwrap() {
        rest.push(reply);
    }
    assert_eq!(messages(&rest), ["a2", "b1"]);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deferred_operation_runs_only_when_executed() {
    let server = TestServer::start(default_config()).await;
    let caller = server.caller().await;
    let deferred = caller.deferred();

    let op = deferred.get_feature(point(409_146_138, -746_188_906));
    assert_eq!(op.status(), OperationStatus::Pending);
    assert_eq!(server.service.calls().inflight(), 0);

    let feature = op.spawn().await.unwrap().unwrap();
    assert!(!feature.name.is_empty());
    assert_eq!(op.status(), OperationStatus::Ok);

    // Cancelling after completion is observed but does not rewrite the
    // terminal status.
    op.cancel();
    assert!(op.is_cancelled());
    assert_eq!(op.status(), OperationStatus::Ok);
    assert!(matches!(op.execute().await, Err(Error::OperationConsumed)));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_a_deferred_chat_cancels_the_call() {
    let server = TestServer::start(default_config()).await;
    let caller = server.caller().await;

    // A chat that never half-closes stays open until cancelled.
    let chat = {
        let caller = caller.clone();
        routeguide_tonic_client::Operation::new(
            routeguide_tonic_core::types::Method::RouteChat,
            async move {
                let mut replies = caller
                    .route_chat_stream(futures::stream::pending::<RouteNote>())
                    .await?;
                while replies.message().await?.is_some() {}
                Ok::<(), Error>(())
            },
        )
    };

    let running = chat.spawn();
    while server.service.calls().inflight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(chat.status(), OperationStatus::Executing);

    chat.cancel();
    assert!(matches!(running.await.unwrap(), Err(Error::RequestCancelled)));
    assert_eq!(chat.status(), OperationStatus::Cancelled);

    // The server sees the reset and releases the call.
    while server.service.calls().inflight() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deadline_expiry_cancels_a_call() {
    let server = TestServer::start(default_config()).await;
    let caller = server
        .caller()
        .await
        .with_deadline(Duration::from_millis(150));

    let err = caller
        .record_route_stream(futures::stream::pending::<Point>())
        .await
        .unwrap_err();
    assert!(err.is_cancellation(), "unexpected error: {err:?}");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_timeout_expires_an_idle_chat() {
    let server = TestServer::start(ServerConfig {
        request_timeout: Some(Duration::from_millis(100)),
        ..default_config()
    })
    .await;
    let caller = server.caller().await;

    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let mut chat = caller.route_chat_stream(ReceiverStream::new(rx)).await.unwrap();

    let status = loop {
        match chat.message().await {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("chat ended without a status"),
            Err(status) => break status,
        }
    };
    assert_eq!(status.code(), Code::DeadlineExceeded);

    // The call is released even though the client never half-closed.
    while server.service.calls().inflight() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    drop(tx);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn caller_deadline_bounds_a_streaming_response() {
    let server = TestServer::start(default_config()).await;
    let caller = server
        .caller()
        .await
        .with_deadline(Duration::from_millis(150));

    let (_tx, rx) = tokio::sync::mpsc::channel::<RouteNote>(1);
    let mut chat = caller.route_chat_stream(ReceiverStream::new(rx)).await.unwrap();

    // Only the server is left to enforce the deadline once the call is open.
    let status = chat.message().await.unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);

    while server.service.calls().inflight() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_refuses_new_calls_and_cancels_stragglers() {
    let mut server = TestServer::start(default_config()).await;
    let caller = server.caller().await;

    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let mut chat = caller.route_chat_stream(ReceiverStream::new(rx)).await.unwrap();
    while server.service.calls().inflight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    server.begin_shutdown();
    while server.service.calls().is_accepting() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let refused = caller.get_feature(point(0, 0)).await.unwrap_err();
    assert_eq!(refused.code(), Code::Unavailable);

    // The open chat outlives the drain window and is cancelled.
    let status = loop {
        match chat.message().await {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("chat ended without a status"),
            Err(status) => break status,
        }
    };
    assert_eq!(status.code(), Code::Cancelled);
    drop(tx);

    server.handle.await.unwrap().unwrap();
}
