//! Interleavings between suspended joins, disconnects and the periodic tasks

use std::sync::Arc;
use std::time::Duration;

use beamcast_signaling::message::JoinBroadcasterRequest;
use beamcast_signaling::test_helpers::{join_viewer, GatedValidator, MockConnection};
use beamcast_signaling::{
    ConnectionRef, ManualTicker, PeerId, SignalingConfig, SignalingError, SignalingService,
    StreamKey,
};
use tokio_util::sync::CancellationToken;

fn request(key: &str) -> JoinBroadcasterRequest {
    JoinBroadcasterRequest {
        stream_key: key.to_string(),
        quality: None,
    }
}

fn gated_service() -> (SignalingService, Arc<GatedValidator>) {
    let validator = GatedValidator::new(true);
    let service = SignalingService::new(SignalingConfig::default(), validator.clone());
    (service, validator)
}

#[tokio::test]
async fn concurrent_broadcaster_joins_admit_exactly_one() {
    let (service, validator) = gated_service();
    let b1 = MockConnection::new("b1");
    let b2 = MockConnection::new("b2");

    // Both joins pass the pre-check and suspend on validation
    let first = {
        let service = service.clone();
        let conn: ConnectionRef = b1.clone();
        tokio::spawn(async move { service.join_as_broadcaster(&conn, request("abc")).await })
    };
    validator.wait_entered().await;
    let second = {
        let service = service.clone();
        let conn: ConnectionRef = b2.clone();
        tokio::spawn(async move { service.join_as_broadcaster(&conn, request("abc")).await })
    };
    validator.wait_entered().await;

    validator.release();
    validator.release();
    let results = [first.await.unwrap(), second.await.unwrap()];

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(SignalingError::Conflict(_))))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(conflicts, 1);

    let registry = service.registry();
    let registry = registry.read();
    let room = registry.get(&StreamKey::from("abc")).unwrap();
    let winner = room.broadcaster().unwrap();
    assert!(registry.peer(winner).unwrap().is_connected());
    assert_eq!(registry.peers().len(), 1);
}

#[tokio::test]
async fn join_is_discarded_when_connection_closes_during_validation() {
    let (service, validator) = gated_service();
    let b1 = MockConnection::new("b1");

    let join = {
        let service = service.clone();
        let conn: ConnectionRef = b1.clone();
        tokio::spawn(async move { service.join_as_broadcaster(&conn, request("abc")).await })
    };
    validator.wait_entered().await;

    b1.close_silently();
    // The transport reports the disconnect before the join has registered anything
    assert!(!service.handle_disconnect(&PeerId::from("b1")));

    validator.release();
    let result = join.await.unwrap();
    assert_eq!(result, Err(SignalingError::ConnectionClosed));

    let registry = service.registry();
    assert_eq!(registry.read().room_count(), 0);
    assert!(registry.read().peers().is_empty());
}

#[tokio::test]
async fn cancelled_join_sends_no_error() {
    let (service, validator) = gated_service();
    let b1 = MockConnection::new("b1");

    let handled = {
        let service = service.clone();
        let conn: ConnectionRef = b1.clone();
        tokio::spawn(async move {
            service
                .handle_text(&conn, r#"{"event":"join-as-broadcaster","data":{"streamKey":"abc"}}"#)
                .await;
        })
    };
    validator.wait_entered().await;
    b1.close_silently();
    validator.release();
    handled.await.unwrap();

    assert!(b1.messages().is_empty());
    assert_eq!(service.registry().read().room_count(), 0);
}

#[tokio::test]
async fn viewer_may_join_while_broadcaster_join_is_pending() {
    let (service, validator) = gated_service();
    let b1 = MockConnection::new("b1");
    let v1 = MockConnection::new("v1");

    let join = {
        let service = service.clone();
        let conn: ConnectionRef = b1.clone();
        tokio::spawn(async move { service.join_as_broadcaster(&conn, request("abc")).await })
    };
    validator.wait_entered().await;

    // No room exists until validation resolves
    let conn: ConnectionRef = v1.clone();
    let err = service
        .join_as_viewer(
            &conn,
            beamcast_signaling::message::JoinViewerRequest {
                stream_key: "abc".to_string(),
                preferred_quality: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, SignalingError::NotFound(_)));

    validator.release();
    join.await.unwrap().unwrap();
    join_viewer(&service, &v1, "abc", "auto");
    assert_eq!(b1.count("viewer-count-update"), 1);
}

#[tokio::test]
async fn periodic_tasks_run_against_live_registry() {
    let service = SignalingService::new(
        SignalingConfig::default(),
        Arc::new(beamcast_signaling::AllowAllValidator),
    );
    let shutdown = CancellationToken::new();

    let (stats_ticker, stats_tick) = ManualTicker::new();
    let (reap_ticker, reap_tick) = ManualTicker::new();
    let stats_task = tokio::spawn(service.stats_broadcaster().run(stats_ticker, shutdown.clone()));
    let reap_task = tokio::spawn(service.reaper().run(reap_ticker, shutdown.clone()));

    // Nothing to do yet
    assert!(stats_tick.tick().await);

    let b = MockConnection::new("b1");
    beamcast_signaling::test_helpers::join_broadcaster(&service, &b, "abc").await;
    let v1 = MockConnection::new("v1");
    join_viewer(&service, &v1, "abc", "480p");

    assert!(stats_tick.tick().await);
    assert_eq!(b.count("room-stats"), 1);
    assert_eq!(v1.count("viewer-stats"), 1);

    // Membership changes between ticks are picked up
    service.handle_disconnect(&PeerId::from("v1"));
    assert!(stats_tick.tick().await);
    assert_eq!(b.count("room-stats"), 2);
    assert_eq!(v1.count("viewer-stats"), 1);

    // Connected peers survive sweeps
    assert!(reap_tick.tick().await);
    assert_eq!(service.registry().read().room_count(), 1);

    shutdown.cancel();
    stats_task.await.unwrap();
    reap_task.await.unwrap();
    assert!(!stats_tick.tick().await);
}

#[tokio::test(start_paused = true)]
async fn background_tasks_stop_on_shutdown() {
    let service = SignalingService::new(
        SignalingConfig::default(),
        Arc::new(beamcast_signaling::AllowAllValidator),
    );
    let shutdown = CancellationToken::new();
    let tasks = service.spawn_background_tasks(&shutdown);

    let b = MockConnection::new("b1");
    beamcast_signaling::test_helpers::join_broadcaster(&service, &b, "abc").await;

    tokio::time::sleep(service.config().stats_interval() + Duration::from_millis(10)).await;
    assert!(b.count("room-stats") >= 1);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}
