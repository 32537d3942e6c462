//! End-to-end room lifecycle through `SignalingService`

use std::sync::Arc;
use std::time::Duration;

use beamcast_signaling::message::{JoinBroadcasterRequest, JoinViewerRequest, ViewerChange};
use beamcast_signaling::quality::{self, Quality};
use beamcast_signaling::test_helpers::{
    join_broadcaster, join_viewer, test_service, test_service_with, MockConnection,
};
use beamcast_signaling::{
    ConnectionRef, PeerId, RoomSettings, RoomState, ServerMessage, SignalingConfig, SignalingError,
    StreamKey,
};
use tokio::time::Instant;

fn conn_ref(conn: &Arc<MockConnection>) -> ConnectionRef {
    conn.clone()
}

#[tokio::test]
async fn broadcaster_join_creates_live_room() {
    let service = test_service();
    let b = MockConnection::new("b1");
    join_broadcaster(&service, &b, "abc").await;

    let registry = service.registry();
    let registry = registry.read();
    let room = registry.get(&StreamKey::from("abc")).unwrap();
    assert_eq!(room.broadcaster(), Some(&PeerId::from("b1")));
    assert_eq!(room.viewer_count(), 0);
    assert_eq!(room.state(), RoomState::Live);
    assert_eq!(b.events(), vec!["broadcaster-joined"]);
}

#[tokio::test]
async fn viewer_before_broadcaster_is_rejected() {
    let service = test_service();
    let v1 = MockConnection::new("v1");

    let err = service
        .join_as_viewer(
            &conn_ref(&v1),
            JoinViewerRequest {
                stream_key: "abc".to_string(),
                preferred_quality: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, SignalingError::NotFound(_)));
    assert_eq!(service.registry().read().room_count(), 0);

    // Through the message path the client sees a structured error
    service
        .handle_text(&conn_ref(&v1), r#"{"event":"join-as-viewer","data":{"streamKey":"abc"}}"#)
        .await;
    let Some(ServerMessage::Error { code, .. }) = v1.last() else {
        panic!("expected error event");
    };
    assert_eq!(code, "NOT_FOUND");
}

#[tokio::test]
async fn second_broadcaster_conflicts() {
    let service = test_service();
    let b1 = MockConnection::new("b1");
    let b2 = MockConnection::new("b2");
    join_broadcaster(&service, &b1, "abc").await;

    let err = service
        .join_as_broadcaster(
            &conn_ref(&b2),
            JoinBroadcasterRequest {
                stream_key: "abc".to_string(),
                quality: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SignalingError::Conflict(_)));
    assert_eq!(err.code(), "CONFLICT");

    let registry = service.registry();
    let registry = registry.read();
    assert_eq!(
        registry.get(&StreamKey::from("abc")).unwrap().broadcaster(),
        Some(&PeerId::from("b1"))
    );
    assert!(registry.peer(&PeerId::from("b2")).is_none());
}

#[tokio::test]
async fn viewer_ice_candidate_reaches_broadcaster() {
    let service = test_service();
    let b = MockConnection::new("b1");
    let v1 = MockConnection::new("v1");
    join_broadcaster(&service, &b, "abc").await;
    join_viewer(&service, &v1, "abc", "auto");
    b.take();

    service
        .handle_text(
            &conn_ref(&v1),
            r#"{"event":"ice-candidate","data":{"streamKey":"abc","payload":{"candidate":"c1"}}}"#,
        )
        .await;

    let messages = b.take();
    assert_eq!(messages.len(), 1);
    let ServerMessage::IceCandidate(signal) = &messages[0] else {
        panic!("expected ice-candidate");
    };
    assert_eq!(signal.from_peer_id, PeerId::from("v1"));
    assert_eq!(signal.payload["candidate"], "c1");
}

#[tokio::test(start_paused = true)]
async fn reaper_removes_room_after_broadcaster_loss() {
    let service = test_service();
    let b = MockConnection::new("b1");
    join_broadcaster(&service, &b, "abc").await;

    // Transport dies without reporting the disconnect
    b.close_silently();
    tokio::time::advance(service.config().peer_timeout() + Duration::from_secs(1)).await;

    let report = service.reaper().sweep(Instant::now());
    assert_eq!(report.evicted, vec![PeerId::from("b1")]);
    assert!(service.registry().read().get(&StreamKey::from("abc")).is_none());
}

#[tokio::test]
async fn broadcaster_disconnect_notifies_each_viewer_once() {
    let service = test_service();
    let b = MockConnection::new("b1");
    join_broadcaster(&service, &b, "abc").await;
    let viewers: Vec<_> = (0..5).map(|i| MockConnection::new(&format!("v{i}"))).collect();
    for viewer in &viewers {
        join_viewer(&service, viewer, "abc", "auto");
    }

    assert!(service.handle_disconnect(&PeerId::from("b1")));
    // A late duplicate report from the transport changes nothing
    assert!(!service.handle_disconnect(&PeerId::from("b1")));

    for viewer in &viewers {
        assert_eq!(viewer.count("broadcaster-disconnected"), 1);
    }
    let registry = service.registry();
    let registry = registry.read();
    let room = registry.get(&StreamKey::from("abc")).unwrap();
    assert!(room.broadcaster().is_none());
    assert_eq!(room.state(), RoomState::BroadcasterGone);
}

#[tokio::test]
async fn stale_broadcaster_takeover_notifies_viewers_once() {
    let service = test_service();
    let b1 = MockConnection::new("b1");
    let b2 = MockConnection::new("b2");
    let v1 = MockConnection::new("v1");
    let v2 = MockConnection::new("v2");
    join_broadcaster(&service, &b1, "abc").await;
    join_viewer(&service, &v1, "abc", "auto");
    join_viewer(&service, &v2, "abc", "auto");

    // b1 drops without reporting, then b2 takes the stream over
    b1.close_silently();
    join_broadcaster(&service, &b2, "abc").await;
    assert_eq!(b1.close_calls(), 1);

    // The transport's late report for b1 finds nothing left to do
    assert!(!service.handle_disconnect(&PeerId::from("b1")));

    for viewer in [&v1, &v2] {
        assert_eq!(viewer.events(), vec!["viewer-joined", "broadcaster-disconnected"]);
    }
    let Some(ServerMessage::BroadcasterJoined { viewer_count, .. }) = b2.last() else {
        panic!("expected broadcaster-joined");
    };
    assert_eq!(viewer_count, 2);

    let registry = service.registry();
    let registry = registry.read();
    let room = registry.get(&StreamKey::from("abc")).unwrap();
    assert_eq!(room.broadcaster(), Some(&PeerId::from("b2")));
    assert_eq!(room.state(), RoomState::Live);
    assert!(registry.peer(&PeerId::from("b1")).is_none());
}

#[tokio::test]
async fn last_viewer_leaving_orphaned_room_removes_it() {
    let service = test_service();
    let b = MockConnection::new("b1");
    let v1 = MockConnection::new("v1");
    join_broadcaster(&service, &b, "abc").await;
    join_viewer(&service, &v1, "abc", "auto");

    service.handle_disconnect(&PeerId::from("b1"));
    service.handle_disconnect(&PeerId::from("v1"));
    assert_eq!(service.registry().read().room_count(), 0);
    assert_eq!(service.global_stats().total_peers, 0);
}

#[tokio::test]
async fn viewer_count_never_exceeds_capacity() {
    let service = test_service_with(SignalingConfig {
        default_room_settings: RoomSettings {
            max_viewers: 3,
            ..RoomSettings::default()
        },
        ..SignalingConfig::default()
    });
    let b = MockConnection::new("b1");
    join_broadcaster(&service, &b, "abc").await;

    let mut rejected = 0;
    for i in 0..10 {
        let viewer = MockConnection::new(&format!("v{i}"));
        let result = service.join_as_viewer(
            &conn_ref(&viewer),
            JoinViewerRequest {
                stream_key: "abc".to_string(),
                preferred_quality: None,
            },
        );
        if let Err(e) = result {
            assert_eq!(e.code(), "CAPACITY_EXCEEDED");
            rejected += 1;
        }
    }
    assert_eq!(rejected, 7);
    assert_eq!(
        service.registry().read().get(&StreamKey::from("abc")).unwrap().viewer_count(),
        3
    );

    // A slot frees up once a viewer leaves
    service.handle_disconnect(&PeerId::from("v0"));
    join_viewer(&service, &MockConnection::new("late"), "abc", "auto");
}

#[tokio::test]
async fn broadcaster_offer_fan_out_and_targeted_answer() {
    let service = test_service();
    let b = MockConnection::new("b1");
    join_broadcaster(&service, &b, "abc").await;
    let viewers: Vec<_> = (0..3).map(|i| MockConnection::new(&format!("v{i}"))).collect();
    for viewer in &viewers {
        join_viewer(&service, viewer, "abc", "auto");
        viewer.take();
    }

    service
        .handle_text(
            &conn_ref(&b),
            r#"{"event":"offer","data":{"streamKey":"abc","payload":{"sdp":"x"}}}"#,
        )
        .await;
    for viewer in &viewers {
        assert_eq!(viewer.events(), vec!["offer"]);
    }

    service
        .handle_text(
            &conn_ref(&b),
            r#"{"event":"offer","data":{"streamKey":"abc","payload":{"sdp":"y"},"targetPeerId":"v2"}}"#,
        )
        .await;
    assert_eq!(viewers[2].count("offer"), 2);
    assert_eq!(viewers[0].count("offer"), 1);

    // Target already gone: no delivery and no error back to the broadcaster
    service.handle_disconnect(&PeerId::from("v1"));
    b.take();
    service
        .handle_text(
            &conn_ref(&b),
            r#"{"event":"offer","data":{"streamKey":"abc","payload":{},"targetPeerId":"v1"}}"#,
        )
        .await;
    assert!(b.messages().is_empty());
    assert_eq!(viewers[1].count("offer"), 1);
}

#[tokio::test]
async fn viewer_count_updates_track_joins_and_leaves() {
    let service = test_service();
    let b = MockConnection::new("b1");
    join_broadcaster(&service, &b, "abc").await;
    b.take();

    let v1 = MockConnection::new("v1");
    let v2 = MockConnection::new("v2");
    join_viewer(&service, &v1, "abc", "auto");
    join_viewer(&service, &v2, "abc", "auto");
    service.handle_disconnect(&PeerId::from("v1"));

    let updates: Vec<(usize, String, ViewerChange)> = b
        .take()
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::ViewerCountUpdate {
                viewer_count,
                viewer_id,
                action,
                ..
            } => Some((viewer_count, viewer_id.to_string(), action)),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![
            (1, "v1".to_string(), ViewerChange::Joined),
            (2, "v2".to_string(), ViewerChange::Joined),
            (1, "v1".to_string(), ViewerChange::Left),
        ]
    );
}

#[tokio::test]
async fn quality_stays_within_allowed_set() {
    let service = test_service();
    let b = MockConnection::new("b1");
    join_broadcaster(&service, &b, "abc").await;

    for (i, preferred) in ["auto", "1080p", "240p", "garbage", "360p"].iter().enumerate() {
        join_viewer(&service, &MockConnection::new(&format!("v{i}")), "abc", preferred);
    }

    let registry = service.registry();
    let registry = registry.read();
    let allowed = &registry.get(&StreamKey::from("abc")).unwrap().settings.allowed_qualities;
    for peer in registry.peers().iter() {
        assert!(allowed.contains(&peer.quality), "{} has {}", peer.id, peer.quality);
    }
    assert_eq!(registry.peer(&PeerId::from("v2")).unwrap().quality, Quality::P1080);
}

#[test]
fn quality_selection_examples() {
    assert_eq!(
        quality::select("auto", &[Quality::P1080, Quality::P720, Quality::P480]),
        Some(Quality::P720)
    );
    assert_eq!(
        quality::select("1080p", &[Quality::P720, Quality::P480]),
        Some(Quality::P720)
    );
}
