//! Room and peer telemetry
//!
//! [`StatsBroadcaster`] pushes `room-stats` to every broadcaster and
//! `viewer-stats` to every viewer on each tick. Membership is re-read from
//! the registry every tick.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RoomSettings;
use crate::connection::Outbox;
use crate::message::ServerMessage;
use crate::peer::Peer;
use crate::quality::Quality;
use crate::room::{RoomRegistry, RoomState, SharedRegistry, StreamRoom};
use crate::scheduler::{run_periodic, Ticker};
use crate::types::{PeerId, Role, StreamKey};

/// Per-peer detail included in `room-stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStats {
    pub peer_id: PeerId,
    pub role: Role,
    pub quality: Quality,
    pub bandwidth: f64,
    pub latency: f64,
    pub connected: bool,
    pub connected_secs: u64,
}

impl PeerStats {
    fn from_peer(peer: &Peer, now: Instant) -> Self {
        Self {
            peer_id: peer.id.clone(),
            role: peer.role,
            quality: peer.quality,
            bandwidth: peer.bandwidth,
            latency: peer.latency,
            connected: peer.is_connected(),
            connected_secs: peer.age(now).as_secs(),
        }
    }
}

/// Full room detail, sent to broadcasters and in answer to `get-stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub stream_key: StreamKey,
    pub viewer_count: usize,
    /// Mean latency over every peer in the room (ms)
    pub average_latency: f64,
    /// Sum of reported bandwidth over every peer in the room (kbps)
    pub total_bandwidth: f64,
    pub uptime_secs: u64,
    pub broadcaster: Option<PeerStats>,
    pub viewers: Vec<PeerStats>,
    pub settings: RoomSettings,
}

/// Light per-viewer update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerStats {
    pub stream_key: StreamKey,
    pub viewer_count: usize,
    pub quality: Quality,
    pub latency: f64,
}

/// Aggregates across the whole registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_rooms: usize,
    pub live_rooms: usize,
    pub total_peers: usize,
    pub total_broadcasters: usize,
    pub total_viewers: usize,
    pub average_latency: f64,
    pub average_bandwidth: f64,
}

fn members<'a>(
    registry: &'a RoomRegistry,
    room: &'a StreamRoom,
) -> impl Iterator<Item = &'a Peer> + 'a {
    room.broadcaster()
        .into_iter()
        .chain(room.viewers())
        .filter_map(|id| registry.peer(id))
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Compute the stats of one room from the current registry contents
#[must_use]
pub fn room_stats(registry: &RoomRegistry, room: &StreamRoom, now: Instant) -> RoomStats {
    RoomStats {
        stream_key: room.stream_key.clone(),
        viewer_count: room.viewer_count(),
        average_latency: mean(members(registry, room).map(|p| p.latency)),
        total_bandwidth: members(registry, room).map(|p| p.bandwidth).sum(),
        uptime_secs: now.saturating_duration_since(room.created_at).as_secs(),
        broadcaster: room
            .broadcaster()
            .and_then(|id| registry.peer(id))
            .map(|p| PeerStats::from_peer(p, now)),
        viewers: room
            .viewers()
            .filter_map(|id| registry.peer(id))
            .map(|p| PeerStats::from_peer(p, now))
            .collect(),
        settings: room.settings.clone(),
    }
}

/// Stats of the room `peer_id` belongs to
#[must_use]
pub fn stats_for_peer(
    registry: &RoomRegistry,
    peer_id: &PeerId,
    now: Instant,
) -> Option<RoomStats> {
    registry
        .room_of(peer_id)
        .map(|room| room_stats(registry, room, now))
}

#[must_use]
pub fn global_stats(registry: &RoomRegistry) -> GlobalStats {
    let peers = registry.peers();
    let total_broadcasters = peers.iter().filter(|p| p.role == Role::Broadcaster).count();

    GlobalStats {
        total_rooms: registry.room_count(),
        live_rooms: registry
            .rooms()
            .filter(|room| room.state() == RoomState::Live)
            .count(),
        total_peers: peers.len(),
        total_broadcasters,
        total_viewers: peers.len() - total_broadcasters,
        average_latency: mean(peers.iter().map(|p| p.latency)),
        average_bandwidth: mean(peers.iter().map(|p| p.bandwidth)),
    }
}

/// Periodic stats push
pub struct StatsBroadcaster {
    registry: SharedRegistry,
}

impl StatsBroadcaster {
    #[must_use]
    pub const fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Compute and push one round of stats. Returns the number of messages
    /// accepted by their connections.
    pub fn broadcast_once(&self, now: Instant) -> usize {
        let outbox = {
            let registry = self.registry.read();
            let mut outbox = Outbox::new();

            for room in registry.rooms() {
                let stats = room_stats(&registry, room, now);

                if let Some(broadcaster) = room.broadcaster().and_then(|id| registry.peer(id)) {
                    outbox.push(
                        Arc::clone(broadcaster.connection()),
                        ServerMessage::RoomStats(stats.clone()),
                    );
                }

                for viewer in room.viewers().filter_map(|id| registry.peer(id)) {
                    outbox.push(
                        Arc::clone(viewer.connection()),
                        ServerMessage::ViewerStats(ViewerStats {
                            stream_key: room.stream_key.clone(),
                            viewer_count: stats.viewer_count,
                            quality: viewer.quality,
                            latency: viewer.latency,
                        }),
                    );
                }
            }
            outbox
        };

        let queued = outbox.len();
        let delivered = outbox.deliver();
        debug!(queued, delivered, "Pushed room stats");
        delivered
    }

    /// Run until `shutdown` fires
    pub async fn run<T: Ticker>(self, ticker: T, shutdown: CancellationToken) {
        run_periodic("stats-broadcaster", ticker, shutdown, move |now| {
            self.broadcast_once(now);
        })
        .await;
    }
}
