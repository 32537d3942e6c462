//! Peer records and the peer registry
//!
//! A peer is a connection that registered with a role. Peers are owned by the
//! [`PeerRegistry`]; rooms refer to them by id.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::connection::ConnectionRef;
use crate::message::MetricsReport;
use crate::quality::Quality;
use crate::types::{PeerId, Role, StreamKey};

/// Peer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// Join accepted but not yet attached to a room
    Connecting,
    /// Attached and reachable
    Connected,
    /// Transport went away; waiting for eviction
    Disconnected,
}

/// Registered participant of a room
pub struct Peer {
    pub id: PeerId,
    pub stream_key: StreamKey,
    pub role: Role,
    connection: ConnectionRef,
    state: PeerState,
    pub quality: Quality,
    /// Last reported bandwidth (kbps)
    pub bandwidth: f64,
    /// Last reported latency (ms)
    pub latency: f64,
    pub joined_at: Instant,
}

impl Peer {
    #[must_use]
    pub fn new(
        connection: ConnectionRef,
        stream_key: StreamKey,
        role: Role,
        quality: Quality,
    ) -> Self {
        Self {
            id: connection.id().clone(),
            stream_key,
            role,
            connection,
            state: PeerState::Connecting,
            quality,
            bandwidth: 0.0,
            latency: 0.0,
            joined_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    #[must_use]
    pub const fn state(&self) -> PeerState {
        self.state
    }

    pub(crate) fn mark_connected(&mut self) {
        if self.state == PeerState::Connecting {
            self.state = PeerState::Connected;
        }
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.state = PeerState::Disconnected;
    }

    /// Connected and the transport still reports the channel open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected && self.connection.is_open()
    }

    /// Fold the transport's view into the peer state.
    /// Returns whether the peer is still connected.
    pub(crate) fn refresh_state(&mut self) -> bool {
        if self.state == PeerState::Connected && !self.connection.is_open() {
            self.state = PeerState::Disconnected;
        }
        self.is_connected()
    }

    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.joined_at)
    }

    /// Disconnected and older than `timeout`
    #[must_use]
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        !self.is_connected() && self.age(now) > timeout
    }

    /// Apply self-reported measurements, ignoring values that are negative or
    /// not finite
    pub(crate) fn record_metrics(&mut self, report: &MetricsReport) {
        if let Some(bandwidth) = report.bandwidth.filter(|v| v.is_finite() && *v >= 0.0) {
            self.bandwidth = bandwidth;
        }
        if let Some(latency) = report.latency.filter(|v| v.is_finite() && *v >= 0.0) {
            self.latency = latency;
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("stream_key", &self.stream_key)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("quality", &self.quality)
            .finish_non_exhaustive()
    }
}

/// Peer records keyed by connection id.
///
/// Mutation is crate-private: only the room registry adds and removes peers,
/// so a peer and its room membership always change together.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, peer: Peer) {
        self.peers.insert(peer.id.clone(), peer);
    }

    pub(crate) fn remove(&mut self, peer_id: &PeerId) -> Option<Peer> {
        self.peers.remove(peer_id)
    }

    pub(crate) fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(peer_id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    #[must_use]
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }
}
