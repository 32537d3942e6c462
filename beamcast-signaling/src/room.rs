//! Stream rooms and the room registry
//!
//! The [`RoomRegistry`] owns every room and, through its [`PeerRegistry`],
//! every peer. All mutations of either map go through the methods here so a
//! peer and its room membership always change in the same call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{RoomSettings, RoomSettingsPatch};
use crate::connection::{ConnectionRef, Outbox};
use crate::error::{Result, SignalingError};
use crate::message::{MetricsReport, ServerMessage, ViewerChange};
use crate::peer::{Peer, PeerRegistry};
use crate::quality::{self, Quality};
use crate::types::{PeerId, Role, StreamKey};

/// Registry shared between the service and the periodic tasks
pub type SharedRegistry = Arc<RwLock<RoomRegistry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// No broadcaster and no viewers; about to be removed
    Empty,
    /// A broadcaster is attached
    Live,
    /// Viewers remain but the broadcaster left
    BroadcasterGone,
}

pub struct StreamRoom {
    pub stream_key: StreamKey,
    broadcaster: Option<PeerId>,
    viewers: IndexSet<PeerId>,
    pub created_at: Instant,
    pub settings: RoomSettings,
}

impl StreamRoom {
    fn new(stream_key: StreamKey, settings: RoomSettings) -> Self {
        Self {
            stream_key,
            broadcaster: None,
            viewers: IndexSet::new(),
            created_at: Instant::now(),
            settings,
        }
    }

    #[must_use]
    pub const fn broadcaster(&self) -> Option<&PeerId> {
        self.broadcaster.as_ref()
    }

    /// Viewer ids in join order
    pub fn viewers(&self) -> impl Iterator<Item = &PeerId> {
        self.viewers.iter()
    }

    #[must_use]
    pub fn has_viewer(&self, peer_id: &PeerId) -> bool {
        self.viewers.contains(peer_id)
    }

    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.broadcaster.is_none() && self.viewers.is_empty()
    }

    #[must_use]
    pub fn state(&self) -> RoomState {
        match (&self.broadcaster, self.viewers.is_empty()) {
            (Some(_), _) => RoomState::Live,
            (None, false) => RoomState::BroadcasterGone,
            (None, true) => RoomState::Empty,
        }
    }
}

/// Result of a successful broadcaster attach
#[derive(Debug)]
pub struct BroadcasterAttached {
    pub quality: Quality,
    pub viewer_count: usize,
    pub settings: RoomSettings,
    pub room_created: bool,
    /// Stale broadcaster that was replaced, if any
    pub replaced: Option<Peer>,
    /// `broadcaster-disconnected` owed to viewers of a replaced broadcaster
    pub notifications: Outbox,
}

/// Result of a successful viewer attach
pub struct ViewerAttached {
    pub quality: Quality,
    pub viewer_count: usize,
    pub settings: RoomSettings,
    pub broadcaster_id: PeerId,
    pub broadcaster: ConnectionRef,
}

impl std::fmt::Debug for ViewerAttached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerAttached")
            .field("quality", &self.quality)
            .field("viewer_count", &self.viewer_count)
            .field("broadcaster_id", &self.broadcaster_id)
            .finish_non_exhaustive()
    }
}

/// A peer removed from the registry, with whoever must hear about it
pub struct Detached {
    pub peer: Peer,
    pub viewer_count: usize,
    pub room_removed: bool,
    broadcaster: Option<ConnectionRef>,
    remaining_viewers: Vec<ConnectionRef>,
}

impl Detached {
    /// Notifications owed to the survivors of the room
    #[must_use]
    pub fn notifications(&self) -> Outbox {
        let mut outbox = Outbox::new();
        match self.peer.role {
            Role::Broadcaster => {
                for viewer in &self.remaining_viewers {
                    outbox.push(
                        Arc::clone(viewer),
                        ServerMessage::BroadcasterDisconnected {
                            stream_key: self.peer.stream_key.clone(),
                        },
                    );
                }
            }
            Role::Viewer => {
                if let Some(broadcaster) = &self.broadcaster {
                    outbox.push(
                        Arc::clone(broadcaster),
                        ServerMessage::ViewerCountUpdate {
                            stream_key: self.peer.stream_key.clone(),
                            viewer_count: self.viewer_count,
                            viewer_id: self.peer.id.clone(),
                            action: ViewerChange::Left,
                        },
                    );
                }
            }
        }
        outbox
    }
}

/// Result of a settings update
pub struct SettingsUpdated {
    pub settings: RoomSettings,
    /// Broadcaster and viewers, all of whom get `room-settings-updated`
    pub recipients: Vec<ConnectionRef>,
    /// Peers whose tier fell out of the allowed set, with their new tier
    pub requalified: Vec<(ConnectionRef, Quality)>,
}

/// Snapshot of a room for listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub stream_key: StreamKey,
    pub state: RoomState,
    pub broadcaster_id: Option<PeerId>,
    pub viewer_count: usize,
    pub uptime_secs: u64,
}

pub struct RoomRegistry {
    rooms: HashMap<StreamKey, StreamRoom>,
    peers: PeerRegistry,
    default_settings: RoomSettings,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(default_settings: RoomSettings) -> Self {
        Self {
            rooms: HashMap::new(),
            peers: PeerRegistry::new(),
            default_settings: default_settings.normalized(),
        }
    }

    /// Wrap in the lock shared by the service and periodic tasks
    #[must_use]
    pub fn shared(default_settings: RoomSettings) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(default_settings)))
    }

    #[must_use]
    pub fn get(&self, stream_key: &StreamKey) -> Option<&StreamRoom> {
        self.rooms.get(stream_key)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &StreamRoom> {
        self.rooms.values()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub const fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    #[must_use]
    pub fn peer(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    /// Room the peer belongs to
    #[must_use]
    pub fn room_of(&self, peer_id: &PeerId) -> Option<&StreamRoom> {
        self.peers
            .get(peer_id)
            .and_then(|peer| self.rooms.get(&peer.stream_key))
    }

    /// Whether the room has a broadcaster that is still connected
    #[must_use]
    pub fn has_connected_broadcaster(&self, stream_key: &StreamKey) -> bool {
        self.live_broadcaster(stream_key).is_some()
    }

    /// Connected broadcaster of the room
    #[must_use]
    pub fn live_broadcaster(&self, stream_key: &StreamKey) -> Option<&Peer> {
        self.rooms
            .get(stream_key)
            .and_then(StreamRoom::broadcaster)
            .and_then(|id| self.peers.get(id))
            .filter(|peer| peer.is_connected())
    }

    /// Register `peer` as the broadcaster of its room, creating the room if
    /// needed. A broadcaster that is attached but no longer connected is
    /// replaced and its viewers are owed `broadcaster-disconnected`; a
    /// connected one makes the attach fail with `Conflict`.
    ///
    /// Fails with `ConnectionClosed` if the peer's own connection is already
    /// gone, so a join cancelled by the transport never registers.
    pub fn attach_broadcaster(
        &mut self,
        mut peer: Peer,
        preferred: &str,
    ) -> Result<BroadcasterAttached> {
        if self.peers.contains(&peer.id) {
            return Err(SignalingError::Validation(
                "connection already joined a stream".to_string(),
            ));
        }
        if !peer.connection().is_open() {
            return Err(SignalingError::ConnectionClosed);
        }
        if self.has_connected_broadcaster(&peer.stream_key) {
            return Err(SignalingError::Conflict("broadcaster already active".to_string()));
        }

        let stream_key = peer.stream_key.clone();
        let allowed = self
            .rooms
            .get(&stream_key)
            .map_or(&self.default_settings, |room| &room.settings)
            .allowed_qualities
            .as_slice();
        peer.quality = quality::select(preferred, allowed).ok_or_else(|| {
            SignalingError::Validation("room allows no quality tiers".to_string())
        })?;

        let room_created = !self.rooms.contains_key(&stream_key);
        let room = self
            .rooms
            .entry(stream_key.clone())
            .or_insert_with(|| StreamRoom::new(stream_key.clone(), self.default_settings.clone()));

        let replaced = room
            .broadcaster
            .take()
            .and_then(|stale_id| self.peers.remove(&stale_id));
        let mut notifications = Outbox::new();
        if let Some(stale) = &replaced {
            info!(
                stream_key = %stream_key,
                peer_id = %stale.id,
                viewers = room.viewers.len(),
                "Replacing stale broadcaster"
            );
            for viewer in room.viewers.iter().filter_map(|id| self.peers.get(id)) {
                notifications.push(
                    Arc::clone(viewer.connection()),
                    ServerMessage::BroadcasterDisconnected {
                        stream_key: stream_key.clone(),
                    },
                );
            }
        }

        peer.mark_connected();
        room.broadcaster = Some(peer.id.clone());
        let attached = BroadcasterAttached {
            quality: peer.quality,
            viewer_count: room.viewer_count(),
            settings: room.settings.clone(),
            room_created,
            replaced,
            notifications,
        };

        if room_created {
            info!(stream_key = %stream_key, "Created room");
        }
        info!(
            stream_key = %stream_key,
            peer_id = %peer.id,
            quality = %peer.quality,
            "Broadcaster attached"
        );

        self.peers.insert(peer);
        Ok(attached)
    }

    /// Register `peer` as a viewer of a live room
    pub fn attach_viewer(&mut self, mut peer: Peer, preferred: &str) -> Result<ViewerAttached> {
        if self.peers.contains(&peer.id) {
            return Err(SignalingError::Validation(
                "connection already joined a stream".to_string(),
            ));
        }

        let broadcaster = self
            .live_broadcaster(&peer.stream_key)
            .map(|b| (b.id.clone(), Arc::clone(b.connection())))
            .ok_or_else(|| SignalingError::NotFound("stream not available".to_string()))?;

        let room = self
            .rooms
            .get_mut(&peer.stream_key)
            .ok_or_else(|| SignalingError::NotFound("stream not available".to_string()))?;

        if room.viewers.len() >= room.settings.max_viewers {
            return Err(SignalingError::Capacity(format!(
                "room is full ({} viewers)",
                room.settings.max_viewers
            )));
        }

        peer.quality = quality::select(preferred, &room.settings.allowed_qualities).ok_or_else(|| {
            SignalingError::Validation("room allows no quality tiers".to_string())
        })?;
        peer.mark_connected();
        room.viewers.insert(peer.id.clone());

        let attached = ViewerAttached {
            quality: peer.quality,
            viewer_count: room.viewer_count(),
            settings: room.settings.clone(),
            broadcaster_id: broadcaster.0,
            broadcaster: broadcaster.1,
        };

        debug!(
            stream_key = %peer.stream_key,
            peer_id = %peer.id,
            quality = %peer.quality,
            viewer_count = attached.viewer_count,
            "Viewer attached"
        );

        self.peers.insert(peer);
        Ok(attached)
    }

    /// Remove a peer and its room membership, then drop the room if it
    /// became empty. Returns `None` for unknown peers.
    pub fn detach(&mut self, peer_id: &PeerId) -> Option<Detached> {
        let mut peer = self.peers.remove(peer_id)?;
        peer.mark_disconnected();

        let (viewer_count, broadcaster, remaining_viewers) =
            match self.rooms.get_mut(&peer.stream_key) {
                Some(room) => {
                    match peer.role {
                        Role::Broadcaster => {
                            if room.broadcaster.as_ref() == Some(peer_id) {
                                room.broadcaster = None;
                            }
                        }
                        Role::Viewer => {
                            room.viewers.shift_remove(peer_id);
                        }
                    }
                    let broadcaster = room
                        .broadcaster
                        .as_ref()
                        .and_then(|id| self.peers.get(id))
                        .map(|b| Arc::clone(b.connection()));
                    let viewers = room
                        .viewers
                        .iter()
                        .filter_map(|id| self.peers.get(id))
                        .map(|v| Arc::clone(v.connection()))
                        .collect();
                    (room.viewer_count(), broadcaster, viewers)
                }
                None => (0, None, Vec::new()),
            };

        info!(
            stream_key = %peer.stream_key,
            peer_id = %peer.id,
            role = %peer.role,
            viewer_count,
            "Peer detached"
        );

        let room_removed = self.remove_if_empty(&peer.stream_key);
        Some(Detached {
            peer,
            viewer_count,
            room_removed,
            broadcaster,
            remaining_viewers,
        })
    }

    /// Drop the room if it has neither broadcaster nor viewers. Idempotent.
    pub fn remove_if_empty(&mut self, stream_key: &StreamKey) -> bool {
        let empty = self.rooms.get(stream_key).is_some_and(StreamRoom::is_empty);
        if empty {
            self.rooms.remove(stream_key);
            info!(
                stream_key = %stream_key,
                remaining_rooms = self.rooms.len(),
                "Removed empty room"
            );
        }
        empty
    }

    /// Drop every empty room. Returns how many were removed.
    pub fn remove_empty_rooms(&mut self) -> usize {
        let empty: Vec<StreamKey> = self
            .rooms
            .values()
            .filter(|room| room.is_empty())
            .map(|room| room.stream_key.clone())
            .collect();
        empty.iter().filter(|key| self.remove_if_empty(key)).count()
    }

    /// Ids of peers that are disconnected and older than `timeout`
    pub fn stale_peers(&mut self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        self.peers
            .iter_mut()
            .filter_map(|peer| {
                peer.refresh_state();
                peer.is_stale(now, timeout).then(|| peer.id.clone())
            })
            .collect()
    }

    /// Apply a viewer's `change-quality` request. `Ok(None)` means the request
    /// was ignored and the current tier kept.
    pub fn change_quality(
        &mut self,
        peer_id: &PeerId,
        requested: &str,
    ) -> Result<Option<Quality>> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| SignalingError::NotFound("not joined to a stream".to_string()))?;

        if peer.role != Role::Viewer || !peer.is_connected() {
            debug!(peer_id = %peer_id, role = %peer.role, "Ignoring quality change");
            return Ok(None);
        }

        let allowed = self
            .rooms
            .get(&peer.stream_key)
            .map(|room| room.settings.allowed_qualities.as_slice())
            .unwrap_or_default();

        match quality::validate_change(requested, allowed) {
            Some(quality) => {
                peer.quality = quality;
                debug!(peer_id = %peer_id, quality = %quality, "Quality changed");
                Ok(Some(quality))
            }
            None => {
                debug!(
                    peer_id = %peer_id,
                    requested,
                    current = %peer.quality,
                    "Requested quality not allowed, keeping current"
                );
                Ok(None)
            }
        }
    }

    /// Store self-reported metrics for a peer
    pub fn record_metrics(&mut self, peer_id: &PeerId, report: &MetricsReport) -> Result<()> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| SignalingError::NotFound("not joined to a stream".to_string()))?;
        peer.record_metrics(report);
        Ok(())
    }

    /// Merge `patch` into the room's settings. Peers whose tier is no longer
    /// allowed are moved to a negotiated replacement.
    pub fn update_settings(
        &mut self,
        stream_key: &StreamKey,
        patch: &RoomSettingsPatch,
    ) -> Result<SettingsUpdated> {
        let room = self
            .rooms
            .get_mut(stream_key)
            .ok_or_else(|| SignalingError::NotFound(format!("room {stream_key} not found")))?;

        let settings = room.settings.merged(patch);
        if settings.allowed_qualities.is_empty() {
            return Err(SignalingError::Validation(
                "allowedQualities must not be empty".to_string(),
            ));
        }
        if settings.max_viewers < room.viewers.len() {
            return Err(SignalingError::Validation(format!(
                "maxViewers {} is below the current viewer count {}",
                settings.max_viewers,
                room.viewers.len()
            )));
        }
        room.settings = settings.clone();

        let mut recipients = Vec::new();
        let mut requalified = Vec::new();
        let members = room.broadcaster.iter().chain(room.viewers.iter());
        for id in members {
            let Some(peer) = self.peers.get_mut(id) else {
                continue;
            };
            if !settings.allowed_qualities.contains(&peer.quality) {
                if let Some(quality) =
                    quality::select(peer.quality.as_str(), &settings.allowed_qualities)
                {
                    peer.quality = quality;
                    requalified.push((Arc::clone(peer.connection()), quality));
                }
            }
            recipients.push(Arc::clone(peer.connection()));
        }

        info!(
            stream_key = %stream_key,
            max_viewers = settings.max_viewers,
            requalified = requalified.len(),
            "Room settings updated"
        );

        Ok(SettingsUpdated {
            settings,
            recipients,
            requalified,
        })
    }

    #[must_use]
    pub fn summaries(&self, now: Instant) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .values()
            .map(|room| RoomSummary {
                stream_key: room.stream_key.clone(),
                state: room.state(),
                broadcaster_id: room.broadcaster.clone(),
                viewer_count: room.viewer_count(),
                uptime_secs: now.saturating_duration_since(room.created_at).as_secs(),
            })
            .collect();
        summaries.sort_by(|a, b| a.stream_key.cmp(&b.stream_key));
        summaries
    }
}
