//! Signaling service
//!
//! Entry point for transports and the admin surface. Owns the shared
//! registry and the stream key validator, dispatches inbound
//! [`ClientMessage`]s and wires up the periodic tasks.
//!
//! Registry mutations happen inside a single write-lock section per message.
//! Outbound messages are collected while the lock is held and sent after it
//! is released.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RoomSettings, RoomSettingsPatch, SignalingConfig};
use crate::connection::{ConnectionRef, Outbox};
use crate::error::{Result, SignalingError};
use crate::message::{
    ChangeQualityRequest, ClientMessage, JoinBroadcasterRequest, JoinViewerRequest, MetricsReport,
    ServerMessage, SignalKind, SignalRequest, ViewerChange,
};
use crate::peer::Peer;
use crate::quality;
use crate::reaper::PeerReaper;
use crate::room::{RoomRegistry, RoomSummary, SharedRegistry};
use crate::router::SignalingRouter;
use crate::scheduler::IntervalTicker;
use crate::stats::{self, GlobalStats, RoomStats, StatsBroadcaster};
use crate::types::{PeerId, Role, StreamKey};
use crate::validator::StreamKeyValidator;

#[derive(Clone)]
pub struct SignalingService {
    config: Arc<SignalingConfig>,
    registry: SharedRegistry,
    validator: Arc<dyn StreamKeyValidator>,
}

impl SignalingService {
    pub fn new(config: SignalingConfig, validator: Arc<dyn StreamKeyValidator>) -> Self {
        let registry = RoomRegistry::shared(config.default_room_settings.clone());

        info!(
            stats_interval_secs = config.stats_interval_secs,
            cleanup_interval_secs = config.cleanup_interval_secs,
            peer_timeout_secs = config.peer_timeout_secs,
            max_viewers = config.default_room_settings.max_viewers,
            "Signaling service initialized"
        );

        Self {
            config: Arc::new(config),
            registry,
            validator,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Handle one inbound text frame. Malformed frames are answered with an
    /// `INVALID_MESSAGE` error event.
    pub async fn handle_text(&self, connection: &ConnectionRef, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(connection, message).await,
            Err(e) => {
                debug!(peer_id = %connection.id(), error = %e, "Rejected malformed frame");
                Self::send_error(connection, &e);
            }
        }
    }

    /// Dispatch one inbound message. Failures are reported to the sender as
    /// an `error` event and never propagate further.
    pub async fn handle_message(&self, connection: &ConnectionRef, message: ClientMessage) {
        let event = message.event_name();
        let result = match message {
            ClientMessage::JoinAsBroadcaster(request) => {
                self.join_as_broadcaster(connection, request).await
            }
            ClientMessage::JoinAsViewer(request) => self.join_as_viewer(connection, request),
            ClientMessage::Signal(kind, request) => self.relay(connection.id(), kind, request),
            ClientMessage::ChangeQuality(request) => self.change_quality(connection, &request),
            ClientMessage::GetStats => self.get_stats(connection),
            ClientMessage::ReportMetrics(report) => self.report_metrics(connection.id(), &report),
        };

        match result {
            Ok(()) => {}
            Err(SignalingError::ConnectionClosed) => {
                debug!(
                    peer_id = %connection.id(),
                    event,
                    "Connection closed while handling message"
                );
            }
            Err(e) => {
                debug!(peer_id = %connection.id(), event, error = %e, "Request failed");
                Self::send_error(connection, &e);
            }
        }
    }

    /// Register `connection` as the broadcaster of a stream.
    ///
    /// The external validator is awaited without holding the registry lock,
    /// so the "already live" check is repeated once validation resolves.
    /// Replacing a stale broadcaster tells its viewers it disconnected before
    /// the new broadcaster hears `broadcaster-joined`.
    pub async fn join_as_broadcaster(
        &self,
        connection: &ConnectionRef,
        request: JoinBroadcasterRequest,
    ) -> Result<()> {
        let peer_id = connection.id().clone();
        let stream_key = StreamKey::parse(&request.stream_key, self.config.max_stream_key_length)?;

        {
            let registry = self.registry.read();
            if registry.peers().contains(&peer_id) {
                return Err(SignalingError::Validation(
                    "connection already joined a stream".to_string(),
                ));
            }
            if registry.has_connected_broadcaster(&stream_key) {
                return Err(SignalingError::Conflict("broadcaster already active".to_string()));
            }
        }

        match self.validator.validate(&stream_key).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(stream_key = %stream_key, peer_id = %peer_id, "Stream key rejected");
                return Err(SignalingError::Validation("invalid stream key".to_string()));
            }
            Err(e) => {
                warn!(
                    stream_key = %stream_key,
                    peer_id = %peer_id,
                    error = %e,
                    "Stream key validation failed"
                );
                return Err(SignalingError::Internal(
                    "stream key validation unavailable".to_string(),
                ));
            }
        }

        if !connection.is_open() {
            debug!(
                stream_key = %stream_key,
                peer_id = %peer_id,
                "Connection closed during validation, discarding join"
            );
            return Err(SignalingError::ConnectionClosed);
        }

        let preferred = request.quality.as_deref().unwrap_or(quality::AUTO);
        let peer = Peer::new(
            Arc::clone(connection),
            stream_key.clone(),
            Role::Broadcaster,
            quality::AUTO_TARGET,
        );
        let attached = self.registry.write().attach_broadcaster(peer, preferred)?;

        if let Some(stale) = &attached.replaced {
            stale.connection().close();
        }
        attached.notifications.deliver();

        Self::reply(
            connection,
            &ServerMessage::BroadcasterJoined {
                peer_id,
                stream_key,
                quality: attached.quality,
                viewer_count: attached.viewer_count,
                settings: attached.settings,
            },
        );
        Ok(())
    }

    /// Register `connection` as a viewer of a live stream and tell the
    /// broadcaster about it.
    pub fn join_as_viewer(
        &self,
        connection: &ConnectionRef,
        request: JoinViewerRequest,
    ) -> Result<()> {
        let peer_id = connection.id().clone();
        let stream_key = StreamKey::parse(&request.stream_key, self.config.max_stream_key_length)?;
        let preferred = request.preferred_quality.as_deref().unwrap_or(quality::AUTO);

        let peer = Peer::new(
            Arc::clone(connection),
            stream_key.clone(),
            Role::Viewer,
            quality::AUTO_TARGET,
        );
        let attached = self.registry.write().attach_viewer(peer, preferred)?;

        let mut outbox = Outbox::new();
        outbox.push(
            Arc::clone(connection),
            ServerMessage::ViewerJoined {
                peer_id: peer_id.clone(),
                stream_key: stream_key.clone(),
                quality: attached.quality,
                broadcaster_id: Some(attached.broadcaster_id),
                settings: attached.settings,
            },
        );
        outbox.push(
            attached.broadcaster,
            ServerMessage::ViewerCountUpdate {
                stream_key,
                viewer_count: attached.viewer_count,
                viewer_id: peer_id,
                action: ViewerChange::Joined,
            },
        );
        outbox.deliver();
        Ok(())
    }

    /// Relay a negotiation message. Unresolvable targets are dropped silently.
    pub fn relay(&self, from: &PeerId, kind: SignalKind, request: SignalRequest) -> Result<()> {
        let outbox = SignalingRouter::route(&self.registry.read(), from, kind, request)?;
        let delivered = outbox.deliver();
        debug!(peer_id = %from, event = kind.event_name(), delivered, "Relayed signal");
        Ok(())
    }

    /// Apply a viewer's quality change. Disallowed tiers keep the current
    /// quality and produce no reply.
    pub fn change_quality(
        &self,
        connection: &ConnectionRef,
        request: &ChangeQualityRequest,
    ) -> Result<()> {
        let changed = self
            .registry
            .write()
            .change_quality(connection.id(), &request.quality)?;
        if let Some(quality) = changed {
            Self::reply(connection, &ServerMessage::QualityChanged { quality });
        }
        Ok(())
    }

    /// Answer `get-stats` with the stats of the sender's room
    pub fn get_stats(&self, connection: &ConnectionRef) -> Result<()> {
        let stats = stats::stats_for_peer(&self.registry.read(), connection.id(), Instant::now())
            .ok_or_else(|| SignalingError::NotFound("not joined to a stream".to_string()))?;
        Self::reply(connection, &ServerMessage::StatsUpdate(stats));
        Ok(())
    }

    pub fn report_metrics(&self, peer_id: &PeerId, report: &MetricsReport) -> Result<()> {
        self.registry.write().record_metrics(peer_id, report)
    }

    /// Remove a peer whose connection went away and notify the rest of its
    /// room. Returns `false` if the peer was not registered. Safe to call
    /// more than once.
    pub fn handle_disconnect(&self, peer_id: &PeerId) -> bool {
        let Some(detached) = self.registry.write().detach(peer_id) else {
            debug!(peer_id = %peer_id, "Disconnect for unregistered connection");
            return false;
        };

        if detached.peer.role == Role::Broadcaster {
            info!(
                stream_key = %detached.peer.stream_key,
                peer_id = %peer_id,
                viewers = detached.viewer_count,
                "Broadcaster disconnected"
            );
        }
        detached.notifications().deliver();
        true
    }

    /// Close a peer's connection and run the disconnect path right away
    pub fn force_disconnect_peer(&self, peer_id: &PeerId) -> Result<()> {
        let connection = self
            .registry
            .read()
            .peer(peer_id)
            .map(|peer| Arc::clone(peer.connection()))
            .ok_or_else(|| SignalingError::NotFound(format!("peer {peer_id} not found")))?;

        info!(peer_id = %peer_id, "Force disconnecting peer");
        connection.close();
        self.handle_disconnect(peer_id);
        Ok(())
    }

    /// Merge `patch` into a room's settings and broadcast the result to
    /// everyone in the room
    pub fn update_room_settings(
        &self,
        stream_key: &StreamKey,
        patch: &RoomSettingsPatch,
    ) -> Result<RoomSettings> {
        let updated = self.registry.write().update_settings(stream_key, patch)?;

        let mut outbox = Outbox::new();
        for (connection, quality) in updated.requalified {
            outbox.push(connection, ServerMessage::QualityChanged { quality });
        }
        for connection in updated.recipients {
            outbox.push(
                connection,
                ServerMessage::RoomSettingsUpdated {
                    stream_key: stream_key.clone(),
                    settings: updated.settings.clone(),
                },
            );
        }
        outbox.deliver();
        Ok(updated.settings)
    }

    #[must_use]
    pub fn global_stats(&self) -> GlobalStats {
        stats::global_stats(&self.registry.read())
    }

    #[must_use]
    pub fn room_stats(&self, stream_key: &StreamKey) -> Option<RoomStats> {
        let registry = self.registry.read();
        registry
            .get(stream_key)
            .map(|room| stats::room_stats(&registry, room, Instant::now()))
    }

    #[must_use]
    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        self.registry.read().summaries(Instant::now())
    }

    #[must_use]
    pub fn stats_broadcaster(&self) -> StatsBroadcaster {
        StatsBroadcaster::new(self.registry())
    }

    #[must_use]
    pub fn reaper(&self) -> PeerReaper {
        PeerReaper::new(self.registry(), self.config.peer_timeout())
    }

    /// Spawn the stats and reaper loops on wall-clock intervals
    pub fn spawn_background_tasks(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(
                self.stats_broadcaster()
                    .run(IntervalTicker::new(self.config.stats_interval()), shutdown.clone()),
            ),
            tokio::spawn(
                self.reaper()
                    .run(IntervalTicker::new(self.config.cleanup_interval()), shutdown.clone()),
            ),
        ]
    }

    fn reply(connection: &ConnectionRef, message: &ServerMessage) {
        if let Err(e) = connection.send(message) {
            debug!(
                peer_id = %connection.id(),
                event = message.event_name(),
                error = %e,
                "Failed to send reply"
            );
        }
    }

    fn send_error(connection: &ConnectionRef, err: &SignalingError) {
        Self::reply(connection, &ServerMessage::from(err));
    }
}
