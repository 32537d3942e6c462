//! Wire messages exchanged with clients
//!
//! Frames are JSON objects of the form `{"event": "<name>", "data": {...}}`.
//! Inbound frames are parsed into [`ClientMessage`]; everything the core emits
//! is a [`ServerMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RoomSettings;
use crate::error::{Result, SignalingError};
use crate::quality::Quality;
use crate::stats::{RoomStats, ViewerStats};
use crate::types::{PeerId, StreamKey};

/// Negotiation message kinds relayed between broadcaster and viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }

    /// Wrap a relayed signal into the outbound event of the same name
    #[must_use]
    pub fn relayed(self, signal: RelayedSignal) -> ServerMessage {
        match self {
            Self::Offer => ServerMessage::Offer(signal),
            Self::Answer => ServerMessage::Answer(signal),
            Self::IceCandidate => ServerMessage::IceCandidate(signal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinBroadcasterRequest {
    pub stream_key: String,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinViewerRequest {
    pub stream_key: String,
    #[serde(default)]
    pub preferred_quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub stream_key: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub target_peer_id: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeQualityRequest {
    pub quality: String,
}

/// Self-reported transport measurements
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MetricsReport {
    /// Estimated bandwidth in kbps
    #[serde(default)]
    pub bandwidth: Option<f64>,
    /// Round-trip latency in milliseconds
    #[serde(default)]
    pub latency: Option<f64>,
}

/// Inbound message from a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    JoinAsBroadcaster(JoinBroadcasterRequest),
    JoinAsViewer(JoinViewerRequest),
    Signal(SignalKind, SignalRequest),
    ChangeQuality(ChangeQualityRequest),
    GetStats,
    ReportMetrics(MetricsReport),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_parts(&envelope.event, envelope.data)
    }

    /// Build a message from an event name and its payload
    pub fn from_parts(event: &str, data: Value) -> Result<Self> {
        let message = match event {
            "join-as-broadcaster" => Self::JoinAsBroadcaster(serde_json::from_value(data)?),
            "join-as-viewer" => Self::JoinAsViewer(serde_json::from_value(data)?),
            "offer" => Self::Signal(SignalKind::Offer, serde_json::from_value(data)?),
            "answer" => Self::Signal(SignalKind::Answer, serde_json::from_value(data)?),
            "ice-candidate" => {
                Self::Signal(SignalKind::IceCandidate, serde_json::from_value(data)?)
            }
            "change-quality" => Self::ChangeQuality(serde_json::from_value(data)?),
            "get-stats" => Self::GetStats,
            "report-metrics" => Self::ReportMetrics(serde_json::from_value(data)?),
            other => {
                return Err(SignalingError::InvalidMessage(format!(
                    "unknown event: {other}"
                )))
            }
        };
        Ok(message)
    }

    /// Event name, for logging
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::JoinAsBroadcaster(_) => "join-as-broadcaster",
            Self::JoinAsViewer(_) => "join-as-viewer",
            Self::Signal(kind, _) => kind.event_name(),
            Self::ChangeQuality(_) => "change-quality",
            Self::GetStats => "get-stats",
            Self::ReportMetrics(_) => "report-metrics",
        }
    }
}

/// Direction of a viewer count change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerChange {
    Joined,
    Left,
}

/// Negotiation payload forwarded to another peer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    pub stream_key: StreamKey,
    pub payload: Value,
    pub from_peer_id: PeerId,
}

/// Outbound message to a connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    BroadcasterJoined {
        peer_id: PeerId,
        stream_key: StreamKey,
        quality: Quality,
        viewer_count: usize,
        settings: RoomSettings,
    },
    #[serde(rename_all = "camelCase")]
    ViewerJoined {
        peer_id: PeerId,
        stream_key: StreamKey,
        quality: Quality,
        broadcaster_id: Option<PeerId>,
        settings: RoomSettings,
    },
    #[serde(rename_all = "camelCase")]
    ViewerCountUpdate {
        stream_key: StreamKey,
        viewer_count: usize,
        viewer_id: PeerId,
        action: ViewerChange,
    },
    Offer(RelayedSignal),
    Answer(RelayedSignal),
    IceCandidate(RelayedSignal),
    QualityChanged {
        quality: Quality,
    },
    StatsUpdate(RoomStats),
    #[serde(rename_all = "camelCase")]
    BroadcasterDisconnected {
        stream_key: StreamKey,
    },
    #[serde(rename_all = "camelCase")]
    RoomSettingsUpdated {
        stream_key: StreamKey,
        settings: RoomSettings,
    },
    RoomStats(RoomStats),
    ViewerStats(ViewerStats),
    Error {
        message: String,
        code: String,
    },
}

impl ServerMessage {
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::BroadcasterJoined { .. } => "broadcaster-joined",
            Self::ViewerJoined { .. } => "viewer-joined",
            Self::ViewerCountUpdate { .. } => "viewer-count-update",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::QualityChanged { .. } => "quality-changed",
            Self::StatsUpdate(_) => "stats-update",
            Self::BroadcasterDisconnected { .. } => "broadcaster-disconnected",
            Self::RoomSettingsUpdated { .. } => "room-settings-updated",
            Self::RoomStats(_) => "room-stats",
            Self::ViewerStats(_) => "viewer-stats",
            Self::Error { .. } => "error",
        }
    }

    /// Encode as a text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&SignalingError> for ServerMessage {
    fn from(err: &SignalingError) -> Self {
        Self::Error {
            message: err.to_string(),
            code: err.code().to_string(),
        }
    }
}
