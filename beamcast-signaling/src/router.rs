//! Signaling relay between a room's broadcaster and its viewers
//!
//! Routing rules:
//! - broadcaster with a target: unicast to that viewer, dropped if it is gone
//! - broadcaster without a target: fan out to every viewer
//! - viewer: unicast to the broadcaster, dropped if there is none
//!
//! Dropped messages are logged and never reported back to the sender.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::Outbox;
use crate::error::{Result, SignalingError};
use crate::message::{RelayedSignal, SignalKind, SignalRequest};
use crate::room::RoomRegistry;
use crate::types::{PeerId, Role};

pub struct SignalingRouter;

impl SignalingRouter {
    /// Work out the deliveries for one negotiation message from `from`.
    ///
    /// Only fails when the sender is not a registered peer or addresses a
    /// stream it did not join.
    pub fn route(
        registry: &RoomRegistry,
        from: &PeerId,
        kind: SignalKind,
        request: SignalRequest,
    ) -> Result<Outbox> {
        let sender = registry.peer(from).ok_or_else(|| {
            SignalingError::NotFound("join a stream before signaling".to_string())
        })?;

        if sender.stream_key.as_str() != request.stream_key.trim() {
            return Err(SignalingError::Validation(format!(
                "not joined to stream {}",
                request.stream_key
            )));
        }

        let mut outbox = Outbox::new();
        let Some(room) = registry.get(&sender.stream_key) else {
            warn!(
                peer_id = %from,
                stream_key = %sender.stream_key,
                "Sender's room is gone, dropping signal"
            );
            return Ok(outbox);
        };

        let signal = RelayedSignal {
            stream_key: sender.stream_key.clone(),
            payload: request.payload,
            from_peer_id: from.clone(),
        };

        match (sender.role, request.target_peer_id) {
            (Role::Broadcaster, Some(target)) => {
                let viewer = room
                    .has_viewer(&target)
                    .then(|| registry.peer(&target))
                    .flatten();
                if let Some(viewer) = viewer {
                    outbox.push(Arc::clone(viewer.connection()), kind.relayed(signal));
                } else {
                    debug!(
                        stream_key = %room.stream_key,
                        from = %from,
                        target = %target,
                        event = kind.event_name(),
                        "Signal target not in room, dropping"
                    );
                }
            }
            (Role::Broadcaster, None) => {
                for viewer in room.viewers().filter_map(|id| registry.peer(id)) {
                    outbox.push(Arc::clone(viewer.connection()), kind.relayed(signal.clone()));
                }
            }
            (Role::Viewer, _) => {
                if let Some(broadcaster) = room.broadcaster().and_then(|id| registry.peer(id)) {
                    outbox.push(Arc::clone(broadcaster.connection()), kind.relayed(signal));
                } else {
                    debug!(
                        stream_key = %room.stream_key,
                        from = %from,
                        event = kind.event_name(),
                        "No broadcaster attached, dropping signal"
                    );
                }
            }
        }

        Ok(outbox)
    }
}
