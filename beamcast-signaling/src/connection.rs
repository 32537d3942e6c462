//! Connection capability
//!
//! The core never touches a socket. Each transport session is exposed as a
//! [`Connection`]; the transport reports closure back by calling
//! `SignalingService::handle_disconnect`.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message::ServerMessage;
use crate::types::PeerId;

/// Capacity of the per-connection outbound queue.
/// Bounded so a slow client cannot grow memory without limit.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Backpressure,
}

/// A bidirectional client channel as seen by the signaling core
pub trait Connection: Send + Sync + 'static {
    /// Connection id; doubles as the peer id once the connection joins
    fn id(&self) -> &PeerId;

    /// Queue a message for delivery. Never blocks.
    fn send(&self, message: &ServerMessage) -> Result<(), ConnectionError>;

    fn is_open(&self) -> bool;

    /// Ask the transport to close. The transport's own close path then
    /// reports the disconnect.
    fn close(&self);
}

pub type ConnectionRef = Arc<dyn Connection>;

/// Transport-agnostic [`Connection`] backed by a bounded channel.
///
/// The transport owns the receiving half and a clone of the close token; it
/// writes every received message to the wire and stops once the token fires.
pub struct ChannelConnection {
    id: PeerId,
    tx: mpsc::Sender<ServerMessage>,
    closed: CancellationToken,
}

impl ChannelConnection {
    #[must_use]
    pub fn new(id: PeerId) -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let connection = Arc::new(Self {
            id,
            tx,
            closed: CancellationToken::new(),
        });
        (connection, rx)
    }

    /// Token the transport cancels when the underlying channel ends
    #[must_use]
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> &PeerId {
        &self.id
    }

    fn send(&self, message: &ServerMessage) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.tx.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Messages collected while registry state is locked and delivered after
/// the lock is released.
#[derive(Default)]
pub struct Outbox {
    items: Vec<(ConnectionRef, ServerMessage)>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, connection: ConnectionRef, message: ServerMessage) {
        self.items.push((connection, message));
    }

    pub fn extend(&mut self, other: Self) {
        self.items.extend(other.items);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Best-effort delivery. Returns the number of messages accepted by
    /// their connection; failures are logged and skipped.
    pub fn deliver(self) -> usize {
        let mut delivered = 0;
        for (connection, message) in self.items {
            match connection.send(&message) {
                Ok(()) => delivered += 1,
                Err(ConnectionError::Closed) => {
                    debug!(
                        peer_id = %connection.id(),
                        event = message.event_name(),
                        "Dropping message for closed connection"
                    );
                }
                Err(e) => {
                    warn!(
                        peer_id = %connection.id(),
                        event = message.event_name(),
                        error = %e,
                        "Failed to deliver message"
                    );
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.items
                    .iter()
                    .map(|(connection, message)| (connection.id(), message.event_name())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamKey;

    fn sample() -> ServerMessage {
        ServerMessage::BroadcasterDisconnected {
            stream_key: StreamKey::from("abc"),
        }
    }

    #[tokio::test]
    async fn test_channel_connection_send_and_close() {
        let (conn, mut rx) = ChannelConnection::new(PeerId::from("c1"));
        assert!(conn.is_open());

        conn.send(&sample()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), sample());

        conn.close();
        assert!(!conn.is_open());
        assert_eq!(conn.send(&sample()), Err(ConnectionError::Closed));
        assert!(conn.close_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_channel_connection_backpressure() {
        let (conn, _rx) = ChannelConnection::new(PeerId::from("c1"));
        for _ in 0..OUTBOUND_CHANNEL_CAPACITY {
            conn.send(&sample()).unwrap();
        }
        assert_eq!(conn.send(&sample()), Err(ConnectionError::Backpressure));
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_closed() {
        let (conn, rx) = ChannelConnection::new(PeerId::from("c1"));
        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(conn.send(&sample()), Err(ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_outbox_skips_failed_deliveries() {
        let (open, mut open_rx) = ChannelConnection::new(PeerId::from("open"));
        let (closed, _closed_rx) = ChannelConnection::new(PeerId::from("closed"));
        closed.close();

        let mut outbox = Outbox::new();
        outbox.push(open, sample());
        outbox.push(closed, sample());
        assert_eq!(outbox.len(), 2);

        assert_eq!(outbox.deliver(), 1);
        assert!(open_rx.try_recv().is_ok());
    }

    #[test]
    fn test_outbox_debug_lists_recipients() {
        let (conn, _rx) = ChannelConnection::new(PeerId::from("v1"));
        let mut outbox = Outbox::new();
        outbox.push(conn, sample());

        let rendered = format!("{outbox:?}");
        assert!(rendered.contains("v1"), "{rendered}");
        assert!(rendered.contains("broadcaster-disconnected"), "{rendered}");
    }
}
