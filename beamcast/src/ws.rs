//! WebSocket transport for the signaling service
//!
//! Each socket becomes a [`ChannelConnection`] with a freshly generated peer
//! id. Three loops run per socket:
//! - reader: forwards text frames to the dispatch loop and closes the
//!   connection when the socket ends
//! - dispatch: hands frames to the service one at a time, in order
//! - writer: serializes outbound messages to text frames
//!
//! Keeping the reader separate from dispatch means a closed socket is noticed
//! even while a join is suspended on stream key validation.

use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use beamcast_signaling::{ChannelConnection, Connection, ConnectionRef, PeerId};

use crate::server::AppState;

/// Inbound frames buffered between the reader and dispatch loops
const INBOUND_CHANNEL_CAPACITY: usize = 64;

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    run_session(sink, stream, state).await;
}

/// Drive one client session over a frame sink and stream until either side
/// closes or the server shuts down, then report the disconnect.
async fn run_session<W, R>(mut sink: W, mut stream: R, state: AppState)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let (connection, mut outbound) = ChannelConnection::new(PeerId::generate());
    let peer_id = connection.id().clone();
    let closed = connection.close_token();
    let conn: ConnectionRef = connection;

    info!(peer_id = %peer_id, "WebSocket connection established");

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Utf8Bytes>(INBOUND_CHANNEL_CAPACITY);

    let writer_closed = closed.clone();
    let writer_peer = peer_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                () = writer_closed.cancelled() => break,
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        peer_id = %writer_peer,
                        event = message.event_name(),
                        error = %e,
                        "Failed to encode message"
                    );
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(peer_id = %writer_peer, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        writer_closed.cancel();
    });

    let reader_closed = closed.clone();
    let reader_peer = peer_id.clone();
    let reader = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                () = reader_closed.cancelled() => break,
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by axum; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(peer_id = %reader_peer, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
        reader_closed.cancel();
    });

    loop {
        let text = tokio::select! {
            () = closed.cancelled() => break,
            () = state.shutdown.cancelled() => break,
            text = inbound_rx.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };
        state.service.handle_text(&conn, text.as_str()).await;
    }

    conn.close();
    state.service.handle_disconnect(&peer_id);
    let _ = reader.await;
    let _ = writer.await;

    info!(peer_id = %peer_id, "WebSocket connection closed");
}
