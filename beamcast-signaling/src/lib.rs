//! Beamcast signaling core
//!
//! Coordinates live broadcast rooms: one broadcaster per stream key, many
//! viewers, and the offer/answer/ICE exchange that lets them set up a direct
//! media path. Media itself never passes through here.
//!
//! ## Architecture
//!
//! - **`RoomRegistry`**: owns every `StreamRoom` and, through `PeerRegistry`, every `Peer`
//! - **`SignalingRouter`**: relays negotiation messages inside a room
//! - **`quality`**: picks a quality tier from a preference and a room's allowed set
//! - **`StatsBroadcaster`**: periodic `room-stats` / `viewer-stats` push
//! - **`PeerReaper`**: periodic eviction of disconnected peers and empty rooms
//! - **`SignalingService`**: message dispatch, join flows and the admin surface
//!
//! Transports plug in through the [`Connection`] trait and report closed
//! sessions with [`SignalingService::handle_disconnect`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beamcast_signaling::{AllowAllValidator, SignalingConfig, SignalingService};
//!
//! let service = SignalingService::new(SignalingConfig::default(), Arc::new(AllowAllValidator));
//! let tasks = service.spawn_background_tasks(&shutdown);
//!
//! // for every inbound text frame
//! service.handle_text(&connection, &text).await;
//! // once the transport closes
//! service.handle_disconnect(connection.id());
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod peer;
pub mod quality;
pub mod reaper;
pub mod room;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod stats;
pub mod types;
pub mod validator;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::{RoomSettings, RoomSettingsPatch, SignalingConfig};
pub use connection::{ChannelConnection, Connection, ConnectionError, ConnectionRef};
pub use error::{Result, SignalingError};
pub use message::{ClientMessage, ServerMessage};
pub use peer::{Peer, PeerState};
pub use quality::Quality;
pub use reaper::{PeerReaper, ReapReport};
pub use room::{RoomRegistry, RoomState, RoomSummary, SharedRegistry, StreamRoom};
pub use router::SignalingRouter;
pub use scheduler::{IntervalTicker, ManualTicker, ManualTickerHandle, Ticker};
pub use service::SignalingService;
pub use stats::{GlobalStats, RoomStats, StatsBroadcaster, ViewerStats};
pub use types::{PeerId, Role, StreamKey};
pub use validator::{AllowAllValidator, PatternValidator, StaticKeyValidator, StreamKeyValidator};
