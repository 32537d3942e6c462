//! Test helpers and fixtures for beamcast-signaling tests
//!
//! Shared by unit tests and, through the `test-helpers` feature, by the
//! integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::SignalingConfig;
use crate::connection::{Connection, ConnectionError};
use crate::message::ServerMessage;
use crate::service::SignalingService;
use crate::types::{PeerId, StreamKey};
use crate::validator::{AllowAllValidator, StreamKeyValidator};

/// Connection that records every message it is asked to send
pub struct MockConnection {
    id: PeerId,
    open: AtomicBool,
    close_calls: AtomicUsize,
    sent: Mutex<Vec<ServerMessage>>,
}

impl MockConnection {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: PeerId::from(id),
            open: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.id.clone()
    }

    /// Everything sent so far
    pub fn messages(&self) -> Vec<ServerMessage> {
        self.sent.lock().clone()
    }

    /// Drain and return everything sent so far
    pub fn take(&self) -> Vec<ServerMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Event names sent so far, in order
    pub fn events(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(ServerMessage::event_name).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.event_name() == event)
            .count()
    }

    pub fn last(&self) -> Option<ServerMessage> {
        self.sent.lock().last().cloned()
    }

    /// Drop the transport without telling anyone, as a crashed client would
    pub fn close_silently(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn id(&self) -> &PeerId {
        &self.id
    }

    fn send(&self, message: &ServerMessage) -> Result<(), ConnectionError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Validator that blocks until released, for exercising joins that are
/// suspended on validation
pub struct GatedValidator {
    gate: Notify,
    entered: Notify,
    verdict: bool,
}

impl GatedValidator {
    pub fn new(verdict: bool) -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            entered: Notify::new(),
            verdict,
        })
    }

    /// Wait until a join is suspended inside `validate`
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one suspended validation complete
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl StreamKeyValidator for GatedValidator {
    async fn validate(&self, _stream_key: &StreamKey) -> anyhow::Result<bool> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(self.verdict)
    }
}

/// Service with default configuration that accepts every stream key
pub fn test_service() -> SignalingService {
    SignalingService::new(SignalingConfig::default(), Arc::new(AllowAllValidator))
}

/// Service with a custom configuration that accepts every stream key
pub fn test_service_with(config: SignalingConfig) -> SignalingService {
    SignalingService::new(config, Arc::new(AllowAllValidator))
}

/// Join `conn` as broadcaster of `key`, panicking on failure
pub async fn join_broadcaster(service: &SignalingService, conn: &Arc<MockConnection>, key: &str) {
    let connection: crate::connection::ConnectionRef = conn.clone();
    service
        .join_as_broadcaster(
            &connection,
            crate::message::JoinBroadcasterRequest {
                stream_key: key.to_string(),
                quality: None,
            },
        )
        .await
        .expect("broadcaster join failed");
}

/// Join `conn` as viewer of `key`, panicking on failure
pub fn join_viewer(
    service: &SignalingService,
    conn: &Arc<MockConnection>,
    key: &str,
    preferred: &str,
) {
    let connection: crate::connection::ConnectionRef = conn.clone();
    service
        .join_as_viewer(
            &connection,
            crate::message::JoinViewerRequest {
                stream_key: key.to_string(),
                preferred_quality: Some(preferred.to_string()),
            },
        )
        .expect("viewer join failed");
}
