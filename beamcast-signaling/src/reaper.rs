//! Periodic eviction of stale peers and empty rooms

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::connection::Outbox;
use crate::room::SharedRegistry;
use crate::scheduler::{run_periodic, Ticker};
use crate::types::PeerId;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted: Vec<PeerId>,
    pub rooms_removed: usize,
}

pub struct PeerReaper {
    registry: SharedRegistry,
    timeout: Duration,
}

impl PeerReaper {
    #[must_use]
    pub const fn new(registry: SharedRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Evict every peer that is disconnected and older than the timeout,
    /// notify the survivors, then drop rooms left empty.
    pub fn sweep(&self, now: Instant) -> ReapReport {
        let mut report = ReapReport::default();
        let mut outbox = Outbox::new();
        let mut closing = Vec::new();

        {
            let mut registry = self.registry.write();
            for peer_id in registry.stale_peers(now, self.timeout) {
                let Some(detached) = registry.detach(&peer_id) else {
                    continue;
                };
                if detached.room_removed {
                    report.rooms_removed += 1;
                }
                outbox.extend(detached.notifications());
                closing.push(Arc::clone(detached.peer.connection()));
                report.evicted.push(peer_id);
            }
            report.rooms_removed += registry.remove_empty_rooms();
        }

        for connection in closing {
            connection.close();
        }
        outbox.deliver();

        if !report.evicted.is_empty() || report.rooms_removed > 0 {
            info!(
                evicted = report.evicted.len(),
                rooms_removed = report.rooms_removed,
                "Reaped stale peers"
            );
        }
        report
    }

    /// Run until `shutdown` fires
    pub async fn run<T: Ticker>(self, ticker: T, shutdown: CancellationToken) {
        run_periodic("peer-reaper", ticker, shutdown, move |now| {
            self.sweep(now);
        })
        .await;
    }
}
