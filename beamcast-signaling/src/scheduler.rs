//! Tick sources for the periodic tasks
//!
//! Production loops use [`IntervalTicker`]. Tests drive a [`ManualTicker`]
//! through its handle and can wait for each tick's work to finish.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One firing of a ticker
pub struct Tick {
    pub at: Instant,
    ack: Option<oneshot::Sender<()>>,
}

impl Tick {
    #[must_use]
    pub const fn new(at: Instant) -> Self {
        Self { at, ack: None }
    }

    fn complete(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
    }
}

#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick. `None` ends the loop.
    async fn tick(&mut self) -> Option<Tick>;
}

/// Wall-clock ticker over `tokio::time::interval`
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// The first tick fires one `period` after creation
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at_next(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

fn interval_at_next(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.reset();
    ticker
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> Option<Tick> {
        Some(Tick::new(self.interval.tick().await))
    }
}

/// Ticker fired by hand through a [`ManualTickerHandle`]
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
}

#[derive(Clone)]
pub struct ManualTickerHandle {
    tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl ManualTicker {
    #[must_use]
    pub fn new() -> (Self, ManualTickerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ManualTickerHandle { tx })
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> Option<Tick> {
        let ack = self.rx.recv().await?;
        Some(Tick {
            at: Instant::now(),
            ack: Some(ack),
        })
    }
}

impl ManualTickerHandle {
    /// Fire one tick and wait until the loop has finished processing it.
    /// Returns `false` if the loop is no longer running.
    pub async fn tick(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }
}

/// Drive `work` once per tick until `shutdown` fires or the ticker ends.
///
/// A panic inside one tick is logged and the loop moves on to the next tick.
pub async fn run_periodic<T, F>(
    name: &'static str,
    mut ticker: T,
    shutdown: CancellationToken,
    mut work: F,
) where
    T: Ticker,
    F: FnMut(Instant) + Send,
{
    info!(task = name, "Starting periodic task");

    loop {
        let tick = tokio::select! {
            () = shutdown.cancelled() => break,
            tick = ticker.tick() => match tick {
                Some(tick) => tick,
                None => break,
            },
        };

        let at = tick.at;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| work(at))) {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(task = name, reason = %reason, "Periodic task tick failed");
        } else {
            debug!(task = name, "Periodic task tick completed");
        }
        tick.complete();
    }

    info!(task = name, "Periodic task stopped");
}
