//! Bounded FIFO of typed events with non-blocking publish.
//!
//! On capacity exhaustion the event is dropped and a warning is logged.
//! Ordering is FIFO per publisher; no cross-publisher ordering is guaranteed.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    TradeExecuted,
    EdgeDetected,
    MarketScanned,
    OrderResolved,
    DrawdownWarning,
    DrawdownHalt,
    StrategyError,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventType,
    pub payload: Value,
}

const BUS_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
}

pub struct EventBusReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventBus {
    pub fn new() -> (Self, EventBusReceiver) {
        let (tx, rx) = mpsc::channel(BUS_CAPACITY);
        (EventBus { tx }, EventBusReceiver { rx })
    }

    /// Non-blocking publish. Drops the event and logs a warning if the bus
    /// is at capacity.
    pub fn publish(&self, kind: EventType, payload: Value) {
        match self.tx.try_send(Event { kind: kind.clone(), payload }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(?kind, "event_bus.dropped_full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(?kind, "event_bus.dropped_closed");
            }
        }
    }
}

impl EventBusReceiver {
    /// Timed receive so the caller can observe cancellation promptly, matching
    /// the source's 1-second timed bus `get`.
    pub async fn recv_timeout(&mut self, timeout: std::time::Duration) -> Option<Event> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
