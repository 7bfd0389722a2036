use crate::error::{GatewayError, Result};
use crate::protocol::InboundEvent;
use crate::types::{ZoneField, ZoneId, ZoneUpdate, ZoneValue};
use tokio::sync::broadcast;

/// Receives zone state from a gateway connection
///
/// Implemented by the embedding application. Calls are neither deduplicated
/// nor debounced, and both device-reported state and optimistic writes from
/// [`Zone`](crate::Zone) arrive here; the last write wins.
pub trait StateSink: Send + Sync {
    /// A zone attribute changed (or was reported again)
    fn on_zone_event(&self, zone: ZoneId, field: ZoneField, value: ZoneValue);

    /// Every decoded line, mapped or not
    fn on_inbound(&self, _event: &InboundEvent) {}
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StateSink for NullSink {
    fn on_zone_event(&self, _zone: ZoneId, _field: ZoneField, _value: ZoneValue) {}
}

/// Sink that fans zone updates out over a broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<ZoneUpdate>,
}

impl ChannelSink {
    /// Create a sink buffering up to `capacity` updates per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to zone updates
    pub fn subscribe(&self) -> ZoneUpdateReceiver {
        ZoneUpdateReceiver::new(self.tx.subscribe())
    }
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new(100)
    }
}

impl StateSink for ChannelSink {
    fn on_zone_event(&self, zone: ZoneId, field: ZoneField, value: ZoneValue) {
        // No receivers is fine
        let _ = self.tx.send(ZoneUpdate { zone, field, value });
    }
}

/// Receiver for zone updates
pub struct ZoneUpdateReceiver {
    rx: broadcast::Receiver<ZoneUpdate>,
}

impl ZoneUpdateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<ZoneUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next zone update
    ///
    /// Fails with `ConnectionClosed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<ZoneUpdate> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => GatewayError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                GatewayError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive a zone update without blocking
    ///
    /// Returns `None` if no update is available.
    pub fn try_recv(&mut self) -> Result<Option<ZoneUpdate>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(GatewayError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(GatewayError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}
