use crate::connection::{ConnectionOptions, GatewayConnection};
use crate::error::{GatewayError, Result};
use crate::protocol::Codec;
use crate::subscription::StateSink;
use crate::types::{GatewaySettings, GatewayTarget};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-wide map from gateway address to its single connection
///
/// Every zone that addresses the same gateway must share one socket and one
/// outbound queue. Create one registry at application start, hand it to the
/// code that needs connections, and call [`shutdown`](Self::shutdown) on exit.
pub struct GatewayRegistry {
    connections: Mutex<BTreeMap<GatewayTarget, Arc<GatewayConnection>>>,
    codec: Arc<Codec>,
    options: ConnectionOptions,
}

impl GatewayRegistry {
    /// Registry with the default codec and connection options
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(BTreeMap::new()),
            codec: Arc::new(Codec::new()),
            options: ConnectionOptions::default(),
        }
    }

    /// Use `codec` for connections created from now on
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Use `options` for connections created from now on
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<GatewayTarget, Arc<GatewayConnection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connection for the gateway named in `settings`
    ///
    /// Fails with `NotConfigured` when host or port is missing; nothing is
    /// opened and no reconnect loop runs until valid settings are supplied.
    /// `sink` is only used if this call creates the connection.
    pub fn try_client_for(
        &self,
        settings: &GatewaySettings,
        sink: Arc<dyn StateSink>,
    ) -> Result<Arc<GatewayConnection>> {
        let target = GatewayTarget::from_settings(settings).ok_or(GatewayError::NotConfigured)?;
        Ok(self.client(target, sink))
    }

    /// Like [`try_client_for`](Self::try_client_for), logging and returning
    /// `None` for incomplete settings
    pub fn client_for(
        &self,
        settings: &GatewaySettings,
        sink: Arc<dyn StateSink>,
    ) -> Option<Arc<GatewayConnection>> {
        match self.try_client_for(settings, sink) {
            Ok(connection) => Some(connection),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    /// Existing connection for `target`, or a new idle one
    pub fn client(&self, target: GatewayTarget, sink: Arc<dyn StateSink>) -> Arc<GatewayConnection> {
        let mut connections = self.lock();
        let connection = connections.entry(target).or_insert_with_key(|target| {
            tracing::debug!("Creating connection for {}", target);
            Arc::new(GatewayConnection::new(
                target.clone(),
                self.codec.clone(),
                sink,
                self.options.clone(),
            ))
        });
        connection.clone()
    }

    pub fn get(&self, target: &GatewayTarget) -> Option<Arc<GatewayConnection>> {
        self.lock().get(target).cloned()
    }

    /// Disconnect and forget the connection for `target`, e.g. after a settings change
    pub fn remove(&self, target: &GatewayTarget) -> Option<Arc<GatewayConnection>> {
        let removed = self.lock().remove(target);
        if let Some(connection) = &removed {
            connection.disconnect();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Disconnect every gateway and empty the registry
    pub fn shutdown(&self) {
        let connections = std::mem::take(&mut *self.lock());
        for connection in connections.values() {
            connection.disconnect();
        }
        tracing::info!("Closed {} gateway connection(s)", connections.len());
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}
