//! Rust library for controlling Russound CAx6.6 multi-zone audio controllers
//!
//! The controller is reached through a serial-to-IP gateway that speaks a
//! compact ASCII line protocol (`!<zone>,<value>,<cmd>\r`). This library
//! provides:
//!
//! - A persistent TCP connection with automatic reconnection and backoff
//! - A rate-limited outbound command queue that survives disconnects
//! - Decoding of unsolicited status lines into zone state updates
//! - A registry that keeps one connection per gateway
//! - Per-zone handles for power, mute, volume and source
//!
//! # Quick Start
//!
//! ```no_run
//! use russound_cam::{ChannelSink, GatewayRegistry, GatewaySettings, Zone};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = GatewayRegistry::new();
//!     let sink = ChannelSink::default();
//!     let mut updates = sink.subscribe();
//!
//!     let settings = GatewaySettings::from_json(r#"{"host": "192.168.1.40", "port": 9621}"#)?;
//!     let Some(gateway) = registry.client_for(&settings, Arc::new(sink)) else {
//!         return Ok(());
//!     };
//!     gateway.connect().await?;
//!
//!     let kitchen = Zone::new(2, gateway.clone())?;
//!     kitchen.set_power(true);
//!     kitchen.set_volume(30.0)?;
//!
//!     while let Ok(update) = updates.recv().await {
//!         println!("zone {} {} = {:?}", update.zone, update.field, update.value);
//!     }
//!
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Protocol**: pure command encoding and status line decoding
//! - **Connection**: socket lifecycle, reconnect timer, outbound queue
//! - **Registry**: one connection per gateway address
//! - **Zone**: high-level per-zone control with optimistic state reports
//! - **Subscription**: the state sink trait and a broadcast implementation
//!
//! Logging goes through `tracing`; without a subscriber installed the library
//! runs silently.

mod connection;
mod error;
mod protocol;
mod registry;
mod subscription;
mod types;
mod zone;

// Public exports
pub use connection::{ConnectionOptions, GatewayConnection};
pub use error::{GatewayError, Result};
pub use protocol::{
    decode_chunk, decode_line, Capability, Codec, Command, CommandKind, CommandSpec, Domain,
    InboundEvent, LineBuffer,
};
pub use registry::GatewayRegistry;
pub use subscription::{ChannelSink, NullSink, StateSink, ZoneUpdateReceiver};
pub use types::{
    ConnectionState, GatewaySettings, GatewayTarget, ZoneField, ZoneId, ZoneUpdate, ZoneValue,
    MAX_ZONE,
};
pub use zone::Zone;
