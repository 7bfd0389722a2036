use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur when talking to a Russound gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// TCP connect was refused or the host was unreachable
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        /// The `host:port` that was dialled
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not complete in time
    #[error("Connect to {target} timed out")]
    ConnectTimeout {
        /// The `host:port` that was dialled
        target: String,
    },

    /// `connect()` was called while another attempt was still in flight
    #[error("Connect already in progress")]
    ConnectInProgress,

    /// The connect attempt was superseded by `disconnect()`
    #[error("Connect cancelled")]
    Cancelled,

    /// Host or port missing from the gateway settings
    #[error("Gateway not configured (host/port missing)")]
    NotConfigured,

    /// Zone outside the addressable range 1..=6
    #[error("Invalid zone: {0}")]
    InvalidZone(u8),

    /// Non-numeric or otherwise unusable input value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Settings could not be parsed
    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),
}
