use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zone number on the wire (0 = whole system, 1..=6 = addressable zones)
pub type ZoneId = u8;

/// Highest addressable zone on a CAx6.6
pub const MAX_ZONE: ZoneId = 6;

/// Address of a serial-to-IP gateway
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GatewayTarget {
    pub host: String,
    pub port: u16,
}

impl GatewayTarget {
    /// Create a target from a host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build a target from settings, or `None` if host or port is missing
    pub fn from_settings(settings: &GatewaySettings) -> Option<Self> {
        let host = settings.host.as_deref().map(str::trim).filter(|h| !h.is_empty())?;
        let port = settings.port.filter(|&p| p != 0)?;
        Some(Self::new(host, port))
    }
}

impl fmt::Display for GatewayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Gateway settings as stored by the embedding application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl GatewaySettings {
    /// Settings with both fields present
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
        }
    }

    /// Parse settings from a JSON document such as `{"host": "10.0.0.5", "port": 9621}`
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Socket lifecycle state of a gateway connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Zone attribute reported to the state sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneField {
    OnOff,
    Mute,
    Source,
    Volume,
    Bass,
    Treble,
    Balance,
    Loudness,
}

impl ZoneField {
    /// Capability name used by the home-automation layer
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneField::OnOff => "onoff",
            ZoneField::Mute => "volume_mute",
            ZoneField::Source => "source",
            ZoneField::Volume => "volume_set",
            ZoneField::Bass => "bass",
            ZoneField::Treble => "treble",
            ZoneField::Balance => "balance",
            ZoneField::Loudness => "loudness",
        }
    }
}

impl fmt::Display for ZoneField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value carried by a zone update
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneValue {
    /// On/off style flags (power, mute, loudness)
    Bool(bool),
    /// Source selector in string form ("1".."6")
    Text(String),
    /// Volume as a 0.0..=1.0 fraction
    Level(f64),
    /// Tone controls, -10..=10
    Int(i64),
}

/// A semantic update for one zone attribute
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneUpdate {
    pub zone: ZoneId,
    pub field: ZoneField,
    pub value: ZoneValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_from_complete_settings() {
        let settings = GatewaySettings::new("192.168.1.40", 9621);
        let target = GatewayTarget::from_settings(&settings).unwrap();
        assert_eq!(target, GatewayTarget::new("192.168.1.40", 9621));
        assert_eq!(target.to_string(), "192.168.1.40:9621");
    }

    #[test]
    fn missing_host_or_port_is_unconfigured() {
        let no_host = GatewaySettings { host: None, port: Some(9621) };
        let blank_host = GatewaySettings { host: Some("  ".into()), port: Some(9621) };
        let no_port = GatewaySettings { host: Some("gw".into()), port: None };
        let zero_port = GatewaySettings { host: Some("gw".into()), port: Some(0) };

        for settings in [no_host, blank_host, no_port, zero_port] {
            assert!(GatewayTarget::from_settings(&settings).is_none());
        }
    }

    #[test]
    fn settings_from_json() {
        let settings = GatewaySettings::from_json(r#"{"host": "gw.local", "port": 4999}"#).unwrap();
        assert_eq!(settings.host.as_deref(), Some("gw.local"));
        assert_eq!(settings.port, Some(4999));

        let empty = GatewaySettings::from_json("{}").unwrap();
        assert!(GatewayTarget::from_settings(&empty).is_none());

        assert!(GatewaySettings::from_json("not json").is_err());
    }

    #[test]
    fn field_names_match_capabilities() {
        assert_eq!(ZoneField::OnOff.as_str(), "onoff");
        assert_eq!(ZoneField::Volume.to_string(), "volume_set");
        assert_eq!(ZoneField::Mute.as_str(), "volume_mute");
    }
}
