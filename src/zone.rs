use crate::connection::GatewayConnection;
use crate::error::{GatewayError, Result};
use crate::types::{ZoneField, ZoneId, ZoneValue, MAX_ZONE};
use std::sync::Arc;

/// Interface for controlling one zone
///
/// Each setter queues the command and immediately reports the expected value
/// to the state sink, so the UI does not wait for the device. The device's own
/// status line may later overwrite it; there is no reconciliation.
#[derive(Clone)]
pub struct Zone {
    id: ZoneId,
    connection: Arc<GatewayConnection>,
}

impl Zone {
    /// Handle for zone `id` (1..=6) on `connection`
    pub fn new(id: ZoneId, connection: Arc<GatewayConnection>) -> Result<Self> {
        if id < 1 || id > MAX_ZONE {
            return Err(GatewayError::InvalidZone(id));
        }
        Ok(Self { id, connection })
    }

    /// Zone number on the controller (1..=6)
    pub fn id(&self) -> ZoneId {
        self.id
    }

    /// Gateway connection this zone sends through
    pub fn connection(&self) -> &Arc<GatewayConnection> {
        &self.connection
    }

    // ========== Power ==========

    /// Switch the zone on or off and report the new state right away
    pub fn set_power(&self, on: bool) {
        self.connection.set_power(self.id, on);
        self.connection.report(self.id, ZoneField::OnOff, ZoneValue::Bool(on));
    }

    /// Momentary "zone off" action
    pub fn turn_off(&self) {
        self.set_power(false);
    }

    // ========== Mute ==========

    /// Mute or unmute the zone and report the new state right away
    pub fn set_mute(&self, on: bool) {
        self.connection.set_mute(self.id, on);
        self.connection.report(self.id, ZoneField::Mute, ZoneValue::Bool(on));
    }

    // ========== Volume ==========

    /// Set the volume in percent (0..=100, rounded)
    pub fn set_volume(&self, percent: f64) -> Result<()> {
        let volume = clamp_finite(percent, 0, 100, "volume")?;
        self.connection.set_volume(self.id, volume as f64);
        self.connection
            .report(self.id, ZoneField::Volume, ZoneValue::Level(volume as f64 / 100.0));
        Ok(())
    }

    /// Set the volume from the 0.0..=1.0 capability scale
    pub fn set_volume_fraction(&self, fraction: f64) -> Result<()> {
        self.set_volume(fraction * 100.0)
    }

    // ========== Source ==========

    /// Select source 1..=6 (rounded, out-of-range values clamp)
    pub fn set_source(&self, source: f64) -> Result<()> {
        let source = clamp_finite(source, 1, 6, "source")?;
        self.connection.set_source(self.id, source as f64);
        self.connection
            .report(self.id, ZoneField::Source, ZoneValue::Text(source.to_string()));
        Ok(())
    }
}

fn clamp_finite(value: f64, min: i64, max: i64, what: &str) -> Result<i64> {
    if !value.is_finite() {
        return Err(GatewayError::InvalidValue(format!("{} must be a number, got {}", what, value)));
    }
    Ok(value.round().clamp(min as f64, max as f64) as i64)
}
