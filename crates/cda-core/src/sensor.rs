//! Sensor capability
//!
//! Every physical sensor on the device is reduced to one capability:
//! produce a single raw reading or fail. Drivers are synchronous and are
//! not trusted to honor timeouts; the [`RetryingReader`](crate::reader::RetryingReader)
//! enforces those from the outside.

use crate::reading::RawReading;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Sensor-side failures
///
/// All of these are recovered locally by retry-then-fallback and never
/// escape the acquisition scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Sensor read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sensor fault: {0}")]
    Fault(String),

    #[error("Sensor reading out of range: {0}")]
    OutOfRange(String),

    #[error("Sensor driver panicked: {0}")]
    Panicked(String),
}

impl SensorError {
    pub fn fault(message: impl Into<String>) -> Self {
        SensorError::Fault(message.into())
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        SensorError::OutOfRange(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SensorError::Timeout(_))
    }
}

/// The fixed set of sensor variants a device can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Temperature and humidity (DHT11)
    Climate,
    /// Digital light/dark detector
    Light,
    /// Capacitive soil moisture probe behind an ADC
    Soil,
}

impl SensorKind {
    /// All known variants, in registration order
    pub const ALL: [SensorKind; 3] = [SensorKind::Climate, SensorKind::Light, SensorKind::Soil];

    /// Default sensor id used as the key in the readings map
    pub fn id(&self) -> &'static str {
        match self {
            SensorKind::Climate => "climate",
            SensorKind::Light => "light",
            SensorKind::Soil => "soil",
        }
    }

    /// Value of the `sensor_type` field on the wire
    pub fn sensor_type(&self) -> &'static str {
        match self {
            SensorKind::Climate => "DHT11",
            SensorKind::Light => "LightSensor",
            SensorKind::Soil => "SoilMoisture",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "climate" | "dht11" => Ok(SensorKind::Climate),
            "light" => Ok(SensorKind::Light),
            "soil" | "soil_moisture" => Ok(SensorKind::Soil),
            other => Err(format!("Unknown sensor: {}", other)),
        }
    }
}

/// A raw sensor
///
/// `acquire` may block for an arbitrary time, return an error, or return
/// garbage. `validate` is the sensor-specific plausibility check applied to
/// every reading `acquire` returns.
pub trait RawSensor: Send + Sync {
    /// Identifier used as the key in the readings map
    fn id(&self) -> &str;

    /// Which variant this sensor is
    fn kind(&self) -> SensorKind;

    /// Produce one raw reading
    fn acquire(&self) -> Result<RawReading, SensorError>;

    /// Plausibility check
    fn validate(&self, reading: &RawReading) -> Result<(), SensorError> {
        let _ = reading;
        Ok(())
    }

    /// Release hardware resources
    fn shutdown(&self) {}
}
