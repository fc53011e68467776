//! Payload assembly
//!
//! Turns one cycle's sensor results into the single message published for
//! that cycle.

use crate::reading::{RawReading, SensorResult, SensorStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One sensor's entry in the `readings` map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedReading {
    /// Sensor-specific fields, flattened into the entry
    #[serde(flatten)]
    pub fields: RawReading,

    pub timestamp: DateTime<Utc>,

    pub sensor_type: String,

    /// `{device_id}_{read_count}`
    pub reading_id: String,

    /// Fields come from an earlier cycle because this cycle's read failed
    pub stale: bool,

    pub stats: SensorStats,
}

/// Device-level aggregate stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    /// Sensors registered on the device
    pub sensor_count: usize,

    /// Sensors that produced a fresh reading this cycle
    pub active_sensors: usize,

    /// Battery level in percent
    pub battery: u8,
}

/// The message published once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub device_id: String,
    pub room_id: String,
    pub timestamp: DateTime<Utc>,
    pub readings: BTreeMap<String, AnnotatedReading>,
    pub stats: DeviceStats,
}

impl Message {
    /// No sensor has anything to report, not even stale data
    pub fn is_blind(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Builds [`Message`]s for one device
#[derive(Debug, Clone)]
pub struct PayloadAssembler {
    device_id: String,
    room_id: String,
    battery: u8,
}

impl PayloadAssembler {
    pub fn new(device_id: impl Into<String>, room_id: impl Into<String>, battery: u8) -> Self {
        Self {
            device_id: device_id.into(),
            room_id: room_id.into(),
            battery,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Assemble with the current UTC time
    pub fn assemble(&self, results: &BTreeMap<String, SensorResult>) -> Message {
        self.assemble_at(results, Utc::now())
    }

    /// Assemble with an explicit timestamp
    ///
    /// Never fails: a cycle where every sensor came back empty still yields
    /// a message, with an empty readings map.
    pub fn assemble_at(
        &self,
        results: &BTreeMap<String, SensorResult>,
        timestamp: DateTime<Utc>,
    ) -> Message {
        let readings = results
            .iter()
            .filter_map(|(sensor_id, result)| {
                let fields = result.value.clone()?;
                Some((
                    sensor_id.clone(),
                    AnnotatedReading {
                        fields,
                        timestamp,
                        sensor_type: result.kind.sensor_type().to_string(),
                        reading_id: format!("{}_{}", self.device_id, result.stats.read_count),
                        stale: result.stale,
                        stats: result.stats,
                    },
                ))
            })
            .collect();

        Message {
            device_id: self.device_id.clone(),
            room_id: self.room_id.clone(),
            timestamp,
            readings,
            stats: DeviceStats {
                sensor_count: results.len(),
                active_sensors: results.values().filter(|r| r.is_fresh()).count(),
                battery: self.battery,
            },
        }
    }
}
