//! Reading types shared by the acquisition path and the payload assembler

use crate::sensor::SensorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single field value inside a raw reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ReadingValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Integer(v) => Some(*v as f64),
            ReadingValue::Float(v) => Some(*v),
            ReadingValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ReadingValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for ReadingValue {
    fn from(v: i64) -> Self {
        ReadingValue::Integer(v)
    }
}

impl From<f64> for ReadingValue {
    fn from(v: f64) -> Self {
        ReadingValue::Float(v)
    }
}

impl From<&str> for ReadingValue {
    fn from(v: &str) -> Self {
        ReadingValue::Text(v.to_string())
    }
}

impl From<String> for ReadingValue {
    fn from(v: String) -> Self {
        ReadingValue::Text(v)
    }
}

/// One raw reading produced by one sensor
///
/// Built once with [`RawReading::with`] and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawReading {
    fields: BTreeMap<String, ReadingValue>,
}

impl RawReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field (builder style)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ReadingValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ReadingValue> {
        self.fields.get(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ReadingValue::as_f64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ReadingValue::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, ReadingValue> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Running per-sensor counters
///
/// Monotonic for the life of the reader that owns them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorStats {
    /// Number of `read()` calls (one per cycle)
    pub read_count: u64,

    /// Number of failed attempts across all reads
    pub error_count: u64,
}

impl SensorStats {
    /// Percentage of reads not offset by an error, floored at zero
    pub fn success_rate(&self) -> f64 {
        let reads = self.read_count.max(1) as f64;
        let ok = self.read_count.saturating_sub(self.error_count) as f64;
        ok / reads * 100.0
    }
}

/// Outcome of reading one sensor for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SensorResult {
    pub sensor_id: String,

    pub kind: SensorKind,

    /// Fresh reading, the last known good reading, or nothing
    pub value: Option<RawReading>,

    /// Attempts made this cycle
    pub attempt_count: u32,

    /// Failed attempts this cycle
    pub error_count: u32,

    /// `value` is a reading from an earlier cycle
    pub stale: bool,

    /// Snapshot of the reader's running counters after this read
    pub stats: SensorStats,
}

impl SensorResult {
    /// A reading was obtained this cycle
    pub fn is_fresh(&self) -> bool {
        self.value.is_some() && !self.stale
    }
}
