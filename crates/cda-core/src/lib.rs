//! CDA Core - Sensor reading protocol, payload assembly, and cycle driver
//!
//! This crate provides the acquisition side of the CDA telemetry agent:
//!
//! - **Sensor**: the one capability every sensor driver exposes
//! - **Reader**: deadline + retry + stale fallback around one sensor
//! - **Scheduler**: concurrent reads of every sensor, once per cycle
//! - **Payload**: the canonical per-cycle message
//! - **Pipeline**: the cycle driver and the sink it publishes into
//! - **Config**: TOML/env configuration for the whole agent

pub mod config;
pub mod payload;
pub mod pipeline;
pub mod reader;
pub mod reading;
pub mod scheduler;
pub mod sensor;

// Re-export commonly used types
pub use config::{AgentConfig, ConfigError, ConfigLoader, ConfigResult};
pub use payload::{AnnotatedReading, DeviceStats, Message, PayloadAssembler};
pub use pipeline::{Agent, CycleConfig, MessageSink, RunStats};
pub use reader::{ReadPolicy, RetryingReader};
pub use reading::{RawReading, ReadingValue, SensorResult, SensorStats};
pub use scheduler::AcquisitionScheduler;
pub use sensor::{RawSensor, SensorError, SensorKind};

/// Agent version
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
