//! Digital light sensor on a GPIO input

use cda_core::{RawReading, RawSensor, SensorError, SensorKind};
use tracing::{debug, info};

/// Logic level of a digital input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

/// Hardware seam for a GPIO input pin
pub trait DigitalInput: Send + Sync {
    fn level(&self) -> Result<Level, SensorError>;

    fn release(&self) {}
}

/// The module pulls its output high when it sees no light
pub fn light_status(level: Level) -> &'static str {
    match level {
        Level::High => "Dark",
        Level::Low => "Light",
    }
}

pub struct LightSensor<P> {
    id: String,
    pin: P,
}

impl<P: DigitalInput> LightSensor<P> {
    pub fn new(pin: P) -> Self {
        Self::with_id(SensorKind::Light.id(), pin)
    }

    pub fn with_id(id: impl Into<String>, pin: P) -> Self {
        Self { id: id.into(), pin }
    }
}

impl<P: DigitalInput> RawSensor for LightSensor<P> {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Light
    }

    fn acquire(&self) -> Result<RawReading, SensorError> {
        let status = light_status(self.pin.level()?);
        debug!("Light sensor reading: {}", status);
        Ok(RawReading::new().with("light_status", status))
    }

    fn validate(&self, reading: &RawReading) -> Result<(), SensorError> {
        match reading.get_str("light_status") {
            Some("Dark") | Some("Light") => Ok(()),
            other => Err(SensorError::out_of_range(format!(
                "light_status={:?}",
                other
            ))),
        }
    }

    fn shutdown(&self) {
        self.pin.release();
        info!("Light sensor shutdown complete");
    }
}
