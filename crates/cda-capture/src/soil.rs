//! Capacitive soil moisture probe read through an ADS1115 ADC

use cda_core::{RawReading, RawSensor, SensorError, SensorKind};
use tracing::{debug, info};

/// ADS1115 conversions are signed 16-bit; single-ended inputs near ground
/// can read slightly below zero
pub const ADC_MIN: i64 = -32_768;
pub const ADC_MAX: i64 = 32_767;

/// One ADC conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogSample {
    pub raw: i64,
    pub voltage: f64,
}

/// Hardware seam for one ADC channel
pub trait AnalogChannel: Send + Sync {
    fn sample(&self) -> Result<AnalogSample, SensorError>;

    fn release(&self) {}
}

/// Raw readings for a probe held in dry air and submerged in water
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub air_value: i64,
    pub water_value: i64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            air_value: 28_000,
            water_value: 13_000,
        }
    }
}

impl Calibration {
    /// Dry air must read higher than water for the scale to make sense
    pub fn check(&self) -> Result<(), SensorError> {
        if self.air_value > self.water_value {
            Ok(())
        } else {
            Err(SensorError::fault(format!(
                "invalid calibration: air {} must exceed water {}",
                self.air_value, self.water_value
            )))
        }
    }

    /// Moisture in percent, clamped to 0..=100 and rounded to 2 decimals
    pub fn moisture_percentage(&self, raw: i64) -> f64 {
        let span = (self.air_value - self.water_value) as f64;
        let percent = 100.0 - (raw - self.water_value) as f64 * 100.0 / span;
        round_to(percent.clamp(0.0, 100.0), 2)
    }
}

/// Coarse moisture band for a raw reading
pub fn moisture_status(raw: i64) -> &'static str {
    if raw >= 25_000 {
        "Dry"
    } else if raw >= 15_000 {
        "Moist"
    } else {
        "Wet"
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub struct SoilMoistureSensor<C> {
    id: String,
    channel: C,
    calibration: Calibration,
}

impl<C: AnalogChannel> SoilMoistureSensor<C> {
    pub fn new(channel: C) -> Self {
        Self {
            id: SensorKind::Soil.id().to_string(),
            channel,
            calibration: Calibration::default(),
        }
    }

    pub fn with_calibration(
        id: impl Into<String>,
        channel: C,
        calibration: Calibration,
    ) -> Result<Self, SensorError> {
        calibration.check()?;
        Ok(Self {
            id: id.into(),
            channel,
            calibration,
        })
    }
}

impl<C: AnalogChannel> RawSensor for SoilMoistureSensor<C> {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Soil
    }

    fn acquire(&self) -> Result<RawReading, SensorError> {
        let AnalogSample { raw, voltage } = self.channel.sample()?;
        let percent = self.calibration.moisture_percentage(raw);
        let status = moisture_status(raw);

        debug!("Soil moisture reading: {:.2}% ({})", percent, status);
        Ok(RawReading::new()
            .with("moisture_value", raw)
            .with("voltage", round_to(voltage, 3))
            .with("moisture_percentage", percent)
            .with("moisture_status", status))
    }

    fn validate(&self, reading: &RawReading) -> Result<(), SensorError> {
        match reading.get_f64("moisture_value") {
            Some(raw) if (ADC_MIN as f64..=ADC_MAX as f64).contains(&raw) => Ok(()),
            other => Err(SensorError::out_of_range(format!(
                "moisture_value={:?}",
                other
            ))),
        }
    }

    fn shutdown(&self) {
        self.channel.release();
        info!("Soil moisture sensor shutdown complete");
    }
}
