//! DHT11 temperature and humidity sensor

use cda_core::{RawReading, RawSensor, SensorError, SensorKind};
use tracing::{debug, info};

/// Physical range the DHT11 can report, in °C
pub const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 80.0);

/// Relative humidity range, in percent
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

/// Hardware seam for a DHT11 probe
///
/// The single-wire protocol frequently drops a value; either half of the
/// sample may be missing.
pub trait ClimateProbe: Send + Sync {
    /// Returns `(temperature °C, relative humidity %)`
    fn sample(&self) -> Result<(Option<f64>, Option<f64>), SensorError>;

    fn release(&self) {}
}

pub struct Dht11Sensor<P> {
    id: String,
    probe: P,
}

impl<P: ClimateProbe> Dht11Sensor<P> {
    pub fn new(probe: P) -> Self {
        Self::with_id(SensorKind::Climate.id(), probe)
    }

    pub fn with_id(id: impl Into<String>, probe: P) -> Self {
        Self {
            id: id.into(),
            probe,
        }
    }
}

impl<P: ClimateProbe> RawSensor for Dht11Sensor<P> {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Climate
    }

    fn acquire(&self) -> Result<RawReading, SensorError> {
        match self.probe.sample()? {
            (Some(temperature), Some(humidity)) => {
                debug!("DHT11 reading: {}°C, {}%", temperature, humidity);
                Ok(RawReading::new()
                    .with("temperature", temperature)
                    .with("humidity", humidity))
            }
            _ => Err(SensorError::fault("DHT11 returned None values")),
        }
    }

    fn validate(&self, reading: &RawReading) -> Result<(), SensorError> {
        let temperature = reading.get_f64("temperature");
        let humidity = reading.get_f64("humidity");
        let in_range = |v: Option<f64>, (lo, hi): (f64, f64)| v.is_some_and(|v| (lo..=hi).contains(&v));

        if in_range(temperature, TEMPERATURE_RANGE) && in_range(humidity, HUMIDITY_RANGE) {
            Ok(())
        } else {
            Err(SensorError::out_of_range(format!(
                "DHT11 temp={:?}°C, humidity={:?}%",
                temperature, humidity
            )))
        }
    }

    fn shutdown(&self) {
        self.probe.release();
        info!("DHT11 sensor shutdown complete");
    }
}
