//! CDA Capture - Concrete sensors for the CDA telemetry agent
//!
//! Each sensor wraps a small probe trait standing in for the hardware
//! driver and turns raw samples into [`RawReading`](cda_core::RawReading)s:
//!
//! - **Climate**: DHT11 temperature and humidity
//! - **Light**: digital light/dark input
//! - **Soil**: capacitive moisture probe on an ADS1115 channel
//!
//! The [`simulated`] module provides probes that need no hardware.

pub mod climate;
pub mod light;
pub mod simulated;
pub mod soil;

pub use climate::{ClimateProbe, Dht11Sensor};
pub use light::{DigitalInput, Level, LightSensor};
pub use simulated::{FaultInjector, FaultPlan, SimulatedClimate, SimulatedLight, SimulatedSoil};
pub use soil::{AnalogChannel, AnalogSample, Calibration, SoilMoistureSensor};

use cda_core::{RawSensor, SensorKind};
use std::sync::Arc;
use tracing::info;

/// Build one sensor of `kind` backed by a simulated probe
pub fn simulated_sensor(kind: SensorKind, faults: Arc<FaultInjector>) -> Arc<dyn RawSensor> {
    match kind {
        SensorKind::Climate => Arc::new(Dht11Sensor::new(SimulatedClimate::new(faults))),
        SensorKind::Light => Arc::new(LightSensor::new(SimulatedLight::new(faults))),
        SensorKind::Soil => Arc::new(SoilMoistureSensor::new(SimulatedSoil::new(faults))),
    }
}

/// Build simulated sensors for every enabled kind, all following `plan`
pub fn simulated_sensors(kinds: &[SensorKind], plan: &FaultPlan) -> Vec<Arc<dyn RawSensor>> {
    let sensors: Vec<_> = kinds
        .iter()
        .map(|kind| simulated_sensor(*kind, FaultInjector::new(plan.clone())))
        .collect();
    info!("Initialized {} simulated sensors", sensors.len());
    sensors
}
