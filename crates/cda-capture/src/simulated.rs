//! Simulated probes for running without hardware
//!
//! Every probe draws from a shared sample counter, so values drift slowly
//! and repeat exactly between runs. A [`FaultInjector`] decides per sample
//! whether to fail, hang, or report a value outside the physical range.

use crate::climate::ClimateProbe;
use crate::light::{DigitalInput, Level};
use crate::soil::{AnalogChannel, AnalogSample, ADC_MAX};
use cda_core::SensorError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// ADS1115 full-scale voltage at gain 1
const FULL_SCALE_VOLTS: f64 = 4.096;

/// Which samples misbehave
///
/// Each `*_every` value `n` triggers on every nth sample (1-based); 0
/// disables it. When several trigger on the same sample, hang wins over
/// fail, which wins over out-of-range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultPlan {
    pub fail_every: u64,
    pub hang_every: u64,
    pub hang_for: Duration,
    pub out_of_range_every: u64,
}

impl FaultPlan {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn fail_every(n: u64) -> Self {
        Self {
            fail_every: n,
            ..Self::default()
        }
    }

    pub fn hang_every(n: u64, hang_for: Duration) -> Self {
        Self {
            hang_every: n,
            hang_for,
            ..Self::default()
        }
    }

    pub fn out_of_range_every(n: u64) -> Self {
        Self {
            out_of_range_every: n,
            ..Self::default()
        }
    }
}

/// What to do with one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    None,
    Fail,
    Hang(Duration),
    OutOfRange,
}

fn triggers(every: u64, sample: u64) -> bool {
    every > 0 && sample % every == 0
}

/// Sample counter and fault plan for one simulated probe
#[derive(Debug, Default)]
pub struct FaultInjector {
    samples: AtomicU64,
    plan: Mutex<FaultPlan>,
}

impl FaultInjector {
    pub fn new(plan: FaultPlan) -> Arc<Self> {
        Arc::new(Self {
            samples: AtomicU64::new(0),
            plan: Mutex::new(plan),
        })
    }

    /// Replace the plan; takes effect from the next sample
    pub fn set_plan(&self, plan: FaultPlan) {
        *self.plan.lock() = plan;
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Advance the counter and decide the fate of the new sample
    ///
    /// Returns the 0-based sample index used for the waveform.
    pub fn next(&self) -> (u64, Fault) {
        let index = self.samples.fetch_add(1, Ordering::Relaxed);
        let sample = index + 1;
        let plan = self.plan.lock().clone();

        let fault = if triggers(plan.hang_every, sample) {
            Fault::Hang(plan.hang_for)
        } else if triggers(plan.fail_every, sample) {
            Fault::Fail
        } else if triggers(plan.out_of_range_every, sample) {
            Fault::OutOfRange
        } else {
            Fault::None
        };

        if fault != Fault::None {
            debug!("Injecting {:?} on sample {}", fault, sample);
        }
        (index, fault)
    }

    /// Apply hang and fail faults; returns whether the value must be implausible
    fn apply(&self, what: &str) -> Result<(u64, bool), SensorError> {
        let (index, fault) = self.next();
        match fault {
            Fault::None => Ok((index, false)),
            Fault::OutOfRange => Ok((index, true)),
            Fault::Fail => Err(SensorError::fault(format!("simulated {} fault", what))),
            Fault::Hang(duration) => {
                // The caller has long since given up by the time this returns
                std::thread::sleep(duration);
                Ok((index, false))
            }
        }
    }
}

fn wave(index: u64, period: f64) -> f64 {
    (index as f64 * std::f64::consts::TAU / period).sin()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// DHT11 stand-in oscillating around 22 °C and 45 %
pub struct SimulatedClimate {
    faults: Arc<FaultInjector>,
}

impl SimulatedClimate {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self { faults }
    }
}

impl ClimateProbe for SimulatedClimate {
    fn sample(&self) -> Result<(Option<f64>, Option<f64>), SensorError> {
        let (index, implausible) = self.faults.apply("DHT11")?;
        if implausible {
            return Ok((Some(120.0), Some(45.0)));
        }

        let temperature = round1(22.0 + 3.0 * wave(index, 60.0));
        let humidity = round1(45.0 + 10.0 * wave(index, 90.0));
        trace!("Simulated climate sample {}: {}°C {}%", index, temperature, humidity);
        Ok((Some(temperature), Some(humidity)))
    }
}

/// Light stand-in that flips between light and dark every `half_period` samples
pub struct SimulatedLight {
    faults: Arc<FaultInjector>,
    half_period: u64,
}

impl SimulatedLight {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self::with_half_period(faults, 30)
    }

    pub fn with_half_period(faults: Arc<FaultInjector>, half_period: u64) -> Self {
        Self {
            faults,
            half_period: half_period.max(1),
        }
    }
}

impl DigitalInput for SimulatedLight {
    fn level(&self) -> Result<Level, SensorError> {
        // A digital pin has no implausible value; out-of-range samples read normally
        let (index, _) = self.faults.apply("GPIO")?;
        if (index / self.half_period) % 2 == 0 {
            Ok(Level::Low)
        } else {
            Ok(Level::High)
        }
    }
}

/// ADS1115 stand-in drying out slowly between 16000 and 24000
pub struct SimulatedSoil {
    faults: Arc<FaultInjector>,
}

impl SimulatedSoil {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self { faults }
    }
}

impl AnalogChannel for SimulatedSoil {
    fn sample(&self) -> Result<AnalogSample, SensorError> {
        let (index, implausible) = self.faults.apply("ADS1115")?;
        let raw = if implausible {
            ADC_MAX + 8_000
        } else {
            (20_000.0 + 4_000.0 * wave(index, 120.0)).round() as i64
        };

        Ok(AnalogSample {
            raw,
            voltage: raw as f64 * FULL_SCALE_VOLTS / ADC_MAX as f64,
        })
    }
}
