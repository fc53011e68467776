//! Acquisition scheduler - reads every registered sensor once per cycle

use crate::reader::{ReadPolicy, RetryingReader};
use crate::reading::SensorResult;
use crate::sensor::RawSensor;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs one [`RetryingReader`] per sensor, all concurrently
///
/// Each reader is polled by its own future and every `acquire()` runs on its
/// own blocking worker, so one slow sensor costs the cycle at most its own
/// retry budget.
pub struct AcquisitionScheduler {
    readers: Vec<RetryingReader>,
}

impl AcquisitionScheduler {
    /// Create a scheduler; sensors with a duplicate id are skipped
    pub fn new(sensors: Vec<Arc<dyn RawSensor>>) -> Self {
        let mut scheduler = Self {
            readers: Vec::with_capacity(sensors.len()),
        };
        for sensor in sensors {
            scheduler.register(sensor);
        }
        scheduler
    }

    /// Register a sensor, returning false if its id is already taken
    pub fn register(&mut self, sensor: Arc<dyn RawSensor>) -> bool {
        if self.readers.iter().any(|r| r.sensor_id() == sensor.id()) {
            warn!("Sensor {} already registered, ignoring duplicate", sensor.id());
            return false;
        }
        info!("Registered {} sensor as '{}'", sensor.kind().sensor_type(), sensor.id());
        self.readers.push(RetryingReader::new(sensor));
        true
    }

    pub fn sensor_count(&self) -> usize {
        self.readers.len()
    }

    pub fn readers(&self) -> &[RetryingReader] {
        &self.readers
    }

    /// Read all sensors and wait for every result
    pub async fn run_cycle(&mut self, policy: ReadPolicy) -> BTreeMap<String, SensorResult> {
        let started = Instant::now();

        let results = join_all(self.readers.iter_mut().map(|reader| reader.read(policy))).await;

        let results: BTreeMap<String, SensorResult> = results
            .into_iter()
            .map(|result| (result.sensor_id.clone(), result))
            .collect();

        debug!(
            "Read {} sensors in {:?} ({} fresh)",
            results.len(),
            started.elapsed(),
            results.values().filter(|r| r.is_fresh()).count()
        );
        results
    }

    /// Release every sensor
    pub fn shutdown(&self) {
        for reader in &self.readers {
            reader.shutdown();
        }
    }
}
