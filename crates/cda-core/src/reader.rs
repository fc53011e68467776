//! Bounded-time, retrying read protocol
//!
//! Each attempt runs the driver's blocking `acquire()` on the blocking pool
//! and waits for it under a hard deadline. An attempt that overruns stops
//! waiting but keeps the call's handle: a driver has at most one `acquire()`
//! outstanding, so later attempts wait on that call instead of starting
//! another one, and a stuck driver pins one blocking thread rather than one
//! per attempt. Counters and the last known good reading belong to the
//! reader alone and are only touched from `read()`.

use crate::reading::{RawReading, SensorResult, SensorStats};
use crate::sensor::{RawSensor, SensorError, SensorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Deadline and retry budget for one read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    /// Hard time budget for a single `acquire()` attempt
    pub deadline: Duration,

    /// Additional attempts after the first one fails
    pub max_retries: u32,

    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(3),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ReadPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Upper bound on the wall-clock cost of one `read()`
    pub fn worst_case(&self) -> Duration {
        self.deadline * self.total_attempts() + self.retry_delay * self.max_retries
    }
}

/// Wraps one sensor with deadline, retry, and stale fallback
pub struct RetryingReader {
    sensor: Arc<dyn RawSensor>,
    id: String,
    last_known_good: Option<RawReading>,
    stats: SensorStats,
    in_flight: Option<JoinHandle<Result<RawReading, SensorError>>>,
}

impl RetryingReader {
    pub fn new(sensor: Arc<dyn RawSensor>) -> Self {
        let id = sensor.id().to_string();
        Self {
            sensor,
            id,
            last_known_good: None,
            stats: SensorStats::default(),
            in_flight: None,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SensorKind {
        self.sensor.kind()
    }

    pub fn stats(&self) -> SensorStats {
        self.stats
    }

    pub fn last_known_good(&self) -> Option<&RawReading> {
        self.last_known_good.as_ref()
    }

    /// Read the sensor once for this cycle
    ///
    /// Returns on the first successful attempt. When every attempt fails the
    /// result carries the last known good reading (flagged `stale`) or no
    /// value at all.
    pub async fn read(&mut self, policy: ReadPolicy) -> SensorResult {
        self.stats.read_count += 1;
        // A call that finished after the last cycle gave up on it is too old to report
        if self.in_flight.as_ref().is_some_and(|h| h.is_finished()) {
            self.in_flight = None;
        }
        let total = policy.total_attempts();
        let mut errors = 0u32;

        for attempt in 1..=total {
            match self.attempt(policy.deadline).await {
                Ok(reading) => {
                    if attempt > 1 {
                        info!(sensor = %self.id, attempt, "Successful read after retries");
                    } else {
                        debug!(sensor = %self.id, "Read ok");
                    }
                    self.last_known_good = Some(reading.clone());
                    return self.result(Some(reading), attempt, errors, false);
                }
                Err(e) => {
                    errors += 1;
                    self.stats.error_count += 1;
                    if e.is_timeout() {
                        warn!(sensor = %self.id, attempt, "{}", e);
                    } else {
                        warn!(sensor = %self.id, attempt, "Error reading sensor: {}", e);
                    }

                    if attempt < total {
                        debug!(
                            sensor = %self.id,
                            "Retrying in {:?} (attempt {}/{})",
                            policy.retry_delay,
                            attempt,
                            policy.max_retries
                        );
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        let fallback = self.last_known_good.clone();
        let stale = fallback.is_some();
        if stale {
            error!(
                sensor = %self.id,
                attempts = total,
                "All read attempts failed, reusing last known good reading"
            );
        } else {
            error!(
                sensor = %self.id,
                attempts = total,
                "All read attempts failed, no previous reading available"
            );
        }
        self.result(fallback, total, errors, stale)
    }

    /// Release the underlying sensor
    pub fn shutdown(&self) {
        info!(sensor = %self.id, "Shutting down {} sensor", self.sensor.kind().sensor_type());
        self.sensor.shutdown();
    }

    /// A driver call from an earlier attempt has not returned yet
    pub fn is_busy(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|h| !h.is_finished())
    }

    async fn attempt(&mut self, deadline: Duration) -> Result<RawReading, SensorError> {
        let mut handle = match self.in_flight.take() {
            Some(handle) => {
                debug!(sensor = %self.id, "Previous read still running, waiting on it");
                handle
            }
            None => {
                let sensor = Arc::clone(&self.sensor);
                tokio::task::spawn_blocking(move || sensor.acquire())
            }
        };

        let reading = match tokio::time::timeout(deadline, &mut handle).await {
            Err(_) => {
                self.in_flight = Some(handle);
                return Err(SensorError::Timeout(deadline));
            }
            Ok(Err(join_error)) => return Err(SensorError::Panicked(join_error.to_string())),
            Ok(Ok(result)) => result?,
        };

        self.sensor.validate(&reading)?;
        Ok(reading)
    }

    fn result(
        &self,
        value: Option<RawReading>,
        attempt_count: u32,
        error_count: u32,
        stale: bool,
    ) -> SensorResult {
        SensorResult {
            sensor_id: self.id.clone(),
            kind: self.sensor.kind(),
            value,
            attempt_count,
            error_count,
            stale,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    /// What a scripted sensor does on one `acquire()` call
    #[derive(Debug, Clone)]
    pub(crate) enum Step {
        Ok(f64),
        Fail,
        Hang(Duration),
        Implausible,
        Panic,
    }

    /// Sensor that replays a script, then repeats the last step
    pub(crate) struct ScriptedSensor {
        id: String,
        kind: SensorKind,
        script: Mutex<VecDeque<Step>>,
        last: Mutex<Step>,
        pub(crate) calls: AtomicU32,
    }

    impl ScriptedSensor {
        pub(crate) fn new(id: &str, steps: Vec<Step>) -> Self {
            let last = steps.last().cloned().unwrap_or(Step::Fail);
            Self {
                id: id.to_string(),
                kind: SensorKind::Climate,
                script: Mutex::new(steps.into()),
                last: Mutex::new(last),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn set_script(&self, steps: Vec<Step>) {
            if let Some(step) = steps.last() {
                *self.last.lock().unwrap() = step.clone();
            }
            *self.script.lock().unwrap() = steps.into();
        }
    }

    impl RawSensor for ScriptedSensor {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> SensorKind {
            self.kind
        }

        fn acquire(&self) -> Result<RawReading, SensorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.last.lock().unwrap().clone());
            match step {
                Step::Ok(t) => Ok(RawReading::new().with("temperature", t)),
                Step::Fail => Err(SensorError::fault("bus error")),
                Step::Hang(d) => {
                    std::thread::sleep(d);
                    Ok(RawReading::new().with("temperature", 0.0))
                }
                Step::Implausible => Ok(RawReading::new().with("temperature", 500.0)),
                Step::Panic => panic!("driver bug"),
            }
        }

        fn validate(&self, reading: &RawReading) -> Result<(), SensorError> {
            match reading.get_f64("temperature") {
                Some(t) if (-40.0..=80.0).contains(&t) => Ok(()),
                other => Err(SensorError::out_of_range(format!("temperature={:?}", other))),
            }
        }
    }

    pub(crate) fn fast_policy(max_retries: u32) -> ReadPolicy {
        ReadPolicy {
            deadline: Duration::from_millis(50),
            max_retries,
            retry_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_policy_bounds() {
        let policy = ReadPolicy::default();
        assert_eq!(policy.total_attempts(), 4);
        assert_eq!(policy.worst_case(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let sensor = Arc::new(ScriptedSensor::new("climate", vec![Step::Ok(21.0)]));
        let mut reader = RetryingReader::new(sensor.clone());

        let result = reader.read(fast_policy(2)).await;
        assert_eq!(result.value, Some(RawReading::new().with("temperature", 21.0)));
        assert_eq!(result.attempt_count, 1);
        assert_eq!(result.error_count, 0);
        assert!(result.is_fresh());
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reader.stats().read_count, 1);
    }

    #[tokio::test]
    async fn test_success_after_retries_stops_retrying() {
        let sensor = Arc::new(ScriptedSensor::new(
            "climate",
            vec![Step::Fail, Step::Implausible, Step::Ok(19.5), Step::Ok(30.0)],
        ));
        let mut reader = RetryingReader::new(sensor.clone());

        let result = reader.read(fast_policy(3)).await;
        assert_eq!(result.value.as_ref().unwrap().get_f64("temperature"), Some(19.5));
        assert_eq!(result.attempt_count, 3);
        assert_eq!(result.error_count, 2);
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(reader.stats().error_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_without_history_yields_none() {
        let sensor = Arc::new(ScriptedSensor::new("climate", vec![Step::Fail]));
        let mut reader = RetryingReader::new(sensor.clone());

        let result = reader.read(fast_policy(2)).await;
        assert!(result.value.is_none());
        assert!(!result.stale);
        assert_eq!(result.attempt_count, 3);
        assert_eq!(result.error_count, 3);
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_falls_back_to_last_known_good() {
        let sensor = Arc::new(ScriptedSensor::new("climate", vec![Step::Ok(22.0)]));
        let mut reader = RetryingReader::new(sensor.clone());
        reader.read(fast_policy(1)).await;

        sensor.set_script(vec![Step::Fail]);
        let result = reader.read(fast_policy(1)).await;

        assert_eq!(result.value.as_ref().unwrap().get_f64("temperature"), Some(22.0));
        assert!(result.stale);
        assert!(!result.is_fresh());
        assert_eq!(result.error_count, 2);
        assert_eq!(
            result.stats,
            SensorStats {
                read_count: 2,
                error_count: 2
            }
        );
    }

    #[tokio::test]
    async fn test_hung_sensor_is_abandoned_at_deadline() {
        let sensor = Arc::new(ScriptedSensor::new(
            "climate",
            vec![Step::Hang(Duration::from_millis(300))],
        ));
        let mut reader = RetryingReader::new(sensor.clone());

        let started = Instant::now();
        let result = reader.read(fast_policy(2)).await;
        let elapsed = started.elapsed();

        assert!(result.value.is_none());
        assert_eq!(result.error_count, 3);
        // Three 50ms deadlines plus two short delays, not the 300ms hang
        assert!(elapsed < Duration::from_millis(280), "took {:?}", elapsed);
        // Retries wait on the outstanding call instead of starting new ones
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 1);
        assert!(reader.is_busy());
    }

    #[tokio::test]
    async fn test_slow_call_completes_on_later_attempt() {
        let sensor = Arc::new(ScriptedSensor::new(
            "climate",
            vec![Step::Hang(Duration::from_millis(80)), Step::Ok(25.0)],
        ));
        let mut reader = RetryingReader::new(sensor.clone());

        let result = reader.read(fast_policy(2)).await;
        assert!(result.is_fresh());
        assert_eq!(result.attempt_count, 2);
        assert_eq!(result.error_count, 1);
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 1);
        assert!(!reader.is_busy());
    }

    #[tokio::test]
    async fn test_call_finished_between_cycles_is_discarded() {
        let sensor = Arc::new(ScriptedSensor::new(
            "climate",
            vec![Step::Hang(Duration::from_millis(100)), Step::Ok(26.0)],
        ));
        let mut reader = RetryingReader::new(sensor.clone());

        let first = reader.read(fast_policy(0)).await;
        assert!(first.value.is_none());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let second = reader.read(fast_policy(0)).await;
        assert_eq!(second.value.as_ref().unwrap().get_f64("temperature"), Some(26.0));
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_driver_panic_is_a_failed_attempt() {
        let sensor = Arc::new(ScriptedSensor::new("climate", vec![Step::Panic, Step::Ok(18.0)]));
        let mut reader = RetryingReader::new(sensor);

        let result = reader.read(fast_policy(1)).await;
        assert_eq!(result.attempt_count, 2);
        assert_eq!(result.error_count, 1);
        assert!(result.is_fresh());
    }

    #[tokio::test]
    async fn test_counters_are_monotonic_across_cycles() {
        let sensor = Arc::new(ScriptedSensor::new(
            "climate",
            vec![Step::Fail, Step::Ok(20.0), Step::Fail, Step::Fail, Step::Ok(21.0)],
        ));
        let mut reader = RetryingReader::new(sensor);

        let mut previous = SensorStats::default();
        for _ in 0..3 {
            let result = reader.read(fast_policy(1)).await;
            assert!(result.stats.read_count > previous.read_count);
            assert!(result.stats.error_count >= previous.error_count);
            previous = result.stats;
        }
        assert_eq!(previous.read_count, 3);
        assert_eq!(previous.error_count, 3);
    }
}
