//! Cycle driver - orchestrates read, assemble, publish on a fixed interval

use crate::payload::{Message, PayloadAssembler};
use crate::reader::ReadPolicy;
use crate::scheduler::AcquisitionScheduler;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

/// Shortest pause between two cycles
pub const MIN_CYCLE_SLEEP: Duration = Duration::from_millis(100);

/// Consecutive blind cycles before the warning escalates to an error
pub const BLIND_CYCLE_ALERT: u32 = 3;

/// Downstream consumer of assembled messages
///
/// Fire-and-forget: accepting a message says nothing about delivery.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, message: Message);
}

/// Cycle timing and read budget
#[derive(Debug, Clone, Copy)]
pub struct CycleConfig {
    /// Time between cycle starts
    pub read_interval: Duration,

    /// Per-sensor read policy
    pub policy: ReadPolicy,
}

/// Counters for a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub cycles: u64,
    pub blind_cycles: u64,
}

/// The device's main loop
pub struct Agent {
    scheduler: AcquisitionScheduler,
    assembler: PayloadAssembler,
    config: CycleConfig,
    consecutive_blind: u32,
}

impl Agent {
    pub fn new(
        scheduler: AcquisitionScheduler,
        assembler: PayloadAssembler,
        config: CycleConfig,
    ) -> Self {
        Self {
            scheduler,
            assembler,
            config,
            consecutive_blind: 0,
        }
    }

    pub fn scheduler(&self) -> &AcquisitionScheduler {
        &self.scheduler
    }

    /// Run one acquisition cycle and assemble its message
    pub async fn cycle(&mut self) -> Message {
        let results = self.scheduler.run_cycle(self.config.policy).await;
        let message = self.assembler.assemble(&results);

        if message.is_blind() {
            self.consecutive_blind += 1;
            if self.consecutive_blind >= BLIND_CYCLE_ALERT {
                error!(
                    "No sensor data for {} consecutive cycles, device is blind",
                    self.consecutive_blind
                );
            } else {
                warn!("No sensor produced data this cycle");
            }
        } else {
            self.consecutive_blind = 0;
        }

        message
    }

    /// Run cycles until shutdown is signalled, then release the sensors
    ///
    /// A cycle already in progress when shutdown arrives is allowed to
    /// finish; no new cycle is started afterwards.
    pub async fn run(
        mut self,
        sink: Arc<dyn MessageSink>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> RunStats {
        let mut stats = RunStats::default();
        info!(
            "Starting main loop: {} sensors, interval {:?}",
            self.scheduler.sensor_count(),
            self.config.read_interval
        );

        loop {
            if shutdown_requested(&mut shutdown) {
                break;
            }

            let started = Instant::now();
            let message = self.cycle().await;
            stats.cycles += 1;
            if message.is_blind() {
                stats.blind_cycles += 1;
            }

            debug!(
                "Publishing cycle {} ({} readings, {} active)",
                stats.cycles,
                message.readings.len(),
                message.stats.active_sensors
            );
            sink.publish(message).await;

            let elapsed = started.elapsed();
            let sleep_time = self
                .config
                .read_interval
                .saturating_sub(elapsed)
                .max(MIN_CYCLE_SLEEP);
            info!(
                "Cycle completed in {:.2}s, sleeping for {:.2}s",
                elapsed.as_secs_f64(),
                sleep_time.as_secs_f64()
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_time) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Main loop stopped after {} cycles", stats.cycles);
        self.scheduler.shutdown();
        stats
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Err(TryRecvError::Empty) => false,
        Ok(()) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::tests::{ScriptedSensor, Step};
    use crate::sensor::RawSensor;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageSink for CollectingSink {
        async fn publish(&self, message: Message) {
            self.messages.lock().await.push(message);
        }
    }

    fn agent(sensors: Vec<Arc<dyn RawSensor>>, interval: Duration) -> Agent {
        Agent::new(
            AcquisitionScheduler::new(sensors),
            PayloadAssembler::new("CDA_02", "living_room", 95),
            CycleConfig {
                read_interval: interval,
                policy: ReadPolicy {
                    deadline: Duration::from_millis(50),
                    max_retries: 2,
                    retry_delay: Duration::from_millis(5),
                },
            },
        )
    }

    #[tokio::test]
    async fn test_one_sensor_times_out_without_history() {
        let hang = Step::Hang(Duration::from_millis(200));
        let mut agent = agent(
            vec![
                Arc::new(ScriptedSensor::new("climate", vec![Step::Ok(20.0)])),
                Arc::new(ScriptedSensor::new("light", vec![Step::Ok(1.0)])),
                Arc::new(ScriptedSensor::new("soil", vec![hang])),
            ],
            Duration::from_secs(10),
        );

        let message = agent.cycle().await;
        assert_eq!(message.stats.sensor_count, 3);
        assert_eq!(message.stats.active_sensors, 2);
        assert!(!message.readings.contains_key("soil"));
    }

    #[tokio::test]
    async fn test_one_sensor_times_out_with_history() {
        let soil = Arc::new(ScriptedSensor::new("soil", vec![Step::Ok(15.0)]));
        let mut agent = agent(
            vec![
                Arc::new(ScriptedSensor::new("climate", vec![Step::Ok(20.0)])),
                Arc::new(ScriptedSensor::new("light", vec![Step::Ok(1.0)])),
                soil.clone(),
            ],
            Duration::from_secs(10),
        );
        agent.cycle().await;

        soil.set_script(vec![Step::Hang(Duration::from_millis(200))]);
        let message = agent.cycle().await;

        assert_eq!(message.stats.active_sensors, 2);
        let entry = &message.readings["soil"];
        assert!(entry.stale);
        assert_eq!(entry.fields.get_f64("temperature"), Some(15.0));
        assert_eq!(entry.stats.error_count, 3);
    }

    #[tokio::test]
    async fn test_blind_device_still_publishes() {
        let mut agent = agent(
            vec![Arc::new(ScriptedSensor::new("climate", vec![Step::Fail]))],
            Duration::from_secs(10),
        );

        for _ in 0..BLIND_CYCLE_ALERT {
            let message = agent.cycle().await;
            assert!(message.is_blind());
            assert_eq!(message.stats.active_sensors, 0);
        }
        assert_eq!(agent.consecutive_blind, BLIND_CYCLE_ALERT);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let sink = Arc::new(CollectingSink::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let agent = agent(
            vec![Arc::new(ScriptedSensor::new("climate", vec![Step::Ok(20.0)]))],
            Duration::from_millis(150),
        );

        let handle = tokio::spawn(agent.run(sink.clone(), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(()).unwrap();

        let stats = handle.await.unwrap();
        let published = sink.messages.lock().await.len() as u64;
        assert!(stats.cycles >= 2, "only {} cycles", stats.cycles);
        assert_eq!(stats.cycles, published);
        assert_eq!(stats.blind_cycles, 0);
    }

    #[tokio::test]
    async fn test_run_does_not_start_after_shutdown() {
        let sink = Arc::new(CollectingSink::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();

        let agent = agent(
            vec![Arc::new(ScriptedSensor::new("climate", vec![Step::Ok(20.0)]))],
            Duration::from_millis(100),
        );
        let stats = agent.run(sink.clone(), shutdown_rx).await;

        assert_eq!(stats.cycles, 0);
        assert!(sink.messages.lock().await.is_empty());
    }
}
