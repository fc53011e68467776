//! Connection manager - owns the broker session and its reconnect cycle
//!
//! Runs on its own task, independent of the acquisition cycle. Connectivity
//! is published on a watch channel; every `Connecting -> Connected`
//! transition posts one drain request for the publisher.

use crate::backoff::Backoff;
use crate::error::MqttError;
use crate::link::BrokerLink;
use crate::types::ConnectionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Handshakes started
    pub connect_attempts: u64,

    /// Handshakes that failed or timed out
    pub connect_failures: u64,

    /// Established sessions that were lost
    pub disconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    disconnects: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// What the publisher sees of the connection
#[derive(Clone)]
pub struct ConnectionHandle {
    state: watch::Receiver<ConnectionState>,
    drain: Arc<Notify>,
    lost: mpsc::Sender<MqttError>,
    counters: Arc<Counters>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Resolves when a fresh connection asks for the queue to be drained
    pub async fn drain_requested(&self) {
        self.drain.notified().await
    }

    /// Ask the drain worker to run; a pending request is not duplicated
    pub fn request_drain(&self) {
        self.drain.notify_one();
    }

    /// Tell the manager a write on the current session failed
    pub fn report_lost(&self, reason: MqttError) {
        // A report is already pending if the channel is full
        let _ = self.lost.try_send(reason);
    }

    pub fn stats(&self) -> ConnectionStats {
        self.counters.snapshot()
    }
}

/// Drives `Disconnected -> Connecting -> Connected` and back
pub struct ConnectionManager {
    state: watch::Sender<ConnectionState>,
    drain: Arc<Notify>,
    lost_tx: mpsc::Sender<MqttError>,
    lost_rx: mpsc::Receiver<MqttError>,
    counters: Arc<Counters>,
    backoff: Backoff,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(backoff: Backoff, connect_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (lost_tx, lost_rx) = mpsc::channel(1);
        Self {
            state,
            drain: Arc::new(Notify::new()),
            lost_tx,
            lost_rx,
            counters: Arc::new(Counters::default()),
            backoff,
            connect_timeout,
        }
    }

    /// Handle for the publisher
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            state: self.state.subscribe(),
            drain: self.drain.clone(),
            lost: self.lost_tx.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.counters.snapshot()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Connection state: {} -> {}", previous, state);
        }
    }

    /// Spawn the connection task
    ///
    /// The first connect is attempted immediately; backoff applies only
    /// after a failure or a lost session. On shutdown the session is closed
    /// without draining the queue.
    pub fn start(
        self,
        link: Box<dyn BrokerLink>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<ConnectionStats> {
        tokio::spawn(self.run(link, shutdown))
    }

    async fn run(
        mut self,
        mut link: Box<dyn BrokerLink>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> ConnectionStats {
        info!("Connection manager started for {}", link.name());
        let mut retry = false;

        loop {
            if retry {
                let delay = self.backoff.next_delay();
                info!("Reconnecting to {} in {:.1}s", link.name(), delay.as_secs_f64());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => break,
                }
            }
            retry = true;

            self.set_state(ConnectionState::Connecting);
            self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);

            let attempt = tokio::select! {
                result = tokio::time::timeout(self.connect_timeout, link.connect()) => {
                    result.unwrap_or(Err(MqttError::Timeout))
                }
                _ = shutdown.recv() => break,
            };

            if let Err(e) = attempt {
                let failures = self.counters.connect_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Connection to {} failed: {}", link.name(), e);
                if failures % 10 == 0 {
                    error!("{} failed connection attempts so far", failures);
                }
                self.set_state(ConnectionState::Disconnected);
                continue;
            }

            // Failure reports from an earlier session do not apply to this one
            while self.lost_rx.try_recv().is_ok() {}
            self.backoff.reset();
            self.set_state(ConnectionState::Connected);
            self.drain.notify_one();
            info!("Connected to {}", link.name());

            let reason = tokio::select! {
                reason = link.monitor() => reason,
                Some(reason) = self.lost_rx.recv() => reason,
                _ = shutdown.recv() => {
                    link.disconnect().await;
                    break;
                }
            };

            self.counters.disconnects.fetch_add(1, Ordering::Relaxed);
            warn!("Disconnected from {}: {}", link.name(), reason);
            self.set_state(ConnectionState::Disconnected);
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Connection manager stopped");
        self.counters.snapshot()
    }
}
