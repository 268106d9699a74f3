//! Heartbeat emitter: announces remote liveness on a fixed cadence.
//!
//! The service runs as its own tokio task and dispatches a `heartbeat`
//! command every interval whether or not the user is issuing commands.
//! A beat that cannot be sent because the link is down is counted as
//! skipped; the cadence is not disturbed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use pawlink_config::HeartbeatConfig;
use pawlink_core::{BridgeError, Command, Dispatcher};

use crate::RemoteError;
use crate::probe::{FixedSignal, SignalProbe};

/// Commands that can be sent to the heartbeat service.
#[derive(Debug)]
pub enum ServiceCommand {
    /// Report this signal strength instead of the probe's reading.
    UpdateSignal(f64),
    /// Shut down the service.
    Shutdown,
}

/// Snapshot of the service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatCounts {
    /// Beats written to the link.
    pub sent: u64,
    /// Beats not sent because the link was down or the write failed.
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    skipped: AtomicU64,
}

/// The heartbeat service that runs as a tokio task.
pub struct HeartbeatService {
    dispatcher: Dispatcher,
    remote_id: String,
    interval: Duration,
    probe: Arc<dyn SignalProbe>,
    pinned: Option<f64>,
    command_rx: mpsc::Receiver<ServiceCommand>,
    counters: Arc<Counters>,
}

/// Handle for interacting with a running [`HeartbeatService`].
#[derive(Debug, Clone)]
pub struct HeartbeatHandle {
    command_tx: mpsc::Sender<ServiceCommand>,
    counters: Arc<Counters>,
}

impl HeartbeatHandle {
    /// Pin the reported signal strength, overriding the probe.
    pub async fn update_signal(&self, dbm: f64) -> Result<(), RemoteError> {
        if !dbm.is_finite() {
            return Err(RemoteError::InvalidSignal(dbm));
        }
        self.command_tx
            .send(ServiceCommand::UpdateSignal(dbm))
            .await
            .map_err(|_| RemoteError::ServiceStopped)
    }

    /// Request the service to shut down.
    pub async fn shutdown(&self) -> Result<(), RemoteError> {
        self.command_tx
            .send(ServiceCommand::Shutdown)
            .await
            .map_err(|_| RemoteError::ServiceStopped)
    }

    pub fn counts(&self) -> HeartbeatCounts {
        HeartbeatCounts {
            sent: self.counters.sent.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

impl HeartbeatService {
    /// Create a service reading signal strength from `probe`.
    pub fn new(
        dispatcher: Dispatcher,
        config: &HeartbeatConfig,
        probe: Arc<dyn SignalProbe>,
    ) -> (Self, HeartbeatHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let counters = Arc::new(Counters::default());

        let service = Self {
            dispatcher,
            remote_id: config.remote_id.clone(),
            interval: config.interval().max(Duration::from_millis(1)),
            probe,
            pinned: None,
            command_rx,
            counters: Arc::clone(&counters),
        };
        let handle = HeartbeatHandle {
            command_tx,
            counters,
        };
        (service, handle)
    }

    /// Create a service reporting the configured fixed signal strength.
    pub fn from_config(dispatcher: Dispatcher, config: &HeartbeatConfig) -> (Self, HeartbeatHandle) {
        Self::new(
            dispatcher,
            config,
            Arc::new(FixedSignal(config.signal_strength)),
        )
    }

    /// Run the heartbeat loop until shutdown. The first beat is sent
    /// immediately.
    pub async fn run(mut self) {
        info!(
            remote_id = %self.remote_id,
            interval_ms = self.interval.as_millis() as u64,
            "Heartbeat service started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(ServiceCommand::UpdateSignal(dbm)) => {
                        debug!(dbm, "Signal strength pinned");
                        self.pinned = Some(dbm);
                    }
                    Some(ServiceCommand::Shutdown) | None => {
                        info!("Heartbeat service shutting down");
                        break;
                    }
                },
                _ = ticker.tick() => self.beat().await,
            }
        }

        let counts = HeartbeatCounts {
            sent: self.counters.sent.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        };
        info!(sent = counts.sent, skipped = counts.skipped, "Heartbeat service stopped");
    }

    fn signal_strength(&self) -> f64 {
        self.pinned
            .unwrap_or_else(|| self.probe.signal_strength())
    }

    async fn beat(&self) {
        let command = Command::heartbeat(self.remote_id.as_str(), self.signal_strength());
        match self.dispatcher.dispatch(&command).await {
            Ok(accepted) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(link_id = accepted.link_id, "Heartbeat sent");
            }
            Err(BridgeError::LinkUnavailable) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                debug!("Heartbeat skipped: not connected");
            }
            Err(e) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Heartbeat not sent");
            }
        }
    }
}
