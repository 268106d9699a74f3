//! Bridge daemon: runs a [`Bridge`] alongside the local IPC server until
//! shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use pawlink_config::AppConfig;

use crate::bridge::Bridge;
use crate::ipc::server::{self, IpcState};
use crate::logging::LogReader;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// How long the daemon waits for the IPC server to drain after shutdown.
const IPC_DRAIN: Duration = Duration::from_secs(2);

/// The PawLink bridge daemon.
pub struct Daemon {
    config: AppConfig,
    socket_path: PathBuf,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    logs: Option<LogReader>,
}

impl Daemon {
    /// Create a new daemon instance with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let socket_path = server::socket_path_from_config(&config);
        Self {
            config,
            socket_path,
            shutdown_tx,
            logs: None,
        }
    }

    /// Serve captured log entries on `/logs`.
    pub fn with_log_reader(mut self, reader: LogReader) -> Self {
        self.logs = Some(reader);
        self
    }

    /// Override the IPC socket location.
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Run until a shutdown signal, Ctrl-C, or an IPC server failure.
    pub async fn run(&self) -> Result<(), DaemonError> {
        info!(
            endpoint = %self.config.controller.endpoint,
            socket = %self.socket_path.display(),
            build = %crate::build_info::agent(),
            "PawLink daemon starting"
        );

        let bridge = Arc::new(Bridge::start(&self.config));
        let state = Arc::new(IpcState {
            config: self.config.clone(),
            bridge: Arc::clone(&bridge),
            shutdown_tx: self.shutdown_tx.clone(),
            logs: self.logs.clone(),
            started_at: Instant::now(),
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ipc = tokio::spawn(server::serve(
            self.socket_path.clone(),
            state,
            self.shutdown_tx.subscribe(),
        ));

        let outcome = tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping daemon");
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, initiating graceful shutdown");
                Ok(())
            }
            joined = &mut ipc => Err(match joined {
                Ok(Ok(())) => DaemonError::Startup("IPC server exited unexpectedly".to_string()),
                Ok(Err(e)) => DaemonError::Io(e),
                Err(e) => DaemonError::Startup(format!("IPC server task failed: {e}")),
            }),
        };

        let _ = self.shutdown_tx.send(ShutdownSignal);
        bridge.shutdown().await;
        if !ipc.is_finished() && tokio::time::timeout(IPC_DRAIN, &mut ipc).await.is_err() {
            warn!("IPC server did not stop in time");
            ipc.abort();
        }

        match &outcome {
            Ok(()) => info!("Daemon stopped"),
            Err(e) => error!(error = %e, "Daemon stopped with an error"),
        }
        outcome
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon startup failed: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
