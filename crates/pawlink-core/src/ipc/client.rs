//! IPC client: connects to the daemon over a Unix domain socket.
//!
//! Typed access to every daemon route for the CLI and other local
//! front-ends. Uses `hyper` for HTTP/1.1 over the Unix socket.

use std::path::PathBuf;

use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tracing::debug;

use super::types::*;
use crate::codec::{Params, StatusEvent};

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("daemon returned error: {0}")]
    DaemonError(String),
}

/// Client for communicating with the PawLink daemon via Unix socket.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Check if the daemon socket exists (daemon is likely running).
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Open a connection, send one request, and return the response head
    /// with its body still streaming.
    async fn send(
        &self,
        method: hyper::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<hyper::Response<Incoming>, IpcClientError> {
        if !self.daemon_available() {
            return Err(IpcClientError::NotRunning(self.socket_path.clone()));
        }

        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source: e,
                })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake::<
            _,
            http_body_util::Full<Bytes>,
        >(TokioIo::new(stream))
        .await
        .map_err(|e| IpcClientError::Request(format!("HTTP handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "IPC connection closed with error");
            }
        });

        debug!(%method, path, "IPC request");

        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(http_body_util::Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| IpcClientError::Request(format!("failed to build request: {e}")))?;

        sender
            .send_request(req)
            .await
            .map_err(|e| IpcClientError::Request(format!("request failed: {e}")))
    }

    /// Send a request and collect the full response body.
    async fn request(
        &self,
        method: hyper::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, IpcClientError> {
        let resp = self.send(method, path, body).await?;
        let status = resp.status();
        let resp_body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| IpcClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&resp_body) {
                return Err(IpcClientError::DaemonError(err.error));
            }
            return Err(IpcClientError::Request(format!(
                "unexpected status: {status}"
            )));
        }
        Ok(resp_body)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> Result<T, IpcClientError> {
        let body = self.request(hyper::Method::GET, path, None).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("{what}: {e}")))
    }

    // ── Typed API methods ──────────────────────────────────────────────

    /// Health check: is the daemon running and responsive?
    pub async fn health(&self) -> Result<HealthResponse, IpcClientError> {
        self.get("/health", "health").await
    }

    pub async fn status(&self) -> Result<StatusResponse, IpcClientError> {
        self.get("/status", "status").await
    }

    pub async fn connection(&self) -> Result<ConnectionResponse, IpcClientError> {
        self.get("/connection", "connection").await
    }

    /// Forward a command to the controller through the daemon.
    pub async fn command(
        &self,
        command: &str,
        params: Params,
    ) -> Result<CommandResponse, IpcClientError> {
        let req = CommandRequest {
            command: command.to_string(),
            params,
        };
        let payload = serde_json::to_vec(&req)
            .map_err(|e| IpcClientError::Parse(format!("failed to serialize request: {e}")))?;
        let body = self
            .request(hyper::Method::POST, "/command", Some(payload))
            .await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("command: {e}")))
    }

    /// Attach as a front-end and follow the daemon's status events.
    pub async fn events(&self) -> Result<EventStream, IpcClientError> {
        let resp = self.send(hyper::Method::GET, "/events", None).await?;
        if !resp.status().is_success() {
            return Err(IpcClientError::Request(format!(
                "unexpected status: {}",
                resp.status()
            )));
        }
        Ok(EventStream {
            body: resp.into_body(),
            buffer: Vec::new(),
        })
    }

    /// Captured daemon log entries, newest `limit` if given.
    pub async fn logs(&self, limit: Option<usize>) -> Result<LogsResponse, IpcClientError> {
        match limit {
            Some(limit) => self.get(&format!("/logs?limit={limit}"), "logs").await,
            None => self.get("/logs", "logs").await,
        }
    }

    /// Get the daemon's current config as TOML.
    pub async fn config(&self) -> Result<ConfigResponse, IpcClientError> {
        self.get("/config", "config").await
    }

    /// Request daemon shutdown.
    pub async fn stop(&self) -> Result<StopResponse, IpcClientError> {
        let body = self.request(hyper::Method::POST, "/stop", None).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("stop: {e}")))
    }
}

/// Server-sent status events from `/events`.
///
/// Dropping the stream closes the connection, which detaches the front-end.
pub struct EventStream {
    body: Incoming,
    buffer: Vec<u8>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` when the daemon closes the
    /// stream.
    pub async fn next_event(&mut self) -> Option<Result<StatusEvent, IpcClientError>> {
        loop {
            if let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
                let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
                let block = String::from_utf8_lossy(&block);
                let data: Vec<&str> = block
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(|d| d.strip_prefix(' ').unwrap_or(d))
                    .collect();
                // Keep-alive comments carry no data.
                if data.is_empty() {
                    continue;
                }
                return Some(
                    serde_json::from_str(&data.join("\n"))
                        .map_err(|e| IpcClientError::Parse(format!("event: {e}"))),
                );
            }

            match self.body.frame().await? {
                Ok(frame) => {
                    if let Ok(data) = frame.into_data() {
                        self.buffer.extend_from_slice(&data);
                    }
                }
                Err(e) => {
                    return Some(Err(IpcClientError::Request(format!(
                        "event stream failed: {e}"
                    ))));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast;

    use super::super::server;
    use crate::bridge::Bridge;

    #[test]
    fn test_client_creation() {
        let client = IpcClient::new("/tmp/test-pawlink-missing.sock");
        assert!(!client.daemon_available());
    }

    #[tokio::test]
    async fn test_client_not_running_error() {
        let client = IpcClient::new("/tmp/nonexistent-pawlink.sock");
        let result = client.health().await;
        assert!(matches!(result, Err(IpcClientError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_integration_server_client() {
        let mut config = pawlink_config::AppConfig::default();
        config.controller.endpoint = "127.0.0.1:1".to_string();
        config.controller.reconnect_delay_ms = 50;
        let (shutdown_tx, _) = broadcast::channel(1);

        let bridge = Arc::new(Bridge::start(&config));
        let state = Arc::new(server::IpcState {
            config,
            bridge: Arc::clone(&bridge),
            shutdown_tx: shutdown_tx.clone(),
            logs: None,
            started_at: Instant::now(),
        });

        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("ipc.sock");
        let server_handle = tokio::spawn(server::serve(
            sock_path.clone(),
            state,
            shutdown_tx.subscribe(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = IpcClient::new(&sock_path);
        assert!(client.daemon_available());

        let health = client.health().await.unwrap();
        assert_eq!(health.status, "ok");

        let status = client.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.endpoint, "127.0.0.1:1");

        let outcome = client.command("status", Params::new()).await.unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.reason.as_deref(), Some("not connected"));

        let mut events = client.events().await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.next_event())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(event, StatusEvent::Error { .. }));
        drop(events);

        let missing = client.get::<StatusResponse>("/nope", "nope").await;
        assert!(matches!(missing, Err(IpcClientError::DaemonError(_))));

        let stop = client.stop().await.unwrap();
        assert!(stop.acknowledged);

        let _ = tokio::time::timeout(Duration::from_secs(2), server_handle).await;
        bridge.shutdown().await;
    }
}
