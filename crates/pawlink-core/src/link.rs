//! Connection manager: owns the single link to the robot controller.
//!
//! The manager runs as one tokio task driving the state machine
//!
//! ```text
//!  ┌──────────────┐  attempt   ┌────────────┐  handshake ok  ┌───────────┐
//!  │ Disconnected │──────────▶│ Connecting │──────────────▶│ Connected │
//!  └──────────────┘           └────────────┘               └───────────┘
//!         ▲   ▲  fixed delay        │ failure / timeout           │
//!         │   └─────────────────────┘                             │
//!         └──────────────── read/write error, peer close ─────────┘
//! ```
//!
//! While connected, the task owns the read half of the socket and a
//! per-link writer task owns the write half. Writes reach the writer through
//! an `mpsc` channel published in the link snapshot, so they are serialized
//! and never wait on reads. Reconnects happen after a fixed delay, forever,
//! until shutdown.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace, warn};

use pawlink_config::ControllerConfig;

use crate::codec::{self, StatusEvent};
use crate::daemon::ShutdownSignal;
use crate::error::BridgeError;
use crate::fanout::FanOut;

/// Depth of the per-link write queue.
const WRITE_QUEUE: usize = 32;

/// How long shutdown waits for the writer to send a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// `host:port`, or a full `ws://` / `wss://` URL.
    pub endpoint: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl LinkSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// WebSocket URL for the endpoint.
    pub fn url(&self) -> String {
        if self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://") {
            self.endpoint.clone()
        } else {
            format!("ws://{}", self.endpoint)
        }
    }
}

/// Read-only snapshot of the link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkInfo {
    pub endpoint: String,
    pub state: LinkState,
    /// Identifier of the active link; `None` unless connected.
    pub link_id: Option<u64>,
    /// When the active link was established.
    pub connected_since: Option<SystemTime>,
    /// Last inbound frame or successful write on the active link.
    pub last_activity: Option<SystemTime>,
    /// Connection attempts made since startup.
    pub attempts: u64,
}

/// A frame queued for the active link's writer.
#[derive(Debug)]
struct WriteRequest {
    frame: String,
    ack: oneshot::Sender<Result<usize, BridgeError>>,
}

/// Write access to one specific link.
#[derive(Debug, Clone)]
pub(crate) struct LinkWriter {
    link_id: u64,
    tx: mpsc::Sender<WriteRequest>,
}

impl LinkWriter {
    pub(crate) fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Queue a frame and wait until it has been written. Returns the number
    /// of bytes written.
    pub(crate) async fn write(&self, frame: String) -> Result<usize, BridgeError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteRequest { frame, ack })
            .await
            .map_err(|_| BridgeError::LinkUnavailable)?;
        done.await.unwrap_or_else(|_| {
            Err(BridgeError::Transport(
                "link closed before the write completed".to_string(),
            ))
        })
    }
}

#[derive(Debug, Clone)]
struct Shared {
    info: LinkInfo,
    writer: Option<LinkWriter>,
}

/// Handle for observing and stopping a running [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct LinkHandle {
    shared: watch::Receiver<Shared>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl LinkHandle {
    pub fn state(&self) -> LinkState {
        self.shared.borrow().info.state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn info(&self) -> LinkInfo {
        self.shared.borrow().info.clone()
    }

    /// Wait until the link reaches `state`. Returns `false` if the manager
    /// has gone away first.
    pub async fn wait_for_state(&self, state: LinkState) -> bool {
        let mut rx = self.shared.clone();
        rx.wait_for(|s| s.info.state == state).await.is_ok()
    }

    /// Ask the manager to close the link and stop reconnecting.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// Writer of the active link, if connected.
    pub(crate) fn writer(&self) -> Option<LinkWriter> {
        let shared = self.shared.borrow();
        match shared.info.state {
            LinkState::Connected => shared.writer.clone(),
            _ => None,
        }
    }
}

/// Why a connected link ended.
enum Exit {
    Shutdown,
    Dropped(String),
}

/// What the main loop does next.
enum Flow {
    Retry,
    Shutdown,
}

/// The task that owns the link to the controller.
pub struct ConnectionManager {
    settings: LinkSettings,
    fanout: FanOut,
    shared: Arc<watch::Sender<Shared>>,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    next_link_id: u64,
}

impl ConnectionManager {
    /// Create a manager and its handle. Nothing happens until [`run`](Self::run).
    pub fn new(settings: LinkSettings, fanout: FanOut) -> (Self, LinkHandle) {
        let initial = Shared {
            info: LinkInfo {
                endpoint: settings.endpoint.clone(),
                state: LinkState::Disconnected,
                link_id: None,
                connected_since: None,
                last_activity: None,
                attempts: 0,
            },
            writer: None,
        };
        let (shared_tx, shared_rx) = watch::channel(initial);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let manager = Self {
            settings,
            fanout,
            shared: Arc::new(shared_tx),
            shutdown_rx,
            next_link_id: 0,
        };
        let handle = LinkHandle {
            shared: shared_rx,
            shutdown_tx,
        };
        (manager, handle)
    }

    /// Spawn the manager on the current tokio runtime.
    pub fn spawn(settings: LinkSettings, fanout: FanOut) -> (LinkHandle, JoinHandle<()>) {
        let (manager, handle) = Self::new(settings, fanout);
        (handle, tokio::spawn(manager.run()))
    }

    /// Run until shutdown, reconnecting after every failure.
    pub async fn run(mut self) {
        info!(endpoint = %self.settings.endpoint, "Connection manager started");

        loop {
            if let Flow::Shutdown = self.connect_once().await {
                break;
            }

            debug!(
                delay_ms = self.settings.reconnect_delay.as_millis() as u64,
                "Reconnect scheduled"
            );
            let cancelled = tokio::select! {
                _ = self.shutdown_rx.recv() => true,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => false,
            };
            if cancelled {
                break;
            }
        }

        self.shared.send_modify(|s| {
            s.info.state = LinkState::Disconnected;
            s.info.link_id = None;
            s.writer = None;
        });
        info!("Connection manager stopped");
    }

    async fn connect_once(&mut self) -> Flow {
        self.next_link_id += 1;
        let link_id = self.next_link_id;
        let url = self.settings.url();

        self.shared.send_modify(|s| {
            s.info.state = LinkState::Connecting;
            s.info.attempts += 1;
        });
        debug!(link_id, %url, "Connecting to controller");

        let attempt = tokio::time::timeout(
            self.settings.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        );
        let result = tokio::select! {
            _ = self.shutdown_rx.recv() => None,
            result = attempt => Some(result),
        };

        match result {
            None => Flow::Shutdown,
            Some(Ok(Ok((ws, _response)))) => {
                let (sink, stream) = ws.split();
                self.serve_link(link_id, sink, stream).await
            }
            Some(Ok(Err(e))) => self.connect_failed(e.to_string()),
            Some(Err(_elapsed)) => self.connect_failed(format!(
                "connection attempt timed out after {}ms",
                self.settings.connect_timeout.as_millis()
            )),
        }
    }

    fn connect_failed(&self, reason: String) -> Flow {
        warn!(endpoint = %self.settings.endpoint, %reason, "Connection attempt failed");
        self.shared.send_modify(|s| s.info.state = LinkState::Disconnected);
        self.fanout.publish(StatusEvent::Error { reason });
        Flow::Retry
    }

    /// Drive one established link until it drops or shutdown is requested.
    async fn serve_link<W, R>(&mut self, link_id: u64, sink: W, mut stream: R) -> Flow
    where
        W: Sink<Message, Error = WsError> + Unpin + Send + 'static,
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE);
        let (failed_tx, mut failed_rx) = oneshot::channel();
        let mut writer_task = tokio::spawn(write_loop(
            link_id,
            sink,
            write_rx,
            failed_tx,
            Arc::clone(&self.shared),
        ));

        let now = SystemTime::now();
        self.shared.send_modify(|s| {
            s.info.state = LinkState::Connected;
            s.info.link_id = Some(link_id);
            s.info.connected_since = Some(now);
            s.info.last_activity = Some(now);
            s.writer = Some(LinkWriter {
                link_id,
                tx: write_tx,
            });
        });
        info!(link_id, endpoint = %self.settings.endpoint, "Connected to controller");
        self.fanout.publish(StatusEvent::Connected {
            endpoint: self.settings.endpoint.clone(),
            link_id,
        });

        let exit = loop {
            // Shutdown wins over frames that are already buffered.
            let next = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => Err(Exit::Shutdown),
                failed = &mut failed_rx => Err(Exit::Dropped(
                    failed.unwrap_or_else(|_| "link writer stopped".to_string()),
                )),
                frame = stream.next() => Ok(frame),
            };
            let frame = match next {
                Ok(frame) => frame,
                Err(exit) => break exit,
            };
            match frame {
                Some(Ok(Message::Text(text))) => self.handle_frame(link_id, &text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_frame(link_id, &text),
                    Err(_) => warn!(link_id, "Discarding non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.into_owned())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "controller closed the connection".to_string());
                    break Exit::Dropped(reason);
                }
                // Ping/pong are answered by the transport.
                Some(Ok(_)) => {}
                Some(Err(e)) => break Exit::Dropped(e.to_string()),
                None => break Exit::Dropped("connection closed".to_string()),
            }
        };

        // Discard the link. Dispatchers can no longer reach its writer.
        self.shared.send_modify(|s| {
            s.info.state = LinkState::Disconnected;
            s.info.link_id = None;
            s.writer = None;
        });
        drop(stream);

        match exit {
            Exit::Shutdown => {
                info!(link_id, "Closing link for shutdown");
                if tokio::time::timeout(CLOSE_GRACE, &mut writer_task)
                    .await
                    .is_err()
                {
                    warn!(link_id, "Link writer did not close in time, aborting it");
                    writer_task.abort();
                }
                Flow::Shutdown
            }
            Exit::Dropped(reason) => {
                warn!(link_id, %reason, "Link to controller lost");
                self.fanout.publish(StatusEvent::Disconnected { reason });
                Flow::Retry
            }
        }
    }

    fn handle_frame(&self, link_id: u64, text: &str) {
        touch(&self.shared, link_id);
        match codec::decode(text) {
            Ok(payload) => {
                let delivered = self.fanout.publish(StatusEvent::Payload { payload });
                trace!(link_id, delivered, "Inbound frame published");
            }
            Err(e) => warn!(link_id, error = %e, "Discarding inbound frame"),
        }
    }
}

/// Record activity on `link_id` without waking state watchers.
fn touch(shared: &watch::Sender<Shared>, link_id: u64) {
    shared.send_if_modified(|s| {
        if s.info.link_id == Some(link_id) {
            s.info.last_activity = Some(SystemTime::now());
        }
        false
    });
}

/// Owns the write half of one link. Writes are performed one at a time in
/// queue order. The first failure is reported to the manager, and every
/// request still queued is failed.
async fn write_loop<W>(
    link_id: u64,
    mut sink: W,
    mut rx: mpsc::Receiver<WriteRequest>,
    failed_tx: oneshot::Sender<String>,
    shared: Arc<watch::Sender<Shared>>,
) where
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(request) = rx.recv().await {
        let bytes = request.frame.len();
        match sink.send(Message::Text(request.frame)).await {
            Ok(()) => {
                touch(&shared, link_id);
                let _ = request.ack.send(Ok(bytes));
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(link_id, error = %reason, "Write to controller failed");
                let _ = request
                    .ack
                    .send(Err(BridgeError::Transport(reason.clone())));
                let _ = failed_tx.send(reason.clone());

                rx.close();
                while let Some(queued) = rx.recv().await {
                    let _ = queued.ack.send(Err(BridgeError::Transport(reason.clone())));
                }
                return;
            }
        }
    }

    let _ = sink.close().await;
    debug!(link_id, "Link writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{future, sink, stream};

    fn settings(endpoint: &str) -> LinkSettings {
        LinkSettings {
            endpoint: endpoint.to_string(),
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
        }
    }

    fn reset_error() -> WsError {
        WsError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
    }

    /// Serve link 1 over the given socket halves in the background.
    fn serve<W, R>(manager: ConnectionManager, sink: W, stream: R) -> JoinHandle<Flow>
    where
        W: Sink<Message, Error = WsError> + Unpin + Send + 'static,
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut manager = manager;
            manager.serve_link(1, sink, stream).await
        })
    }

    fn spawn_write(writer: &LinkWriter, frame: &str) -> JoinHandle<Result<usize, BridgeError>> {
        let writer = writer.clone();
        let frame = frame.to_string();
        tokio::spawn(async move { writer.write(frame).await })
    }

    #[test]
    fn test_url_from_host_port() {
        assert_eq!(settings("localhost:8765").url(), "ws://localhost:8765");
    }

    #[test]
    fn test_url_passthrough() {
        assert_eq!(
            settings("wss://robot.example.com/ws").url(),
            "wss://robot.example.com/ws"
        );
    }

    #[test]
    fn test_settings_from_default_config() {
        let s = LinkSettings::from_config(&ControllerConfig::default());
        assert_eq!(s.endpoint, "localhost:8765");
        assert_eq!(s.reconnect_delay, Duration::from_secs(5));
        assert_eq!(s.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let (_manager, handle) = ConnectionManager::new(settings("127.0.0.1:1"), FanOut::new(4));
        let info = handle.info();
        assert_eq!(info.state, LinkState::Disconnected);
        assert_eq!(info.attempts, 0);
        assert!(info.link_id.is_none());
        assert!(handle.writer().is_none());
    }

    #[tokio::test]
    async fn test_refused_connection_emits_error_and_retries() {
        // Bind then drop a listener to get a port nobody is listening on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let fanout = FanOut::new(16);
        let mut sub = fanout.subscribe();
        let (handle, task) = ConnectionManager::spawn(settings(&format!("127.0.0.1:{port}")), fanout);

        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(event, StatusEvent::Error { .. }), "{event:?}");
        }
        assert!(handle.info().attempts >= 2);
        assert!(!handle.is_connected());

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_stops_immediately() {
        let (manager, handle) = ConnectionManager::new(settings("127.0.0.1:1"), FanOut::new(4));
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), manager.run())
            .await
            .unwrap();
        assert_eq!(handle.info().attempts, 1);
    }

    #[tokio::test]
    async fn test_write_failure_drops_link_and_fails_queued_writes() {
        let fanout = FanOut::new(16);
        let mut sub = fanout.subscribe();
        let (manager, handle) = ConnectionManager::new(settings("127.0.0.1:1"), fanout);

        // The first write parks until released, then the socket reports a reset.
        type Gate = Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>;
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let gate: Gate = Some((entered_tx, release_rx));
        let failing = Box::pin(sink::unfold(
            gate,
            |gate, _frame: Message| async move {
                if let Some((entered, release)) = gate {
                    let _ = entered.send(());
                    let _ = release.await;
                }
                Err::<Gate, _>(reset_error())
            },
        ));
        let serving = serve(manager, failing, stream::pending());

        assert!(handle.wait_for_state(LinkState::Connected).await);
        let writer = handle.writer().unwrap();

        let first = spawn_write(&writer, "first");
        entered_rx.await.unwrap();
        let queued: Vec<_> = (0..3)
            .map(|i| spawn_write(&writer, &format!("queued-{i}")))
            .collect();
        tokio::time::timeout(Duration::from_secs(2), async {
            while writer.tx.capacity() > WRITE_QUEUE - 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        release_tx.send(()).unwrap();

        assert!(matches!(first.await.unwrap(), Err(BridgeError::Transport(_))));
        for write in queued {
            assert!(matches!(write.await.unwrap(), Err(BridgeError::Transport(_))));
        }

        let flow = tokio::time::timeout(Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(flow, Flow::Retry));
        assert_eq!(handle.state(), LinkState::Disconnected);
        assert!(handle.writer().is_none());

        assert!(matches!(sub.try_recv(), Some(StatusEvent::Connected { link_id: 1, .. })));
        assert!(matches!(sub.try_recv(), Some(StatusEvent::Disconnected { .. })));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_discards_buffered_frames() {
        let fanout = FanOut::new(64);
        let mut sub = fanout.subscribe();
        let (manager, handle) = ConnectionManager::new(settings("127.0.0.1:1"), fanout);

        let frames: Vec<Result<Message, WsError>> = (0..40)
            .map(|i| Ok(Message::Text(format!(r#"{{"battery": {i}}}"#))))
            .collect();
        let discard = sink::drain::<Message>()
            .sink_map_err(|never: std::convert::Infallible| -> WsError { match never {} });

        // Every frame is already readable when shutdown is requested.
        handle.shutdown();
        let flow = tokio::time::timeout(
            Duration::from_secs(2),
            serve(manager, discard, stream::iter(frames)),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(matches!(flow, Flow::Shutdown));
        assert!(matches!(sub.try_recv(), Some(StatusEvent::Connected { .. })));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stuck_writer() {
        let (manager, handle) = ConnectionManager::new(settings("127.0.0.1:1"), FanOut::new(4));
        let stuck = Box::pin(sink::unfold((), |(), _frame: Message| {
            future::pending::<Result<(), WsError>>()
        }));
        let serving = serve(manager, stuck, stream::pending());

        assert!(handle.wait_for_state(LinkState::Connected).await);
        let write = spawn_write(&handle.writer().unwrap(), "never-written");
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.shutdown();
        let flow = tokio::time::timeout(CLOSE_GRACE + Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(flow, Flow::Shutdown));

        let result = tokio::time::timeout(Duration::from_secs(1), write)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(BridgeError::Transport(_))));
    }
}
