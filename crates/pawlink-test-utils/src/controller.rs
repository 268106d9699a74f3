//! In-process stand-ins for the robot controller.
//!
//! [`MockController`] accepts WebSocket links on a loopback port, records
//! every text frame the bridge sends, and can push frames back or cut the
//! link. [`StallingListener`] accepts TCP connections and never answers the
//! handshake, which holds a client in the connecting state.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

enum Outbound {
    Text(String),
    Drop,
}

#[derive(Default)]
struct State {
    connections: Vec<Instant>,
    current: Option<mpsc::UnboundedSender<Outbound>>,
}

struct Shared {
    state: Mutex<State>,
    connected: Notify,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A loopback WebSocket server that behaves like a controller.
pub struct MockController {
    addr: SocketAddr,
    shared: Arc<Shared>,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    accept_task: JoinHandle<()>,
}

impl MockController {
    /// Bind an ephemeral loopback port and start accepting links.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            connected: Notify::new(),
        });
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared), frames_tx));

        Ok(Self {
            addr,
            shared,
            frames: tokio::sync::Mutex::new(frames_rx),
            accept_task,
        })
    }

    /// `host:port` suitable for `controller.endpoint`.
    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Number of links accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.state().connections.len()
    }

    /// When each link was accepted, oldest first.
    pub fn connection_times(&self) -> Vec<Instant> {
        self.shared.state().connections.clone()
    }

    /// Wait until at least `n` links have been accepted.
    pub async fn wait_for_connections(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.connected.notified();
            if self.connections() >= n {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    /// Next text frame received from the bridge, across all links.
    pub async fn next_frame(&self, timeout: Duration) -> Option<String> {
        let mut frames = self.frames.lock().await;
        tokio::time::timeout(timeout, frames.recv()).await.ok().flatten()
    }

    /// Send a text frame on the current link. Returns `false` if there is
    /// no open link.
    pub fn push_text(&self, text: &str) -> bool {
        self.shared
            .state()
            .current
            .as_ref()
            .is_some_and(|tx| tx.send(Outbound::Text(text.to_string())).is_ok())
    }

    /// Close the current link's TCP stream without a close handshake.
    pub fn drop_connection(&self) -> bool {
        self.shared
            .state()
            .current
            .take()
            .is_some_and(|tx| tx.send(Outbound::Drop).is_ok())
    }

    /// Stop accepting and drop the current link.
    pub fn stop(&self) {
        self.accept_task.abort();
        self.drop_connection();
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    frames_tx: mpsc::UnboundedSender<String>,
) {
    while let Ok((stream, peer)) = listener.accept().await {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "Mock controller handshake failed");
                continue;
            }
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        {
            let mut state = shared.state();
            state.connections.push(Instant::now());
            state.current = Some(out_tx);
        }
        shared.connected.notify_waiters();
        tracing::debug!(%peer, "Mock controller accepted link");

        tokio::spawn(serve_link(ws, out_rx, frames_tx.clone()));
    }
}

async fn serve_link(
    ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    frames_tx: mpsc::UnboundedSender<String>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = frames_tx.send(text);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Dropping both halves closes the socket abruptly.
                Some(Outbound::Drop) | None => break,
            },
        }
    }
}

/// Accepts TCP connections and holds them open without ever completing a
/// WebSocket handshake.
pub struct StallingListener {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StallingListener {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Ok(Self { addr, task })
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for StallingListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
