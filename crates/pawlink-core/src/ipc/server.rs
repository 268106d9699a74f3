//! IPC server: axum HTTP router over a Unix domain socket.
//!
//! The daemon binds a Unix socket and exposes a JSON API for local
//! front-ends: send commands, follow the status stream, and inspect the
//! link and the daemon itself.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use futures_util::Stream;
use serde::Deserialize;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{debug, info};

use pawlink_config::AppConfig;

use super::types::*;
use crate::bridge::Bridge;
use crate::codec::StatusEvent;
use crate::daemon::ShutdownSignal;
use crate::error::BridgeError;
use crate::logging::LogReader;

/// Shared state accessible to all IPC route handlers.
pub struct IpcState {
    pub config: AppConfig,
    pub bridge: Arc<Bridge>,
    pub shutdown_tx: broadcast::Sender<ShutdownSignal>,
    pub logs: Option<LogReader>,
    pub started_at: Instant,
}

/// Default Unix socket path for daemon IPC.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/pawlink.sock";

/// Build the axum router with all IPC routes.
pub fn router(state: Arc<IpcState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/connection", get(handle_connection))
        .route("/command", post(handle_command))
        .route("/events", get(handle_events))
        .route("/logs", get(handle_logs))
        .route("/config", get(handle_config))
        .route("/stop", post(handle_stop))
        .fallback(handle_missing)
        .with_state(state)
}

/// Start the IPC server on the given Unix socket path.
///
/// Removes any stale socket file before binding. Runs until the
/// shutdown signal is received.
pub async fn serve(
    socket_path: PathBuf,
    state: Arc<IpcState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let listener = UnixListener::bind(&socket_path)?;
    info!(path = %socket_path.display(), "IPC server listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("IPC server shutting down");
        })
        .await?;

    std::fs::remove_file(&socket_path).ok();
    Ok(())
}

/// Resolve the socket path from config or use the default.
pub fn socket_path_from_config(config: &AppConfig) -> PathBuf {
    config
        .daemon
        .socket_path
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        build_profile: crate::build_info::BUILD_PROFILE.to_string(),
    })
}

async fn handle_status(State(state): State<Arc<IpcState>>) -> Json<StatusResponse> {
    let link = state.bridge.link_info();
    let last_activity_secs = link.last_activity.map(|at| {
        SystemTime::now()
            .duration_since(at)
            .map(|age| age.as_secs())
            .unwrap_or(0)
    });

    Json(StatusResponse {
        running: true,
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        endpoint: link.endpoint,
        link_state: link.state.to_string(),
        link_id: link.link_id,
        connect_attempts: link.attempts,
        last_activity_secs,
        front_ends: state.bridge.attached_front_ends(),
        log_level: state.config.logging.level.clone(),
        pid: std::process::id(),
    })
}

async fn handle_connection(State(state): State<Arc<IpcState>>) -> Json<ConnectionResponse> {
    let link = state.bridge.link_info();
    Json(ConnectionResponse {
        connected: state.bridge.is_connected(),
        state: link.state.to_string(),
        endpoint: link.endpoint,
    })
}

async fn handle_command(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<CommandRequest>,
) -> Json<CommandResponse> {
    debug!(command = %req.command, "Command requested via IPC");
    let response = match state.bridge.request_command(&req.command, req.params).await {
        Ok(accepted) => CommandResponse {
            accepted: true,
            link_id: Some(accepted.link_id),
            bytes: Some(accepted.bytes),
            reason: None,
            retryable: false,
        },
        Err(e) => CommandResponse {
            accepted: false,
            link_id: None,
            bytes: None,
            retryable: e.is_retryable(),
            reason: Some(e.to_string()),
        },
    };
    Json(response)
}

/// Stream status events as server-sent events until the client goes away.
///
/// Each connection is one front-end; closing it detaches the front-end.
async fn handle_events(
    State(state): State<Arc<IpcState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.bridge.subscribe();
    info!(front_end = %subscription.handle(), "Event stream opened");

    let stream = futures_util::stream::unfold(subscription, |mut sub| async move {
        let event = sub.recv().await?;
        Some((Ok(sse_event(&event)), sub))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(event: &StatusEvent) -> Event {
    let kind = match event {
        StatusEvent::Connected { .. } => "connected",
        StatusEvent::Disconnected { .. } => "disconnected",
        StatusEvent::Error { .. } => "error",
        StatusEvent::Payload { .. } => "payload",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(kind).data(data)
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn handle_logs(
    State(state): State<Arc<IpcState>>,
    Query(query): Query<LogsQuery>,
) -> Json<LogsResponse> {
    let Some(reader) = &state.logs else {
        return Json(LogsResponse {
            entries: Vec::new(),
            total: 0,
        });
    };
    let captured = match query.limit {
        Some(limit) => reader.tail(limit),
        None => reader.entries(),
    };
    Json(LogsResponse {
        entries: captured.iter().map(|e| e.to_entry()).collect(),
        total: reader.len(),
    })
}

async fn handle_config(
    State(state): State<Arc<IpcState>>,
) -> Result<Json<ConfigResponse>, (StatusCode, Json<ErrorResponse>)> {
    match toml::to_string_pretty(&state.config) {
        Ok(toml_str) => Ok(Json(ConfigResponse { toml: toml_str })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to serialize config: {e}"),
            }),
        )),
    }
}

async fn handle_stop(State(state): State<Arc<IpcState>>) -> (StatusCode, Json<StopResponse>) {
    info!("Stop requested via IPC");
    let _ = state.shutdown_tx.send(ShutdownSignal);
    (
        StatusCode::OK,
        Json(StopResponse {
            acknowledged: true,
            message: "Shutdown initiated".to_string(),
        }),
    )
}

async fn handle_missing(uri: Uri) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: BridgeError::AppTargetMissing(uri.path().to_string()).to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> Arc<IpcState> {
        let mut config = AppConfig::default();
        config.controller.endpoint = "127.0.0.1:1".to_string();
        config.controller.reconnect_delay_ms = 50;
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Arc::new(IpcState {
            bridge: Arc::new(Bridge::start(&config)),
            config,
            shutdown_tx,
            logs: None,
            started_at: Instant::now(),
        })
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router(test_state());
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let health: HealthResponse = body_json(resp).await;
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = router(test_state());
        let req = Request::get("/status").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let status: StatusResponse = body_json(resp).await;
        assert!(status.running);
        assert_eq!(status.endpoint, "127.0.0.1:1");
        assert_ne!(status.link_state, "connected");
        assert_eq!(status.link_id, None);
        assert_eq!(status.front_ends, 0);
        assert_eq!(status.log_level, "info");
    }

    #[tokio::test]
    async fn test_connection_endpoint() {
        let app = router(test_state());
        let req = Request::get("/connection").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let conn: ConnectionResponse = body_json(resp).await;
        assert!(!conn.connected);
    }

    #[tokio::test]
    async fn test_command_rejected_when_disconnected() {
        let app = router(test_state());
        let req = Request::post("/command")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"command":"status"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let outcome: CommandResponse = body_json(resp).await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.reason.as_deref(), Some("not connected"));
        assert!(outcome.retryable);
    }

    #[tokio::test]
    async fn test_invalid_command_is_not_retryable() {
        let app = router(test_state());
        let req = Request::post("/command")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"command":"move","params":{"direction":"sideways"}}"#,
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let outcome: CommandResponse = body_json(resp).await;
        assert!(!outcome.accepted);
        assert!(!outcome.retryable);
        assert!(outcome.reason.unwrap().starts_with("invalid command"));
    }

    #[tokio::test]
    async fn test_events_stream_delivers_connectivity_errors() {
        let state = test_state();
        let app = router(Arc::clone(&state));
        let req = Request::get("/events").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.bridge.attached_front_ends(), 1);

        let mut body = resp.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: error"), "unexpected frame: {text}");

        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let event: StatusEvent = serde_json::from_str(data).unwrap();
        assert!(matches!(event, StatusEvent::Error { .. }));

        drop(body);
        assert_eq!(state.bridge.attached_front_ends(), 0);
    }

    #[tokio::test]
    async fn test_logs_without_collector_is_empty() {
        let app = router(test_state());
        let req = Request::get("/logs?limit=10").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let logs: LogsResponse = body_json(resp).await;
        assert!(logs.entries.is_empty());
        assert_eq!(logs.total, 0);
    }

    #[tokio::test]
    async fn test_stop_endpoint() {
        let state = test_state();
        let mut rx = state.shutdown_tx.subscribe();
        let app = router(state);

        let req = Request::post("/stop").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let stop: StopResponse = body_json(resp).await;
        assert!(stop.acknowledged);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_config_endpoint() {
        let app = router(test_state());
        let req = Request::get("/config").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let config: ConfigResponse = body_json(resp).await;
        assert!(config.toml.contains("reconnect_delay_ms"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_missing_target() {
        let app = router(test_state());
        let req = Request::get("/front-ends/7").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let err: ErrorResponse = body_json(resp).await;
        assert_eq!(err.error, "no such target: /front-ends/7");
    }
}
