//! [`CockpitServer`] – HTTP control endpoints and the WebSocket state feed.
//!
//! Listens on `0.0.0.0:8000` (configurable via [`CockpitServer::with_port`]).
//!
//! * `Upgrade: websocket` on `/ws` → state stream for one subscriber.
//! * Anything else → one HTTP request routed by [`route`], then close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use urbridge_runtime::{LifecycleController, StartOutcome, StopOutcome, set_digital_output};
use urbridge_types::{BridgeError, DigitalOutputRequest};

use crate::http::{HttpRequest, HttpResponse, read_request};

/// Default TCP port for the HTTP/WebSocket server.
pub const DEFAULT_PORT: u16 = 8000;

/// Default upper bound on one WebSocket frame write.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP + WebSocket front end over a [`LifecycleController`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use urbridge_cockpit::CockpitServer;
/// use urbridge_hal::SimConnector;
/// use urbridge_runtime::{LifecycleController, MonitorConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let lifecycle = Arc::new(LifecycleController::new(
///         Arc::new(SimConnector::new()),
///         MonitorConfig::default(),
///     ));
///     CockpitServer::new(lifecycle).run().await.expect("server failed");
/// }
/// ```
pub struct CockpitServer {
    lifecycle: Arc<LifecycleController>,
    port: u16,
    send_timeout: Duration,
}

impl CockpitServer {
    pub fn new(lifecycle: Arc<LifecycleController>) -> Self {
        Self {
            lifecycle,
            port: DEFAULT_PORT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bound how long a single WebSocket send may take before the
    /// subscriber is dropped.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), BridgeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve connections accepted from `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), BridgeError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "urbridge listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let lifecycle = Arc::clone(&self.lifecycle);
                    let send_timeout = self.send_timeout;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, lifecycle, send_timeout).await {
                            debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-connection dispatch
// ────────────────────────────────────────────────────────────────────────────

/// What the first bytes of a connection ask for.
#[derive(Debug, PartialEq, Eq)]
enum Upgrade {
    None,
    WebSocket { path: String },
}

fn detect_upgrade(preview: &str) -> Upgrade {
    let is_ws = preview.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });
    if !is_ws {
        return Upgrade::None;
    }
    let path = preview
        .lines()
        .next()
        .and_then(|request_line| request_line.split_whitespace().nth(1))
        .map(|target| target.split('?').next().unwrap_or(target).to_string())
        .unwrap_or_default();
    Upgrade::WebSocket { path }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    lifecycle: Arc<LifecycleController>,
    send_timeout: Duration,
) -> Result<(), BridgeError> {
    // Peek so the WebSocket handshake still sees the whole request.
    let mut buf = [0u8; 2048];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| BridgeError::Transport(format!("peek error from {peer}: {e}")))?;

    match detect_upgrade(&String::from_utf8_lossy(&buf[..n])) {
        Upgrade::WebSocket { path } if path == "/ws" => {
            handle_ws(stream, peer, lifecycle, send_timeout).await
        }
        Upgrade::WebSocket { path } => {
            write_response(&mut stream, &HttpResponse::error(404, &format!("no WebSocket at {path}"))).await
        }
        Upgrade::None => {
            let response = match read_request(&mut stream).await {
                Ok(request) => {
                    let response = route(&lifecycle, &request).await;
                    debug!(%peer, method = %request.method, path = %request.path, status = response.status, "http");
                    response
                }
                Err(e) => HttpResponse::error(400, &e.to_string()),
            };
            write_response(&mut stream, &response).await
        }
    }
}

async fn write_response(stream: &mut TcpStream, response: &HttpResponse) -> Result<(), BridgeError> {
    stream
        .write_all(&response.to_bytes())
        .await
        .map_err(|e| BridgeError::Transport(format!("HTTP write error: {e}")))?;
    let _ = stream.shutdown().await;
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP routes
// ────────────────────────────────────────────────────────────────────────────

pub(crate) async fn route(lifecycle: &LifecycleController, request: &HttpRequest) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", _) => HttpResponse::no_content(),
        ("POST", "/start") => match lifecycle.start().await {
            Ok(StartOutcome::Started) => HttpResponse::status(200, "started", "Started monitoring runtime state"),
            Ok(StartOutcome::AlreadyRunning) => {
                HttpResponse::status(200, "already_running", "Monitoring is already running")
            }
            Err(e) => HttpResponse::error(502, &format!("Failed to connect to controller: {e}")),
        },
        ("POST", "/stop") => match lifecycle.stop().await {
            StopOutcome::Stopped(exit) => {
                HttpResponse::status(200, "stopped", &format!("Stopped monitoring runtime state ({exit})"))
            }
            StopOutcome::NotRunning => HttpResponse::status(200, "not_running", "Monitoring is not running"),
        },
        ("GET", "/state") => HttpResponse::json(200, &lifecycle.store().snapshot()),
        ("GET", "/health") => HttpResponse::json(200, &lifecycle.health()),
        ("POST", "/set-digital-output") => digital_output(lifecycle, &request.body).await,
        (_, "/start" | "/stop" | "/state" | "/health" | "/set-digital-output") => {
            HttpResponse::error(405, &format!("{} not allowed on {}", request.method, request.path))
        }
        _ => HttpResponse::error(404, &format!("no route for {} {}", request.method, request.path)),
    }
}

async fn digital_output(lifecycle: &LifecycleController, body: &[u8]) -> HttpResponse {
    let request: DigitalOutputRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return HttpResponse::error(400, &format!("invalid request body: {e}")),
    };
    match set_digital_output(lifecycle, request).await {
        Ok(_) => HttpResponse::json(200, &serde_json::json!({ "status": "success" })),
        Err(e) => HttpResponse::error(command_status(&e), &e.to_string()),
    }
}

fn command_status(error: &BridgeError) -> u16 {
    match error {
        BridgeError::InvalidCommand(_) => 400,
        BridgeError::NotRunning => 409,
        BridgeError::Timeout(_) => 504,
        _ => 502,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// WebSocket: state feed
// ────────────────────────────────────────────────────────────────────────────

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    lifecycle: Arc<LifecycleController>,
    send_timeout: Duration,
) -> Result<(), BridgeError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| BridgeError::Transport(format!("WS handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Register before reading the current state so no update falls between.
    let registry = Arc::clone(lifecycle.registry());
    let mut subscription = registry.register();
    let id = subscription.id();
    info!(%peer, subscriber = %id, "subscriber connected");

    let result = async {
        let mut last_sent = 0;
        if let Some(current) = lifecycle.store().current_message() {
            last_sent = current.sequence;
            send_json(&mut ws_tx, &current, send_timeout).await?;
        }

        loop {
            tokio::select! {
                update = subscription.recv() => match update {
                    Some(message) if message.sequence <= last_sent => {}
                    Some(message) => {
                        last_sent = message.sequence;
                        send_json(&mut ws_tx, &*message, send_timeout).await?;
                    }
                    None => {
                        warn!(%peer, subscriber = %id, "subscriber fell behind; closing");
                        return Ok(());
                    }
                },
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(BridgeError::Transport(format!("WS read from {peer}: {e}"))),
                    Some(Ok(_)) => {}
                },
            }
        }
    }
    .await;

    registry.unregister(id);
    let _ = ws_tx.close().await;
    info!(%peer, subscriber = %id, "subscriber disconnected");
    result
}

async fn send_json<S, T>(sink: &mut S, value: &T, timeout: Duration) -> Result<(), BridgeError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    T: Serialize,
{
    let json = serde_json::to_string(value).map_err(|e| BridgeError::Serialization(e.to_string()))?;
    match tokio::time::timeout(timeout, sink.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BridgeError::Transport(format!("WS send failed: {e}"))),
        Err(_) => Err(BridgeError::Timeout(format!("WS send exceeded {timeout:?}"))),
    }
}
