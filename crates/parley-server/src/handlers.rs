//! Connection handlers for Parley server.
//!
//! This module handles the connection lifecycle and frame processing. Each
//! socket task owns one hub queue: events fanned out by the engine and the
//! acknowledgments of its own requests both flow through that queue, so the
//! client sees them in the order they were produced.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parley_core::{Handshake, SessionCoordinator};
use parley_protocol::{codec, ClientEnvelope, Encoding, ServerEvent, ServerFrame};
use parley_transport::{ConnectionId, Hub};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat engine.
    pub coordinator: Arc<SessionCoordinator>,
    /// Connection and room registry.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(Hub::new());
        let mut coordinator = SessionCoordinator::new(config.chat.clone(), hub.clone());
        if !config.auth.tokens.is_empty() {
            coordinator = coordinator.with_authenticator(Arc::new(config.auth.authenticator()));
        } else if config.chat.enable_authentication {
            warn!("Authentication is enabled but no tokens are configured; every login will fail");
        }

        Self {
            coordinator: Arc::new(coordinator),
            hub,
            config,
        }
    }
}

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub username: Option<String>,
    pub avatar: Option<String>,
    /// `binary` selects length-prefixed MessagePack for frames pushed before
    /// the client's first request.
    #[serde(default)]
    pub encoding: Option<String>,
}

impl ConnectParams {
    fn encoding(&self) -> Encoding {
        match self.encoding.as_deref() {
            Some("binary" | "msgpack") => Encoding::Binary,
            _ => Encoding::Text,
        }
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, build_app(state)).await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let path = config.transport.websocket_path.clone();
    let state = Arc::new(AppState::new(config));
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, path);

    serve(listener, state).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": state.coordinator.stats(),
        "rooms": hub.room_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let limits = &state.config.limits;
    if state.hub.stats().connection_count >= limits.max_connections {
        warn!(max = limits.max_connections, "Connection limit reached");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let max_message_size = limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, params))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, params: ConnectParams) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    // Replies follow the kind of the most recent inbound frame.
    let mut encoding = params.encoding();
    debug!(connection = %connection_id, ?encoding, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut outbound = state.hub.register(connection_id.clone());

    state.coordinator.connect(
        &connection_id,
        Handshake {
            username: params.username,
            avatar: params.avatar,
        },
    );
    update_population(&state);

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            // Frames queued for this connection by the engine
            Some(frame) = outbound.recv() => {
                if send_frame(&mut sender, &frame, encoding).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_frame(text.len(), "inbound");
                        encoding = Encoding::Text;
                        match codec::decode_text(&text) {
                            Ok(envelope) => handle_envelope(&state, &connection_id, envelope).await,
                            Err(e) => reject_frame(&state, &connection_id, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_frame(data.len(), "inbound");
                        encoding = Encoding::Binary;
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEnvelope>(&mut read_buffer) {
                                Ok(Some(envelope)) => {
                                    handle_envelope(&state, &connection_id, envelope).await;
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    // The stream is out of sync; drop what we have.
                                    read_buffer.clear();
                                    reject_frame(&state, &connection_id, &e);
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.coordinator.disconnect(&connection_id);
    state.hub.unregister(&connection_id);
    update_population(&state);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Run one client request through the engine and queue its acknowledgment.
async fn handle_envelope(state: &Arc<AppState>, connection_id: &ConnectionId, envelope: ClientEnvelope) {
    let start = Instant::now();
    let ack = state
        .coordinator
        .handle_envelope(connection_id, &envelope)
        .await;
    metrics::record_event(&envelope.event, ack.success, start.elapsed().as_secs_f64());
    update_population(state);

    if let Some(id) = envelope.ack {
        if let Err(e) = state.hub.send(connection_id, ServerFrame::ack(id, ack)) {
            debug!(connection = %connection_id, error = %e, "Dropped acknowledgment");
        }
    }
}

fn reject_frame(state: &AppState, connection_id: &ConnectionId, err: &codec::ProtocolError) {
    warn!(connection = %connection_id, error = %err, "Undecodable frame");
    metrics::record_error("decode");
    let event = ServerEvent::error(format!("Invalid frame: {err}"));
    if let Err(e) = state.hub.send(connection_id, event.into()) {
        debug!(connection = %connection_id, error = %e, "Dropped error event");
    }
}

fn update_population(state: &AppState) {
    metrics::set_population(
        state.coordinator.presence().online_count(),
        state.hub.stats().room_count,
    );
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
    encoding: Encoding,
) -> Result<()> {
    let message = match encoding {
        Encoding::Text => Message::Text(codec::encode_text(frame)?),
        Encoding::Binary => Message::Binary(codec::encode_binary(frame)?.to_vec()),
    };
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_frame(len, "outbound");
    sender.send(message).await?;
    Ok(())
}
