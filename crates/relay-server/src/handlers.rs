//! Connection handlers for the relay server.
//!
//! This module handles the HTTP routes and the lifecycle of each WebSocket
//! connection: handshake, the event loop, and teardown.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::upstream::{self, HttpAuthenticator, HttpChatDirectory};
use anyhow::Result;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use dirc_relay_core::{
    authenticate, bootstrap, close_code, Authenticator, ChatDirectory, Dispatcher,
    HandshakeError, HandshakeParams, Hub, Outbound, Session,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Shared server state.
pub struct AppState {
    /// Connections and memberships.
    pub hub: Arc<Hub>,
    /// Authentication service.
    pub auth: Arc<dyn Authenticator>,
    /// Chat-management service.
    pub chats: Arc<dyn ChatDirectory>,
    /// Side-effect dispatcher.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state backed by the HTTP upstream services in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or an upstream URL
    /// is invalid.
    pub fn new(config: Config) -> Result<Self> {
        let client = upstream::build_client(config.upstream.request_timeout())?;
        let auth = HttpAuthenticator::new(client.clone(), &config.upstream.auth_url)?;
        let chats = HttpChatDirectory::new(client, &config.upstream.chats_url)?;

        Ok(Self::with_services(config, Arc::new(auth), Arc::new(chats)))
    }

    /// Create app state with the given service implementations.
    #[must_use]
    pub fn with_services(
        config: Config,
        auth: Arc<dyn Authenticator>,
        chats: Arc<dyn ChatDirectory>,
    ) -> Self {
        let dispatcher =
            Dispatcher::new().with_failure_hook(Arc::new(metrics::record_side_effect_failure));

        Self {
            hub: Arc::new(Hub::with_capacity(config.limits.max_connections)),
            auth,
            chats,
            dispatcher,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );
    info!(
        auth = %config.upstream.auth_url,
        chats = %config.upstream.chats_url,
        "Upstream services"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Live relay statistics.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(serde_json::json!({
        "connections": stats.connections,
        "chats": stats.chats,
        "memberships": stats.memberships,
        "side_effects": {
            "dispatched": state.dispatcher.dispatched(),
            "failed": state.dispatcher.failures(),
        }
    }))
}

/// WebSocket upgrade handler.
///
/// The handshake runs after the upgrade so that refusals reach the client as
/// a close frame with a reason.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, params, state))
}

/// Handle a WebSocket connection from upgrade to close.
async fn handle_websocket(mut socket: WebSocket, params: HandshakeParams, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    debug!(user = ?params.username, "New connection");

    let (session, outbound) = match handshake(params, &state).await {
        Ok(opened) => opened,
        Err(e) => {
            reject(&mut socket, e).await;
            return;
        }
    };

    metrics::set_active_chats(state.hub.stats().chats);

    let span = info_span!(
        "connection",
        user = %session.username(),
        connection = %session.connection_id()
    );
    run_connection(socket, session, outbound, &state)
        .instrument(span)
        .await;

    metrics::set_active_chats(state.hub.stats().chats);
}

/// Authenticate, bootstrap and admit a connection.
///
/// Capacity is enforced at admission so that concurrent handshakes cannot
/// overshoot it and a reconnect never needs a free slot.
async fn handshake(
    params: HandshakeParams,
    state: &AppState,
) -> Result<(Session, mpsc::UnboundedReceiver<Outbound>), HandshakeError> {
    let credentials = authenticate(params, state.auth.as_ref()).await?;
    let memberships = bootstrap(
        &credentials,
        state.chats.as_ref(),
        state.config.upstream.bootstrap_policy(),
    )
    .await?;

    let (session, outbound) = Session::open(
        credentials,
        &memberships,
        Arc::clone(&state.hub),
        Arc::clone(&state.chats),
        state.dispatcher.clone(),
    )?;
    Ok((
        session.with_max_event_size(state.config.limits.max_message_size),
        outbound,
    ))
}

/// Close a refused connection with the error's code and reason.
async fn reject(socket: &mut WebSocket, error: HandshakeError) {
    metrics::record_handshake_rejection(error.kind());
    info!(reason = %error, code = error.close_code(), "Refusing connection");

    let frame = CloseFrame {
        code: error.close_code(),
        reason: error.to_string().into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Failed to send close frame");
    }
}

/// The per-connection event loop.
///
/// Runs until the client closes, the socket errors, the connection is
/// superseded, or it goes silent past the heartbeat timeout. The session is
/// dropped on return, which tears down its state.
async fn run_connection(
    socket: WebSocket,
    session: Session,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    state: &AppState,
) {
    let (mut sender, mut receiver) = socket.split();

    let heartbeat = state.config.heartbeat.interval();
    let idle_timeout = state.config.heartbeat.timeout();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;

            // Frames queued by broadcasts or by the hub
            frame = outbound.recv() => {
                match frame {
                    Some(Outbound::Event(text)) => {
                        metrics::record_bytes(text.len(), "outbound");
                        if sender.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        info!(code, reason = %reason, "Closing connection");
                        close(&mut sender, code, reason.into_owned()).await;
                        break;
                    }
                    None => break,
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        handle_inbound(&session, text.as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        handle_inbound(&session, &data);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if last_seen.elapsed() > idle_timeout {
                    info!("Heartbeat timeout");
                    close(&mut sender, close_code::NORMAL, "heartbeat timeout".to_string()).await;
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(session);
    debug!("WebSocket disconnected");
}

/// Process one inbound frame, recording metrics.
fn handle_inbound(session: &Session, data: &[u8]) {
    let start = Instant::now();
    metrics::record_bytes(data.len(), "inbound");

    match session.handle_frame(data) {
        Some((action, recipients)) => metrics::record_event(action.as_str(), recipients),
        None => metrics::record_error("malformed_event"),
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

async fn close(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: String) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = sender.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Failed to send close frame");
    }
}
