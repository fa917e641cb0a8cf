//! Connection handlers for the Beacon server.
//!
//! This module handles the connection lifecycle and message processing.
//! Every lifecycle decision is delegated to the coordinator; the handler
//! only parses client messages and pumps the outbound queue.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::transport::{OutboundMessage, WsTransport};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use beacon_core::{ChannelCoordinator, ChannelKind, ConnectionId, ConnectionInfo, JoinOutcome};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The lifecycle coordinator.
    pub coordinator: Arc<ChannelCoordinator>,
    /// The socket registry behind the coordinator's transport seam.
    pub transport: Arc<WsTransport>,
    /// Server configuration.
    pub config: Config,
}

/// A message from a connected client.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    /// Event name: `subscribe`, `unsubscribe`, or a client event.
    event: String,
    /// Channel the message concerns.
    #[serde(default)]
    channel: Option<String>,
    /// Auth payload forwarded to the application server on subscribe.
    #[serde(default)]
    auth: Option<String>,
    /// Event payload.
    #[serde(default)]
    data: Option<Value>,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let app = Router::new()
        .route(&state.config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&state));

    let addr = state.config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
///
/// The upgrade request's headers are captured here; they are the
/// connection-scoped context forwarded on auth and webhook calls.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let conn = connection_info(&headers);
    ws.on_upgrade(move |socket| handle_websocket(socket, state, conn))
}

/// Build the connection context from the upgrade request.
fn connection_info(headers: &HeaderMap) -> ConnectionInfo {
    let id = ConnectionId::new(format!(
        "socket_{:x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    ));

    let mut conn = ConnectionInfo::new(id);
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            conn.request_headers
                .insert(name.as_str().to_string(), value.to_string());
        }
    }
    if let Some(authorization) = conn.request_headers.get("authorization") {
        conn.auth_headers
            .insert("Authorization".to_string(), authorization.clone());
    }

    conn
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, conn: ConnectionInfo) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    debug!(connection = %conn.id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Outbound queue; the transport delivers through it.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<OutboundMessage>();
    state.transport.register(conn.id.clone(), tx);
    state
        .transport
        .send(&conn.id, OutboundMessage::connection_established(&conn.id));

    loop {
        tokio::select! {
            biased;

            Some(message) = rx.recv() => {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(connection = %conn.id, error = %err, "Failed to encode outbound message");
                    }
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => handle_message(message, &conn, &state).await,
                            Err(err) => {
                                warn!(connection = %conn.id, error = %err, "Unparseable client message");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        warn!(connection = %conn.id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %conn.id, "Received close frame");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(connection = %conn.id, error = %err, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %conn.id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Settle every subscription before the socket registry forgets the
    // connection, so leave webhooks fire for last-tab disconnects.
    state.coordinator.disconnect(&conn).await;
    state.transport.unregister(&conn.id);
    metrics::set_presence_members(state.coordinator.registry().total_members());

    debug!(
        connection = %conn.id,
        active = state.transport.connection_count(),
        "WebSocket disconnected"
    );
}

/// Handle one parsed client message.
async fn handle_message(message: ClientMessage, conn: &ConnectionInfo, state: &Arc<AppState>) {
    match message.event.as_str() {
        "subscribe" => {
            let Some(channel) = message.channel else {
                warn!(connection = %conn.id, "Subscribe without channel");
                return;
            };

            match state
                .coordinator
                .join(conn, &channel, message.auth.as_deref())
                .await
            {
                JoinOutcome::Joined { kind, members, .. } => {
                    metrics::record_join(kind_label(kind));
                    metrics::set_presence_members(state.coordinator.registry().total_members());

                    let data = match members {
                        Some(members) => serde_json::json!({ "members": members }),
                        None => serde_json::json!({}),
                    };
                    state
                        .transport
                        .send(&conn.id, OutboundMessage::subscription_succeeded(&channel, data));
                }
                JoinOutcome::Rejected { status, .. } => {
                    // The coordinator already notified the connection.
                    metrics::record_auth_denied();
                    debug!(connection = %conn.id, channel = %channel, status, "Subscription rejected");
                }
            }
        }

        "unsubscribe" => {
            let Some(channel) = message.channel else {
                warn!(connection = %conn.id, "Unsubscribe without channel");
                return;
            };

            state.coordinator.leave(conn, &channel).await;
            metrics::record_leave();
            metrics::set_presence_members(state.coordinator.registry().total_members());
        }

        _ => {
            let Some(channel) = message.channel else {
                warn!(connection = %conn.id, event = %message.event, "Client event without channel");
                return;
            };

            let payload = message.data.unwrap_or(Value::Null);
            if state
                .coordinator
                .client_event(conn, &channel, &message.event, &payload)
                .await
            {
                metrics::record_client_event();
            }
        }
    }
}

fn kind_label(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Public => "public",
        ChannelKind::Private => "private",
        ChannelKind::Presence => "presence",
    }
}
