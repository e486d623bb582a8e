//! WebSocket server connecting clients to the matchmaker
//!
//! Each connection is identified by the `user_id` query parameter. Outbound
//! events flow from the user's registry channel through a writer task; inbound
//! frames are decoded and dispatched to the matchmaker in order.

use crate::error::{MatchmakingError, Result};
use crate::matchmaking::Matchmaker;
use crate::transport::messages::FrameCodec;
use crate::types::{ClientMessage, EndReason, ServerEvent, UserId};
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
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// WebSocket server configuration
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6000,
        }
    }
}

/// Query parameters of the upgrade request
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user_id: UserId,
}

#[derive(Clone)]
struct WsServerState {
    matchmaker: Arc<Matchmaker>,
}

/// Server accepting client WebSocket connections
pub struct WsServer {
    config: WsServerConfig,
    state: WsServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl WsServer {
    pub fn new(config: WsServerConfig, matchmaker: Arc<Matchmaker>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: WsServerState { matchmaker },
            shutdown_tx,
        }
    }

    /// Serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| MatchmakingError::TransportError {
                message: format!(
                    "Invalid WebSocket server address {}:{}",
                    self.config.host, self.config.port
                ),
            })?;

        let app = self.create_router();
        let listener =
            TcpListener::bind(addr)
                .await
                .map_err(|e| MatchmakingError::TransportError {
                    message: format!("Failed to bind WebSocket listener on {}: {}", addr, e),
                })?;

        info!("WebSocket server listening on ws://{}/ws", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("WebSocket server shutdown signal received");
            })
            .await
            .map_err(|e| MatchmakingError::TransportError {
                message: format!("WebSocket server failed: {}", e),
            })?;

        info!("WebSocket server stopped");
        Ok(())
    }

    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping WebSocket server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to WebSocket server: {}", e);
        }
        Ok(())
    }
}

async fn ws_handler(
    Query(params): Query<ConnectParams>,
    State(state): State<WsServerState>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = params.user_id.trim().to_string();
    if user_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "user_id is required").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state.matchmaker))
}

/// Drive one client connection until either side closes it
async fn handle_socket(socket: WebSocket, user_id: UserId, matchmaker: Arc<Matchmaker>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let connection_id = match matchmaker.connect(&user_id, tx) {
        Ok(connection_id) => connection_id,
        Err(e) => {
            error!("Failed to register connection for user '{}': {}", user_id, e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let writer_user = user_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match FrameCodec::encode_server_event(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping event for user '{}': {}", writer_user, e);
                    continue;
                }
            };

            if sender.send(Message::Text(frame.into())).await.is_err() {
                debug!("Socket of user '{}' closed while sending", writer_user);
                break;
            }
        }
    });

    loop {
        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_text_frame(&matchmaker, &user_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Socket error for user '{}': {}", user_id, e);
                    break;
                }
            },
            // Channel replaced by a newer connection or the socket stopped accepting writes
            _ = &mut writer => break,
        }
    }

    writer.abort();

    if let Err(e) = matchmaker.disconnect(&user_id, connection_id).await {
        error!("Failed to clean up after user '{}' disconnected: {}", user_id, e);
    }
}

async fn handle_text_frame(matchmaker: &Matchmaker, user_id: &UserId, raw: &str) {
    let message = match FrameCodec::decode_client_message(raw) {
        Ok(message) => message,
        Err(e) => {
            warn!("Ignoring frame from user '{}': {}", user_id, e);
            return;
        }
    };

    if let Err(e) = dispatch(matchmaker, user_id, message).await {
        error!("Request from user '{}' failed: {}", user_id, e);
    }
}

/// Apply one client request to the matchmaker
pub async fn dispatch(matchmaker: &Matchmaker, user_id: &UserId, message: ClientMessage) -> Result<()> {
    match message {
        ClientMessage::Find => {
            if matchmaker.partner_of(user_id).await?.is_some() {
                debug!("User '{}' asked for a match while paired", user_id);
                return Ok(());
            }

            let accepted = matchmaker.request_match(user_id).await?;
            matchmaker
                .bridge()
                .notify(user_id, ServerEvent::Queued(accepted));

            if accepted {
                matchmaker.pair_next().await?;
            }
        }
        ClientMessage::Cancel => {
            matchmaker.cancel_request(user_id).await?;
        }
        ClientMessage::Finish => {
            matchmaker.end_match(user_id, EndReason::Finished).await?;
        }
        ClientMessage::Status => {
            let status = matchmaker.waiting_status(user_id).await?;
            matchmaker
                .bridge()
                .notify(user_id, ServerEvent::Status(status));
        }
        ClientMessage::Text(text) => {
            matchmaker.relay_text(user_id, &text).await?;
        }
    }

    Ok(())
}
