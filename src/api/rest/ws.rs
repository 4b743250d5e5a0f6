use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::rest::auth::header_token;
use crate::error::AppError;
use crate::realtime::CourierAuthenticator;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Authenticates before upgrading; an unknown credential never gets a socket.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = header_token(&headers)
        .map(str::to_string)
        .or(params.token)
        .ok_or_else(|| AppError::Unauthorized("missing credential".to_string()))?;

    let courier_id = state
        .tokens
        .authenticate(&token)
        .ok_or_else(|| AppError::Unauthorized("invalid credential".to_string()))?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, courier_id))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, courier_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let (registration, rx) = state.registry.connect(courier_id);
    let connection_id = registration.connection_id();

    state.metrics.live_connections.inc();
    info!(%courier_id, connection_id, "courier connected");

    let mut send_task = tokio::spawn(async move {
        let mut payloads = ReceiverStream::new(rx);
        while let Some(payload) = payloads.next().await {
            if sender.send(Message::Text(payload.to_string())).await.is_err() {
                break;
            }
        }
        // Channel closed by logout; tell the client before dropping the socket.
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(%courier_id, error = %err, "websocket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    drop(registration);
    state.metrics.live_connections.dec();
    debug!(%courier_id, connection_id, "channel released");
    info!(%courier_id, connection_id, "courier disconnected");
}
