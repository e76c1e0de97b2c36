//! WebSocket connection handler.
//!
//! Each accepted socket gets:
//! - a registry entry and a bounded outbound queue
//! - a writer task that owns the sink and drains the queue in order
//! - a reader loop that feeds frames to the dispatcher in arrival order
//!
//! When either side ends, the connection is removed from the registry.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionId, EventReceiver};
use crate::message::OutboundEvent;
use crate::state::GatewayState;

/// Query parameters for WebSocket connection.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Optional credential for authentication at accept time
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.ws_config().max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, query.token, state))
}

/// Handles one WebSocket connection from accept to close.
async fn handle_socket(socket: WebSocket, token: Option<String>, state: Arc<GatewayState>) {
    let (tx, rx) = mpsc::channel(state.ws_config().max_queue_size);
    let conn_id = state.registry().add(tx);
    info!(%conn_id, "New WebSocket connection");

    state
        .broadcaster()
        .send(
            conn_id,
            OutboundEvent::welcome(state.ws_config().welcome_message.clone()),
        )
        .await;

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut send_task = tokio::spawn(write_loop(conn_id, ws_sender, rx));

    if let Some(token) = token.as_deref().filter(|token| !token.is_empty()) {
        state
            .dispatcher()
            .handshake()
            .authenticate_on_accept(conn_id, token)
            .await;
    }

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let Some(result) = frame else {
                    break;
                };
                match result {
                    Ok(Message::Text(text)) => {
                        state.dispatcher().dispatch(conn_id, text.as_str()).await;
                    }
                    Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                        Ok(text) => state.dispatcher().dispatch(conn_id, text).await,
                        Err(e) => warn!(%conn_id, error = %e, "Dropping non UTF-8 binary frame"),
                    },
                    Ok(Message::Ping(_)) => {
                        debug!(%conn_id, "Received ping");
                        state.registry().touch(conn_id);
                    }
                    Ok(Message::Pong(_)) => {
                        debug!(%conn_id, "Received pong");
                        state.registry().touch(conn_id);
                    }
                    Ok(Message::Close(_)) => {
                        info!(%conn_id, "WebSocket close requested");
                        break;
                    }
                    Err(e) => {
                        error!(%conn_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            _ = &mut send_task => {
                debug!(%conn_id, "Writer finished");
                break;
            }
        }
    }

    // Cleanup
    let info = state.registry().remove(conn_id);
    info!(
        %conn_id,
        user_id = ?info.as_ref().and_then(|info| info.subject.as_ref()).map(ToString::to_string),
        "WebSocket connection closed"
    );
    send_task.abort();
}

/// Forwards queued events to the socket until the queue closes or a write fails.
async fn write_loop<S>(conn_id: ConnectionId, mut sink: S, mut rx: EventReceiver)
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(event) = rx.recv().await {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(%conn_id, error = %e, "Failed to serialize event");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            debug!(%conn_id, error = %e, "Socket write failed");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
