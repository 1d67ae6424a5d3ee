//! `/realtime` WebSocket: forwards change events to one client until either
//! side goes away.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::api::routes::ApiState;
use crate::types::ChangeEvent;

pub async fn realtime_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    let rx = state.realtime.subscribe();
    ws.on_upgrade(move |socket| forward_changes(socket, rx))
}

async fn forward_changes(mut socket: WebSocket, mut rx: broadcast::Receiver<ChangeEvent>) {
    debug!("Realtime subscriber connected");
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!("Skipping unserializable change event: {e}");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Realtime subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Realtime subscriber disconnected");
}
