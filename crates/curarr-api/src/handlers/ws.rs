// SPDX-License-Identifier: GPL-3.0-or-later
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::debug;

use crate::ApiState;

/// Subscribe to the realtime event stream. Frames are forwarded verbatim as
/// serialized by the broadcaster; the socket is write-only from the engine's
/// perspective.
pub async fn ws_subscribe(
    State(state): State<ApiState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| forward_events(socket, state))
}

async fn forward_events(mut socket: WebSocket, state: ApiState) {
    let mut rx = state.hub.subscribe();
    debug!(target: "api", "websocket subscriber connected");
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    // Lagged subscribers just miss frames; the stream goes on.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Inbound frames are ignored; the bus is publish-only.
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }
    debug!(target: "api", "websocket subscriber disconnected");
}
