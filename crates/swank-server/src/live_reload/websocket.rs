//! WebSocket handler for live reload.
//!
//! Forwards reload messages to one browser and answers the livereload
//! `hello` handshake.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};

use super::notifier::{NotifierState, ReloadMessage};

/// Protocol advertised in the handshake reply.
const PROTOCOL: &str = "http://livereload.com/protocols/official-7";

/// Handle WebSocket upgrade for live reload.
pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<NotifierState>,
) -> impl IntoResponse {
    // Subscribe now so changes during the upgrade are not missed
    let receiver = state.sender.subscribe();
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, receiver, shutdown))
}

/// Handle an established WebSocket connection.
async fn handle_socket(
    mut socket: WebSocket,
    mut receiver: broadcast::Receiver<ReloadMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Reload subscriber connected");

    loop {
        tokio::select! {
            result = receiver.recv() => {
                match result {
                    Ok(message) => {
                        let Ok(text) = serde_json::to_string(&message) else {
                            continue;
                        };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Reload subscriber lagged");
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if is_hello(&text)
                            && socket.send(Message::Text(hello_reply().into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            () = stopped(&mut shutdown) => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::debug!("Reload subscriber disconnected");
}

/// Resolve once the notifier is stopping.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// Check whether a client message is the livereload handshake.
fn is_hello(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| value.get("command").and_then(Value::as_str).map(|c| c == "hello"))
        .unwrap_or(false)
}

fn hello_reply() -> String {
    json!({
        "command": "hello",
        "protocols": [PROTOCOL],
        "serverName": "swank",
    })
    .to_string()
}
