//! Chat WebSocket: relays turn progress to the browser as it happens.
//!
//! Client → server: `{"type": "message", "content": "..."}`.
//! Server → client: `thinking`, `tool_call`, `tool_result`, `response`,
//! and `error` frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::coordinator::OnboardingCoordinator;
use super::routes::AppState;
use crate::error::Error;
use crate::session::SessionKey;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "message")]
    Message { content: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "error")]
    Error { message: String },
}

pub(super) async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Response {
    let key = SessionKey::new(user_id, session_id);
    if state.coordinator.store().existing(&key).await.is_none() {
        return Error::SessionNotFound {
            user_id: key.user_id,
            session_id: key.session_id,
        }
        .into_response();
    }

    info!(session = %key, "Chat client connecting");
    ws.on_upgrade(move |socket| handle_chat_socket(socket, state, key))
}

async fn handle_chat_socket(mut socket: WebSocket, state: AppState, key: SessionKey) {
    info!(session = %key, "Chat client connected");

    while let Some(result) = socket.recv().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Message { content }) => {
                    if !run_turn(&mut socket, &state.coordinator, &key, content).await {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, text = %text, "Invalid JSON from chat client");
                    let reply = ServerMessage::Error {
                        message: "Expected {\"type\": \"message\", \"content\": ...}".into(),
                    };
                    if send_json(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            },
            Ok(Message::Ping(data)) => {
                if socket.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(error = %e, "Chat WebSocket error");
                break;
            }
            _ => {}
        }
    }

    info!(session = %key, "Chat connection closed");
}

/// Run one chat turn, forwarding its events. Returns `false` once the
/// client is gone.
async fn run_turn(
    socket: &mut WebSocket,
    coordinator: &OnboardingCoordinator,
    key: &SessionKey,
    content: String,
) -> bool {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let turn = async move {
        let result = coordinator.chat(key, &content, Some(&tx)).await;
        drop(tx);
        result
    };
    let relay = async {
        let mut connected = true;
        while let Some(event) = rx.recv().await {
            if connected && send_json(socket, &event).await.is_err() {
                debug!("Chat client disconnected during turn");
                connected = false;
            }
        }
        connected
    };

    let (result, connected) = tokio::join!(turn, relay);
    if !connected {
        return false;
    }
    match result {
        Ok(_) => true,
        Err(e) => {
            let reply = ServerMessage::Error {
                message: e.user_message(),
            };
            send_json(socket, &reply).await.is_ok()
        }
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, msg: &T) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "Failed to serialize chat frame");
            Ok(())
        }
    }
}
