use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use herald_core::error::CoreError;
use herald_core::types::DbId;
use herald_delivery::session::Authorization;
use herald_delivery::{SessionMessage, SessionRegistry};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: String,
}

/// GET /ws?token=<jwt>
///
/// Credentials are checked before the upgrade; a rejected token answers 401
/// and no connection is registered.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let user_id = match state.authorizer.authorize(&params.token) {
        Authorization::Authorized(user_id) => user_id,
        Authorization::Unauthorized(reason) => {
            tracing::debug!(reason = %reason, "WebSocket upgrade rejected");
            return Err(AppError::Core(CoreError::Unauthorized(reason)));
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    let sessions = Arc::clone(&state.sessions);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, sessions, user_id)))
}

/// Translate a registry message into a WebSocket frame.
///
/// Returns `None` for events that cannot be serialized; they are logged and
/// dropped.
pub fn frame_for(message: SessionMessage) -> Option<Message> {
    match message {
        SessionMessage::Event(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize real-time event");
                None
            }
        },
        SessionMessage::Ping => Some(Message::Ping(Bytes::new())),
        SessionMessage::Close => Some(Message::Close(Some(CloseFrame {
            code: close_code::AWAY,
            reason: Utf8Bytes::from_static("server shutting down"),
        }))),
    }
}

/// Manage a single WebSocket connection after upgrade.
///
/// Attaches to the registry, forwards registry messages to the socket on a
/// spawned task, reads inbound frames until the peer leaves, then detaches.
async fn handle_socket(socket: WebSocket, sessions: Arc<SessionRegistry>, user_id: DbId) {
    let attachment = sessions.attach(user_id);
    let conn_id = attachment.conn_id;
    let mut rx = attachment.receiver;
    tracing::info!(user_id, conn_id = %conn_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, SessionMessage::Close);
            let Some(frame) = frame_for(message) else {
                continue;
            };
            if sink.send(frame).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    sessions.detach(user_id, conn_id);
    send_task.abort();
    tracing::info!(user_id, conn_id = %conn_id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use herald_delivery::RealtimeEvent;

    use super::*;

    #[test]
    fn unread_count_becomes_json_text() {
        let frame = frame_for(SessionMessage::Event(RealtimeEvent::UnreadCount { count: 4 }));
        let Some(Message::Text(text)) = frame else {
            panic!("expected a text frame, got {frame:?}");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["type"], "unread_count");
        assert_eq!(json["count"], 4);
    }

    #[test]
    fn heartbeat_and_close_map_to_control_frames() {
        assert_matches!(frame_for(SessionMessage::Ping), Some(Message::Ping(_)));
        assert_matches!(
            frame_for(SessionMessage::Close),
            Some(Message::Close(Some(frame))) if frame.code == close_code::AWAY
        );
    }
}
