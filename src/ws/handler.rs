use std::sync::Arc;
use std::time::Instant;
use axum::{
    extract::{Path, Query, State, ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade}},
    http::HeaderMap,
    response::Response,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::auth::{AuthError, Identity};
use crate::models::{ClientMessage, ServerMessage};
use crate::services::auth_service::get_auth_token;
use super::hub::RoomHub;
use super::session::{close_code, Delivery, Outbound, SessionReplier};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket endpoint for one lesson: `/ws/lesson/:lesson_id`
pub async fn websocket_handler(
    Path(lesson_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("New WebSocket connection attempt for lesson {}", lesson_id);
    let token = get_auth_token(&headers, query.token.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, lesson_id, token, state))
}

/// Removes the connection's session when the connection ends, however it ends.
struct ConnectionGuard {
    hub: Arc<RoomHub>,
    lesson_id: String,
    user_id: String,
    conn_id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.leave_connection(&self.lesson_id, &self.user_id, self.conn_id);
    }
}

async fn handle_socket(socket: WebSocket, lesson_id: String, token: Result<String, AuthError>, state: AppState) {
    let (mut sender, receiver) = socket.split();

    // Resolve the identity before anything is recorded for this connection
    let identity = match token {
        Ok(token) => state.authenticator.resolve(&token).await,
        Err(e) => Err(e),
    };
    let identity = match identity {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Refusing connection to lesson {}: {}", lesson_id, e);
            let frame = CloseFrame { code: close_code::UNAUTHORIZED, reason: "Unauthorized".into() };
            let _ = sender.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let (channel, outbound) = state.hub.open_channel();
    let conn_id = channel.conn_id();
    let replier = channel.replier();
    info!(
        "WebSocket connection established for lesson {} by {} with connection_id {}",
        lesson_id, identity.user_id, conn_id
    );
    state.hub.join(&lesson_id, &identity, channel);

    let _guard = ConnectionGuard {
        hub: state.hub.clone(),
        lesson_id: lesson_id.clone(),
        user_id: identity.user_id.clone(),
        conn_id,
    };

    let mut send_task = tokio::spawn(write_loop(sender, outbound));
    let mut recv_task = tokio::spawn(read_loop(receiver, state.hub.clone(), lesson_id, identity, conn_id, replier));

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
    debug!("WebSocket connection {} terminated", conn_id);
}

/// Drain the session's queue into the socket. Ends when the hub drops the
/// session or asks for a close.
async fn write_loop(mut sender: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<Outbound>) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Text(text) => {
                if sender.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = sender.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
                return;
            }
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    hub: Arc<RoomHub>,
    lesson_id: String,
    identity: Identity,
    conn_id: Uuid,
    replier: SessionReplier,
) {
    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("WebSocket error on {}: {}", conn_id, e);
                break;
            }
        };

        // Any inbound frame counts as a heartbeat
        hub.touch(&lesson_id, &identity.user_id, conn_id, Instant::now());

        match frame {
            Message::Text(text) => handle_text(&text, &hub, &lesson_id, &identity, conn_id, &replier),
            Message::Close(_) => break,
            _ => {}
        }
    }
}

fn handle_text(text: &str, hub: &RoomHub, lesson_id: &str, identity: &Identity, conn_id: Uuid, replier: &SessionReplier) {
    let msg = match ClientMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Dropping malformed message on lesson {}: {}", lesson_id, e);
            return;
        }
    };

    match msg {
        ClientMessage::Ping => reply(replier, &ServerMessage::Pong),
        ClientMessage::GetActiveUsers => reply(replier, &hub.get_active_users(lesson_id, &identity.user_id)),
        ClientMessage::Unknown => debug!("Dropping unknown message kind on lesson {}", lesson_id),
        relayed => hub.relay(lesson_id, &identity.user_id, conn_id, &relayed),
    }
}

fn reply(replier: &SessionReplier, msg: &ServerMessage) {
    if replier.send(msg) != Delivery::Queued {
        debug!("Direct reply dropped, connection is closing or saturated");
    }
}
