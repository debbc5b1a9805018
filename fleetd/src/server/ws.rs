//! Websocket command channel

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use client_api::{CommandEnvelope, Event, User};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::Identity;
use crate::server::state::ServerState;

/// How often to send websocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Session token from the query string or an `Authorization` header
fn session_token(query: WsQuery, headers: &HeaderMap) -> Option<String> {
    query.token.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim_start_matches("Bearer ").trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = match session_token(query, &headers) {
        Some(token) => token,
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };
    let user = match state.users.find_by_session(&token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            debug!("Rejecting connection with unknown session");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(e) => {
            error!("Session lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, user: User) {
    let (mut sender, receiver) = socket.split();
    if !user.enabled {
        info!("Disconnecting disabled user {}", user.username);
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let subscription = state.hub.subscribe(Identity {
        user_id: user.id.clone(),
        username: user.username.clone(),
        tier: user.permissions,
    });
    let subscriber_id = subscription.id;
    info!("{} connected as subscriber {}", user.username, subscriber_id);

    run_socket_loop(sender, receiver, subscription.rx, &state, &user, subscriber_id).await;

    state.hub.unsubscribe(subscriber_id);
    info!("{} disconnected", user.username);
}

/// Forward hub events to the client and client commands to the dispatcher,
/// with ping/pong health checking, in a single select loop.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: mpsc::Receiver<Arc<str>>,
    state: &Arc<ServerState>,
    user: &User,
    subscriber_id: u64,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    warn!("No pong from subscriber {}, closing", subscriber_id);
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = rx.recv() => {
                match event {
                    Some(payload) => {
                        if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    // Dropped by the hub
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        spawn_command(state.clone(), user.id.clone(), subscriber_id, text.as_str());
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Socket error on subscriber {}: {}", subscriber_id, e);
                        break;
                    }
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Dispatch one command frame as its own task; replies go to this
/// connection only
fn spawn_command(state: Arc<ServerState>, user_id: String, subscriber_id: u64, text: &str) {
    let envelope = match CommandEnvelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Malformed command from {}: {}", user_id, e);
            state
                .hub
                .send_to(subscriber_id, &Event::notice(format!("malformed command: {}", e)));
            return;
        }
    };

    tokio::spawn(async move {
        match state.dispatcher.dispatch(&user_id, envelope).await {
            Ok(outcome) => {
                if let Some(reply) = outcome.reply() {
                    state.hub.send_to(subscriber_id, &reply);
                }
            }
            Err(e) => {
                error!("Command from {} failed: {}", user_id, e);
                state
                    .hub
                    .send_to(subscriber_id, &Event::notice(format!("command failed: {}", e)));
            }
        }
    });
}
