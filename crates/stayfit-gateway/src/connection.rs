use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use stayfit_types::api::UserProfile;
use stayfit_types::events::{ClientCommand, ServerEvent};
use stayfit_types::models::user_room;

use crate::Gateway;
use crate::error::DeliveryError;
use crate::token::{self, TokenError};

/// Heartbeat interval: server sends a Ping every 25 seconds.
/// If 2 consecutive Pongs are missed, the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Lifecycle of one socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Open,
    Closed,
}

/// Where the handshake token comes from.
pub enum Handshake {
    /// Supplied with the upgrade request (`?token=` or `Authorization`)
    Token(String),
    /// Expect an `auth` frame within the handshake timeout
    Deferred,
}

/// Drive one socket from handshake to close.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, handshake: Handshake) {
    let (mut sender, mut receiver) = socket.split();
    let mut state = ConnectionState::Connecting;
    trace!("socket {:?}", state);

    let identity = match handshake {
        Handshake::Token(token) => token::verify(&gateway.jwt_secret, Some(&token)),
        Handshake::Deferred => {
            wait_for_auth(&mut receiver, &gateway.jwt_secret, gateway.handshake_timeout).await
        }
    };

    let user = match identity {
        Ok(user) => user,
        Err(e) => {
            warn!("socket handshake rejected: {}", e);
            let _ = send_event(&mut sender, &ServerEvent::ConnectError { message: e.to_string() }).await;
            let _ = sender.send(Message::Close(None)).await;
            state = ConnectionState::Closed;
            trace!("socket {:?}", state);
            return;
        }
    };
    state = ConnectionState::Authenticated;
    trace!("socket {:?} as {}", state, user.id);

    let (conn_id, user_rx) = gateway.registry.connect(user.id).await;
    state = ConnectionState::Open;
    info!(
        "{} ({}) {:?}, joined {} ({} connection(s))",
        user.username,
        user.id,
        state,
        user_room(user.id),
        gateway.registry.connection_count(user.id).await
    );

    if send_event(&mut sender, &ServerEvent::Connected { user_id: user.id }).await.is_err() {
        gateway.registry.leave(user.id, conn_id).await;
        return;
    }

    run_connection_loop(sender, receiver, user_rx, &gateway, &user, conn_id).await;

    gateway.registry.leave(user.id, conn_id).await;
    state = ConnectionState::Closed;
    info!("{} ({}) disconnected ({:?})", user.username, user.id, state);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
    gateway: &Gateway,
    user: &UserProfile,
    conn_id: Uuid,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client. Handled one at a time, so sends from one
    // connection are persisted in the order received.
    let gateway_recv = gateway.clone();
    let user_id = user.id;
    let username = user.username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&gateway_recv, user_id, conn_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Dispatch one client command. Failures are logged and dropped: there is no
/// negative acknowledgement on the socket.
async fn handle_command(gateway: &Gateway, user_id: i64, conn_id: Uuid, cmd: ClientCommand) {
    match cmd {
        ClientCommand::Auth { .. } => {} // Already authenticated

        ClientCommand::SendMessage(payload) => {
            let receiver_id = payload.receiver_id;
            match gateway.engine.send_message(user_id, Some(conn_id), payload).await {
                Ok(msg) => debug!("{} -> {}: message {}", user_id, receiver_id, msg.id),
                Err(DeliveryError::Forbidden) => {
                    debug!("dropped send_message {} -> {}: not friends", user_id, receiver_id)
                }
                Err(e) => warn!("dropped send_message {} -> {}: {}", user_id, receiver_id, e),
            }
        }
    }
}

async fn wait_for_auth(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
    timeout: Duration,
) -> Result<UserProfile, TokenError> {
    let first_auth = tokio::time::timeout(timeout, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Auth { token }) = serde_json::from_str::<ClientCommand>(&text) {
                    return Some(token);
                }
            }
        }
        None
    });

    let token = first_auth.await.ok().flatten();
    token::verify(jwt_secret, token.as_deref())
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
