use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use tapline_types::events::{GatewayCommand, GatewayEvent};

use crate::auth::{AuthError, Identity};
use crate::gateway::Gateway;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may take to send `identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve one WebSocket connection.
///
/// `identity` is set when the upgrade request already carried a valid
/// token. Otherwise the first `identify` command must arrive within
/// [`IDENTIFY_TIMEOUT`]; a failed handshake gets `connect_error` and a close
/// frame, and touches no rooms.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, identity: Option<Identity>) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match identity {
        Some(identity) => identity,
        None => match wait_for_identify(&mut receiver, &gateway).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("WebSocket client failed to identify: {}", e);
                let reject = GatewayEvent::ConnectError {
                    message: e.to_string(),
                };
                if send_event(&mut sender, &reject).await {
                    let _ = sender.send(Message::Close(None)).await;
                }
                return;
            }
        },
    };

    let (session, mut events_rx) = gateway.open_session(identity).await;
    let session = Arc::new(session);

    let ready = GatewayEvent::Ready {
        user_id: session.identity.user_id,
        username: session.identity.username.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        gateway.disconnect(&session).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
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
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_gateway = gateway.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => recv_gateway.handle_command(&recv_session, cmd).await,
                    Err(e) => recv_gateway.reject_frame(&recv_session, &text, e).await,
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

    gateway.disconnect(&session).await;
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    gateway: &Gateway,
) -> Result<Identity, AuthError> {
    let identify = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(GatewayCommand::Identify { token }) =
                        serde_json::from_str::<GatewayCommand>(&text)
                    {
                        return Some(token);
                    }
                    debug!("Ignoring frame before identify");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        None
    });

    let token = identify.await.ok().flatten();
    gateway.authenticate(token.as_deref())
}

/// Serialize and send one event. Returns false once the socket is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
