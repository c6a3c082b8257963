use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, trace, warn};
use uuid::Uuid;

use wadmin_types::api::Claims;
use wadmin_types::events::{Collection, RealtimeCommand, RealtimeEvent};

use crate::feed::ChangeFeed;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a client gets to send `Identify` after the socket opens.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve one realtime connection. The token arrives in an `Identify`
/// command rather than the URL, so it never shows up in request logs.
pub async fn handle_connection(socket: WebSocket, feed: ChangeFeed, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some((user_id, username)) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("Realtime client failed to identify, closing");
        return;
    };

    let ready = RealtimeEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let Ok(ready) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(ready.into())).await.is_err() {
        return;
    }

    let conn_id = feed.register(user_id).await;
    info!("{} ({}) connected to realtime feed", username, user_id);

    let mut broadcast_rx = feed.subscribe();

    // Collections this connection asked for; empty means all of them.
    let subscriptions: Arc<RwLock<Vec<Collection>>> = Arc::new(RwLock::new(Vec::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Realtime receiver lagged by {} events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    let visible = match send_subscriptions.read() {
                        Ok(subs) => msg.visible_to(user_id, &subs),
                        Err(_) => break,
                    };
                    if !visible {
                        continue;
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
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

    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeCommand>(&text) {
                    Ok(RealtimeCommand::Identify { .. }) => {} // Already handled
                    Ok(RealtimeCommand::Subscribe { collections }) => {
                        trace!("{} subscribing to {:?}", username_recv, collections);
                        match subscriptions.write() {
                            Ok(mut subs) => *subs = collections,
                            Err(_) => break,
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
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

    feed.unregister(conn_id).await;
    info!("{} ({}) disconnected from realtime feed", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    let first_command = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                return identify(&text, jwt_secret);
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, first_command).await.ok().flatten()
}

/// Parse an `Identify` command and validate its token.
fn identify(text: &str, jwt_secret: &str) -> Option<(Uuid, String)> {
    let RealtimeCommand::Identify { token } = serde_json::from_str::<RealtimeCommand>(text).ok()? else {
        return None;
    };
    let data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some((data.claims.sub, data.claims.username))
}
