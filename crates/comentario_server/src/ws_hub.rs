/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The websocket live-update hub. One registry task owns the client set;
//! connection handlers and broadcasters talk to it over channels only.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use comentario_protocol::{WsEvent, WsSubscribe};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(54);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_MESSAGE_BYTES: usize = 2999;
/// Outbound queue depth per client; a client that falls this far behind is
/// dropped and expected to reconnect.
const CLIENT_QUEUE: usize = 100;

static CLIENT_ID: AtomicU64 = AtomicU64::new(1);

enum HubCmd {
    Register {
        id: u64,
        tx: mpsc::Sender<String>,
        accepted: oneshot::Sender<bool>,
    },
    Unregister {
        id: u64,
    },
    Subscribe {
        id: u64,
        sub: WsSubscribe,
    },
    Broadcast(WsEvent),
}

#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::Sender<HubCmd>,
}

impl HubHandle {
    /// Fire-and-forget broadcast; when the hub is saturated the event is
    /// dropped rather than blocking the comment pipeline.
    pub fn broadcast(&self, event: WsEvent) {
        if self.cmd_tx.try_send(HubCmd::Broadcast(event)).is_err() {
            warn!("hub command queue full, dropping broadcast");
        }
    }
}

struct Client {
    tx: mpsc::Sender<String>,
    sub: Option<WsSubscribe>,
}

/// Starts the registry task. `max_clients` bounds concurrent connections.
pub fn spawn_hub(max_clients: usize, mut shutdown: watch::Receiver<bool>) -> HubHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HubCmd>(1024);
    tokio::spawn(async move {
        let mut clients: HashMap<u64, Client> = HashMap::new();
        loop {
            let cmd = tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(c) => c,
                    None => return,
                },
                _ = shutdown.changed() => {
                    info!(clients = clients.len(), "hub stopping");
                    return;
                }
            };
            match cmd {
                HubCmd::Register { id, tx, accepted } => {
                    let ok = clients.len() < max_clients;
                    if ok {
                        clients.insert(id, Client { tx, sub: None });
                    }
                    let _ = accepted.send(ok);
                }
                HubCmd::Unregister { id } => {
                    clients.remove(&id);
                }
                HubCmd::Subscribe { id, sub } => {
                    if let Some(client) = clients.get_mut(&id) {
                        client.sub = Some(sub);
                    }
                }
                HubCmd::Broadcast(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("event serialization failed: {e}");
                            continue;
                        }
                    };
                    let mut dropped = Vec::new();
                    for (id, client) in &clients {
                        if !subscription_matches(client.sub.as_ref(), &event) {
                            continue;
                        }
                        if client.tx.try_send(payload.clone()).is_err() {
                            dropped.push(*id);
                        }
                    }
                    for id in dropped {
                        debug!(client = id, "dropping slow hub client");
                        clients.remove(&id);
                    }
                }
            }
        }
    });
    HubHandle { cmd_tx }
}

/// Delivery filter: the client must have subscribed to exactly this
/// (domain, path) pair.
pub fn subscription_matches(sub: Option<&WsSubscribe>, event: &WsEvent) -> bool {
    sub.is_some_and(|s| s.domain == event.domain && s.path == event.path)
}

/// `GET /ws` upgrade handler.
pub async fn ws_upgrade(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade
        .max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| client_session(state, socket))
}

async fn client_session(state: AppState, socket: WebSocket) {
    let Some(hub) = state.hub.clone() else {
        // Live updates disabled; close immediately.
        let _ = socket.close().await;
        return;
    };
    let id = CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let (out_tx, mut out_rx) = mpsc::channel::<String>(CLIENT_QUEUE);
    let (accepted_tx, accepted_rx) = oneshot::channel();
    if hub
        .cmd_tx
        .send(HubCmd::Register {
            id,
            tx: out_tx,
            accepted: accepted_tx,
        })
        .await
        .is_err()
        || !accepted_rx.await.unwrap_or(false)
    {
        debug!(client = id, "hub refused connection");
        let _ = socket.close().await;
        return;
    }

    let (mut sink, mut stream) = socket.split();
    let (pong_tx, mut pong_rx) = watch::channel(Instant::now());

    // Writer: forwards queued events, pings on schedule, enforces the pong
    // deadline and the per-write timeout.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = out_rx.recv() => {
                    let Some(msg) = msg else { break };
                    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(msg))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = ping.tick() => {
                    if pong_rx.borrow().elapsed() > PONG_TIMEOUT {
                        debug!("client missed pong deadline");
                        break;
                    }
                    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Vec::new()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    // Reader: subscription updates and pongs.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<WsSubscribe>(&text) {
                Ok(sub) => {
                    if hub.cmd_tx.send(HubCmd::Subscribe { id, sub }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(client = id, "bad subscribe message: {e}");
                    break;
                }
            },
            Ok(Message::Pong(_)) => {
                let _ = pong_tx.send(Instant::now());
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    let _ = hub.cmd_tx.send(HubCmd::Unregister { id }).await;
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use comentario_protocol::CommentAction;
    use uuid::Uuid;

    fn event(domain: Uuid, path: &str) -> WsEvent {
        WsEvent {
            domain,
            path: path.into(),
            comment: Uuid::new_v4(),
            parent_comment: None,
            action: CommentAction::New,
        }
    }

    #[test]
    fn filter_requires_exact_match() {
        let d1 = Uuid::new_v4();
        let d2 = Uuid::new_v4();
        let sub = WsSubscribe {
            domain: d1,
            path: "/p".into(),
        };
        assert!(subscription_matches(Some(&sub), &event(d1, "/p")));
        assert!(!subscription_matches(Some(&sub), &event(d1, "/q")));
        assert!(!subscription_matches(Some(&sub), &event(d2, "/p")));
        assert!(!subscription_matches(None, &event(d1, "/p")));
    }

    #[tokio::test]
    async fn hub_delivers_to_matching_subscriber_only() {
        let (_tx, shutdown) = watch::channel(false);
        let hub = spawn_hub(10, shutdown);
        let domain = Uuid::new_v4();

        let register = |id| {
            let hub = hub.clone();
            async move {
                let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
                let (ack_tx, ack_rx) = oneshot::channel();
                hub.cmd_tx
                    .send(HubCmd::Register {
                        id,
                        tx,
                        accepted: ack_tx,
                    })
                    .await
                    .unwrap();
                assert!(ack_rx.await.unwrap());
                rx
            }
        };
        let mut rx1 = register(1).await;
        let mut rx2 = register(2).await;
        hub.cmd_tx
            .send(HubCmd::Subscribe {
                id: 1,
                sub: WsSubscribe {
                    domain,
                    path: "/p".into(),
                },
            })
            .await
            .unwrap();
        hub.cmd_tx
            .send(HubCmd::Subscribe {
                id: 2,
                sub: WsSubscribe {
                    domain,
                    path: "/q".into(),
                },
            })
            .await
            .unwrap();

        hub.broadcast(event(domain, "/p"));
        let msg = tokio::time::timeout(Duration::from_secs(1), rx1.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(msg.contains("\"action\":\"new\""));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx2.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn hub_enforces_client_cap() {
        let (_tx, shutdown) = watch::channel(false);
        let hub = spawn_hub(1, shutdown);
        let (tx, _rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = oneshot::channel();
        hub.cmd_tx
            .send(HubCmd::Register {
                id: 1,
                tx,
                accepted: ack_tx,
            })
            .await
            .unwrap();
        assert!(ack_rx.await.unwrap());

        let (tx, _rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = oneshot::channel();
        hub.cmd_tx
            .send(HubCmd::Register {
                id: 2,
                tx,
                accepted: ack_tx,
            })
            .await
            .unwrap();
        assert!(!ack_rx.await.unwrap());
    }
}
