//! Realtime WebSocket endpoint.
//!
//! Streams a user's lifecycle events as JSON text frames. The endpoint is meant
//! to sit behind a trusted proxy: loopback peers are always admitted, anyone
//! else must present the internal secret.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use castline_core::RealtimeEvent;
use castline_scheduler::RealtimeHub;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub const INTERNAL_SECRET_HEADER: &str = "x-internal-ws-secret";

const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Whether a peer may open a realtime connection.
pub fn ws_allowed(peer: SocketAddr, headers: &HeaderMap, secret: Option<&str>) -> bool {
    if peer.ip().to_canonical().is_loopback() {
        return true;
    }
    let Some(secret) = secret.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        == Some(secret)
}

/// WebSocket upgrade handler for `GET /api/events/ws?userId=`.
pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    if !ws_allowed(peer, &headers, state.realtime.internal_secret.as_deref()) {
        warn!(remote = %peer, has_header = headers.contains_key(INTERNAL_SECRET_HEADER), "Forbidden realtime connection");
        return Err(ApiError::Forbidden("forbidden".into()));
    }

    let user_id = params.user_id.as_deref().unwrap_or_default().trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("missing_userId".into()));
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let hub = state.hub.clone();
    let heartbeat = state.realtime.heartbeat.max(MIN_HEARTBEAT);
    Ok(upgrade.on_upgrade(move |socket| handle_socket(socket, hub, user_id, peer, heartbeat)))
}

async fn handle_socket(
    socket: WebSocket,
    hub: Arc<RealtimeHub>,
    user_id: String,
    peer: SocketAddr,
    heartbeat: Duration,
) {
    let Some(mut subscription) = hub.add(&user_id) else {
        return;
    };
    info!(user_id = %user_id, remote = %peer, connection_id = subscription.id, "Realtime connection established");

    let (mut sender, mut receiver) = socket.split();

    let hello = RealtimeEvent::new(RealtimeEvent::HELLO, user_id.as_str());
    if send_event(&mut sender, &hello).await.is_ok() {
        let mut clock = interval_at(Instant::now() + heartbeat, heartbeat);
        loop {
            tokio::select! {
                outbound = subscription.receiver.recv() => match outbound {
                    Some(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Dropped by the hub: slow consumer or shutdown.
                    None => break,
                },
                _ = clock.tick() => {
                    let event = RealtimeEvent::clock(&user_id, Utc::now());
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                inbound = receiver.next() => match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(user_id = %user_id, error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    hub.remove(&user_id, subscription.id);
    info!(user_id = %user_id, remote = %peer, connection_id = subscription.id, "Realtime connection closed");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &RealtimeEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, kind = %event.kind, "Failed to serialize realtime event");
            Ok(())
        }
    }
}
