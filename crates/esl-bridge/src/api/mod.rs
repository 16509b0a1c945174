//! ESL Bridge HTTP API
//!
//! - Pub/sub WebSocket endpoint at the configured mount
//! - Health and monitoring
//! - Plain-text fallback for every other request

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use esl_common::BridgeSnapshot;

use crate::publish::{normalize_channel, HubMessage, HubStats, PubSubHub};

pub const FALLBACK_BODY: &str = "Hello, non-Bayeux request";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<PubSubHub>,
    pub snapshots: watch::Receiver<BridgeSnapshot>,
}

/// Messages accepted from pub/sub clients
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

/// Messages sent to pub/sub clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Message { channel: String, data: serde_json::Value },
    Error { message: String },
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub switches: usize,
    pub connected: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringResponse {
    #[serde(flatten)]
    pub snapshot: BridgeSnapshot,
    pub pubsub: HubStats,
}

pub fn create_router(state: AppState, mount: &str) -> Router {
    Router::new()
        .route(mount, get(pubsub_handler))
        .route("/health", get(health_handler))
        .route("/monitoring", get(monitoring_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        FALLBACK_BODY,
    )
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.snapshots.borrow();
    let connected = snapshot
        .connections
        .iter()
        .filter(|c| c.state == esl_common::ConnectionState::Connected)
        .count();

    Json(HealthResponse {
        status: if snapshot.all_connected() { "UP" } else { "DEGRADED" },
        version: env!("CARGO_PKG_VERSION"),
        switches: snapshot.connections.len(),
        connected,
    })
}

async fn monitoring_handler(State(state): State<AppState>) -> Json<MonitoringResponse> {
    let snapshot = state.snapshots.borrow().clone();
    Json(MonitoringResponse {
        snapshot,
        pubsub: state.hub.stats(),
    })
}

async fn pubsub_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<PubSubHub>) {
    let client_id = Uuid::new_v4();
    info!(%client_id, "Pub/sub client handshake");

    let (mut sink, mut stream) = socket.split();
    // Bounded per client; a stalled socket drops channel messages instead of queueing them
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(hub.capacity());

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize pub/sub message");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Subscribe { channel }) => {
                let channel = normalize_channel(&channel).to_string();
                info!(%client_id, %channel, "Pub/sub client subscribe");
                if !subscriptions.contains_key(&channel) {
                    let forwarder = forward_channel(hub.subscribe(&channel), out_tx.clone());
                    subscriptions.insert(channel.clone(), forwarder);
                }
                ServerMessage::Subscribed { channel }
            }
            Ok(ClientMessage::Unsubscribe { channel }) => {
                let channel = normalize_channel(&channel).to_string();
                if let Some(forwarder) = subscriptions.remove(&channel) {
                    forwarder.abort();
                }
                debug!(%client_id, %channel, "Pub/sub client unsubscribe");
                ServerMessage::Unsubscribed { channel }
            }
            Err(e) => ServerMessage::Error {
                message: format!("invalid message: {}", e),
            },
        };

        if out_tx.send(reply).await.is_err() {
            break;
        }
    }

    for forwarder in subscriptions.into_values() {
        forwarder.abort();
    }
    drop(out_tx);
    let _ = writer.await;
    info!(%client_id, "Pub/sub client disconnected");
}

fn forward_channel(
    mut rx: broadcast::Receiver<HubMessage>,
    out: mpsc::Sender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let outgoing = ServerMessage::Message {
                        channel: message.channel.to_string(),
                        data: (*message.payload).clone(),
                    };
                    match out.try_send(outgoing) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(channel = %message.channel, "Pub/sub client backlog full, message dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Pub/sub subscriber lagging, messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
