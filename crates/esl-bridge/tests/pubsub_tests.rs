//! WebSocket pub/sub endpoint tests
//!
//! Serves the router on a local port and talks to it as a client would.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use esl_bridge::{create_router, AppState, PubSubHub, Publisher};
use esl_common::BridgeSnapshot;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (String, Arc<PubSubHub>) {
    let hub = Arc::new(PubSubHub::new(16));
    let (_tx, snapshots) = watch::channel(BridgeSnapshot::empty());
    let router = create_router(
        AppState {
            hub: hub.clone(),
            snapshots,
        },
        "/pubsub",
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("ws://{}/pubsub", addr), hub)
}

async fn send(client: &mut Client, message: Value) {
    client
        .send(Message::text(message.to_string()))
        .await
        .unwrap();
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no frame within 5s")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_subscribe_receive_and_unsubscribe() {
    let (url, hub) = serve().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut client, json!({"type": "subscribe", "channel": "/monitor_agent_42"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply, json!({"type": "subscribed", "channel": "monitor_agent_42"}));
    assert_eq!(hub.subscriber_count("monitor_agent_42"), 1);

    hub.publish("monitor_agent_42", json!({"callId": "abc123", "state": "started"}));
    let message = next_json(&mut client).await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["channel"], "monitor_agent_42");
    assert_eq!(message["data"]["callId"], "abc123");
    assert_eq!(message["data"]["state"], "started");

    send(&mut client, json!({"type": "unsubscribe", "channel": "monitor_agent_42"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply, json!({"type": "unsubscribed", "channel": "monitor_agent_42"}));

    // The aborted forwarder releases its receiver shortly after
    for _ in 0..50 {
        if hub.subscriber_count("monitor_agent_42") == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hub.subscriber_count("monitor_agent_42"), 0);

    hub.publish("monitor_agent_42", json!({"state": "hangup"}));
    let silent = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(silent.is_err(), "no message expected after unsubscribe");
}

#[tokio::test]
async fn test_invalid_client_message_gets_error_reply() {
    let (url, _hub) = serve().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut client, json!({"type": "publish", "channel": "monitor_agent_42"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().starts_with("invalid message"));

    // The session stays usable
    send(&mut client, json!({"type": "subscribe", "channel": "monitor_agents_10001"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["channel"], "monitor_agents_10001");
}

#[tokio::test]
async fn test_channels_are_isolated_between_clients() {
    let (url, hub) = serve().await;
    let (mut agent_42, _) = connect_async(url.as_str()).await.unwrap();
    let (mut agent_7, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut agent_42, json!({"type": "subscribe", "channel": "monitor_agent_42"})).await;
    next_json(&mut agent_42).await;
    send(&mut agent_7, json!({"type": "subscribe", "channel": "monitor_agent_7"})).await;
    next_json(&mut agent_7).await;

    hub.publish("monitor_agent_7", json!({"agentId": 7}));
    let message = next_json(&mut agent_7).await;
    assert_eq!(message["data"]["agentId"], 7);

    let silent = tokio::time::timeout(Duration::from_millis(200), agent_42.next()).await;
    assert!(silent.is_err(), "agent 42 must not see agent 7 traffic");
}
