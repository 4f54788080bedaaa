//! End-to-end sessions against a live relay over WebSocket.

use std::sync::Arc;
use std::time::Duration;

use framerelay_protocol::constants::EnvelopeType;
use framerelay_protocol::envelope::Envelope;
use framerelay_server::{RelayConfig, RelayServer, ServerConfig};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn start_server(relay: RelayConfig) -> (Arc<RelayServer>, tokio::task::JoinHandle<()>, String) {
    let config = ServerConfig {
        bind: ([127, 0, 0, 1], 0).into(),
    };
    let server = RelayServer::new(config, relay);
    let server2 = Arc::clone(&server);
    let handle = tokio::spawn(async move {
        server2.run().await.unwrap();
    });

    // Wait for the server to bind.
    let mut port = 0;
    for _ in 0..50 {
        port = server.port().await;
        if port > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(port > 0, "server should bind");
    (server, handle, format!("ws://127.0.0.1:{port}"))
}

async fn send_text(ws: &mut Client, json: serde_json::Value) {
    ws.send(Message::Text(json.to_string().into())).await.unwrap();
}

async fn send_frame(ws: &mut Client, payload_len: usize) {
    let mut data = vec![0x01];
    data.extend(std::iter::repeat_n(0xFF, payload_len));
    ws.send(Message::Binary(data.into())).await.unwrap();
}

/// Reads the next envelope, skipping non-binary messages.
async fn next_envelope(ws: &mut Client) -> Option<Envelope> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("relay should answer")?;
        match msg {
            Ok(Message::Binary(data)) => return Some(Envelope::decode(&data).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

fn json(env: &Envelope) -> serde_json::Value {
    env.parse_payload().unwrap()
}

#[tokio::test]
async fn full_session_over_websocket() {
    let relay = RelayConfig {
        capability: "GPU-0".into(),
        ..Default::default()
    };
    let (server, handle, url) = start_server(relay).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    send_text(
        &mut ws,
        serde_json::json!({"type": "start", "session_id": "s1", "snapshot_period_sec": 1}),
    )
    .await;
    let ack = next_envelope(&mut ws).await.unwrap();
    assert_eq!(ack.kind, EnvelopeType::Status);
    assert_eq!(json(&ack)["note"], "start ok, snapshot_period=1");

    for _ in 0..30 {
        send_frame(&mut ws, 100).await;
    }

    let mut saw_delta = false;
    let mut saw_status = false;
    let mut saw_snapshot = false;
    while !(saw_delta && saw_status && saw_snapshot) {
        let env = next_envelope(&mut ws).await.expect("stream ended early");
        let body = json(&env);
        match env.kind {
            EnvelopeType::Delta => {
                assert!(!saw_delta, "only one delta for 30 frames");
                assert_eq!(body["frame_count"], 30);
                saw_delta = true;
            }
            EnvelopeType::Status => {
                if body["frame_count"] == 30 {
                    assert_eq!(body["last_frame_bytes"], 100);
                    assert_eq!(body["gpu_visible"], "GPU-0");
                    saw_status = true;
                }
            }
            EnvelopeType::Snapshot => {
                assert_eq!(body["session_id"], "s1");
                saw_snapshot = true;
            }
        }
    }

    send_text(&mut ws, serde_json::json!({"type": "end"})).await;

    // The end ack is the last envelope before the relay closes.
    let mut last = None;
    while let Some(env) = next_envelope(&mut ws).await {
        last = Some(env);
    }
    let last = last.expect("end ack");
    assert_eq!(last.kind, EnvelopeType::Status);
    assert_eq!(json(&last)["note"], "end received");

    server.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn sessions_are_independent() {
    let (server, handle, url) = start_server(RelayConfig::default()).await;
    let (mut a, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut b, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    send_text(&mut a, serde_json::json!({"type": "start", "session_id": "a"})).await;
    send_text(&mut b, serde_json::json!({"type": "start", "session_id": "b"})).await;
    assert_eq!(json(&next_envelope(&mut a).await.unwrap())["session_id"], "a");
    assert_eq!(json(&next_envelope(&mut b).await.unwrap())["session_id"], "b");

    // A second start on `a` is rejected without touching `b`.
    send_text(&mut a, serde_json::json!({"type": "start", "session_id": "again"})).await;
    let rejected = loop {
        let body = json(&next_envelope(&mut a).await.expect("rejection notice"));
        if body.get("rejected").is_some() {
            break body;
        }
    };
    assert_eq!(rejected["rejected"], true);
    assert_eq!(rejected["session_id"], "a");

    drop(a);
    drop(b);
    server.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn client_disconnect_mid_session_is_clean() {
    let (server, handle, url) = start_server(RelayConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    send_text(&mut ws, serde_json::json!({"type": "start"})).await;
    next_envelope(&mut ws).await.unwrap();
    send_frame(&mut ws, 10).await;
    drop(ws);

    tokio::time::sleep(Duration::from_millis(100)).await;
    server.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("server should stop")
        .unwrap();
}
