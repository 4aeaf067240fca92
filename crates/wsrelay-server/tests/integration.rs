//! End-to-end tests against a real listener using WebSocket and HTTP clients.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use wsrelay_server::{RelayServer, ServerHandle};
use wsrelay_settings::RelaySettings;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a server on an ephemeral port.
async fn boot_server() -> ServerHandle {
    let mut settings = RelaySettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    settings.relay.keep_alive_interval_secs = 0;
    RelayServer::new(&settings).listen().await.unwrap()
}

async fn wait_for_connections(handle: &ServerHandle, expected: usize) {
    timeout(TIMEOUT, async {
        while handle.registry().len() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} connections, have {}",
            handle.registry().len()
        )
    });
}

/// Connect a client and wait until the server has registered it.
async fn connect(handle: &ServerHandle) -> WsStream {
    let before = handle.registry().len();
    let (ws, _) = connect_async(handle.ws_url()).await.unwrap();
    wait_for_connections(handle, before + 1).await;
    ws
}

/// Next non-control message.
async fn next_message(ws: &mut WsStream) -> Message {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(msg)) => return msg,
                other => panic!("stream ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for message")
}

async fn next_text(ws: &mut WsStream) -> String {
    match next_message(ws).await {
        Message::Text(text) => text.as_str().to_owned(),
        other => panic!("expected text, got {other:?}"),
    }
}

async fn assert_silent(ws: &mut WsStream) {
    let res = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "expected no message, got {res:?}");
}

#[tokio::test]
async fn hello_fans_out_and_survives_abrupt_disconnect() {
    let handle = boot_server().await;
    let mut a = connect(&handle).await;
    let mut b = connect(&handle).await;
    let mut c = connect(&handle).await;

    a.send(Message::text("hello")).await.unwrap();
    assert_eq!(next_text(&mut b).await, "hello");
    assert_eq!(next_text(&mut c).await, "hello");
    assert_silent(&mut a).await;

    // Drop the TCP connection without a close frame.
    drop(b);
    wait_for_connections(&handle, 2).await;

    a.send(Message::text("after")).await.unwrap();
    assert_eq!(next_text(&mut c).await, "after");
    assert_silent(&mut a).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn binary_frames_are_relayed_unchanged() {
    let handle = boot_server().await;
    let mut a = connect(&handle).await;
    let mut b = connect(&handle).await;

    let payload = vec![0u8, 1, 2, 254, 255];
    a.send(Message::binary(payload.clone())).await.unwrap();
    match next_message(&mut b).await {
        Message::Binary(data) => assert_eq!(data.as_ref(), payload.as_slice()),
        other => panic!("expected binary, got {other:?}"),
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn per_sender_order_is_preserved_over_the_wire() {
    let handle = boot_server().await;
    let mut a = connect(&handle).await;
    let mut b = connect(&handle).await;

    for i in 0..25 {
        a.send(Message::text(format!("m{i}"))).await.unwrap();
    }
    for i in 0..25 {
        assert_eq!(next_text(&mut b).await, format!("m{i}"));
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn lone_client_receives_nothing() {
    let handle = boot_server().await;
    let mut a = connect(&handle).await;

    a.send(Message::text("anyone?")).await.unwrap();
    assert_silent(&mut a).await;
    assert_eq!(handle.registry().len(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn close_status_and_reason_are_echoed() {
    let handle = boot_server().await;
    let mut a = connect(&handle).await;

    a.close(Some(CloseFrame {
        code: CloseCode::from(4000),
        reason: "bye".into(),
    }))
    .await
    .unwrap();

    match next_message(&mut a).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4000);
            assert_eq!(frame.reason.as_str(), "bye");
        }
        other => panic!("expected close, got {other:?}"),
    }
    wait_for_connections(&handle, 0).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn closed_peer_no_longer_receives() {
    let handle = boot_server().await;
    let mut a = connect(&handle).await;
    let mut b = connect(&handle).await;
    let mut c = connect(&handle).await;

    b.close(None).await.unwrap();
    wait_for_connections(&handle, 2).await;

    a.send(Message::text("only c")).await.unwrap();
    assert_eq!(next_text(&mut c).await, "only c");

    handle.shutdown().await;
}

#[tokio::test]
async fn non_upgrade_request_on_ws_path_is_bad_request() {
    let handle = boot_server().await;
    let url = format!("http://{}/ws", handle.local_addr());
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), 400);
    assert!(handle.registry().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn health_reports_live_connections() {
    let handle = boot_server().await;
    let _a = connect(&handle).await;
    let _b = connect(&handle).await;

    let url = format!("http://{}/health", handle.local_addr());
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
    assert!(body["uptimeSecs"].is_number());

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_clears_registry() {
    let handle = boot_server().await;
    let _a = connect(&handle).await;
    let registry = std::sync::Arc::clone(handle.registry());
    assert_eq!(registry.len(), 1);

    handle.shutdown().await;
    assert!(registry.is_empty());
}
