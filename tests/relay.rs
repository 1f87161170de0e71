//! End-to-end relay tests.
//!
//! Each test wires a real destination (a local WebSocket echo server) and
//! a real browser-side client through the relay engine, then drives the
//! gate, the Control API send dispatch, and the close sequence over live
//! sockets.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http::{Method, StatusCode};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use wsrelay::{
    ConnectionId, ControlApi, ControlRequest, EventReceiver, ProxyConfig, ProxyEvent, RelayEngine,
    Side, UpgradeInfo,
};

/// How long to wait for an event that should arrive.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait to conclude an event is NOT coming.
const QUIET_PERIOD: Duration = Duration::from_millis(200);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Spawns a WebSocket echo server; text and binary messages come straight
/// back, control frames are left to the protocol layer.
async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let port = listener.local_addr().expect("local addr").port();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut tx, mut rx) = ws.split();

                while let Some(Ok(message)) = rx.next().await {
                    match message {
                        Message::Text(_) | Message::Binary(_) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });

    port
}

type BrowserSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects a browser-side client through the engine to the echo server.
///
/// Plays the interception engine's part: accepts the upgrade locally and
/// hands the upgraded stream over with the original destination URL.
async fn open_relayed_connection(
    engine: &Arc<RelayEngine>,
    echo_port: u16,
) -> (BrowserSocket, ConnectionId) {
    let entry = TcpListener::bind("127.0.0.1:0").await.expect("bind entry");
    let entry_port = entry.local_addr().expect("local addr").port();

    let browser_task = tokio::spawn(async move {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{entry_port}/"))
            .await
            .expect("browser connect");
        ws
    });

    let (stream, _) = entry.accept().await.expect("accept entry");
    let client = tokio_tungstenite::accept_async(stream)
        .await
        .expect("upgrade entry");

    let upgrade = UpgradeInfo::new(format!("http://127.0.0.1:{echo_port}/chat"));
    let id = engine
        .accept_upgraded(client, upgrade)
        .await
        .expect("pairing should succeed");

    let browser = browser_task.await.expect("browser task");
    (browser, id)
}

async fn next_event(events: &mut EventReceiver) -> ProxyEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

async fn expect_quiet(events: &mut EventReceiver) {
    if let Ok(event) = timeout(QUIET_PERIOD, events.recv()).await {
        panic!("expected no event, got {event:?}");
    }
}

// ============================================================================
// Gate
// ============================================================================

#[tokio::test]
async fn gate_blocks_frames_until_ready_then_delivers_once() {
    init_tracing();

    let echo_port = spawn_echo_server().await;
    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());
    let (mut browser, id) = open_relayed_connection(&engine, echo_port).await;

    match next_event(&mut events).await {
        ProxyEvent::NewConnection { id: event_id, url, .. } => {
            assert_eq!(event_id, id);
            assert!(url.starts_with("ws://127.0.0.1"));
        }
        other => panic!("expected new-connection, got {other:?}"),
    }

    // Traffic before ready stays buffered in the transport.
    browser
        .send(Message::Text("early frame".into()))
        .await
        .expect("browser send");
    expect_quiet(&mut events).await;

    engine.ready(id).expect("ready");
    // Second ready is an idempotent no-op.
    engine.ready(id).expect("ready again");

    match next_event(&mut events).await {
        ProxyEvent::Data {
            id: event_id,
            sender,
            payload,
            ..
        } => {
            assert_eq!(event_id, id);
            assert_eq!(sender, Side::Client);
            assert_eq!(payload.as_bytes(), b"early frame");
        }
        other => panic!("expected data, got {other:?}"),
    }

    // Buffered frames are never replayed twice.
    expect_quiet(&mut events).await;
}

// ============================================================================
// Send Dispatch
// ============================================================================

#[tokio::test]
async fn direct_send_round_trips_byte_for_byte() {
    init_tracing();

    let echo_port = spawn_echo_server().await;
    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());
    let control = ControlApi::new(Arc::clone(&engine));
    let (mut browser, id) = open_relayed_connection(&engine, echo_port).await;

    let _ = next_event(&mut events).await; // new-connection
    engine.ready(id).expect("ready");

    // Toward the destination: the echo server returns the exact payload,
    // observed as server-side traffic.
    let response = control
        .handle(
            ControlRequest::new(Method::POST, format!("/ws/{id}/server/message/text"))
                .with_body("probe"),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body_str(), "{\"success\":true}");

    match next_event(&mut events).await {
        ProxyEvent::Data {
            sender, payload, ..
        } => {
            assert_eq!(sender, Side::Server);
            assert_eq!(payload.as_bytes(), b"probe");
        }
        other => panic!("expected echoed data, got {other:?}"),
    }

    // Toward the browser: delivered verbatim, bypassing notification.
    let response = control
        .handle(
            ControlRequest::new(Method::POST, format!("/ws/{id}/client/message/text"))
                .with_body("to-browser"),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let message = timeout(EVENT_TIMEOUT, browser.next())
        .await
        .expect("browser frame within timeout")
        .expect("browser stream open")
        .expect("browser frame");
    assert_eq!(message, Message::Text("to-browser".into()));

    expect_quiet(&mut events).await;
}

#[tokio::test]
async fn logged_ping_appears_in_transcript_without_touching_the_wire() {
    init_tracing();

    let echo_port = spawn_echo_server().await;
    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());
    let control = ControlApi::new(Arc::clone(&engine));
    let (mut browser, id) = open_relayed_connection(&engine, echo_port).await;

    let _ = next_event(&mut events).await; // new-connection
    engine.ready(id).expect("ready");

    let response = control
        .handle(
            ControlRequest::new(Method::POST, format!("/ws/{id}/server/ping/ascii?log=true"))
                .with_body("hi"),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body_str(), "{\"sent\":true}");

    match next_event(&mut events).await {
        ProxyEvent::Data {
            id: event_id,
            sender,
            payload,
            kind,
            ..
        } => {
            assert_eq!(event_id, id);
            assert_eq!(sender, Side::Server);
            assert_eq!(payload.as_bytes(), b"hi");
            assert_eq!(kind.as_str(), "ping");
        }
        other => panic!("expected logged data, got {other:?}"),
    }

    // Nothing was written to either endpoint.
    assert!(
        timeout(QUIET_PERIOD, browser.next()).await.is_err(),
        "logged send must not reach the browser"
    );
}

#[tokio::test]
async fn binary_send_decodes_hex_and_rejects_malformed() {
    init_tracing();

    let echo_port = spawn_echo_server().await;
    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());
    let control = ControlApi::new(Arc::clone(&engine));
    let (mut browser, id) = open_relayed_connection(&engine, echo_port).await;

    let _ = next_event(&mut events).await; // new-connection
    engine.ready(id).expect("ready");

    let response = control
        .handle(
            ControlRequest::new(Method::POST, format!("/ws/{id}/client/message/binary"))
                .with_body("0a1b"),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let message = timeout(EVENT_TIMEOUT, browser.next())
        .await
        .expect("browser frame within timeout")
        .expect("browser stream open")
        .expect("browser frame");
    assert_eq!(message, Message::Binary(vec![0x0a, 0x1b].into()));

    // Malformed hex is rejected before any bytes reach the wire.
    let response = control
        .handle(
            ControlRequest::new(Method::POST, format!("/ws/{id}/client/message/binary"))
                .with_body("zz"),
        )
        .await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.body_str().contains("\"success\":false"));
    assert!(response.body_str().contains("hex"));

    // The rejection is also surfaced as an error event.
    match next_event(&mut events).await {
        ProxyEvent::Error { message, .. } => assert!(message.starts_with("[client]")),
        other => panic!("expected error event, got {other:?}"),
    }
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn status_reports_live_connection_and_counts_client_bytes() {
    init_tracing();

    let echo_port = spawn_echo_server().await;
    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());
    let control = ControlApi::new(Arc::clone(&engine));
    let (mut browser, id) = open_relayed_connection(&engine, echo_port).await;

    let _ = next_event(&mut events).await; // new-connection

    let response = control
        .handle(ControlRequest::new(Method::GET, format!("/ws/{id}/")))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let body: serde_json::Value = serde_json::from_str(response.body_str()).expect("json body");
    assert_eq!(body["connected"], true);
    assert_eq!(body["readyState"], 1);
    assert_eq!(body["bytesReceived"], 0);
    assert_eq!(body["protocolVersion"], 13);
    assert!(body["url"].as_str().unwrap().starts_with("ws://127.0.0.1"));

    engine.ready(id).expect("ready");
    browser
        .send(Message::Text("abcd".into()))
        .await
        .expect("browser send");
    let _ = next_event(&mut events).await; // data

    let response = control
        .handle(ControlRequest::new(Method::GET, format!("/ws/{id}/")))
        .await;
    let body: serde_json::Value = serde_json::from_str(response.body_str()).expect("json body");
    assert_eq!(body["bytesReceived"], 4);
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn close_emits_single_event_and_second_close_is_noop() {
    init_tracing();

    let echo_port = spawn_echo_server().await;
    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());
    let control = ControlApi::new(Arc::clone(&engine));
    let (mut browser, id) = open_relayed_connection(&engine, echo_port).await;

    let _ = next_event(&mut events).await; // new-connection
    engine.ready(id).expect("ready");

    browser.close(None).await.expect("browser close");

    match next_event(&mut events).await {
        ProxyEvent::CloseConnection { sender, id: event_id } => {
            assert_eq!(sender, Side::Client);
            assert_eq!(event_id, id);
        }
        other => panic!("expected close-connection, got {other:?}"),
    }

    // The record is gone: status reports disconnected, a second close is
    // a no-op for the event stream.
    let response = control
        .handle(ControlRequest::new(Method::GET, format!("/ws/{id}/")))
        .await;
    assert_eq!(response.body_str(), "{\"connected\":false}");

    assert!(engine.close(id, Side::Client, None, None).is_err());
    expect_quiet(&mut events).await;
}

#[tokio::test]
async fn send_after_close_is_404() {
    init_tracing();

    let echo_port = spawn_echo_server().await;
    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());
    let control = ControlApi::new(Arc::clone(&engine));
    let (mut browser, id) = open_relayed_connection(&engine, echo_port).await;

    let _ = next_event(&mut events).await; // new-connection
    engine.ready(id).expect("ready");

    browser.close(None).await.expect("browser close");
    let _ = next_event(&mut events).await; // close-connection

    let response = control
        .handle(
            ControlRequest::new(Method::POST, format!("/ws/{id}/server/message/text"))
                .with_body("late"),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Pairing Failure
// ============================================================================

#[tokio::test]
async fn pairing_failure_reports_error_and_never_registers() {
    init_tracing();

    // A port with nothing listening on it.
    let dead_port = {
        let probe = TcpListener::bind("127.0.0.1:0").await.expect("bind probe");
        probe.local_addr().expect("local addr").port()
    };

    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());

    let entry = TcpListener::bind("127.0.0.1:0").await.expect("bind entry");
    let entry_port = entry.local_addr().expect("local addr").port();

    let browser_task = tokio::spawn(async move {
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{entry_port}/")).await
    });

    let (stream, _) = entry.accept().await.expect("accept entry");
    let client = tokio_tungstenite::accept_async(stream)
        .await
        .expect("upgrade entry");

    let result = engine
        .accept_upgraded(client, UpgradeInfo::new(format!("http://127.0.0.1:{dead_port}/")))
        .await;
    assert!(result.is_err());

    match next_event(&mut events).await {
        ProxyEvent::Error { message, .. } => assert!(message.starts_with("[server]")),
        other => panic!("expected error event, got {other:?}"),
    }

    assert!(engine.registry().is_empty());
    expect_quiet(&mut events).await;

    let _ = browser_task.await;
}

// ============================================================================
// Session Lifecycle
// ============================================================================

#[tokio::test]
async fn ids_increase_within_a_session_and_restart_after_stop() {
    init_tracing();

    let echo_port = spawn_echo_server().await;
    let (engine, mut events) = RelayEngine::new(ProxyConfig::default());

    let (_browser_a, id_a) = open_relayed_connection(&engine, echo_port).await;
    let (_browser_b, id_b) = open_relayed_connection(&engine, echo_port).await;
    assert_eq!(id_a, ConnectionId::from_u64(0));
    assert_eq!(id_b, ConnectionId::from_u64(1));

    let _ = next_event(&mut events).await; // new-connection a
    let _ = next_event(&mut events).await; // new-connection b

    engine.stop();

    // Both relay tasks close out.
    let mut closed = 0;
    while closed < 2 {
        if let ProxyEvent::CloseConnection { .. } = next_event(&mut events).await {
            closed += 1;
        }
    }
    assert!(engine.registry().is_empty());

    // A fresh session begins a fresh id sequence.
    let (_browser_c, id_c) = open_relayed_connection(&engine, echo_port).await;
    assert_eq!(id_c, ConnectionId::from_u64(0));
}
