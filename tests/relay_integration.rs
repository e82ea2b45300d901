//! End-to-end integration tests: bind the relay on an ephemeral port, connect real
//! `tokio-tungstenite` client and extension sockets against it, and assert on the wire traffic.
//!
//! Shaped after the teacher's `tests/cdp_integration.rs` mock-server pattern, inverted: there the
//! test process played the server and a `CdpClient` was the thing under test; here the relay
//! itself (actor + server) is the thing under test, and the test process plays both roles
//! (client and extension) over real sockets.

use std::sync::Arc;
use std::time::Duration;

use cdp_relay::config::{ConfigFile, Overrides, resolve_config};
use cdp_relay::relay;
use cdp_relay::server;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EXTENSION_ID: &str = "jfeammnjpkecdekppnclgkkffahnhfhe";

/// Start a relay instance on an ephemeral port and return its base `ws://host:port` URL.
async fn start_relay() -> String {
    start_relay_with(Overrides::default()).await
}

async fn start_relay_with(overrides: Overrides) -> String {
    start_relay_with_handle(overrides).await.0
}

async fn start_relay_with_handle(mut overrides: Overrides) -> (String, relay::RelayHandle) {
    overrides.port = Some(0);
    let config = resolve_config(&ConfigFile::default(), &overrides, None).unwrap();
    let listener = server::bind(&config).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay_handle = relay::spawn_relay(config.clone());
    tokio::spawn(server::serve_on(listener, Arc::new(config), relay_handle.clone()));
    (format!("ws://{addr}"), relay_handle)
}

async fn connect_client(base: &str) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(format!("{base}/cdp")).await.unwrap();
    ws
}

async fn connect_extension(base: &str) -> WsStream {
    let mut req = format!("{base}/extension").into_client_request().unwrap();
    req.headers_mut().insert(
        "origin",
        format!("chrome-extension://{EXTENSION_ID}").parse().unwrap(),
    );
    let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn announce_target(ext: &mut WsStream) {
    send_json(
        ext,
        json!({
            "method": "targetInfo",
            "params": { "targetId": "t1", "title": "Example", "url": "https://example.com" },
        }),
    )
    .await;
}

#[tokio::test]
async fn synthetic_get_targets_before_extension_connects() {
    let base = start_relay().await;
    let mut client = connect_client(&base).await;

    send_json(&mut client, json!({"id": 1, "method": "Target.getTargets"})).await;
    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["targetInfos"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn synthetic_get_targets_after_handshake() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(&mut client, json!({"id": 1, "method": "Target.getTargets"})).await;
    let reply = recv_json(&mut client).await;
    let infos = reply["result"]["targetInfos"].as_array().unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0]["targetId"], "t1");
}

#[tokio::test]
async fn command_forwarded_without_extension_gets_browser_not_connected() {
    let base = start_relay().await;
    let mut client = connect_client(&base).await;

    send_json(&mut client, json!({"id": 7, "method": "Page.navigate", "params": {"url": "https://x"}})).await;
    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["message"], "browser not connected");
}

#[tokio::test]
async fn command_round_trips_through_extension_with_rewritten_id() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(
        &mut client,
        json!({"id": 42, "method": "Runtime.evaluate", "params": {"expression": "1+1"}}),
    )
    .await;

    // The extension sees a relay-scoped id, not the client's original id.
    let forwarded = recv_json(&mut ext).await;
    assert_eq!(forwarded["method"], "Runtime.evaluate");
    let relay_id = forwarded["id"].as_u64().unwrap();
    assert_ne!(relay_id, 42);

    send_json(&mut ext, json!({"id": relay_id, "result": {"result": {"value": 2}}})).await;

    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 42);
    assert_eq!(reply["result"]["result"]["value"], 2);
}

#[tokio::test]
async fn attach_then_command_requires_session_ownership() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut owner = connect_client(&base).await;
    send_json(&mut owner, json!({"id": 1, "method": "Target.attachToTarget", "params": {"targetId": "t1"}})).await;
    let attach_event = recv_json(&mut owner).await;
    assert_eq!(attach_event["method"], "Target.attachedToTarget");
    let attach_reply = recv_json(&mut owner).await;
    let session_id = attach_reply["result"]["sessionId"].as_str().unwrap().to_string();
    assert_eq!(session_id.len(), 32);

    let mut stranger = connect_client(&base).await;
    send_json(
        &mut stranger,
        json!({"id": 2, "method": "Page.navigate", "sessionId": session_id, "params": {"url": "https://x"}}),
    )
    .await;
    let reply = recv_json(&mut stranger).await;
    assert_eq!(reply["error"]["message"], "session not owned");
}

#[tokio::test]
async fn attach_to_target_emits_attached_event_before_its_reply() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(
        &mut client,
        json!({"id": 2, "method": "Target.attachToTarget", "params": {"targetId": "t1", "flatten": true}}),
    )
    .await;

    let event = recv_json(&mut client).await;
    assert_eq!(event["method"], "Target.attachedToTarget");
    let session_id = event["params"]["sessionId"].as_str().unwrap().to_string();
    assert_eq!(session_id.len(), 32);

    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"]["sessionId"], session_id);
}

#[tokio::test]
async fn detach_from_target_emits_detached_event() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(&mut client, json!({"id": 1, "method": "Target.attachToTarget", "params": {"targetId": "t1"}})).await;
    let _attach_event = recv_json(&mut client).await;
    let attach_reply = recv_json(&mut client).await;
    let session_id = attach_reply["result"]["sessionId"].as_str().unwrap().to_string();

    send_json(
        &mut client,
        json!({"id": 2, "method": "Target.detachFromTarget", "params": {"sessionId": session_id}}),
    )
    .await;

    let event = recv_json(&mut client).await;
    assert_eq!(event["method"], "Target.detachedFromTarget");
    assert_eq!(event["params"]["sessionId"], session_id);

    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn attach_to_unknown_target_fails() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(&mut client, json!({"id": 1, "method": "Target.attachToTarget", "params": {"targetId": "nope"}})).await;
    let reply = recv_json(&mut client).await;
    assert_eq!(reply["error"]["message"], "no such target");
}

#[tokio::test]
async fn forwarded_event_routes_only_to_owning_session() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut owner = connect_client(&base).await;
    send_json(&mut owner, json!({"id": 1, "method": "Target.attachToTarget", "params": {"targetId": "t1"}})).await;
    let _attach_event = recv_json(&mut owner).await;
    let attach_reply = recv_json(&mut owner).await;
    let session_id = attach_reply["result"]["sessionId"].as_str().unwrap().to_string();

    let mut bystander = connect_client(&base).await;
    send_json(&mut bystander, json!({"id": 1, "method": "Target.getTargets"})).await;
    let _ = recv_json(&mut bystander).await;

    send_json(
        &mut ext,
        json!({
            "method": "forwardCDPEvent",
            "params": {
                "method": "Page.loadEventFired",
                "sessionId": session_id,
                "params": {"timestamp": 1.0},
            },
        }),
    )
    .await;

    let event = recv_json(&mut owner).await;
    assert_eq!(event["method"], "Page.loadEventFired");
    assert_eq!(event["sessionId"], session_id);

    // Bystander should not receive it — race a short timeout against its next frame.
    let got_extra = tokio::time::timeout(Duration::from_millis(200), bystander.next()).await;
    assert!(got_extra.is_err(), "bystander should not receive another client's session event");
}

#[tokio::test]
async fn extension_replacement_invalidates_old_sessions() {
    let base = start_relay().await;
    let mut ext1 = connect_extension(&base).await;
    announce_target(&mut ext1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(&mut client, json!({"id": 1, "method": "Target.attachToTarget", "params": {"targetId": "t1"}})).await;
    let _attach_event = recv_json(&mut client).await;
    let attach_reply = recv_json(&mut client).await;
    let session_id = attach_reply["result"]["sessionId"].as_str().unwrap().to_string();

    // A command sent right before the replacement is genuinely in-flight (held by the first
    // extension, which never answers it) when the second extension displaces it.
    send_json(
        &mut client,
        json!({"id": 2, "method": "Runtime.evaluate", "sessionId": session_id, "params": {"expression": "1"}}),
    )
    .await;
    let _in_flight = recv_json(&mut ext1).await;

    // A second extension connecting displaces the first.
    let mut ext2 = connect_extension(&base).await;
    announce_target(&mut ext2).await;

    // The displaced extension is told why, with the relay's own close code and reason.
    let close = ext1.next().await.unwrap().unwrap();
    match close {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1000);
            assert_eq!(frame.reason, "replaced");
        }
        other => panic!("expected a close frame from the displaced extension, got {other:?}"),
    }

    // The command that was in flight on the old extension resolves with a disconnect error rather
    // than hanging forever.
    let in_flight_reply = recv_json(&mut client).await;
    assert_eq!(in_flight_reply["id"], 2);
    assert_eq!(in_flight_reply["error"]["message"], "browser disconnected");

    tokio::time::sleep(Duration::from_millis(50)).await;

    send_json(
        &mut client,
        json!({"id": 3, "method": "Page.navigate", "sessionId": session_id, "params": {"url": "https://x"}}),
    )
    .await;
    let reply = recv_json(&mut client).await;
    assert_eq!(reply["error"]["message"], "session not owned");
}

#[tokio::test]
async fn command_without_extension_reply_times_out() {
    let mut overrides = Overrides::default();
    overrides.command_timeout_ms = Some(50);
    let base = start_relay_with(overrides).await;

    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(&mut client, json!({"id": 1, "method": "Page.enable", "params": {}})).await;

    // The extension receives the forwarded command but never answers it. Page.enable isn't on the
    // long-command list, so it's bound by `command_timeout_ms`, not `long_command_timeout_ms`.
    let _forwarded = recv_json(&mut ext).await;

    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["error"]["message"], "relay timeout");
}

#[tokio::test]
async fn shutdown_closes_connections_with_going_away_and_drains_pending_commands() {
    let (base, handle) = start_relay_with_handle(Overrides::default()).await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(
        &mut client,
        json!({"id": 1, "method": "Runtime.evaluate", "params": {"expression": "1"}}),
    )
    .await;
    let _forwarded = recv_json(&mut ext).await;

    handle.send(relay::ActorMessage::Shutdown).await.unwrap();

    // The in-flight command is drained with a shutdown error rather than left hanging.
    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["error"]["message"], "shutdown");

    // Every open connection is closed with 1001 "shutting-down".
    let close = client.next().await.unwrap().unwrap();
    match close {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1001);
            assert_eq!(frame.reason, "shutting-down");
        }
        other => panic!("expected a going-away close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn status_endpoint_reports_extension_and_client_counts() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    let _client = connect_client(&base).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let host_port = base.trim_start_matches("ws://");
    let mut stream = TcpStream::connect(host_port).await.unwrap();
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream
        .write_all(b"GET /extension/status HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).await.unwrap();

    assert!(body.contains("200 OK"));
    let json_start = body.find('{').unwrap();
    let status: Value = serde_json::from_str(&body[json_start..]).unwrap();
    assert_eq!(status["connected"], true);
    assert_eq!(status["clients"], 1);
    assert_eq!(status["extensionId"], EXTENSION_ID);
}

#[tokio::test]
async fn client_connection_is_rejected_with_bad_token() {
    let mut overrides = Overrides::default();
    overrides.token = Some("secret".to_string());
    let base = start_relay_with(overrides).await;

    let req = format!("{base}/cdp?token=wrong").into_client_request().unwrap();
    let result = tokio_tungstenite::connect_async(req).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn client_connection_is_admitted_with_correct_token() {
    let mut overrides = Overrides::default();
    overrides.token = Some("secret".to_string());
    let base = start_relay_with(overrides).await;

    let result = tokio_tungstenite::connect_async(format!("{base}/cdp?token=secret")).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn set_discover_targets_emits_target_created_event() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(&mut client, json!({"id": 1, "method": "Target.setDiscoverTargets", "params": {"discover": true}})).await;

    // The relay emits the synthetic event before acknowledging the command that triggered it.
    let event = recv_json(&mut client).await;
    assert_eq!(event["method"], "Target.targetCreated");
    assert_eq!(event["params"]["targetInfo"]["targetId"], "t1");

    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn set_auto_attach_binds_a_session_and_emits_attached_event() {
    let base = start_relay().await;
    let mut ext = connect_extension(&base).await;
    announce_target(&mut ext).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&base).await;
    send_json(
        &mut client,
        json!({"id": 1, "method": "Target.setAutoAttach", "params": {"autoAttach": true, "waitForDebugger": false}}),
    )
    .await;

    let event = recv_json(&mut client).await;
    assert_eq!(event["method"], "Target.attachedToTarget");
    let session_id = event["params"]["sessionId"].as_str().unwrap().to_string();
    assert_eq!(session_id.len(), 32);
    assert_eq!(event["params"]["waitingForDebugger"], false);

    let reply = recv_json(&mut client).await;
    assert_eq!(reply["id"], 1);

    // The bound session is usable for forwarding commands.
    send_json(
        &mut client,
        json!({"id": 2, "method": "Runtime.evaluate", "sessionId": session_id, "params": {"expression": "1"}}),
    )
    .await;
    let forwarded = recv_json(&mut ext).await;
    assert_eq!(forwarded["sessionId"], session_id);
}

#[tokio::test]
async fn unresponsive_client_is_closed_after_missed_pings() {
    let mut overrides = Overrides::default();
    overrides.ping_interval_ms = Some(30);
    let base = start_relay_with(overrides).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/cdp")).await.unwrap();

    // Never reply to pings; tokio-tungstenite answers them automatically at the transport layer
    // only if we read frames, so simply stop reading and wait for the relay to give up and close.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "relay should close an unresponsive client within the timeout");
}

#[tokio::test]
async fn extension_connection_requires_allowlisted_origin() {
    let base = start_relay().await;
    let mut req = format!("{base}/extension").into_client_request().unwrap();
    req.headers_mut().insert("origin", "chrome-extension://not-on-the-list-0000000000".parse().unwrap());
    let result = tokio_tungstenite::connect_async(req).await;
    assert!(result.is_err());
}
