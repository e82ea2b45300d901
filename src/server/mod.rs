//! TCP accept loop, WebSocket upgrade handling for `/cdp` and `/extension`, the plain-HTTP
//! `GET /extension/status` route, and graceful shutdown.
//!
//! The accept loop and shutdown race are grounded on the actionbook bridge example's `serve()`
//! (`tokio::select!` over the accept loop and a signal future); the per-connection reader/writer
//! split is the same shape as the teacher's `TransportTask` (one task reads the socket and
//! forwards into a channel, the actor's own writer side owns sending).

pub mod auth;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::{Request, Response, StatusCode};
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::relay::{ActorMessage, RelayHandle};

/// Bind the configured host:port.
///
/// Split out from [`serve_on`] so tests can bind an ephemeral port (`:0`) and read back the
/// actual address before handing the listener to the accept loop.
///
/// # Errors
///
/// Returns [`io::Error`] if the configured host:port cannot be bound.
pub async fn bind(config: &ResolvedConfig) -> io::Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "cdp-relay listening");
    Ok(listener)
}

/// Bind and serve until a shutdown signal is received.
///
/// # Errors
///
/// Returns [`io::Error`] if the configured host:port cannot be bound.
pub async fn serve(config: Arc<ResolvedConfig>, relay: RelayHandle) -> io::Result<()> {
    let listener = bind(&config).await?;
    serve_on(listener, config, relay).await
}

/// How long `serve_on` waits for already-open connections to observe their close frame and exit
/// cleanly before force-terminating the stragglers (SPEC_FULL.md §4.G).
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Run the accept loop against an already-bound listener until a shutdown signal is received.
pub async fn serve_on(
    listener: TcpListener,
    config: Arc<ResolvedConfig>,
    relay: RelayHandle,
) -> io::Result<()> {
    let shutdown_signal = wait_for_shutdown_signal();
    tokio::pin!(shutdown_signal);

    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };
                let config = Arc::clone(&config);
                let relay = relay.clone();
                connections.spawn(async move {
                    if let Err(err) = handle_connection(stream, config, relay).await {
                        warn!(%peer, %err, "connection handling failed");
                    }
                });
            }
            () = &mut shutdown_signal => {
                info!("shutdown signal received");
                let _ = relay.send(ActorMessage::Shutdown).await;
                break;
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
        while connections.join_next().await.is_some() {}
    })
    .await
    .is_ok();

    if !drained {
        warn!(
            stragglers = connections.len(),
            "grace period elapsed, force-terminating remaining connections"
        );
        connections.shutdown().await;
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// A connection is either a plain-HTTP status request or a WebSocket upgrade; peek at the first
/// bytes to tell which, since both arrive on the same listener.
async fn handle_connection(
    mut stream: TcpStream,
    config: Arc<ResolvedConfig>,
    relay: RelayHandle,
) -> io::Result<()> {
    let mut peek_buf = [0u8; 4096];
    let n = peek_stream(&mut stream, &mut peek_buf).await?;
    let head = &peek_buf[..n];

    if is_status_request(head) {
        return serve_status(stream, &relay).await;
    }

    if head.starts_with(b"GET /cdp") {
        handle_client_upgrade(stream, &config, &relay).await;
    } else if head.starts_with(b"GET /extension") {
        handle_extension_upgrade(stream, &config, &relay).await;
    } else {
        respond_not_found(stream).await?;
    }
    Ok(())
}

async fn peek_stream(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    stream.peek(buf).await
}

fn is_status_request(head: &[u8]) -> bool {
    head.starts_with(b"GET /extension/status")
}

async fn handle_client_upgrade(stream: TcpStream, config: &ResolvedConfig, relay: &RelayHandle) {
    let token = config.token.clone();
    let callback = move |req: &Request<()>, resp: Response<()>| {
        match auth::check_client_token(req, token.as_deref()) {
            Ok(()) => Ok(resp),
            Err(reason) => {
                warn!(reason = reason.as_str(), "rejected /cdp connection");
                Err(Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .body(Some(reason.as_str().to_string()))
                    .unwrap())
            }
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    let (mut sink, mut stream) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(256);
    let pong_reply_tx = outbound_tx.clone();
    let (reply_tx, reply_rx) = oneshot::channel();

    if relay
        .send(ActorMessage::ClientConnect {
            outbound: outbound_tx,
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        return;
    }
    let Ok(client_id) = reply_rx.await else { return };

    let writer_relay = relay.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let is_text = matches!(msg, Message::Text(_));
            let len = match &msg {
                Message::Text(t) => t.len(),
                Message::Binary(b) => b.len(),
                _ => 0,
            };
            if sink.send(msg).await.is_err() {
                break;
            }
            if is_text {
                let _ = writer_relay
                    .send(ActorMessage::ClientDrained { id: client_id, bytes: len })
                    .await;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let _ = relay
                    .send(ActorMessage::ClientFrame {
                        id: client_id,
                        text: text.to_string(),
                    })
                    .await;
            }
            Ok(Message::Pong(_)) => {
                let _ = relay.send(ActorMessage::ClientPong { id: client_id }).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = pong_reply_tx.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    writer.abort();
    let _ = relay.send(ActorMessage::ClientDisconnected { id: client_id }).await;
}

async fn handle_extension_upgrade(stream: TcpStream, config: &ResolvedConfig, relay: &RelayHandle) {
    let extension_ids = config.extension_ids.clone();
    let matched_id = Arc::new(std::sync::Mutex::new(None));
    let matched_id_cb = Arc::clone(&matched_id);

    let callback = move |req: &Request<()>, resp: Response<()>| {
        match auth::check_extension_origin(req, &extension_ids) {
            Ok(id) => {
                *matched_id_cb.lock().unwrap() = Some(id);
                Ok(resp)
            }
            Err(reason) => {
                warn!(reason = reason.as_str(), "rejected /extension connection");
                Err(Response::builder()
                    .status(StatusCode::FORBIDDEN)
                    .body(Some(reason.as_str().to_string()))
                    .unwrap())
            }
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    let Some(extension_id) = matched_id.lock().unwrap().take() else {
        return;
    };

    let (mut sink, mut stream) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(256);
    let (reply_tx, reply_rx) = oneshot::channel();
    let close_tx = outbound_tx.clone();

    if relay
        .send(ActorMessage::ExtensionConnect {
            extension_id,
            outbound: outbound_tx,
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        return;
    }
    let Ok(generation) = reply_rx.await else { return };

    let writer_relay = relay.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let is_text = matches!(msg, Message::Text(_));
            let len = match &msg {
                Message::Text(t) => t.len(),
                Message::Binary(b) => b.len(),
                _ => 0,
            };
            if sink.send(msg).await.is_err() {
                break;
            }
            if is_text {
                let _ = writer_relay
                    .send(ActorMessage::ExtensionDrained { generation, bytes: len })
                    .await;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let _ = relay
                    .send(ActorMessage::ExtensionFrame {
                        generation,
                        text: text.to_string(),
                    })
                    .await;
            }
            Ok(Message::Binary(_)) => {
                warn!("binary frame from extension, closing with 1002");
                let _ = close_tx
                    .send(Message::Close(Some(
                        tokio_tungstenite::tungstenite::protocol::CloseFrame {
                            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Protocol,
                            reason: "binary-frame".into(),
                        },
                    )))
                    .await;
                break;
            }
            Ok(Message::Pong(_)) => {
                let _ = relay.send(ActorMessage::ExtensionPong { generation }).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = close_tx.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    writer.abort();
    let _ = relay.send(ActorMessage::ExtensionDisconnected { generation }).await;
}

async fn serve_status(mut stream: TcpStream, relay: &RelayHandle) -> io::Result<()> {
    // Drain the request so the peeked bytes aren't re-read by a client expecting a clean response.
    let mut discard = [0u8; 4096];
    let _ = stream.read(&mut discard).await;

    let (reply_tx, reply_rx) = oneshot::channel();
    let body = match relay.send(ActorMessage::StatusQuery { reply: reply_tx }).await {
        Ok(()) => match reply_rx.await {
            Ok(status) => serde_json::json!({
                "connected": status.extension_connected,
                "clients": status.client_count,
                "extensionId": status.extension_id,
            }),
            Err(_) => serde_json::json!({ "connected": false, "clients": 0 }),
        },
        Err(_) => serde_json::json!({ "connected": false, "clients": 0 }),
    };
    let body = body.to_string();

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn respond_not_found(mut stream: TcpStream) -> io::Result<()> {
    let mut discard = [0u8; 4096];
    let _ = stream.read(&mut discard).await;
    let body = "not found";
    let response = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
