//! The `RelayActor`: the single task that owns the Connection Registry, Correlation Table,
//! Session Router, and Synthetic Target (SPEC_FULL.md §4.B–§4.F).
//!
//! Shaped after the teacher's `TransportTask::run` select loop — one `mpsc::Receiver` for inbound
//! work, a timer branch for deadline sweeps — generalized from one socket to N client sockets and
//! one extension socket multiplexed onto the same channel.

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ResolvedConfig;
use crate::protocol::{
    self, ClientCommand, ERR_BROWSER_DISCONNECTED, ERR_BROWSER_NOT_CONNECTED, ERR_CONNECTION_CLOSED,
    ERR_EXTENSION_BUSY, ERR_NO_SUCH_TARGET, ERR_RELAY_TIMEOUT, ERR_SESSION_NOT_OWNED, ERR_SHUTDOWN,
    ExtensionCommand, ExtensionMessage, RawExtensionMessage,
};
use crate::relay::correlation::CorrelationTable;
use crate::relay::registry::ConnectionRegistry;
use crate::relay::session::SessionRouter;
use crate::relay::synthetic::{self, SyntheticTarget};
use crate::relay::{ClientId, ExtensionGeneration};

/// The handshake grace period: an extension that never sends `targetInfo` within this window of
/// connecting is disconnected (SPEC_FULL.md §9, resolving the flagged open question).
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// How often the actor wakes up to drive WS-level pings and sweep dead connections/timeouts.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Work items delivered into the actor from every reader task and the HTTP status route.
pub enum ActorMessage {
    ClientConnect {
        outbound: mpsc::Sender<Message>,
        reply: oneshot::Sender<ClientId>,
    },
    ClientFrame {
        id: ClientId,
        text: String,
    },
    ClientDrained {
        id: ClientId,
        bytes: usize,
    },
    ClientDisconnected {
        id: ClientId,
    },
    /// A WS-level pong (or any other sign of life) was observed from a client.
    ClientPong {
        id: ClientId,
    },
    ExtensionConnect {
        extension_id: String,
        outbound: mpsc::Sender<Message>,
        reply: oneshot::Sender<ExtensionGeneration>,
    },
    ExtensionFrame {
        generation: ExtensionGeneration,
        text: String,
    },
    ExtensionDrained {
        generation: ExtensionGeneration,
        bytes: usize,
    },
    ExtensionDisconnected {
        generation: ExtensionGeneration,
    },
    /// A WS-level pong was observed from the extension.
    ExtensionPong {
        generation: ExtensionGeneration,
    },
    StatusQuery {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Shutdown,
}

/// A point-in-time view of relay state, for the `GET /extension/status` route (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub extension_connected: bool,
    pub extension_id: Option<String>,
    pub client_count: usize,
}

/// A cheaply clonable handle for feeding work into a running [`RelayActor`].
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<ActorMessage>,
}

impl RelayHandle {
    /// # Errors
    ///
    /// Returns an error if the actor task has already exited.
    pub async fn send(&self, msg: ActorMessage) -> Result<(), mpsc::error::SendError<ActorMessage>> {
        self.tx.send(msg).await
    }
}

/// Spawn the actor task and return a handle to it.
#[must_use]
pub fn spawn(config: ResolvedConfig) -> RelayHandle {
    let (tx, rx) = mpsc::channel(1024);
    let actor = RelayActor::new(config, rx);
    tokio::spawn(actor.run());
    RelayHandle { tx }
}

/// Tracks the 5s handshake grace period for the current extension generation.
struct HandshakeDeadline {
    generation: ExtensionGeneration,
    deadline: Instant,
}

pub struct RelayActor {
    config: ResolvedConfig,
    rx: mpsc::Receiver<ActorMessage>,
    registry: ConnectionRegistry,
    correlation: CorrelationTable,
    sessions: SessionRouter,
    target: Option<SyntheticTarget>,
    pending_handshake: Option<HandshakeDeadline>,
    next_ping: Instant,
}

impl RelayActor {
    fn new(config: ResolvedConfig, rx: mpsc::Receiver<ActorMessage>) -> Self {
        let next_ping = Instant::now() + Duration::from_millis(config.ping_interval_ms);
        Self {
            config,
            rx,
            registry: ConnectionRegistry::new(),
            correlation: CorrelationTable::new(),
            sessions: SessionRouter::new(),
            target: None,
            pending_handshake: None,
            next_ping,
        }
    }

    pub async fn run(mut self) {
        loop {
            let next_deadline = self.next_wakeup();
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(ActorMessage::Shutdown) | None => {
                            self.shutdown().await;
                            return;
                        }
                        Some(msg) => self.handle(msg).await,
                    }
                }
                () = tokio::time::sleep_until(next_deadline) => {
                    self.tick().await;
                }
            }
        }
    }

    fn next_wakeup(&self) -> Instant {
        let mut deadline = Instant::now() + TICK_INTERVAL;
        if let Some(d) = self.correlation.earliest_deadline() {
            deadline = deadline.min(d);
        }
        if let Some(handshake) = &self.pending_handshake {
            deadline = deadline.min(handshake.deadline);
        }
        deadline.min(self.next_ping)
    }

    async fn handle(&mut self, msg: ActorMessage) {
        match msg {
            ActorMessage::ClientConnect { outbound, reply } => {
                let id = self.registry.add_client(outbound);
                info!(client_id = id.0, "client connected");
                let _ = reply.send(id);
            }
            ActorMessage::ClientFrame { id, text } => {
                if let Some(client) = self.registry.client_mut(id) {
                    client.missed_pings = 0;
                }
                self.handle_client_frame(id, &text).await;
            }
            ActorMessage::ClientPong { id } => {
                if let Some(client) = self.registry.client_mut(id) {
                    client.missed_pings = 0;
                }
            }
            ActorMessage::ClientDrained { id, bytes } => {
                if let Some(client) = self.registry.client_mut(id) {
                    client.queued_bytes = client.queued_bytes.saturating_sub(bytes);
                    client.queued_frames = client.queued_frames.saturating_sub(1);
                }
            }
            ActorMessage::ClientDisconnected { id } => self.handle_client_disconnect(id).await,
            ActorMessage::ExtensionConnect {
                extension_id,
                outbound,
                reply,
            } => self.handle_extension_connect(extension_id, outbound, reply).await,
            ActorMessage::ExtensionFrame { generation, text } => {
                if let Some(ext) = self.registry.extension_mut()
                    && ext.generation == generation
                {
                    ext.missed_pings = 0;
                }
                self.handle_extension_frame(generation, &text).await;
            }
            ActorMessage::ExtensionPong { generation } => {
                if let Some(ext) = self.registry.extension_mut()
                    && ext.generation == generation
                {
                    ext.missed_pings = 0;
                }
            }
            ActorMessage::ExtensionDrained { generation, bytes } => {
                if let Some(ext) = self.registry.extension_mut()
                    && ext.generation == generation
                {
                    ext.queued_bytes = ext.queued_bytes.saturating_sub(bytes);
                    ext.queued_frames = ext.queued_frames.saturating_sub(1);
                }
            }
            ActorMessage::ExtensionDisconnected { generation } => {
                self.handle_extension_loss(generation, "disconnected").await;
            }
            ActorMessage::StatusQuery { reply } => {
                let snapshot = StatusSnapshot {
                    extension_connected: self.registry.extension_connected(),
                    extension_id: self.registry.extension().map(|e| e.extension_id.clone()),
                    client_count: self.registry.client_count(),
                };
                let _ = reply.send(snapshot);
            }
            ActorMessage::Shutdown => unreachable!("handled in run()"),
        }
    }

    async fn tick(&mut self) {
        let now = Instant::now();

        for (relay_id, pending) in self.correlation.sweep_expired(now) {
            debug!(relay_id, method = %pending.method, "command timed out");
            self.send_to_client(
                pending.client_id,
                protocol::error_reply(pending.original_id, ERR_RELAY_TIMEOUT),
            )
            .await;
        }

        if let Some(handshake) = &self.pending_handshake
            && handshake.deadline <= now
        {
            let generation = handshake.generation;
            warn!(generation = generation.0, "extension handshake timed out");
            self.close_extension(generation, 1002, "no-handshake").await;
            self.handle_extension_loss(generation, "no-handshake").await;
        }

        if now >= self.next_ping {
            self.next_ping = now + Duration::from_millis(self.config.ping_interval_ms);
            self.run_ping_sweep().await;
        }
    }

    /// Ping every open connection; a connection that hasn't answered its last two pings is
    /// considered dead and closed (SPEC_FULL.md §4.G, code "1006-equivalent" — the relay drops
    /// the socket rather than negotiating a clean close with an unresponsive peer).
    async fn run_ping_sweep(&mut self) {
        let mut dead_clients = Vec::new();
        for id in self.registry.client_ids().collect::<Vec<_>>() {
            let Some(client) = self.registry.client_mut(id) else {
                continue;
            };
            if client.missed_pings >= 2 {
                dead_clients.push(id);
                continue;
            }
            client.missed_pings += 1;
            let sender = client.outbound.clone();
            let _ = sender.send(Message::Ping(Vec::new().into())).await;
        }
        for id in dead_clients {
            warn!(client_id = id.0, "client unresponsive to pings, closing");
            if let Some(client) = self.registry.client(id) {
                let _ = client.outbound.send(Message::Close(None)).await;
            }
            self.handle_client_disconnect(id).await;
        }

        let mut dead_extension = None;
        if let Some(ext) = self.registry.extension_mut() {
            if ext.missed_pings >= 2 {
                dead_extension = Some(ext.generation);
            } else {
                ext.missed_pings += 1;
                let sender = ext.outbound.clone();
                let _ = sender.send(Message::Ping(Vec::new().into())).await;
            }
        }
        if let Some(generation) = dead_extension {
            warn!(generation = generation.0, "extension unresponsive to pings, closing");
            self.close_extension(generation, 1001, "unresponsive").await;
            self.handle_extension_loss(generation, "unresponsive").await;
        }
    }

    // -----------------------------------------------------------------
    // Client-side frame handling
    // -----------------------------------------------------------------

    async fn handle_client_frame(&mut self, id: ClientId, text: &str) {
        let raw: protocol::RawClientMessage = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(_) => return,
        };

        let command = match raw.into_command() {
            Ok(cmd) => cmd,
            Err(Some(bad_id)) => {
                self.send_to_client(
                    id,
                    protocol::error_reply(bad_id, (-32600, "missing method")),
                )
                .await;
                return;
            }
            Err(None) => return,
        };

        if synthetic::is_synthetic(&command.method) {
            self.handle_synthetic(id, command).await;
            return;
        }

        self.forward_command(id, command).await;
    }

    async fn handle_synthetic(&mut self, id: ClientId, command: ClientCommand) {
        let reply = match command.method.as_str() {
            "Browser.getVersion" => {
                protocol::success_reply(command.id, synthetic::browser_get_version(self.target.as_ref()))
            }
            "Target.setDiscoverTargets" => {
                let discover = synthetic::parse_discover(command.params.as_ref());
                let reply = protocol::success_reply(command.id, serde_json::json!({}));
                if discover && let Some(target) = self.target.clone() {
                    let event = protocol::event_frame(
                        "Target.targetCreated",
                        None,
                        serde_json::json!({ "targetInfo": target.to_target_info() }),
                    );
                    self.send_event_to_client(id, event).await;
                }
                reply
            }
            "Target.getTargets" => {
                protocol::success_reply(command.id, synthetic::get_targets(self.target.as_ref()))
            }
            "Target.setAutoAttach" => {
                let (auto_attach, wait_for_debugger) =
                    synthetic::parse_auto_attach(command.params.as_ref());
                if let Some(client) = self.registry.client_mut(id) {
                    client.auto_attach = auto_attach;
                    client.wait_for_debugger = wait_for_debugger;
                }
                let reply = protocol::success_reply(command.id, serde_json::json!({}));
                if auto_attach && let Some(target) = self.target.clone() {
                    let session_id = protocol::new_session_id();
                    self.sessions.bind(session_id.clone(), id);
                    let event = protocol::event_frame(
                        "Target.attachedToTarget",
                        None,
                        serde_json::json!({
                            "sessionId": session_id,
                            "targetInfo": target.to_target_info(),
                            "waitingForDebugger": wait_for_debugger,
                        }),
                    );
                    self.send_event_to_client(id, event).await;
                }
                reply
            }
            "Target.attachToTarget" => {
                match synthetic::validate_attach_target(command.params.as_ref(), self.target.as_ref())
                {
                    Ok(()) => {
                        let session_id = protocol::new_session_id();
                        self.sessions.bind(session_id.clone(), id);
                        let waiting_for_debugger =
                            self.registry.client(id).is_some_and(|c| c.wait_for_debugger);
                        if let Some(target) = self.target.clone() {
                            let event = protocol::event_frame(
                                "Target.attachedToTarget",
                                None,
                                serde_json::json!({
                                    "sessionId": session_id.clone(),
                                    "targetInfo": target.to_target_info(),
                                    "waitingForDebugger": waiting_for_debugger,
                                }),
                            );
                            self.send_event_to_client(id, event).await;
                        }
                        protocol::success_reply(
                            command.id,
                            serde_json::json!({ "sessionId": session_id }),
                        )
                    }
                    Err(err) => protocol::error_reply(command.id, err),
                }
            }
            "Target.detachFromTarget" => {
                match synthetic::parse_detach_session(command.params.as_ref()) {
                    Some(session_id) if self.sessions.is_owned_by(&session_id, id) => {
                        self.sessions.unbind(&session_id);
                        let event = protocol::event_frame(
                            "Target.detachedFromTarget",
                            None,
                            serde_json::json!({ "sessionId": session_id }),
                        );
                        self.send_event_to_client(id, event).await;
                        protocol::success_reply(command.id, serde_json::json!({}))
                    }
                    Some(_) => protocol::error_reply(command.id, ERR_SESSION_NOT_OWNED),
                    None => protocol::error_reply(command.id, ERR_NO_SUCH_TARGET),
                }
            }
            other => {
                warn!(method = other, "unreachable synthetic dispatch");
                protocol::error_reply(command.id, ERR_NO_SUCH_TARGET)
            }
        };
        self.send_to_client(id, reply).await;
    }

    async fn forward_command(&mut self, id: ClientId, command: ClientCommand) {
        if let Some(session_id) = &command.session_id
            && !self.sessions.is_owned_by(session_id, id)
        {
            self.send_to_client(id, protocol::error_reply(command.id, ERR_SESSION_NOT_OWNED))
                .await;
            return;
        }

        let Some(ext) = self.registry.extension() else {
            self.send_to_client(id, protocol::error_reply(command.id, ERR_BROWSER_NOT_CONNECTED))
                .await;
            return;
        };

        if ext.queued_frames >= self.config.max_client_queue_frames
            || ext.queued_bytes >= self.config.max_client_queue_bytes
        {
            self.send_to_client(id, protocol::error_reply(command.id, ERR_EXTENSION_BUSY))
                .await;
            return;
        }

        let timeout_ms = if protocol::is_long_command(&command.method) {
            self.config.long_command_timeout_ms
        } else {
            self.config.command_timeout_ms
        };
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        let relay_id = self.correlation.insert(
            id,
            command.id,
            command.method.clone(),
            command.session_id.clone(),
            deadline,
        );

        let outbound_command = ExtensionCommand {
            id: relay_id,
            method: command.method,
            session_id: command.session_id,
            params: command.params,
        };

        let Ok(text) = serde_json::to_string(&outbound_command) else {
            self.correlation.remove(relay_id);
            return;
        };

        self.send_to_extension(text).await;
    }

    async fn handle_client_disconnect(&mut self, id: ClientId) {
        self.registry.remove_client(id);
        for (relay_id, pending) in self.correlation.drain_client(id) {
            // The client that owned this command is already gone, so the synthesized "connection
            // closed" reply has nowhere to go — constructed anyway to resolve the PendingCommand
            // the same way every other teardown path does.
            let _ = protocol::error_reply(pending.original_id, ERR_CONNECTION_CLOSED);
            debug!(relay_id, method = %pending.method, "pending command resolved with connection-closed on client disconnect");
        }
        let orphaned = self.sessions.remove_client(id);
        for session_id in orphaned {
            if let Some(ext) = self.registry.extension() {
                let detach = serde_json::json!({
                    "method": "Target.detachFromTarget",
                    "params": { "sessionId": session_id },
                });
                if let Ok(text) = serde_json::to_string(&detach) {
                    let _ = ext.outbound.send(Message::Text(text.into())).await;
                }
            }
        }
        info!(client_id = id.0, "client disconnected");
    }

    // -----------------------------------------------------------------
    // Extension-side frame handling
    // -----------------------------------------------------------------

    async fn handle_extension_connect(
        &mut self,
        extension_id: String,
        outbound: mpsc::Sender<Message>,
        reply: oneshot::Sender<ExtensionGeneration>,
    ) {
        let now = Instant::now();
        let (generation, displaced) = self.registry.set_extension(extension_id, outbound, now);

        if let Some(old) = displaced {
            self.sessions.clear_all();
            for (_, pending) in self.correlation.drain_all() {
                self.send_to_client(
                    pending.client_id,
                    protocol::error_reply(pending.original_id, ERR_BROWSER_DISCONNECTED),
                )
                .await;
            }
            let _ = old
                .outbound
                .send(Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                    reason: "replaced".into(),
                })))
                .await;
            self.target = None;
        }

        self.pending_handshake = Some(HandshakeDeadline {
            generation,
            deadline: now + HANDSHAKE_TIMEOUT,
        });

        info!(generation = generation.0, "extension connected");
        let _ = reply.send(generation);
    }

    async fn handle_extension_frame(&mut self, generation: ExtensionGeneration, text: &str) {
        let Some(ext) = self.registry.extension() else {
            return;
        };
        if ext.generation != generation {
            return;
        }

        let raw: RawExtensionMessage = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(_) => {
                warn!(generation = generation.0, "malformed extension frame");
                self.close_extension(generation, 1002, "protocol-error").await;
                self.handle_extension_loss(generation, "protocol-error").await;
                return;
            }
        };

        let Some(classified) = raw.classify() else {
            warn!(generation = generation.0, "unclassifiable extension frame");
            self.close_extension(generation, 1002, "protocol-error").await;
            self.handle_extension_loss(generation, "protocol-error").await;
            return;
        };

        match classified {
            ExtensionMessage::Response { id: relay_id, result } => {
                if let Some(pending) = self.correlation.remove(relay_id) {
                    let frame = match result {
                        Ok(value) => protocol::success_reply(pending.original_id, value),
                        Err(err) => {
                            protocol::error_reply_owned(pending.original_id, err.code, &err.message)
                        }
                    };
                    self.send_to_client(pending.client_id, frame).await;
                } else {
                    debug!(relay_id, "response for unknown relay id dropped");
                }
            }
            ExtensionMessage::ForwardedEvent {
                method,
                session_id,
                params,
            } => {
                self.route_event(&method, session_id.as_deref(), params).await;
            }
            ExtensionMessage::Log(log) => {
                info!(level = %log.level, args = %log.args, "extension log");
            }
            ExtensionMessage::Pong => {
                // liveness already refreshed by the reader task observing any inbound frame
            }
            ExtensionMessage::TargetInfo(info) => {
                if self
                    .pending_handshake
                    .as_ref()
                    .is_some_and(|h| h.generation == generation)
                {
                    self.pending_handshake = None;
                }
                let target = SyntheticTarget::new(info.target_id, info.title, info.url);
                self.target = Some(target.clone());
                if let Some(ext) = self.registry.extension_mut() {
                    ext.handshake_complete = true;
                }
                info!(generation = generation.0, "extension handshake complete");

                // Clients that called Target.setAutoAttach before the target existed get attached
                // to it now, same as a client calling setAutoAttach after the target is already live.
                let auto_attach_clients: Vec<(ClientId, bool)> = self
                    .registry
                    .client_ids()
                    .filter_map(|cid| {
                        self.registry
                            .client(cid)
                            .filter(|c| c.auto_attach)
                            .map(|c| (cid, c.wait_for_debugger))
                    })
                    .collect();
                for (client_id, wait_for_debugger) in auto_attach_clients {
                    let session_id = protocol::new_session_id();
                    self.sessions.bind(session_id.clone(), client_id);
                    let event = protocol::event_frame(
                        "Target.attachedToTarget",
                        None,
                        serde_json::json!({
                            "sessionId": session_id,
                            "targetInfo": target.to_target_info(),
                            "waitingForDebugger": wait_for_debugger,
                        }),
                    );
                    self.send_event_to_client(client_id, event).await;
                }
            }
            ExtensionMessage::Unrecognized => {}
        }
    }

    async fn route_event(&mut self, method: &str, session_id: Option<&str>, params: serde_json::Value) {
        let frame = protocol::event_frame(method, session_id, params);
        match session_id {
            Some(session_id) => {
                if let Some(client_id) = self.sessions.owner_of(session_id) {
                    self.send_event_to_client(client_id, frame).await;
                } else {
                    debug!(session_id, method, "event for unowned session dropped");
                }
            }
            None => {
                let ids: Vec<ClientId> = self.registry.client_ids().collect();
                for client_id in ids {
                    self.send_event_to_client(client_id, frame.clone()).await;
                }
            }
        }
    }

    async fn handle_extension_loss(&mut self, generation: ExtensionGeneration, reason: &str) {
        let Some(removed) = self.registry.remove_extension_if_current(generation) else {
            return;
        };
        let _ = removed;
        self.target = None;
        self.sessions.clear_all();
        if self
            .pending_handshake
            .as_ref()
            .is_some_and(|h| h.generation == generation)
        {
            self.pending_handshake = None;
        }
        for (_, pending) in self.correlation.drain_all() {
            self.send_to_client(
                pending.client_id,
                protocol::error_reply(pending.original_id, ERR_BROWSER_DISCONNECTED),
            )
            .await;
        }
        info!(generation = generation.0, reason, "extension lost");
    }

    async fn close_extension(&self, generation: ExtensionGeneration, code: u16, reason: &'static str) {
        if let Some(ext) = self.registry.extension()
            && ext.generation == generation
        {
            let _ = ext
                .outbound
                .send(Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(code),
                    reason: reason.into(),
                })))
                .await;
        }
    }

    // -----------------------------------------------------------------
    // Shared send helpers
    // -----------------------------------------------------------------

    /// Send a command reply. Replies bypass the backpressure cap — a client that is slow to drain
    /// events still gets answers to the commands it already sent (SPEC_FULL.md §5).
    async fn send_to_client(&mut self, id: ClientId, frame: serde_json::Value) {
        let Ok(text) = serde_json::to_string(&frame) else {
            return;
        };
        let len = text.len();
        if let Some(client) = self.registry.client_mut(id) {
            let sender = client.outbound.clone();
            client.queued_bytes += len;
            client.queued_frames += 1;
            let _ = sender.send(Message::Text(text.into())).await;
        }
    }

    /// Send a CDP event. Subject to the per-client backpressure cap: once a client's queue is over
    /// threshold, further events to it are dropped silently (CDP has no flow-control vocabulary) —
    /// SPEC_FULL.md §5 "Backpressure drop".
    async fn send_event_to_client(&mut self, id: ClientId, frame: serde_json::Value) {
        let Some(client) = self.registry.client(id) else {
            return;
        };
        if client.queued_frames >= self.config.max_client_queue_frames
            || client.queued_bytes >= self.config.max_client_queue_bytes
        {
            debug!(client_id = id.0, "event dropped, client queue over threshold");
            return;
        }
        self.send_to_client(id, frame).await;
    }

    async fn send_to_extension(&mut self, text: String) {
        let len = text.len();
        if let Some(ext) = self.registry.extension_mut() {
            ext.queued_bytes += len;
            ext.queued_frames += 1;
            let sender = ext.outbound.clone();
            let _ = sender.send(Message::Text(text.into())).await;
        }
    }

    /// Graceful shutdown (SPEC_FULL.md §4.G): drain every in-flight command with a "shutdown"
    /// error, then close every connection with code 1001 ("going away"). The bounded wait for
    /// clean closures and the force-termination of stragglers happens in `server::serve_on`, which
    /// owns the per-connection tasks this method only asks to close.
    async fn shutdown(&mut self) {
        let ids: Vec<ClientId> = self.registry.client_ids().collect();
        for (_, pending) in self.correlation.drain_all() {
            self.send_to_client(pending.client_id, protocol::error_reply(pending.original_id, ERR_SHUTDOWN))
                .await;
        }
        let going_away = || {
            Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Away,
                reason: "shutting-down".into(),
            }))
        };
        for id in ids {
            if let Some(client) = self.registry.client(id) {
                let _ = client.outbound.send(going_away()).await;
            }
        }
        if let Some(ext) = self.registry.extension() {
            let _ = ext.outbound.send(going_away()).await;
        }
        info!("relay actor shut down");
    }
}
