//! CDP wire-format types.
//!
//! Mirrors the teacher's `cdp::types` split (a raw deserialize-everything struct plus a
//! `classify()` step) but on both sides of the relay: clients send plain CDP, the extension
//! sends plain CDP *plus* the `forwardCDPEvent`/`log`/`pong` out-of-band wrapper methods.
//! Payloads (`params`, `result`) stay opaque `serde_json::Value` per the design note in
//! SPEC_FULL.md §9 — the relay inspects `id`/`method`/`sessionId` and nothing else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A CDP protocol error payload, `{"code": ..., "message": ...}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
}

impl ProtocolError {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// `{code: -32000, message: "browser not connected"}`
pub const ERR_BROWSER_NOT_CONNECTED: (i64, &str) = (-32000, "browser not connected");
/// `{code: -32000, message: "browser disconnected"}`
pub const ERR_BROWSER_DISCONNECTED: (i64, &str) = (-32000, "browser disconnected");
/// `{code: -32000, message: "relay timeout"}`
pub const ERR_RELAY_TIMEOUT: (i64, &str) = (-32000, "relay timeout");
/// `{code: -32000, message: "extension busy"}`
pub const ERR_EXTENSION_BUSY: (i64, &str) = (-32000, "extension busy");
/// `{code: -32000, message: "connection closed"}`
pub const ERR_CONNECTION_CLOSED: (i64, &str) = (-32000, "connection closed");
/// `{code: -32000, message: "shutdown"}`
pub const ERR_SHUTDOWN: (i64, &str) = (-32000, "shutdown");
/// `{code: -32001, message: "session not owned"}`
pub const ERR_SESSION_NOT_OWNED: (i64, &str) = (-32001, "session not owned");
/// `{code: -32602, message: "no such target"}`
pub const ERR_NO_SUCH_TARGET: (i64, &str) = (-32602, "no such target");

/// Build a client-facing error reply frame `{"id": id, "error": {"code": ..., "message": ...}}`.
#[must_use]
pub fn error_reply(id: u64, err: (i64, &str)) -> Value {
    serde_json::json!({
        "id": id,
        "error": { "code": err.0, "message": err.1 },
    })
}

/// Build a client-facing error reply frame from an owned message, for errors whose text isn't
/// one of the fixed constants above (e.g. relayed verbatim from the extension).
#[must_use]
pub fn error_reply_owned(id: u64, code: i64, message: &str) -> Value {
    serde_json::json!({
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// Build a client-facing success reply frame `{"id": id, "result": result}`.
#[must_use]
pub fn success_reply(id: u64, result: Value) -> Value {
    serde_json::json!({ "id": id, "result": result })
}

/// Build an event frame `{"method": ..., "sessionId"?: ..., "params": ...}` for delivery to a
/// client.
#[must_use]
pub fn event_frame(method: &str, session_id: Option<&str>, params: Value) -> Value {
    match session_id {
        Some(sid) => serde_json::json!({ "method": method, "sessionId": sid, "params": params }),
        None => serde_json::json!({ "method": method, "params": params }),
    }
}

// ---------------------------------------------------------------------------
// Inbound from a client on /cdp
// ---------------------------------------------------------------------------

/// A raw inbound client frame before validation. All fields optional so a malformed frame can
/// still be classified well enough to produce a best-effort error reply (see SPEC_FULL.md §7,
/// error kind 2).
#[derive(Debug, Deserialize)]
pub struct RawClientMessage {
    pub id: Option<u64>,
    pub method: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub params: Option<Value>,
}

/// A well-formed client command: has both `id` and `method`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCommand {
    pub id: u64,
    pub method: String,
    pub session_id: Option<String>,
    pub params: Option<Value>,
}

impl RawClientMessage {
    /// Validate into a [`ClientCommand`]. Returns `Err(Some(id))` if `id` was parseable but
    /// `method` was missing (so the caller can still send a best-effort error reply), or
    /// `Err(None)` if not even `id` was present (nothing to reply to, matches real CDP leniency).
    pub fn into_command(self) -> Result<ClientCommand, Option<u64>> {
        match (self.id, self.method) {
            (Some(id), Some(method)) => Ok(ClientCommand {
                id,
                method,
                session_id: self.session_id,
                params: self.params,
            }),
            (Some(id), None) => Err(Some(id)),
            (None, _) => Err(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound to the extension (relay-id rewritten commands)
// ---------------------------------------------------------------------------

/// A command forwarded to the extension with the relay-scoped id substituted in.
#[derive(Debug, Serialize)]
pub struct ExtensionCommand {
    pub id: u64,
    pub method: String,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

// ---------------------------------------------------------------------------
// Inbound from the extension on /extension
// ---------------------------------------------------------------------------

/// Raw inbound extension frame before classification. The extension speaks CDP responses for
/// forwarded commands, plus three out-of-band `method`s: `forwardCDPEvent`, `log`, `pong`.
#[derive(Debug, Deserialize)]
pub struct RawExtensionMessage {
    pub id: Option<u64>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<ProtocolError>,
}

/// The unwrapped payload of a `forwardCDPEvent` message.
#[derive(Debug, Deserialize)]
pub struct ForwardedEventParams {
    pub method: String,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub params: Value,
}

/// The payload of a `log` out-of-band message.
#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub level: String,
    #[serde(default)]
    pub args: Value,
}

/// The payload of the extension's handshake `targetInfo` announcement (SPEC_FULL.md §9 — the
/// relay's resolution of the open question about how the extension announces its target; see
/// DESIGN.md).
#[derive(Debug, Deserialize)]
pub struct TargetInfoParams {
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

pub enum ExtensionMessage {
    /// A response to a relay-forwarded command, still carrying the relay-scoped id.
    Response {
        id: u64,
        result: Result<Value, ProtocolError>,
    },
    /// An unwrapped CDP event to route via the Session Router.
    ForwardedEvent {
        method: String,
        session_id: Option<String>,
        params: Value,
    },
    /// Forwarded to the relay's logger; never reaches a client.
    Log(LogParams),
    /// Keepalive acknowledgement.
    Pong,
    /// The extension's handshake announcement of the page it exposes.
    TargetInfo(TargetInfoParams),
    /// Anything else: unrecognized out-of-band method, ignored.
    Unrecognized,
}

impl RawExtensionMessage {
    /// Classify a raw extension frame. Returns `None` only when the frame is structurally
    /// unclassifiable (neither `id` nor `method` present) — a protocol error for the trusted
    /// extension producer (SPEC_FULL.md §7, error kind 2).
    #[must_use]
    pub fn classify(self) -> Option<ExtensionMessage> {
        if let Some(id) = self.id {
            let result = if let Some(error) = self.error {
                Err(error)
            } else {
                Ok(self.result.unwrap_or(Value::Null))
            };
            return Some(ExtensionMessage::Response { id, result });
        }

        let method = self.method?;
        match method.as_str() {
            "forwardCDPEvent" => {
                let params = self.params.unwrap_or(Value::Null);
                match serde_json::from_value::<ForwardedEventParams>(params) {
                    Ok(p) => Some(ExtensionMessage::ForwardedEvent {
                        method: p.method,
                        session_id: p.session_id,
                        params: p.params,
                    }),
                    Err(_) => Some(ExtensionMessage::Unrecognized),
                }
            }
            "log" => {
                let params = self.params.unwrap_or(Value::Null);
                match serde_json::from_value::<LogParams>(params) {
                    Ok(p) => Some(ExtensionMessage::Log(p)),
                    Err(_) => Some(ExtensionMessage::Unrecognized),
                }
            }
            "pong" => Some(ExtensionMessage::Pong),
            "targetInfo" => {
                let params = self.params.unwrap_or(Value::Null);
                match serde_json::from_value::<TargetInfoParams>(params) {
                    Ok(p) => Some(ExtensionMessage::TargetInfo(p)),
                    Err(_) => Some(ExtensionMessage::Unrecognized),
                }
            }
            _ => Some(ExtensionMessage::Unrecognized),
        }
    }
}

/// Methods that get the 60 s "long command" deadline instead of the default 30 s
/// (SPEC_FULL.md §4.C).
#[must_use]
pub fn is_long_command(method: &str) -> bool {
    matches!(method, "Page.navigate" | "Runtime.evaluate")
        || method.starts_with("Page.captureScreenshot")
        || method.to_ascii_lowercase().contains("screenshot")
}

/// Allocate a fresh 32-hex-character session id (SPEC_FULL.md §4.E).
#[must_use]
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
