//! Synthetic CDP Responder (SPEC_FULL.md §4.E): answers the handful of target-discovery methods
//! locally so unmodified CDP clients can drive the one page the extension exposes, without ever
//! contacting the extension.
//!
//! These are pure, parameter-in/value-out functions — the `RelayActor` (§4.F/D) is responsible
//! for the side effects (creating `SessionBinding`s, recording per-client `autoAttach` flags) since
//! those require the Session Router and Connection Registry, which this module doesn't own.
//! Mirrors the spirit of the teacher's `connection.rs::ManagedSession` (dispatch on method name,
//! build a typed response) but these methods never touch a socket.

use serde_json::{Value, json};

use crate::protocol::ERR_NO_SUCH_TARGET;

/// The single page the extension exposes. Created from the extension's handshake announcement;
/// torn down when the extension disconnects (SPEC_FULL.md §3).
#[derive(Debug, Clone)]
pub struct SyntheticTarget {
    pub target_id: String,
    pub title: String,
    pub url: String,
    pub browser_context_id: String,
}

impl SyntheticTarget {
    #[must_use]
    pub fn new(target_id: String, title: String, url: String) -> Self {
        Self {
            browser_context_id: format!("{target_id}-ctx"),
            target_id,
            title,
            url,
        }
    }

    /// The CDP `TargetInfo` JSON shape for this target.
    #[must_use]
    pub fn to_target_info(&self) -> Value {
        json!({
            "targetId": self.target_id,
            "type": "page",
            "title": self.title,
            "url": self.url,
            "attached": true,
            "canAccessOpener": false,
            "browserContextId": self.browser_context_id,
        })
    }
}

/// Methods the relay answers synthetically, never forwarded to the extension.
pub const SYNTHETIC_METHODS: &[&str] = &[
    "Browser.getVersion",
    "Target.setDiscoverTargets",
    "Target.getTargets",
    "Target.setAutoAttach",
    "Target.attachToTarget",
    "Target.detachFromTarget",
];

#[must_use]
pub fn is_synthetic(method: &str) -> bool {
    SYNTHETIC_METHODS.contains(&method)
}

/// `Browser.getVersion` — constant values derived from the extension handshake, or sensible
/// defaults when no extension has ever connected.
#[must_use]
pub fn browser_get_version(target: Option<&SyntheticTarget>) -> Value {
    let _ = target; // reserved: a future handshake could carry real product/useragent strings
    json!({
        "protocolVersion": "1.3",
        "product": "cdp-relay",
        "revision": "",
        "userAgent": "cdp-relay",
        "jsVersion": "",
    })
}

/// `Target.getTargets` — the list is empty until an extension has announced a target.
#[must_use]
pub fn get_targets(target: Option<&SyntheticTarget>) -> Value {
    let infos: Vec<Value> = target.map(SyntheticTarget::to_target_info).into_iter().collect();
    json!({ "targetInfos": infos })
}

/// Parsed `Target.setDiscoverTargets` params.
#[must_use]
pub fn parse_discover(params: Option<&Value>) -> bool {
    params
        .and_then(|p| p.get("discover"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Parsed `Target.setAutoAttach` params: `(auto_attach, wait_for_debugger)`.
#[must_use]
pub fn parse_auto_attach(params: Option<&Value>) -> (bool, bool) {
    let auto_attach = params
        .and_then(|p| p.get("autoAttach"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let wait_for_debugger = params
        .and_then(|p| p.get("waitForDebugger"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    (auto_attach, wait_for_debugger)
}

/// `Target.attachToTarget` — validates the requested `targetId` against the `SyntheticTarget`.
///
/// # Errors
///
/// Returns `Err(ERR_NO_SUCH_TARGET)` if no extension is attached or the id doesn't match.
pub fn validate_attach_target(
    params: Option<&Value>,
    target: Option<&SyntheticTarget>,
) -> Result<(), (i64, &'static str)> {
    let requested = params.and_then(|p| p.get("targetId")).and_then(Value::as_str);
    match (requested, target) {
        (Some(requested), Some(t)) if requested == t.target_id => Ok(()),
        _ => Err(ERR_NO_SUCH_TARGET),
    }
}

/// The `sessionId` a `Target.detachFromTarget` command names.
#[must_use]
pub fn parse_detach_session(params: Option<&Value>) -> Option<String> {
    params
        .and_then(|p| p.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
