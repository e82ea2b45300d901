//! Auth & Origin Gate (SPEC_FULL.md §4.A): runs inside the `accept_hdr_async` callback so a
//! rejected connection never completes the WebSocket handshake — the client gets a plain HTTP
//! 401/403, not a closed socket.
//!
//! Grounded on `examples/other_examples/86a67758_bestony-actionbook__...extension_bridge.rs.rs`'s
//! `handle_connection`, which inspects the upgrade `Request` inside the same kind of callback to
//! reject by Origin before accepting. The constant-time token compare follows that file's use of
//! `subtle::ConstantTimeEq` for the hello-handshake token check.

use subtle::ConstantTimeEq;
use tokio_tungstenite::tungstenite::http::Request;

/// Why a connection attempt was rejected, for logging — never includes the offered token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoToken,
    BadToken,
    NoOrigin,
    BadOrigin,
}

impl RejectReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoToken => "no-token",
            Self::BadToken => "bad-token",
            Self::NoOrigin => "no-origin",
            Self::BadOrigin => "bad-origin",
        }
    }
}

/// Extract the `token` query parameter from a `/cdp` upgrade request's URI.
fn query_token(req: &Request<()>) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}

/// Constant-time comparison so timing doesn't leak how many leading bytes of a guessed token
/// matched.
fn tokens_match(offered: &str, configured: &str) -> bool {
    offered.as_bytes().ct_eq(configured.as_bytes()).into()
}

/// Validate a `/cdp` upgrade request against the configured token.
///
/// # Errors
///
/// Returns the rejection reason if no token is configured... actually, when `configured_token`
/// is `None` the gate is open (no auth configured) and this always returns `Ok(())`.
pub fn check_client_token(req: &Request<()>, configured_token: Option<&str>) -> Result<(), RejectReason> {
    let Some(configured) = configured_token else {
        return Ok(());
    };
    match query_token(req) {
        Some(offered) if tokens_match(&offered, configured) => Ok(()),
        Some(_) => Err(RejectReason::BadToken),
        None => Err(RejectReason::NoToken),
    }
}

/// Validate an `/extension` upgrade request's `Origin` header against the configured
/// `chrome-extension://<id>` allowlist. Returns the matched extension id.
///
/// # Errors
///
/// Returns the rejection reason if the header is missing, malformed, or names an id not on the
/// allowlist.
pub fn check_extension_origin(
    req: &Request<()>,
    allowed_ids: &[String],
) -> Result<String, RejectReason> {
    let origin = req
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .ok_or(RejectReason::NoOrigin)?;

    let id = origin
        .strip_prefix("chrome-extension://")
        .ok_or(RejectReason::BadOrigin)?;

    if allowed_ids.iter().any(|allowed| allowed == id) {
        Ok(id.to_string())
    } else {
        Err(RejectReason::BadOrigin)
    }
}
