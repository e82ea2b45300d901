//! Session Router (SPEC_FULL.md §4.D): owns `sessionId -> ClientId` and the reverse index,
//! asserts ownership on outbound commands, and resolves the recipient(s) for inbound events.
//!
//! The two-map-with-reverse-index shape follows
//! `examples/other_examples/5ac565a2_unicity-astrid-astrid__...inbound_router.rs.rs`'s
//! `sessions`/`connector_sessions` pair, adapted from `RwLock`-guarded shared maps to plain
//! `HashMap`s owned by the single-writer `RelayActor` (no locking needed: the actor is the only
//! task that ever touches these maps).

use std::collections::{HashMap, HashSet};

use crate::relay::ClientId;

#[derive(Debug, Default)]
pub struct SessionRouter {
    owner: HashMap<String, ClientId>,
    owned_by_client: HashMap<ClientId, HashSet<String>>,
}

impl SessionRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session binding, owned by `client_id`.
    pub fn bind(&mut self, session_id: String, client_id: ClientId) {
        self.owned_by_client
            .entry(client_id)
            .or_default()
            .insert(session_id.clone());
        self.owner.insert(session_id, client_id);
    }

    /// Remove a session binding (on detach).
    pub fn unbind(&mut self, session_id: &str) {
        if let Some(client_id) = self.owner.remove(session_id)
            && let Some(set) = self.owned_by_client.get_mut(&client_id)
        {
            set.remove(session_id);
        }
    }

    /// Remove every session owned by a client (on disconnect), returning the removed ids.
    pub fn remove_client(&mut self, client_id: ClientId) -> Vec<String> {
        let Some(sessions) = self.owned_by_client.remove(&client_id) else {
            return Vec::new();
        };
        for session_id in &sessions {
            self.owner.remove(session_id);
        }
        sessions.into_iter().collect()
    }

    /// Remove every session binding (on extension loss — bindings don't survive a new producer).
    pub fn clear_all(&mut self) {
        self.owner.clear();
        self.owned_by_client.clear();
    }

    #[must_use]
    pub fn owner_of(&self, session_id: &str) -> Option<ClientId> {
        self.owner.get(session_id).copied()
    }

    /// Assert that `client_id` owns `session_id`. Used to reject commands referencing a session
    /// the caller doesn't own (SPEC_FULL.md §4.D, error `-32001 "session not owned"`).
    #[must_use]
    pub fn is_owned_by(&self, session_id: &str, client_id: ClientId) -> bool {
        self.owner.get(session_id) == Some(&client_id)
    }

    #[must_use]
    pub fn sessions_of(&self, client_id: ClientId) -> HashSet<String> {
        self.owned_by_client
            .get(&client_id)
            .cloned()
            .unwrap_or_default()
    }
}
