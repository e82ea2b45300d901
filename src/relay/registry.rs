//! Connection Registry (SPEC_FULL.md §4.B): tracks every admitted `/cdp` client and the single
//! `/extension` producer, their outbound channels, and their backpressure counters.
//!
//! `outbound` is an `mpsc::Sender<Message>` into that connection's writer task, same split as the
//! teacher's `TransportHandle` (one task owns the socket, everyone else talks to it over a
//! channel) — generalized here to N client writer tasks plus one extension writer task instead of
//! the teacher's single persistent connection.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::relay::{ClientId, ExtensionGeneration};

/// A single admitted `/cdp` client.
#[derive(Debug)]
pub struct ClientRecord {
    pub outbound: mpsc::Sender<Message>,
    pub queued_bytes: usize,
    pub queued_frames: usize,
    pub auto_attach: bool,
    pub wait_for_debugger: bool,
    /// Pings sent since the last sign of life from this client; reset on any inbound frame.
    /// Two unanswered pings (~2x the ping interval) marks the connection dead (SPEC_FULL.md §4.G).
    pub missed_pings: u32,
}

impl ClientRecord {
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            outbound,
            queued_bytes: 0,
            queued_frames: 0,
            auto_attach: false,
            wait_for_debugger: false,
            missed_pings: 0,
        }
    }
}

/// The current `/extension` producer, if one is connected.
#[derive(Debug)]
pub struct ExtensionRecord {
    pub generation: ExtensionGeneration,
    pub extension_id: String,
    pub outbound: mpsc::Sender<Message>,
    pub queued_bytes: usize,
    pub queued_frames: usize,
    pub handshake_complete: bool,
    pub connected_at: Instant,
    /// Pings sent since the last sign of life from the extension; see [`ClientRecord::missed_pings`].
    pub missed_pings: u32,
}

/// Owns every live connection. Exclusively mutated by the `RelayActor` — no locking.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_client_id: u64,
    next_generation: u64,
    clients: HashMap<ClientId, ClientRecord>,
    extension: Option<ExtensionRecord>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new client, returning its freshly allocated id.
    pub fn add_client(&mut self, outbound: mpsc::Sender<Message>) -> ClientId {
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;
        self.clients.insert(id, ClientRecord::new(outbound));
        id
    }

    pub fn remove_client(&mut self, id: ClientId) -> Option<ClientRecord> {
        self.clients.remove(&id)
    }

    #[must_use]
    pub fn client(&self, id: ClientId) -> Option<&ClientRecord> {
        self.clients.get(&id)
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut ClientRecord> {
        self.clients.get_mut(&id)
    }

    pub fn client_ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Install a new extension producer, replacing any existing one.
    ///
    /// Returns `(new_generation, displaced)`: the caller is responsible for closing the displaced
    /// record's socket with code 1000 reason "replaced" and resolving its in-flight commands —
    /// this method only swaps the registry entry (SPEC_FULL.md §4.B, "newest extension wins").
    pub fn set_extension(
        &mut self,
        extension_id: String,
        outbound: mpsc::Sender<Message>,
        connected_at: Instant,
    ) -> (ExtensionGeneration, Option<ExtensionRecord>) {
        let generation = ExtensionGeneration(self.next_generation);
        self.next_generation += 1;
        let displaced = self.extension.replace(ExtensionRecord {
            generation,
            extension_id,
            outbound,
            queued_bytes: 0,
            queued_frames: 0,
            handshake_complete: false,
            connected_at,
            missed_pings: 0,
        });
        (generation, displaced)
    }

    /// Remove the extension record if `generation` still matches the current one (guards against
    /// a stale disconnect/timeout racing a newer replacement).
    pub fn remove_extension_if_current(
        &mut self,
        generation: ExtensionGeneration,
    ) -> Option<ExtensionRecord> {
        if self.extension.as_ref().is_some_and(|e| e.generation == generation) {
            self.extension.take()
        } else {
            None
        }
    }

    #[must_use]
    pub fn extension(&self) -> Option<&ExtensionRecord> {
        self.extension.as_ref()
    }

    pub fn extension_mut(&mut self) -> Option<&mut ExtensionRecord> {
        self.extension.as_mut()
    }

    #[must_use]
    pub fn extension_connected(&self) -> bool {
        self.extension.is_some()
    }
}
