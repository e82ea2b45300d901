//! Correlation Table (SPEC_FULL.md §4.C): maps a relay-scoped request id to the client that
//! owns it, so a response from the extension can be rewritten back to the client's original id.
//!
//! Directly generalizes the teacher's `cdp::transport::TransportTask` pending-request map:
//! same `HashMap<u64, _>` + deadline-sweep shape, but the record now carries the owning
//! `ClientId` and the client's original id instead of a local `oneshot::Sender`, since the
//! reply has to travel back out over a socket rather than resolve an in-process future.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::relay::ClientId;

/// A single in-flight command forwarded to the extension, awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub client_id: ClientId,
    pub original_id: u64,
    pub method: String,
    pub deadline: Instant,
    pub session_id: Option<String>,
}

/// Maps relay-scoped ids to [`PendingCommand`]s. Owned exclusively by the `RelayActor`.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    next_relay_id: u64,
    pending: HashMap<u64, PendingCommand>,
}

impl CorrelationTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_relay_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate a fresh relay id and register the pending command under it.
    pub fn insert(
        &mut self,
        client_id: ClientId,
        original_id: u64,
        method: String,
        session_id: Option<String>,
        deadline: Instant,
    ) -> u64 {
        let relay_id = self.next_relay_id;
        self.next_relay_id += 1;
        self.pending.insert(
            relay_id,
            PendingCommand {
                client_id,
                original_id,
                method,
                deadline,
                session_id,
            },
        );
        relay_id
    }

    /// Remove and return the pending command for a relay id, if any (on matching response).
    pub fn remove(&mut self, relay_id: u64) -> Option<PendingCommand> {
        self.pending.remove(&relay_id)
    }

    /// The earliest deadline across all pending commands, used to drive the sweep timer.
    #[must_use]
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every pending command whose deadline has passed.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<(u64, PendingCommand)> {
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|p| (id, p)))
            .collect()
    }

    /// Remove and return every pending command owned by `client_id` (on client disconnect).
    pub fn drain_client(&mut self, client_id: ClientId) -> Vec<(u64, PendingCommand)> {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.client_id == client_id)
            .map(|(&id, _)| id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|p| (id, p)))
            .collect()
    }

    /// Remove and return every pending command (on extension loss or shutdown).
    pub fn drain_all(&mut self) -> Vec<(u64, PendingCommand)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[test]
    fn insert_allocates_monotonic_relay_ids() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let a = table.insert(ClientId(1), 10, "Page.navigate".into(), None, now);
        let b = table.insert(ClientId(1), 11, "Page.navigate".into(), None, now);
        assert!(b > a);
    }

    #[test]
    fn remove_returns_and_clears_entry() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let relay_id = table.insert(ClientId(1), 10, "Page.navigate".into(), None, now);
        let pending = table.remove(relay_id).unwrap();
        assert_eq!(pending.original_id, 10);
        assert!(table.remove(relay_id).is_none());
    }

    #[test]
    fn sweep_expired_only_removes_past_deadlines() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let expired_id = table.insert(ClientId(1), 1, "m".into(), None, now);
        let live_id = table.insert(ClientId(1), 2, "m".into(), None, now + Duration::from_secs(60));

        let expired = table.sweep_expired(now + Duration::from_millis(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, expired_id);
        assert!(table.remove(live_id).is_some());
    }

    #[test]
    fn drain_client_only_removes_that_clients_commands() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        table.insert(ClientId(1), 1, "m".into(), None, now);
        table.insert(ClientId(2), 2, "m".into(), None, now);

        let drained = table.drain_client(ClientId(1));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.client_id, ClientId(1));
        assert_eq!(table.drain_all().len(), 1);
    }

    #[test]
    fn earliest_deadline_tracks_minimum() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        table.insert(ClientId(1), 1, "m".into(), None, now + Duration::from_secs(30));
        table.insert(ClientId(1), 2, "m".into(), None, now + Duration::from_secs(5));
        assert_eq!(table.earliest_deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn earliest_deadline_none_when_empty() {
        let table = CorrelationTable::new();
        assert!(table.earliest_deadline().is_none());
    }
}
