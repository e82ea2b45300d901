//! The relay core: a single-writer actor that owns every piece of shared state (Connection
//! Registry, Correlation Table, Session Router) and the synthetic CDP responder it consults.
//!
//! Generalizes the teacher's single-connection `cdp::transport::TransportTask` (one socket, one
//! owner task, a command channel) up to many connections: every reader task for every `/cdp`
//! client and the one `/extension` producer forwards frames into the actor over the same
//! `mpsc::Sender<ActorMessage>`, and the actor is the only code that ever touches the registry,
//! the correlation table, or the session router — so none of them need a lock.

pub mod actor;
pub mod correlation;
pub mod registry;
pub mod session;
pub mod synthetic;

pub use actor::{ActorMessage, RelayActor, RelayHandle, StatusSnapshot, spawn as spawn_relay};

/// Identifies one `/cdp` client connection for the lifetime of its socket. Never reused: a
/// reconnecting client gets a new id, same as the teacher's transport generation counters avoid
/// confusing a stale connection with its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

/// Identifies one `/extension` connection attempt. Bumped every time a new extension socket is
/// admitted, including replacing an existing one, so stale responses/timeouts referencing an old
/// generation can be told apart from the current producer (SPEC_FULL.md §4.B "newest extension
/// wins").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionGeneration(pub u64);
