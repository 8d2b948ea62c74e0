//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a client and the relay expose at one point in time.
//! Invariants operate on snapshots rather than live state so every check sees
//! the same moment.

use std::collections::BTreeSet;

use revline_core::{ConnectionState, RoomId, UserId};

/// Snapshot of the entire simulation.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no clients).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot from multiple clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }
}

/// Snapshot of a single client's observable state.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Client index in the world.
    pub id: usize,
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Cleared after shutdown.
    pub alive: bool,
    /// Current connect attempt.
    pub attempt: u32,
    /// Configured attempt limit.
    pub max_attempts: u32,
    /// Room the client believes it is in.
    pub current_room: Option<RoomId>,
    /// Typing set held by the client.
    pub typing: BTreeSet<(RoomId, UserId)>,
    /// Typing set rebuilt from the events observers received.
    pub observed_typing: BTreeSet<(RoomId, UserId)>,
    /// Transports the relay holds open for this client.
    pub live_transports: usize,
}

impl ClientSnapshot {
    /// Idle, disconnected client.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: ConnectionState::Disconnected,
            alive: true,
            attempt: 0,
            max_attempts: 1,
            current_room: None,
            typing: BTreeSet::new(),
            observed_typing: BTreeSet::new(),
            live_transports: 0,
        }
    }
}
