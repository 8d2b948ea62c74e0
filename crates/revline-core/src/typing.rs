//! Typing indicators.
//!
//! Outbound: the local user's typing signal is relayed as-is, without
//! debounce. Inbound: peers' signals maintain a per-room set of who is typing.
//! A peer that stops sending signals (closed tab, lost connection) would stay
//! in the set forever, so entries expire after [`TypingConfig::expiry`]
//! without a refresh.

use std::{collections::BTreeMap, fmt::Debug, ops::Sub, time::Duration};

use revline_proto::{OutboundCommand, RoomId, UserId, UserTyping};

use crate::connection::{ConnectionAction, ConnectionManager};

/// Time a typing entry lives without a refresh.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(5);

/// Typing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingConfig {
    /// Entry lifetime without refresh
    pub expiry: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { expiry: DEFAULT_TYPING_EXPIRY }
    }
}

/// A peer currently typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry<I> {
    /// Room the peer is typing in
    pub room_id: RoomId,
    /// The peer
    pub user_id: UserId,
    /// Display name from the last signal
    pub user_nickname: String,
    /// Last `isTyping=true` signal
    pub last_seen: I,
}

/// Why an entry left the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Peer sent `isTyping=false`
    Signal,
    /// No refresh within the expiry
    Expired,
    /// Connection torn down or lost
    Cleared,
}

/// Observable change to the typing set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingChange {
    /// Peer started typing
    Started {
        /// Room
        room_id: RoomId,
        /// Peer
        user_id: UserId,
        /// Display name
        user_nickname: String,
    },
    /// Peer stopped typing
    Stopped {
        /// Room
        room_id: RoomId,
        /// Peer
        user_id: UserId,
        /// Why
        reason: StopReason,
    },
}

/// Who is typing where.
#[derive(Debug, Clone)]
pub struct TypingTracker<I> {
    config: TypingConfig,
    self_id: Option<UserId>,
    entries: BTreeMap<(RoomId, UserId), TypingEntry<I>>,
}

impl<I> TypingTracker<I>
where
    I: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration>,
{
    /// Empty tracker. `self_id` is used to drop echoes of our own signals.
    pub fn new(config: TypingConfig, self_id: Option<UserId>) -> Self {
        Self { config, self_id, entries: BTreeMap::new() }
    }

    /// Replace the local user id (session change).
    pub fn set_self(&mut self, self_id: Option<UserId>) {
        self.self_id = self_id;
    }

    /// Relay the local user's typing state for `room_id`.
    pub fn send_typing_status(
        &self,
        conn: &ConnectionManager<I>,
        room_id: RoomId,
        is_typing: bool,
    ) -> Option<ConnectionAction> {
        conn.send(OutboundCommand::Typing { room_id, is_typing })
    }

    /// Apply a peer's typing signal.
    ///
    /// Returns a change only when set membership changes; a refresh of an
    /// existing entry just moves its `last_seen`.
    pub fn handle_user_typing(&mut self, event: &UserTyping, now: I) -> Option<TypingChange> {
        if self.self_id.as_ref() == Some(&event.user_id) {
            return None;
        }

        let key = (event.room_id.clone(), event.user_id.clone());

        if !event.is_typing {
            return self.entries.remove(&key).map(|entry| TypingChange::Stopped {
                room_id: entry.room_id,
                user_id: entry.user_id,
                reason: StopReason::Signal,
            });
        }

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_seen = now;
            entry.user_nickname.clone_from(&event.user_nickname);
            return None;
        }

        self.entries.insert(key, TypingEntry {
            room_id: event.room_id.clone(),
            user_id: event.user_id.clone(),
            user_nickname: event.user_nickname.clone(),
            last_seen: now,
        });

        Some(TypingChange::Started {
            room_id: event.room_id.clone(),
            user_id: event.user_id.clone(),
            user_nickname: event.user_nickname.clone(),
        })
    }

    /// Evict entries not refreshed within the expiry.
    pub fn expire(&mut self, now: I) -> Vec<TypingChange> {
        let expiry = self.config.expiry;
        let mut changes = Vec::new();

        self.entries.retain(|_, entry| {
            let alive = now - entry.last_seen < expiry;
            if !alive {
                tracing::debug!(room_id = %entry.room_id, user_id = %entry.user_id, "typing expired");
                changes.push(TypingChange::Stopped {
                    room_id: entry.room_id.clone(),
                    user_id: entry.user_id.clone(),
                    reason: StopReason::Expired,
                });
            }
            alive
        });

        changes
    }

    /// Empty every room. Used on teardown and reconnect.
    ///
    /// Returns one change per removed entry so observers drop them too.
    pub fn clear(&mut self) -> Vec<TypingChange> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|entry| TypingChange::Stopped {
                room_id: entry.room_id,
                user_id: entry.user_id,
                reason: StopReason::Cleared,
            })
            .collect()
    }

    /// Peers typing in `room_id`, ordered by user id.
    pub fn typing_in(&self, room_id: &RoomId) -> Vec<&TypingEntry<I>> {
        self.entries.values().filter(|entry| &entry.room_id == room_id).collect()
    }

    /// Every entry, ordered by room then user.
    pub fn entries(&self) -> impl Iterator<Item = &TypingEntry<I>> {
        self.entries.values()
    }

    /// Whether nobody is typing anywhere.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries across all rooms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
