//! Room membership.
//!
//! Tracks the single room the user is currently in. Joining a second room
//! does not leave the first one on the server; callers that switch rooms
//! leave explicitly.

use std::{fmt::Debug, ops::Sub, time::Duration};

use revline_proto::{OutboundCommand, RoomId};

use crate::connection::{ConnectionAction, ConnectionManager};

/// Active membership in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMembership<I> {
    /// Room joined
    pub room_id: RoomId,
    /// When the join was sent
    pub joined_at: I,
}

/// The currently joined room, if any.
#[derive(Debug, Clone)]
pub struct RoomSession<I> {
    current: Option<RoomMembership<I>>,
}

impl<I> Default for RoomSession<I> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<I> RoomSession<I>
where
    I: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration>,
{
    /// Empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `room_id`.
    ///
    /// No-op while not connected: there is no transport to subscribe on and
    /// the membership would not survive teardown anyway.
    pub fn join_room(
        &mut self,
        conn: &ConnectionManager<I>,
        room_id: RoomId,
        now: I,
    ) -> Option<ConnectionAction> {
        if !conn.is_connected() {
            tracing::debug!(%room_id, "join ignored, not connected");
            return None;
        }

        let action = conn.send(OutboundCommand::JoinRoom { room_id: room_id.clone() })?;
        tracing::info!(%room_id, "joined room");
        self.current = Some(RoomMembership { room_id, joined_at: now });
        Some(action)
    }

    /// Leave `room_id`.
    ///
    /// The membership is cleared only if it matches. While disconnected the
    /// command cannot be delivered, so nothing is emitted.
    pub fn leave_room(
        &mut self,
        conn: &ConnectionManager<I>,
        room_id: &RoomId,
    ) -> Option<ConnectionAction> {
        if self.current_room() == Some(room_id) {
            tracing::info!(%room_id, "left room");
            self.current = None;
        }

        conn.send(OutboundCommand::LeaveRoom { room_id: room_id.clone() })
    }

    /// Drop the membership without telling the server. Used on teardown.
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Room currently joined.
    pub fn current_room(&self) -> Option<&RoomId> {
        self.current.as_ref().map(|m| &m.room_id)
    }

    /// Full membership record.
    pub fn membership(&self) -> Option<&RoomMembership<I>> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{connection::ConnectionConfig, session::AuthToken};

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn connected(now: Instant) -> ConnectionManager<Instant> {
        let mut conn = ConnectionManager::new(ConnectionConfig::default());
        conn.connect(AuthToken::new("t"), now);
        conn.transport_opened(conn.generation());
        conn
    }

    #[test]
    fn join_requires_connection() {
        let t0 = Instant::now();
        let conn = ConnectionManager::new(ConnectionConfig::default());
        let mut session = RoomSession::new();

        assert!(session.join_room(&conn, room("r1"), t0).is_none());
        assert_eq!(session.current_room(), None);
    }

    #[test]
    fn join_emits_command() {
        let t0 = Instant::now();
        let conn = connected(t0);
        let mut session = RoomSession::new();

        let action = session.join_room(&conn, room("r1"), t0);

        assert!(matches!(
            action,
            Some(ConnectionAction::Send { command: OutboundCommand::JoinRoom { ref room_id }, .. })
                if room_id.as_str() == "r1"
        ));
        assert_eq!(session.current_room(), Some(&room("r1")));
        assert_eq!(session.membership().map(|m| m.joined_at), Some(t0));
    }

    #[test]
    fn join_second_room_replaces_without_leave() {
        let t0 = Instant::now();
        let conn = connected(t0);
        let mut session = RoomSession::new();

        session.join_room(&conn, room("r1"), t0);
        let action = session.join_room(&conn, room("r2"), t0);

        assert!(matches!(
            action,
            Some(ConnectionAction::Send { command: OutboundCommand::JoinRoom { .. }, .. })
        ));
        assert_eq!(session.current_room(), Some(&room("r2")));
    }

    #[test]
    fn leave_other_room_keeps_membership() {
        let t0 = Instant::now();
        let conn = connected(t0);
        let mut session = RoomSession::new();
        session.join_room(&conn, room("r1"), t0);

        let action = session.leave_room(&conn, &room("r2"));

        assert!(action.is_some());
        assert_eq!(session.current_room(), Some(&room("r1")));
    }

    #[test]
    fn leave_while_disconnected_clears_silently() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let mut session = RoomSession::new();
        session.join_room(&conn, room("r1"), t0);
        conn.disconnect("test");

        assert!(session.leave_room(&conn, &room("r1")).is_none());
        assert_eq!(session.current_room(), None);
    }
}
