//! Read receipts.
//!
//! Fire-and-forget: one `markAsRead` per batch, no acknowledgement and no
//! retry. A batch sent while disconnected is lost; the server recomputes read
//! state on the next explicit mark.

use std::{collections::HashSet, fmt::Debug, ops::Sub, time::Duration};

use revline_proto::{MessageId, OutboundCommand, RoomId};

use crate::connection::{ConnectionAction, ConnectionManager};

/// Emits read receipts.
#[derive(Debug, Clone, Default)]
pub struct ReadReceiptDispatcher {
    sent_batches: u64,
}

impl ReadReceiptDispatcher {
    /// New dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `message_ids` in `room_id` as read.
    ///
    /// Duplicate ids are collapsed, keeping first-seen order. An empty batch
    /// emits nothing.
    pub fn mark_as_read<I>(
        &mut self,
        conn: &ConnectionManager<I>,
        room_id: RoomId,
        message_ids: Vec<MessageId>,
    ) -> Option<ConnectionAction>
    where
        I: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration>,
    {
        let mut seen = HashSet::with_capacity(message_ids.len());
        let message_ids: Vec<MessageId> =
            message_ids.into_iter().filter(|id| seen.insert(id.clone())).collect();

        if message_ids.is_empty() {
            return None;
        }

        let count = message_ids.len();
        let action = conn.send(OutboundCommand::MarkAsRead { room_id, message_ids })?;
        self.sent_batches += 1;
        tracing::debug!(count, "read receipt sent");
        Some(action)
    }

    /// Batches handed to the transport so far.
    pub fn sent_batches(&self) -> u64 {
        self.sent_batches
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{connection::ConnectionConfig, session::AuthToken};

    fn ids(values: &[&str]) -> Vec<MessageId> {
        values.iter().map(|v| MessageId::new(*v).unwrap()).collect()
    }

    fn connected() -> ConnectionManager<Instant> {
        let mut conn = ConnectionManager::new(ConnectionConfig::default());
        conn.connect(AuthToken::new("t"), Instant::now());
        conn.transport_opened(conn.generation());
        conn
    }

    #[test]
    fn batch_is_deduplicated_in_order() {
        let conn = connected();
        let mut receipts = ReadReceiptDispatcher::new();

        let action = receipts.mark_as_read(&conn, RoomId::new("r1").unwrap(), ids(&["m2", "m1", "m2"]));

        match action {
            Some(ConnectionAction::Send {
                command: OutboundCommand::MarkAsRead { message_ids, .. },
                ..
            }) => assert_eq!(message_ids, ids(&["m2", "m1"])),
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(receipts.sent_batches(), 1);
    }

    #[test]
    fn empty_batch_emits_nothing() {
        let conn = connected();
        let mut receipts = ReadReceiptDispatcher::new();

        assert!(receipts.mark_as_read(&conn, RoomId::new("r1").unwrap(), Vec::new()).is_none());
        assert_eq!(receipts.sent_batches(), 0);
    }

    #[test]
    fn dropped_while_disconnected() {
        let conn = ConnectionManager::<Instant>::new(ConnectionConfig::default());
        let mut receipts = ReadReceiptDispatcher::new();

        assert!(receipts.mark_as_read(&conn, RoomId::new("r1").unwrap(), ids(&["m1"])).is_none());
        assert_eq!(receipts.sent_batches(), 0);
    }
}
