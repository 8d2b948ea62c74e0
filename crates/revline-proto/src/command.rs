//! Outbound commands emitted by the client.

use serde::{Deserialize, Serialize};

use crate::{MessageId, RoomId, errors::Result};

/// Commands the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundCommand {
    /// Subscribe to a room's broadcasts.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },

    /// Unsubscribe from a room's broadcasts.
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },

    /// Typing signal, relayed to the other members of the room.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Room the user is typing in.
        room_id: RoomId,
        /// `true` when typing started, `false` when it stopped.
        is_typing: bool,
    },

    /// Read receipt for a batch of messages.
    #[serde(rename_all = "camelCase")]
    MarkAsRead {
        /// Room the messages belong to.
        room_id: RoomId,
        /// Messages read.
        message_ids: Vec<MessageId>,
    },
}

impl OutboundCommand {
    /// Encode as a wire envelope.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire envelope. Used by servers and test relays.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "joinRoom",
            Self::LeaveRoom { .. } => "leaveRoom",
            Self::Typing { .. } => "typing",
            Self::MarkAsRead { .. } => "markAsRead",
        }
    }

    /// Room this command targets.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::JoinRoom { room_id }
            | Self::LeaveRoom { room_id }
            | Self::Typing { room_id, .. }
            | Self::MarkAsRead { room_id, .. } => room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[test]
    fn typing_wire_shape() {
        let command = OutboundCommand::Typing { room_id: room("r1"), is_typing: true };
        let value: Value = serde_json::from_str(&command.encode().unwrap()).unwrap();

        assert_eq!(value, json!({"event": "typing", "data": {"roomId": "r1", "isTyping": true}}));
    }

    #[test]
    fn mark_as_read_wire_shape() {
        let command = OutboundCommand::MarkAsRead {
            room_id: room("r1"),
            message_ids: vec![MessageId::new("m1").unwrap(), MessageId::new("m2").unwrap()],
        };
        let value: Value = serde_json::from_str(&command.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"event": "markAsRead", "data": {"roomId": "r1", "messageIds": ["m1", "m2"]}})
        );
        assert_eq!(command.name(), "markAsRead");
    }

    #[test]
    fn join_and_leave_names() {
        let join = OutboundCommand::JoinRoom { room_id: room("r9") };
        let leave = OutboundCommand::LeaveRoom { room_id: room("r9") };

        assert_eq!(OutboundCommand::decode(&join.encode().unwrap()).unwrap(), join);
        assert_eq!(leave.name(), "leaveRoom");
        assert_eq!(leave.room_id().as_str(), "r9");
    }
}
