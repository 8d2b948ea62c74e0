//! Inbound events pushed by the messaging service.
//!
//! [`InboundEvent::decode`] is the only way raw text becomes an event. It
//! checks the event name against the closed set of known events before looking
//! at the data, then deserializes into the typed payload and runs the
//! per-event validation rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    MessageId, RoomId, UserId,
    errors::{ProtocolError, Result},
};

/// Chat message delivered to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Storage id assigned by the message store.
    #[serde(rename = "_id")]
    pub id: String,
    /// Public message id, used for read receipts.
    pub message_id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message text.
    pub content: String,
    /// Display name of the author at send time.
    #[serde(default)]
    pub sender_nickname: String,
    /// Creation timestamp as sent by the server (RFC 3339).
    pub created_at: String,
    /// Sent by a dealer or support agent.
    #[serde(default)]
    pub is_agent: bool,
    /// Content was edited after sending.
    #[serde(default)]
    pub is_edited: bool,
    /// Message was deleted; content may be a placeholder.
    #[serde(default)]
    pub is_deleted: bool,
    /// Pinned to the top of the room.
    #[serde(default)]
    pub is_pinned: bool,
    /// Generated by the system (joins, listing updates) rather than a user.
    #[serde(default)]
    pub is_system: bool,
}

/// Typing signal from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    /// Room the peer is typing in.
    pub room_id: RoomId,
    /// Peer that is typing.
    pub user_id: UserId,
    /// Peer display name.
    #[serde(default)]
    pub user_nickname: String,
    /// `true` when typing started, `false` when it stopped.
    pub is_typing: bool,
}

/// A user entered or left a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    /// Room affected.
    pub room_id: RoomId,
    /// User who joined or left.
    pub user_id: UserId,
}

/// Peer read a batch of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    /// Room the messages belong to.
    pub room_id: RoomId,
    /// Messages marked as read. Never empty.
    pub message_ids: Vec<MessageId>,
}

/// Account notification (offer received, listing sold, new chat, ...).
///
/// Every field is optional on the wire. When `unread_count` is present it is
/// the server's absolute unread-message count at the time of the push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Notification id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Notification category as named by the server.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Short headline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Body text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Absolute unread-message count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u64>,
    /// Creation timestamp (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Error reported by the server on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Machine-readable code, e.g. `UNAUTHORIZED`.
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

impl ServerError {
    /// Code the server uses when the bearer token is rejected.
    pub const UNAUTHORIZED: &'static str = "UNAUTHORIZED";

    /// Whether this error means the token must be replaced.
    pub fn is_auth(&self) -> bool {
        self.code == Self::UNAUTHORIZED
    }
}

/// Events the server pushes to the client.
///
/// # Invariants
///
/// - Every variant maps to exactly one wire name ([`InboundEvent::name`]).
/// - A value produced by [`InboundEvent::decode`] has passed
///   [`InboundEvent::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum InboundEvent {
    /// New chat message.
    NewMessage(NewMessage),
    /// Peer typing signal.
    UserTyping(UserTyping),
    /// User joined a room.
    UserJoined(Presence),
    /// User left a room.
    UserLeft(Presence),
    /// Peer read messages.
    MessageRead(MessageRead),
    /// Account notification.
    NewNotification(NotificationPayload),
    /// Server-side error.
    Error(ServerError),
}

impl InboundEvent {
    /// Wire names of every inbound event.
    pub const NAMES: [&'static str; 7] = [
        "newMessage",
        "userTyping",
        "userJoined",
        "userLeft",
        "messageRead",
        "newNotification",
        "error",
    ];

    /// Decode and validate an envelope.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` if the text is not JSON or the data does
    ///   not match the event's shape
    /// - `ProtocolError::MissingEvent` if there is no event name
    /// - `ProtocolError::UnknownEvent` for names outside [`Self::NAMES`]
    /// - `ProtocolError::InvalidField` if a validation rule fails
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        let name = value.get("event").and_then(Value::as_str).ok_or(ProtocolError::MissingEvent)?;
        if !Self::NAMES.contains(&name) {
            return Err(ProtocolError::UnknownEvent(name.to_string()));
        }

        let event: Self = serde_json::from_value(value)?;
        event.validate()?;
        Ok(event)
    }

    /// Encode as a wire envelope.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check rules that the type system does not capture.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::MessageRead(read) if read.message_ids.is_empty() => {
                Err(ProtocolError::InvalidField { field: "messageIds", reason: "must not be empty" })
            },
            Self::NewMessage(message) if message.id.is_empty() => {
                Err(ProtocolError::InvalidField { field: "_id", reason: "must not be empty" })
            },
            Self::Error(error) if error.code.is_empty() => {
                Err(ProtocolError::InvalidField { field: "code", reason: "must not be empty" })
            },
            _ => Ok(()),
        }
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "newMessage",
            Self::UserTyping(_) => "userTyping",
            Self::UserJoined(_) => "userJoined",
            Self::UserLeft(_) => "userLeft",
            Self::MessageRead(_) => "messageRead",
            Self::NewNotification(_) => "newNotification",
            Self::Error(_) => "error",
        }
    }

    /// Room this event is scoped to, if any.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::NewMessage(m) => Some(&m.room_id),
            Self::UserTyping(t) => Some(&t.room_id),
            Self::UserJoined(p) | Self::UserLeft(p) => Some(&p.room_id),
            Self::MessageRead(r) => Some(&r.room_id),
            Self::NewNotification(_) | Self::Error(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_typing() {
        let text = r#"{"event":"userTyping","data":{"roomId":"r1","userId":"u2","userNickname":"Kai","isTyping":true}}"#;
        let event = InboundEvent::decode(text).unwrap();

        match event {
            InboundEvent::UserTyping(t) => {
                assert_eq!(t.room_id.as_str(), "r1");
                assert_eq!(t.user_id.as_str(), "u2");
                assert_eq!(t.user_nickname, "Kai");
                assert!(t.is_typing);
            },
            other => panic!("expected userTyping, got {other:?}"),
        }
    }

    #[test]
    fn decode_message_with_defaults() {
        let text = r#"{"event":"newMessage","data":{
            "_id":"65f0","messageId":"m1","roomId":"r1","senderId":"u1",
            "content":"Is the Ducati still available?","createdAt":"2024-03-12T10:00:00Z"
        }}"#;
        let event = InboundEvent::decode(text).unwrap();

        let InboundEvent::NewMessage(message) = event else {
            panic!("expected newMessage");
        };
        assert_eq!(message.id, "65f0");
        assert_eq!(message.sender_nickname, "");
        assert!(!message.is_agent && !message.is_deleted && !message.is_system);
    }

    #[test]
    fn unknown_event_is_rejected_before_data() {
        let text = r#"{"event":"bidPlaced","data":null}"#;
        assert_eq!(
            InboundEvent::decode(text),
            Err(ProtocolError::UnknownEvent("bidPlaced".to_string()))
        );
    }

    #[test]
    fn missing_event_name() {
        assert_eq!(InboundEvent::decode(r#"{"data":{}}"#), Err(ProtocolError::MissingEvent));
    }

    #[test]
    fn empty_read_batch_is_invalid() {
        let text = r#"{"event":"messageRead","data":{"roomId":"r1","messageIds":[]}}"#;
        assert!(matches!(
            InboundEvent::decode(text),
            Err(ProtocolError::InvalidField { field: "messageIds", .. })
        ));
    }

    #[test]
    fn empty_room_id_is_malformed() {
        let text = r#"{"event":"userJoined","data":{"roomId":"","userId":"u1"}}"#;
        assert!(matches!(InboundEvent::decode(text), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn notification_fields_are_optional() {
        let text = r#"{"event":"newNotification","data":{"type":"offer","unreadCount":4}}"#;
        let event = InboundEvent::decode(text).unwrap();

        assert_eq!(
            event,
            InboundEvent::NewNotification(NotificationPayload {
                kind: Some("offer".to_string()),
                unread_count: Some(4),
                ..Default::default()
            })
        );
        assert_eq!(event.room_id(), None);
    }

    #[test]
    fn server_error_auth_code() {
        let text = r#"{"event":"error","data":{"code":"UNAUTHORIZED","message":"jwt expired"}}"#;
        let InboundEvent::Error(error) = InboundEvent::decode(text).unwrap() else {
            panic!("expected error");
        };
        assert!(error.is_auth());
    }
}
