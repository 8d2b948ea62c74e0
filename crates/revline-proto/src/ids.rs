//! Identifier newtypes.
//!
//! Rooms, users and messages are addressed by opaque strings issued by the
//! messaging service. The newtypes reject empty strings on construction and
//! on deserialization, which is where untrusted input enters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, rejecting empty or blank strings.
            pub fn new(value: impl Into<String>) -> Result<Self, ProtocolError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(ProtocolError::InvalidField {
                        field: $field,
                        reason: "must not be empty",
                    });
                }
                Ok(Self(value))
            }

            /// Identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ProtocolError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Chat room identifier.
    RoomId,
    "roomId"
);

string_id!(
    /// User identifier.
    UserId,
    "userId"
);

string_id!(
    /// Message identifier.
    MessageId,
    "messageId"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_ids() {
        assert!(RoomId::new("").is_err());
        assert!(UserId::new("   ").is_err());
        assert_eq!(RoomId::new("room-1").map(|r| r.to_string()), Ok("room-1".to_string()));
    }

    #[test]
    fn deserialize_validates() {
        let parsed: Result<RoomId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());

        let parsed: Result<MessageId, _> = serde_json::from_str("\"m-9\"");
        assert_eq!(parsed.ok().map(|m| m.as_str().to_string()), Some("m-9".to_string()));
    }
}
