//! Protocol error types.

use thiserror::Error;

/// Result alias for wire encoding and decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding or encoding wire envelopes.
///
/// All of these are fatal for the single envelope only. The connection keeps
/// running and the caller logs and drops the offending message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Envelope is not valid JSON or does not match the event's shape.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Envelope has no `event` name.
    #[error("envelope is missing the event name")]
    MissingEvent,

    /// Event name is not part of the protocol.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// A field is present but violates a protocol rule.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Wire name of the offending field.
        field: &'static str,
        /// What rule was violated.
        reason: &'static str,
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
