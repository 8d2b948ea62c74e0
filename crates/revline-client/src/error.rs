//! Client error types.

use revline_core::ConnectionError;
use revline_proto::ServerError;
use thiserror::Error;

/// Errors returned by [`crate::RealtimeHandle`] methods.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The runtime has shut down; the request was not queued.
    #[error("realtime runtime stopped")]
    Stopped,
}

/// Failures published to `on_error` observers.
///
/// Nothing here is returned from an API call. Connection failures are
/// recovered (or given up on) by the connection manager; observers only learn
/// about them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// Connection lifecycle failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Error event pushed by the server.
    #[error("server error {}: {}", .0.code, .0.message)]
    Server(ServerError),
}

impl RealtimeError {
    /// Returns true if the caller must supply a new token.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Connection(ConnectionError::Auth(_) | ConnectionError::MissingToken) => true,
            Self::Connection(_) => false,
            Self::Server(error) => error.is_auth(),
        }
    }
}
