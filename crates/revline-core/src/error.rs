//! Error types for the realtime core.
//!
//! Strongly-typed errors for each failure class: transport failures reported
//! by the driver, connection errors surfaced to the caller, and unread-count
//! poll failures. None of these are ever thrown at the caller of `connect`;
//! they travel as actions and end up on the event bus.

use std::time::Duration;

use thiserror::Error;

/// Why a transport could not be opened, or why an open transport went away.
///
/// Reported by the driver that executes `ConnectionAction::Open`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Host unreachable, DNS failure, connection refused.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Open did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The persistent-upgrade handshake was refused (proxies, old servers).
    #[error("upgrade rejected: {0}")]
    UpgradeRejected(String),

    /// The server refused the bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transport closed by the peer or the network.
    #[error("closed: {0}")]
    Closed(String),
}

impl TransportFailure {
    /// Returns true if the token was rejected. These are never retried.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Errors surfaced by the connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No bearer token available to authenticate with.
    #[error("no auth token available")]
    MissingToken,

    /// Token rejected; the caller must re-authenticate.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// A single connection attempt failed.
    #[error("attempt {attempt} failed: {failure}")]
    Transport {
        /// 1-based attempt number.
        attempt: u32,
        /// What went wrong.
        failure: TransportFailure,
    },

    /// Bounded retries used up; an explicit reconnect is required.
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Transport failures other than auth rejection are transient. Auth
    /// failures, exhausted retries and caller mistakes are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { failure, .. } if !failure.is_auth())
    }
}

/// Errors from the unread-count query.
///
/// A failed poll keeps the previously known count; the next scheduled poll is
/// unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// Request could not be sent or no response arrived.
    #[error("request failed: {0}")]
    Request(String),

    /// Server answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// Response body did not contain a count.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
