//! Core
//!
//! Pure state machines for the Revline realtime subsystem: connection
//! lifecycle, room membership, typing indicators, read receipts and the
//! unread-count notification engine.
//!
//! # Architecture
//!
//! Nothing in this crate performs I/O. Each component takes the current time
//! as a parameter, mutates its own state and returns actions for the caller to
//! execute. The same code runs under the production runtime and under the
//! deterministic harness.
//!
//! The transport is owned by whoever executes [`ConnectionAction`]s. Room,
//! typing and receipt components never see it: they hand their commands to
//! [`ConnectionManager::send`], which decides whether there is a live
//! transport to address.
//!
//! # Components
//!
//! - [`ConnectionManager`]: connect, retry, fallback and teardown
//! - [`RoomSession`]: the single joined room
//! - [`TypingTracker`]: peers currently typing, with expiry
//! - [`ReadReceiptDispatcher`]: batched read receipts
//! - [`NotificationAggregator`]: unread-count polling and native notifications

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod notification;
pub mod receipts;
pub mod room;
pub mod session;
pub mod typing;

pub use connection::{
    Backoff, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState, TransportKind,
};
pub use env::Environment;
pub use error::{ConnectionError, PollError, TransportFailure};
pub use notification::{
    AggregatorPhase, NotificationAction, NotificationAggregator, NotificationCategory,
    NotificationConfig, NotificationRecord, NotificationRequest, PermissionState, UnreadCounter,
};
pub use receipts::ReadReceiptDispatcher;
pub use revline_proto::{MessageId, RoomId, UserId};
pub use room::{RoomMembership, RoomSession};
pub use session::{AuthToken, SessionContext};
pub use typing::{StopReason, TypingChange, TypingConfig, TypingEntry, TypingTracker};
