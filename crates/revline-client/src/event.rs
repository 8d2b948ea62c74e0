//! Client events and actions.

use revline_core::{
    AuthToken, MessageId, NotificationRequest, PermissionState, PollError, RoomId,
    SessionContext, TransportFailure, TransportKind,
};
use revline_proto::OutboundCommand;

use crate::bus::BusEvent;

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Forwarding application intents (connect, join, typing, ...)
/// - Reporting transport results tagged with the generation they belong to
/// - Reporting poll and permission results tagged with their ticket
/// - Driving time forward via ticks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connect with the session's token.
    Connect,

    /// Tear down the connection and everything tied to it.
    Disconnect,

    /// Connect again after retries were exhausted.
    Reconnect,

    /// Login, logout or token refresh.
    SessionChanged(SessionContext),

    /// Join a room.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },

    /// Leave a room.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },

    /// Local user started or stopped typing.
    SendTyping {
        /// Room the user is typing in.
        room_id: RoomId,
        /// Typing state.
        is_typing: bool,
    },

    /// Local user read messages.
    MarkAsRead {
        /// Room the messages belong to.
        room_id: RoomId,
        /// Messages read.
        message_ids: Vec<MessageId>,
    },

    /// Transport of `generation` finished opening.
    TransportOpened {
        /// Generation from the `OpenTransport` action.
        generation: u64,
    },

    /// Transport of `generation` could not be opened.
    TransportFailed {
        /// Generation from the `OpenTransport` action.
        generation: u64,
        /// What went wrong.
        failure: TransportFailure,
    },

    /// Transport of `generation` closed.
    TransportClosed {
        /// Generation of the transport.
        generation: u64,
        /// Why, for logs.
        reason: String,
    },

    /// Raw text frame received on the transport of `generation`.
    FrameReceived {
        /// Generation of the transport that received it.
        generation: u64,
        /// Undecoded envelope.
        text: String,
    },

    /// Unread-count query finished.
    UnreadPolled {
        /// Ticket from the `PollUnread` action.
        ticket: u64,
        /// Count or failure.
        result: Result<u64, PollError>,
    },

    /// Platform answered the notification permission request.
    PermissionResolved(PermissionState),

    /// Time tick for retries, timeouts, typing expiry and polling.
    Tick,

    /// Final teardown. Every later event is ignored.
    Shutdown,
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open a transport; report back with `TransportOpened`/`TransportFailed`.
    OpenTransport {
        /// Tag to echo back.
        generation: u64,
        /// Transport to use.
        transport: TransportKind,
        /// Bearer token to attach.
        token: AuthToken,
    },

    /// Encode and send a command on the transport of `generation`.
    SendCommand {
        /// Addressed transport.
        generation: u64,
        /// Command to send.
        command: OutboundCommand,
    },

    /// Close the transport of `generation`, or cancel its pending open.
    CloseTransport {
        /// Transport to close.
        generation: u64,
        /// Reason, for logs.
        reason: String,
    },

    /// Query the unread count; report back with `UnreadPolled`.
    PollUnread {
        /// Tag to echo back.
        ticket: u64,
        /// Session to query for.
        session: SessionContext,
    },

    /// Ask the platform for notification permission.
    RequestPermission,

    /// Display a native notification.
    ShowNotification(NotificationRequest),

    /// Deliver to [`crate::EventBus`] observers.
    Publish(BusEvent),
}
