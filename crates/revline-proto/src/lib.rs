//! Revline wire protocol
//!
//! Typed events exchanged over the realtime channel between the marketplace
//! chat client and the messaging service.
//!
//! Every message on the wire is a JSON envelope naming the event and carrying
//! its data:
//!
//! ```text
//! {"event": "userTyping", "data": {"roomId": "r1", "userId": "u7", ...}}
//! ```
//!
//! Inbound envelopes are decoded into [`InboundEvent`], a closed tagged union.
//! Decoding validates identifiers at the boundary, so nothing downstream ever
//! sees an unknown event name or an empty room id. Outbound envelopes are
//! produced from [`OutboundCommand`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod command;
pub mod errors;
pub mod event;
pub mod ids;

pub use command::OutboundCommand;
pub use errors::{ProtocolError, Result};
pub use event::{
    InboundEvent, MessageRead, NewMessage, NotificationPayload, Presence, ServerError, UserTyping,
};
pub use ids::{MessageId, RoomId, UserId};
