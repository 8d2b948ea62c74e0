//! Event bus.
//!
//! The surface through which the UI observes the realtime subsystem. Each
//! event kind has its own registration method; every registration returns a
//! [`Subscription`] that unregisters the handler when dropped, so a component
//! that goes away cannot leave a dangling callback behind.
//!
//! Handlers run on the runtime task, in the order events were produced. They
//! must not block. The registry lock is released before handlers run, so a
//! handler may subscribe or drop subscriptions itself.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use revline_core::{ConnectionState, TypingChange};
use revline_proto::{MessageRead, NewMessage, NotificationPayload, Presence};

use crate::error::RealtimeError;

/// A user entered or left a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// `userJoined`
    Joined(Presence),
    /// `userLeft`
    Left(Presence),
}

/// Unread count moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadUpdate {
    /// New absolute count
    pub count: u64,
    /// Count before
    pub previous: u64,
}

/// Everything observers can be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// New chat message
    Message(NewMessage),
    /// Typing set changed
    Typing(TypingChange),
    /// Presence change
    Presence(PresenceChange),
    /// Peer read messages
    Read(MessageRead),
    /// Pushed account notification
    Notification(NotificationPayload),
    /// Unread count changed
    UnreadCount(UnreadUpdate),
    /// Connection lifecycle changed
    ConnectionChanged(ConnectionState),
    /// Something failed
    Error(RealtimeError),
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Channel<T> {
    handlers: Mutex<Vec<(u64, Handler<T>)>>,
}

impl<T> Channel<T> {
    fn new() -> Self {
        Self { handlers: Mutex::new(Vec::new()) }
    }

    fn add(&self, id: u64, handler: Handler<T>) {
        self.handlers.lock().push((id, handler));
    }

    fn remove(&self, id: u64) {
        self.handlers.lock().retain(|(handler_id, _)| *handler_id != id);
    }

    fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    fn dispatch(&self, value: &T) {
        // Snapshot so handlers run without the lock held
        let handlers: Vec<Handler<T>> =
            self.handlers.lock().iter().map(|(_, handler)| Arc::clone(handler)).collect();

        for handler in handlers {
            handler(value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Message,
    Typing,
    Presence,
    Read,
    Notification,
    UnreadCount,
    ConnectionChange,
    Error,
}

struct Registry {
    next_id: AtomicU64,
    message: Channel<NewMessage>,
    typing: Channel<TypingChange>,
    presence: Channel<PresenceChange>,
    read: Channel<MessageRead>,
    notification: Channel<NotificationPayload>,
    unread_count: Channel<UnreadUpdate>,
    connection_change: Channel<ConnectionState>,
    error: Channel<RealtimeError>,
}

impl Registry {
    fn remove(&self, kind: Kind, id: u64) {
        match kind {
            Kind::Message => self.message.remove(id),
            Kind::Typing => self.typing.remove(id),
            Kind::Presence => self.presence.remove(id),
            Kind::Read => self.read.remove(id),
            Kind::Notification => self.notification.remove(id),
            Kind::UnreadCount => self.unread_count.remove(id),
            Kind::ConnectionChange => self.connection_change.remove(id),
            Kind::Error => self.error.remove(id),
        }
    }
}

/// Callback registry. Cheap to clone; clones share handlers.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("handlers", &self.handler_count()).finish()
    }
}

/// Keeps a handler registered. Dropping it unregisters the handler.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    registry: Weak<Registry>,
    kind: Kind,
    id: u64,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("kind", &self.kind).field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }
}

macro_rules! register {
    ($(#[$meta:meta])* $method:ident, $field:ident, $kind:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $method(&self, handler: impl Fn(&$ty) + Send + Sync + 'static) -> Subscription {
            let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
            self.registry.$field.add(id, Arc::new(handler));
            Subscription { registry: Arc::downgrade(&self.registry), kind: Kind::$kind, id }
        }
    };
}

impl EventBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                message: Channel::new(),
                typing: Channel::new(),
                presence: Channel::new(),
                read: Channel::new(),
                notification: Channel::new(),
                unread_count: Channel::new(),
                connection_change: Channel::new(),
                error: Channel::new(),
            }),
        }
    }

    register!(
        /// New chat messages.
        on_message, message, Message, NewMessage
    );
    register!(
        /// Typing set changes.
        on_typing, typing, Typing, TypingChange
    );
    register!(
        /// Users joining and leaving rooms.
        on_presence, presence, Presence, PresenceChange
    );
    register!(
        /// Read receipts from peers.
        on_read, read, Read, MessageRead
    );
    register!(
        /// Pushed account notifications.
        on_notification, notification, Notification, NotificationPayload
    );
    register!(
        /// Unread count changes.
        on_unread_count, unread_count, UnreadCount, UnreadUpdate
    );
    register!(
        /// Connection lifecycle changes.
        on_connection_change, connection_change, ConnectionChange, ConnectionState
    );
    register!(
        /// Failures. Connection errors here have already been handled.
        on_error, error, Error, RealtimeError
    );

    /// Deliver `event` to the handlers registered for its kind.
    pub fn publish(&self, event: &BusEvent) {
        let registry = &self.registry;
        match event {
            BusEvent::Message(message) => registry.message.dispatch(message),
            BusEvent::Typing(change) => registry.typing.dispatch(change),
            BusEvent::Presence(change) => registry.presence.dispatch(change),
            BusEvent::Read(read) => registry.read.dispatch(read),
            BusEvent::Notification(payload) => registry.notification.dispatch(payload),
            BusEvent::UnreadCount(update) => registry.unread_count.dispatch(update),
            BusEvent::ConnectionChanged(state) => registry.connection_change.dispatch(state),
            BusEvent::Error(error) => registry.error.dispatch(error),
        }
    }

    /// Registered handlers across all kinds.
    pub fn handler_count(&self) -> usize {
        let r = &self.registry;
        r.message.len()
            + r.typing.len()
            + r.presence.len()
            + r.read.len()
            + r.notification.len()
            + r.unread_count.len()
            + r.connection_change.len()
            + r.error.len()
    }
}
