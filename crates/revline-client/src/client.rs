//! Client state machine.
//!
//! The `Client` composes the core components into one state machine. It owns
//! the session context and decides, for every event, what each component
//! sees. Teardown is a single `&mut self` call: the connection manager, the
//! room session and the typing set are reset together, so no observer can see
//! a half-torn-down client.

use revline_core::{
    ConnectionAction, ConnectionError, ConnectionManager, ConnectionState, Environment,
    NotificationAction, NotificationAggregator, PermissionState, ReadReceiptDispatcher,
    RoomSession, SessionContext, TypingChange, TypingEntry, TypingTracker,
};
use revline_proto::{InboundEvent, RoomId};

use crate::{
    bus::{BusEvent, PresenceChange, UnreadUpdate},
    config::ClientConfig,
    error::RealtimeError,
    event::{ClientAction, ClientEvent},
};

/// Top-level realtime state machine.
pub struct Client<E: Environment> {
    /// Environment for time.
    env: E,

    /// Who we act for.
    session: SessionContext,

    /// Connection lifecycle.
    connection: ConnectionManager<E::Instant>,

    /// Currently joined room.
    room: RoomSession<E::Instant>,

    /// Peers typing.
    typing: TypingTracker<E::Instant>,

    /// Outbound read receipts.
    receipts: ReadReceiptDispatcher,

    /// Unread count and native notifications.
    notifications: NotificationAggregator<E::Instant>,

    /// Cleared by `Shutdown`; every later event is a no-op.
    alive: bool,
}

impl<E: Environment> Client<E> {
    /// Create a client. `permission` is the platform notification permission
    /// at startup.
    pub fn new(
        env: E,
        session: SessionContext,
        config: &ClientConfig,
        permission: PermissionState,
    ) -> Self {
        Self {
            env,
            typing: TypingTracker::new(config.typing_config(), session.user_id.clone()),
            session,
            connection: ConnectionManager::new(config.connection_config()),
            room: RoomSession::new(),
            receipts: ReadReceiptDispatcher::new(),
            notifications: NotificationAggregator::new(config.notification_config(), permission),
            alive: true,
        }
    }

    /// Whether a transport is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Generation of the only transport that may be live.
    pub fn generation(&self) -> u64 {
        self.connection.generation()
    }

    /// Room currently joined.
    pub fn current_room(&self) -> Option<&RoomId> {
        self.room.current_room()
    }

    /// Peers typing in `room_id`.
    pub fn typing_in(&self, room_id: &RoomId) -> Vec<&TypingEntry<E::Instant>> {
        self.typing.typing_in(room_id)
    }

    /// Every typing entry, ordered by room then user.
    pub fn typing_entries(&self) -> impl Iterator<Item = &TypingEntry<E::Instant>> {
        self.typing.entries()
    }

    /// Typing entries across all rooms.
    pub fn typing_count(&self) -> usize {
        self.typing.len()
    }

    /// Last observed unread count.
    pub fn unread_count(&self) -> u64 {
        self.notifications.unread_count()
    }

    /// Read-receipt batches handed to the transport.
    pub fn receipts_sent(&self) -> u64 {
        self.receipts.sent_batches()
    }

    /// Current session.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Connection manager, for inspection.
    pub fn connection(&self) -> &ConnectionManager<E::Instant> {
        &self.connection
    }

    /// Notification engine, for inspection.
    pub fn notifications(&self) -> &NotificationAggregator<E::Instant> {
        &self.notifications
    }

    /// False after `Shutdown`.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: ClientEvent) -> Vec<ClientAction> {
        if !self.alive {
            tracing::debug!(?event, "client shut down, ignoring event");
            return Vec::new();
        }

        let now = self.env.now();
        match event {
            ClientEvent::Connect => self.handle_connect(now),
            ClientEvent::Disconnect => {
                let actions = self.connection.disconnect("disconnect requested");
                self.apply_connection(actions, now)
            },
            ClientEvent::Reconnect => {
                let actions = self.connection.reconnect(now);
                self.apply_connection(actions, now)
            },
            ClientEvent::SessionChanged(session) => self.handle_session_changed(session, now),
            ClientEvent::JoinRoom { room_id } => {
                let action = self.room.join_room(&self.connection, room_id, now);
                self.apply_connection(action.into_iter().collect(), now)
            },
            ClientEvent::LeaveRoom { room_id } => {
                let action = self.room.leave_room(&self.connection, &room_id);
                self.apply_connection(action.into_iter().collect(), now)
            },
            ClientEvent::SendTyping { room_id, is_typing } => {
                let action = self.typing.send_typing_status(&self.connection, room_id, is_typing);
                self.apply_connection(action.into_iter().collect(), now)
            },
            ClientEvent::MarkAsRead { room_id, message_ids } => {
                let action = self.receipts.mark_as_read(&self.connection, room_id, message_ids);
                self.apply_connection(action.into_iter().collect(), now)
            },
            ClientEvent::TransportOpened { generation } => {
                let actions = self.connection.transport_opened(generation);
                self.apply_connection(actions, now)
            },
            ClientEvent::TransportFailed { generation, failure } => {
                let actions = self.connection.transport_failed(generation, failure, now);
                self.apply_connection(actions, now)
            },
            ClientEvent::TransportClosed { generation, reason } => {
                let actions = self.connection.transport_closed(generation, &reason, now);
                self.apply_connection(actions, now)
            },
            ClientEvent::FrameReceived { generation, text } => {
                self.handle_frame(generation, &text, now)
            },
            ClientEvent::UnreadPolled { ticket, result } => {
                let actions = self.notifications.poll_completed(ticket, result, now);
                self.apply_notifications(actions)
            },
            ClientEvent::PermissionResolved(state) => {
                let actions = self.notifications.permission_resolved(state, now);
                self.apply_notifications(actions)
            },
            ClientEvent::Tick => self.handle_tick(now),
            ClientEvent::Shutdown => self.handle_shutdown(now),
        }
    }

    fn handle_connect(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let Some(token) = self.session.token.clone() else {
            return vec![publish_error(ConnectionError::MissingToken.into())];
        };

        let actions = self.connection.connect(token, now);
        self.apply_connection(actions, now)
    }

    /// New session context.
    ///
    /// A different token while connected fully re-authenticates; losing the
    /// token disconnects. Unread state belongs to the old user and is reset.
    fn handle_session_changed(
        &mut self,
        session: SessionContext,
        now: E::Instant,
    ) -> Vec<ClientAction> {
        let token_changed = session.token != self.session.token;
        let user_changed = session.user_id != self.session.user_id;
        self.session = session;
        self.typing.set_self(self.session.user_id.clone());

        if user_changed || token_changed {
            self.notifications.reset();
        }

        if !token_changed {
            return Vec::new();
        }

        let actions = match self.session.token.clone() {
            Some(token) if self.connection.state().is_live() => self.connection.connect(token, now),
            Some(_) => Vec::new(),
            None => self.connection.disconnect("session ended"),
        };
        self.apply_connection(actions, now)
    }

    fn handle_frame(&mut self, generation: u64, text: &str, now: E::Instant) -> Vec<ClientAction> {
        if generation != self.connection.generation() || !self.connection.is_connected() {
            tracing::debug!(generation, current = self.connection.generation(), "dropping frame from stale transport");
            return Vec::new();
        }

        let event = match InboundEvent::decode(text) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%error, "dropping invalid inbound event");
                return Vec::new();
            },
        };

        match event {
            InboundEvent::NewMessage(message) => vec![ClientAction::Publish(BusEvent::Message(message))],
            InboundEvent::UserTyping(signal) => self
                .typing
                .handle_user_typing(&signal, now)
                .map(|change| vec![publish_typing(change)])
                .unwrap_or_default(),
            InboundEvent::UserJoined(presence) => {
                vec![ClientAction::Publish(BusEvent::Presence(PresenceChange::Joined(presence)))]
            },
            InboundEvent::UserLeft(presence) => {
                vec![ClientAction::Publish(BusEvent::Presence(PresenceChange::Left(presence)))]
            },
            InboundEvent::MessageRead(read) => vec![ClientAction::Publish(BusEvent::Read(read))],
            InboundEvent::NewNotification(payload) => {
                let pushed = self.notifications.handle_pushed(&payload, now);
                let mut actions = vec![ClientAction::Publish(BusEvent::Notification(payload))];
                actions.extend(self.apply_notifications(pushed));
                actions
            },
            InboundEvent::Error(error) if error.is_auth() => {
                let actions = self.connection.auth_rejected(&error.message);
                self.apply_connection(actions, now)
            },
            InboundEvent::Error(error) => {
                tracing::warn!(code = %error.code, message = %error.message, "server error");
                vec![publish_error(RealtimeError::Server(error))]
            },
        }
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let actions = self.connection.tick(now);
        let mut out = self.apply_connection(actions, now);

        out.extend(self.typing.expire(now).into_iter().map(publish_typing));

        let polls = self.notifications.tick(now, self.session.user_id.as_ref());
        out.extend(self.apply_notifications(polls));

        out
    }

    fn handle_shutdown(&mut self, now: E::Instant) -> Vec<ClientAction> {
        tracing::info!("shutting down realtime client");

        let actions = self.connection.disconnect("shutdown");
        let mut out = self.apply_connection(actions, now);

        // Already done by the Disconnected transition when we were live
        self.room.clear();
        out.extend(self.typing.clear().into_iter().map(publish_typing));
        self.notifications.reset();
        self.alive = false;

        out
    }

    /// Convert connection actions, applying the state-dependent resets.
    fn apply_connection(
        &mut self,
        actions: Vec<ConnectionAction>,
        now: E::Instant,
    ) -> Vec<ClientAction> {
        let mut out = Vec::with_capacity(actions.len());

        for action in actions {
            match action {
                ConnectionAction::Open { generation, transport, token } => {
                    out.push(ClientAction::OpenTransport { generation, transport, token });
                },
                ConnectionAction::Send { generation, command } => {
                    out.push(ClientAction::SendCommand { generation, command });
                },
                ConnectionAction::Close { generation, reason } => {
                    out.push(ClientAction::CloseTransport { generation, reason });
                },
                ConnectionAction::StateChanged(state) => self.state_changed(state, now, &mut out),
                ConnectionAction::Failed(error) => out.push(publish_error(error.into())),
            }
        }

        out
    }

    fn state_changed(&mut self, state: ConnectionState, now: E::Instant, out: &mut Vec<ClientAction>) {
        match state {
            ConnectionState::Disconnected => {
                self.room.clear();
                out.extend(self.typing.clear().into_iter().map(publish_typing));
            },
            ConnectionState::Reconnecting => {
                out.extend(self.typing.clear().into_iter().map(publish_typing));
            },
            ConnectionState::Connecting | ConnectionState::Connected => {},
        }

        out.push(ClientAction::Publish(BusEvent::ConnectionChanged(state)));

        // Membership survives a transient reconnect; subscribe again
        if state == ConnectionState::Connected
            && let Some(room_id) = self.room.current_room().cloned()
        {
            tracing::info!(%room_id, "rejoining room after reconnect");
            if let Some(ConnectionAction::Send { generation, command }) =
                self.room.join_room(&self.connection, room_id, now)
            {
                out.push(ClientAction::SendCommand { generation, command });
            }
        }
    }

    fn apply_notifications(&self, actions: Vec<NotificationAction>) -> Vec<ClientAction> {
        actions
            .into_iter()
            .map(|action| match action {
                NotificationAction::Poll { ticket } => {
                    ClientAction::PollUnread { ticket, session: self.session.clone() }
                },
                NotificationAction::RequestPermission => ClientAction::RequestPermission,
                NotificationAction::Show(request) => ClientAction::ShowNotification(request),
                NotificationAction::UnreadChanged { count, previous } => {
                    ClientAction::Publish(BusEvent::UnreadCount(UnreadUpdate { count, previous }))
                },
            })
            .collect()
    }
}

fn publish_typing(change: TypingChange) -> ClientAction {
    ClientAction::Publish(BusEvent::Typing(change))
}

fn publish_error(error: RealtimeError) -> ClientAction {
    ClientAction::Publish(BusEvent::Error(error))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use revline_core::{AuthToken, TransportFailure, UserId};
    use revline_proto::OutboundCommand;

    use super::*;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }
    }

    fn session() -> SessionContext {
        SessionContext::authenticated(UserId::new("me").unwrap(), AuthToken::new("t1"))
    }

    fn client() -> Client<TestEnv> {
        Client::new(TestEnv, session(), &ClientConfig::default(), PermissionState::Granted)
    }

    fn open_generation(actions: &[ClientAction]) -> Option<u64> {
        actions.iter().find_map(|a| match a {
            ClientAction::OpenTransport { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    fn connected() -> Client<TestEnv> {
        let mut client = client();
        let generation = open_generation(&client.handle(ClientEvent::Connect)).unwrap();
        client.handle(ClientEvent::TransportOpened { generation });
        assert!(client.is_connected());
        client
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn frame(client: &Client<TestEnv>, text: &str) -> ClientEvent {
        ClientEvent::FrameReceived { generation: client.generation(), text: text.to_string() }
    }

    #[test]
    fn connect_without_token_reports_error() {
        let mut client = Client::new(
            TestEnv,
            SessionContext::anonymous(),
            &ClientConfig::default(),
            PermissionState::Default,
        );

        let actions = client.handle(ClientEvent::Connect);

        assert_eq!(actions, vec![ClientAction::Publish(BusEvent::Error(RealtimeError::Connection(
            ConnectionError::MissingToken
        )))]);
    }

    #[test]
    fn disconnect_clears_room_and_typing() {
        let mut client = connected();
        client.handle(ClientEvent::JoinRoom { room_id: room("r1") });
        client.handle(frame(
            &client,
            r#"{"event":"userTyping","data":{"roomId":"r1","userId":"u2","isTyping":true}}"#,
        ));
        assert_eq!(client.typing_count(), 1);

        let actions = client.handle(ClientEvent::Disconnect);

        assert_eq!(client.current_room(), None);
        assert_eq!(client.typing_count(), 0);
        assert!(actions.iter().any(|a| matches!(a, ClientAction::CloseTransport { .. })));
        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Publish(BusEvent::Typing(TypingChange::Stopped { .. }))
        )));
    }

    #[test]
    fn reconnect_rejoins_room_with_empty_typing() {
        let mut client = connected();
        client.handle(ClientEvent::JoinRoom { room_id: room("r1") });
        client.handle(frame(
            &client,
            r#"{"event":"userTyping","data":{"roomId":"r1","userId":"u2","isTyping":true}}"#,
        ));

        let actions = client.handle(ClientEvent::TransportClosed {
            generation: client.generation(),
            reason: "reset".to_string(),
        });
        assert_eq!(client.connection_state(), ConnectionState::Reconnecting);
        assert_eq!(client.typing_count(), 0);
        assert_eq!(client.current_room(), Some(&room("r1")));

        let generation = open_generation(&actions).unwrap();
        let actions = client.handle(ClientEvent::TransportOpened { generation });

        assert!(actions.contains(&ClientAction::SendCommand {
            generation,
            command: OutboundCommand::JoinRoom { room_id: room("r1") },
        }));
    }

    #[test]
    fn frames_from_stale_generation_dropped() {
        let mut client = connected();
        let stale = client.generation() - 1;

        let actions = client.handle(ClientEvent::FrameReceived {
            generation: stale,
            text: r#"{"event":"userJoined","data":{"roomId":"r1","userId":"u2"}}"#.to_string(),
        });

        assert!(actions.is_empty());
    }

    #[test]
    fn invalid_frames_dropped() {
        let mut client = connected();

        assert!(client.handle(frame(&client, "not json")).is_empty());
        assert!(client.handle(frame(&client, r#"{"event":"mystery","data":{}}"#)).is_empty());
    }

    #[test]
    fn own_typing_echo_ignored() {
        let mut client = connected();

        let actions = client.handle(frame(
            &client,
            r#"{"event":"userTyping","data":{"roomId":"r1","userId":"me","isTyping":true}}"#,
        ));

        assert!(actions.is_empty());
        assert_eq!(client.typing_count(), 0);
    }

    #[test]
    fn server_auth_error_disconnects() {
        let mut client = connected();
        client.handle(ClientEvent::JoinRoom { room_id: room("r1") });

        let actions = client.handle(frame(
            &client,
            r#"{"event":"error","data":{"code":"UNAUTHORIZED","message":"token expired"}}"#,
        ));

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.current_room(), None);
        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Publish(BusEvent::Error(e)) if e.is_auth()
        )));
    }

    #[test]
    fn token_change_reauthenticates() {
        let mut client = connected();
        let old = client.generation();
        let mut next = session();
        next.token = Some(AuthToken::new("t2"));

        let actions = client.handle(ClientEvent::SessionChanged(next));

        assert_eq!(actions.first(), Some(&ClientAction::CloseTransport {
            generation: old,
            reason: "re-authenticating".to_string(),
        }));
        assert!(open_generation(&actions).is_some_and(|g| g > old));
    }

    #[test]
    fn logout_disconnects() {
        let mut client = connected();

        client.handle(ClientEvent::SessionChanged(SessionContext::anonymous()));

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn failed_open_publishes_error() {
        let mut client = client();
        let generation = open_generation(&client.handle(ClientEvent::Connect)).unwrap();

        let actions = client.handle(ClientEvent::TransportFailed {
            generation,
            failure: TransportFailure::UpgradeRejected("400".to_string()),
        });

        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Publish(BusEvent::Error(RealtimeError::Connection(e))) if e.is_transient()
        )));
        assert!(open_generation(&actions).is_some());
    }

    #[test]
    fn first_tick_polls_unread() {
        let mut client = client();

        let actions = client.handle(ClientEvent::Tick);

        assert!(matches!(actions.as_slice(), [ClientAction::PollUnread { ticket: 1, .. }]));
    }

    #[test]
    fn shutdown_is_final() {
        let mut client = connected();
        client.handle(ClientEvent::JoinRoom { room_id: room("r1") });

        let actions = client.handle(ClientEvent::Shutdown);
        assert!(actions.iter().any(|a| matches!(a, ClientAction::CloseTransport { .. })));
        assert!(!client.is_alive());
        assert_eq!(client.current_room(), None);

        assert!(client.handle(ClientEvent::Connect).is_empty());
        assert!(client.handle(ClientEvent::Tick).is_empty());
        assert!(client.handle(ClientEvent::JoinRoom { room_id: room("r2") }).is_empty());
    }
}
