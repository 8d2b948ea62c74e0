//! Simulated world: clients, relay and a shared virtual clock.
//!
//! The world plays the part of the runtime for every client. It feeds events
//! to the real [`Client`] state machines and executes their actions against
//! the [`SimRelay`] synchronously, so a whole scenario is a deterministic
//! function of the seed and the operations applied. Invariants are checked
//! after every processed event.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use revline_client::{BusEvent, Client, ClientAction, ClientConfig, ClientEvent};
use revline_core::{
    AuthToken, NotificationRequest, PermissionState, RoomId, SessionContext, TypingChange, UserId,
};
use revline_proto::{NewMessage, NotificationPayload, ProtocolError};

use crate::{
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot, Violation},
    sim_env::SimEnv,
    sim_relay::{ClientIdx, Delivery, SimRelay},
};

/// Knobs for a simulation run.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Configuration shared by every client.
    pub config: ClientConfig,
    /// Notification permission at startup.
    pub permission: PermissionState,
    /// What the simulated user answers when asked for permission.
    pub permission_answer: PermissionState,
    /// Probability that the relay refuses a transport.
    pub open_failure_rate: f64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            permission: PermissionState::Granted,
            permission_answer: PermissionState::Granted,
            open_failure_rate: 0.0,
        }
    }
}

/// One simulated client and everything its observers saw.
pub struct SimClient {
    client: Client<SimEnv>,
    permission_answer: PermissionState,
    published: Vec<BusEvent>,
    observed_typing: BTreeSet<(RoomId, UserId)>,
    shown: Vec<NotificationRequest>,
    permission_requests: usize,
}

impl SimClient {
    /// The state machine.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// Every bus event, in order.
    pub fn published(&self) -> &[BusEvent] {
        &self.published
    }

    /// Chat messages delivered to observers.
    pub fn messages(&self) -> Vec<&NewMessage> {
        self.published
            .iter()
            .filter_map(|event| match event {
                BusEvent::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Typing set as an observer applying every typing event sees it.
    pub fn observed_typing(&self) -> &BTreeSet<(RoomId, UserId)> {
        &self.observed_typing
    }

    /// Native notifications displayed.
    pub fn shown(&self) -> &[NotificationRequest] {
        &self.shown
    }

    /// Times the platform was asked for permission.
    pub fn permission_requests(&self) -> usize {
        self.permission_requests
    }

    fn observe(&mut self, event: BusEvent) {
        match &event {
            BusEvent::Typing(TypingChange::Started { room_id, user_id, .. }) => {
                self.observed_typing.insert((room_id.clone(), user_id.clone()));
            },
            BusEvent::Typing(TypingChange::Stopped { room_id, user_id, .. }) => {
                self.observed_typing.remove(&(room_id.clone(), user_id.clone()));
            },
            _ => {},
        }
        self.published.push(event);
    }

    fn snapshot(&self, id: ClientIdx, relay: &SimRelay) -> ClientSnapshot {
        let connection = self.client.connection();
        ClientSnapshot {
            id,
            state: connection.state(),
            alive: self.client.is_alive(),
            attempt: connection.attempt(),
            max_attempts: connection.config().max_attempts,
            current_room: self.client.current_room().cloned(),
            typing: self
                .client
                .typing_entries()
                .map(|entry| (entry.room_id.clone(), entry.user_id.clone()))
                .collect(),
            observed_typing: self.observed_typing.clone(),
            live_transports: relay.live(id),
        }
    }
}

/// Clients, relay and clock.
pub struct SimWorld {
    env: SimEnv,
    relay: SimRelay,
    clients: Vec<SimClient>,
    queue: VecDeque<(ClientIdx, ClientEvent)>,
    invariants: InvariantRegistry,
}

impl SimWorld {
    /// One client per user name, default options.
    pub fn new(seed: u64, users: &[&str]) -> Result<Self, ProtocolError> {
        Self::with_options(seed, users, SimOptions::default())
    }

    /// One client per user name. Each is logged in with its own token.
    pub fn with_options(
        seed: u64,
        users: &[&str],
        options: SimOptions,
    ) -> Result<Self, ProtocolError> {
        let env = SimEnv::new();
        let mut accounts = Vec::with_capacity(users.len());
        let mut clients = Vec::with_capacity(users.len());

        for name in users {
            let user_id = UserId::new(*name)?;
            let session =
                SessionContext::authenticated(user_id.clone(), AuthToken::new(format!("token-{name}")));
            let client = Client::new(env.clone(), session, &options.config, options.permission);

            accounts.push((user_id, (*name).to_string()));
            clients.push(SimClient {
                client,
                permission_answer: options.permission_answer,
                published: Vec::new(),
                observed_typing: BTreeSet::new(),
                shown: Vec::new(),
                permission_requests: 0,
            });
        }

        let mut relay = SimRelay::new(seed, accounts);
        relay.set_open_failure_rate(options.open_failure_rate);

        Ok(Self { env, relay, clients, queue: VecDeque::new(), invariants: InvariantRegistry::standard() })
    }

    /// Shared clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The relay.
    pub fn relay(&self) -> &SimRelay {
        &self.relay
    }

    /// The relay, for fault injection.
    pub fn relay_mut(&mut self) -> &mut SimRelay {
        &mut self.relay
    }

    /// Client `idx`. Panics if out of range.
    pub fn client(&self, idx: ClientIdx) -> &SimClient {
        &self.clients[idx]
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the world has no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Feed `event` to client `idx` and run until nothing is left to do.
    pub fn send(&mut self, idx: ClientIdx, event: ClientEvent) -> Result<(), Vec<Violation>> {
        self.queue.push_back((idx, event));
        self.run()
    }

    /// Advance the clock and tick every client.
    pub fn advance(&mut self, duration: Duration) -> Result<(), Vec<Violation>> {
        self.env.advance(duration);
        for idx in 0..self.clients.len() {
            self.queue.push_back((idx, ClientEvent::Tick));
        }
        self.run()
    }

    /// Advance `total` in ticks of `step`.
    pub fn advance_in_steps(&mut self, total: Duration, step: Duration) -> Result<(), Vec<Violation>> {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let next = step.min(total - elapsed);
            self.advance(next)?;
            elapsed += next;
        }
        Ok(())
    }

    /// Cut every transport of client `idx` from the relay side.
    pub fn kill(&mut self, idx: ClientIdx) -> Result<(), Vec<Violation>> {
        for generation in self.relay.kill(idx) {
            let reason = "connection reset".to_string();
            self.queue.push_back((idx, ClientEvent::TransportClosed { generation, reason }));
        }
        self.run()
    }

    /// Post a chat message from `sender` into `room_id`.
    pub fn post_message(
        &mut self,
        sender: ClientIdx,
        room_id: &RoomId,
        content: &str,
    ) -> Result<(), Vec<Violation>> {
        let deliveries = self.relay.post_message(sender, room_id, content);
        self.deliver(deliveries);
        self.run()
    }

    /// Push an account notification to client `idx`.
    pub fn notify(&mut self, idx: ClientIdx, payload: NotificationPayload) -> Result<(), Vec<Violation>> {
        let deliveries = self.relay.notify(idx, payload);
        self.deliver(deliveries);
        self.run()
    }

    /// Have the relay reject client `idx`'s token.
    pub fn reject_token(&mut self, idx: ClientIdx) -> Result<(), Vec<Violation>> {
        let deliveries = self.relay.reject_token(idx);
        self.deliver(deliveries);
        self.run()
    }

    /// Observable state of every client.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::from_clients(
            self.clients
                .iter()
                .enumerate()
                .map(|(id, client)| client.snapshot(id, &self.relay))
                .collect(),
        )
    }

    fn run(&mut self) -> Result<(), Vec<Violation>> {
        while let Some((idx, event)) = self.queue.pop_front() {
            let Some(sim) = self.clients.get_mut(idx) else {
                continue;
            };
            let actions = sim.client.handle(event);
            for action in actions {
                self.execute(idx, action);
            }
            self.invariants.check_all(&self.snapshot())?;
        }
        Ok(())
    }

    fn execute(&mut self, idx: ClientIdx, action: ClientAction) {
        match action {
            ClientAction::OpenTransport { generation, .. } => {
                let event = match self.relay.open(idx, generation) {
                    Ok(()) => ClientEvent::TransportOpened { generation },
                    Err(failure) => ClientEvent::TransportFailed { generation, failure },
                };
                self.queue.push_back((idx, event));
            },
            ClientAction::SendCommand { generation, command } => {
                let deliveries = self.relay.handle(idx, generation, &command);
                self.deliver(deliveries);
            },
            ClientAction::CloseTransport { generation, .. } => self.relay.close(idx, generation),
            ClientAction::PollUnread { ticket, .. } => {
                let result = Ok(self.relay.unread(idx));
                self.queue.push_back((idx, ClientEvent::UnreadPolled { ticket, result }));
            },
            ClientAction::RequestPermission => {
                if let Some(sim) = self.clients.get_mut(idx) {
                    sim.permission_requests += 1;
                    let answer = sim.permission_answer;
                    self.queue.push_back((idx, ClientEvent::PermissionResolved(answer)));
                }
            },
            ClientAction::ShowNotification(request) => {
                if let Some(sim) = self.clients.get_mut(idx) {
                    sim.shown.push(request);
                }
            },
            ClientAction::Publish(event) => {
                if let Some(sim) = self.clients.get_mut(idx) {
                    sim.observe(event);
                }
            },
        }
    }

    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        for Delivery { client, generation, text } in deliveries {
            self.queue.push_back((client, ClientEvent::FrameReceived { generation, text }));
        }
    }
}
