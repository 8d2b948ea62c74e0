//! Tokio runtime for the realtime client.
//!
//! The [`Runtime`] owns the [`Client`] state machine and executes its actions
//! against the I/O seams in [`crate::driver`]. It is the only task that ever
//! touches the client, so every event is processed to completion before the
//! next one starts. Application code talks to it through a cloneable
//! [`RealtimeHandle`] and observes it through the [`EventBus`].
//!
//! Transport opens, unread polls and permission prompts run as child tasks
//! and report back through an internal channel, tagged with the generation or
//! ticket they were started for. Results for anything the client no longer
//! waits on are discarded by the client itself.

use std::{collections::HashMap, sync::Arc, time::Duration};

use revline_core::{Environment, MessageId, PermissionState, RoomId, SessionContext};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::{AbortHandle, JoinSet},
    time::MissedTickBehavior,
};

use crate::{
    bus::EventBus,
    client::Client,
    driver::{Connector, Notifier, TransportHandle, UnreadSource},
    error::ClientError,
    event::{ClientAction, ClientEvent},
};

/// Result of a child task.
enum Completion {
    /// A transport finished opening. Its handle is staged until the client
    /// accepts it.
    Opened { generation: u64, handle: TransportHandle },
    /// Anything that maps straight to a client event.
    Event(ClientEvent),
}

/// Cloneable entry point for application code.
///
/// Every method queues a request and returns immediately. Outcomes are
/// reported on the [`EventBus`]. Once the runtime stopped, every method
/// returns [`ClientError::Stopped`].
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    commands: mpsc::UnboundedSender<ClientEvent>,
}

impl RealtimeHandle {
    fn request(&self, event: ClientEvent) -> Result<(), ClientError> {
        self.commands.send(event).map_err(|_| ClientError::Stopped)
    }

    /// Connect with the current session's token.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.request(ClientEvent::Connect)
    }

    /// Disconnect. The token is kept for a later `reconnect`.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.request(ClientEvent::Disconnect)
    }

    /// Connect again, e.g. after retries were exhausted.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.request(ClientEvent::Reconnect)
    }

    /// Login, logout or token refresh.
    pub fn set_session(&self, session: SessionContext) -> Result<(), ClientError> {
        self.request(ClientEvent::SessionChanged(session))
    }

    /// Join `room_id`.
    pub fn join_room(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.request(ClientEvent::JoinRoom { room_id })
    }

    /// Leave `room_id`.
    pub fn leave_room(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.request(ClientEvent::LeaveRoom { room_id })
    }

    /// Tell peers in `room_id` whether the local user is typing.
    pub fn send_typing(&self, room_id: RoomId, is_typing: bool) -> Result<(), ClientError> {
        self.request(ClientEvent::SendTyping { room_id, is_typing })
    }

    /// Report messages in `room_id` as read.
    pub fn mark_as_read(
        &self,
        room_id: RoomId,
        message_ids: Vec<MessageId>,
    ) -> Result<(), ClientError> {
        self.request(ClientEvent::MarkAsRead { room_id, message_ids })
    }

    /// Tear everything down and stop the runtime.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.request(ClientEvent::Shutdown)
    }

    /// Whether the runtime has stopped.
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Event loop driving a [`Client`].
pub struct Runtime<E: Environment> {
    client: Client<E>,
    bus: EventBus,
    connector: Arc<dyn Connector>,
    unread: Arc<dyn UnreadSource>,
    notifier: Arc<dyn Notifier>,
    tick_interval: Duration,

    commands: mpsc::UnboundedReceiver<ClientEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,

    /// The accepted transport and its generation.
    transport: Option<(u64, TransportHandle)>,
    /// Opened but not yet accepted by the client.
    staged: HashMap<u64, TransportHandle>,
    /// Opens in flight, by generation.
    opening: HashMap<u64, AbortHandle>,
    tasks: JoinSet<()>,
}

impl<E: Environment> Runtime<E> {
    /// Create a runtime and the handle that feeds it.
    pub fn new(
        client: Client<E>,
        bus: EventBus,
        connector: Arc<dyn Connector>,
        unread: Arc<dyn UnreadSource>,
        notifier: Arc<dyn Notifier>,
        tick_interval: Duration,
    ) -> (Self, RealtimeHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let runtime = Self {
            client,
            bus,
            connector,
            unread,
            notifier,
            tick_interval,
            commands,
            completions_tx,
            completions,
            transport: None,
            staged: HashMap::new(),
            opening: HashMap::new(),
            tasks: JoinSet::new(),
        };

        (runtime, RealtimeHandle { commands: commands_tx })
    }

    /// The client, for inspection.
    pub fn client(&self) -> &Client<E> {
        &self.client
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.client.is_alive() {
            tokio::select! {
                command = self.commands.recv() => {
                    // Every handle dropped: nobody can observe us any more
                    let event = command.unwrap_or(ClientEvent::Shutdown);
                    self.dispatch(event);
                },
                Some(completion) = self.completions.recv() => {
                    self.complete(completion);
                },
                (generation, frame) = next_frame(&mut self.transport) => match frame {
                    Some(text) => self.dispatch(ClientEvent::FrameReceived { generation, text }),
                    None => {
                        if let Some((_, mut handle)) = self.transport.take() {
                            handle.stop();
                        }
                        let reason = "transport closed".to_string();
                        self.dispatch(ClientEvent::TransportClosed { generation, reason });
                    },
                },
                Some(_) = self.tasks.join_next() => {},
                _ = ticker.tick() => self.dispatch(ClientEvent::Tick),
            }
        }

        self.stop_all();
        self.commands.close();
        tracing::info!("realtime runtime stopped");
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Opened { generation, handle } => {
                self.opening.remove(&generation);
                self.staged.insert(generation, handle);
                self.dispatch(ClientEvent::TransportOpened { generation });
            },
            Completion::Event(event) => {
                if let ClientEvent::TransportFailed { generation, .. } = &event {
                    self.opening.remove(generation);
                }
                self.dispatch(event);
            },
        }
    }

    /// Feed one event to the client and execute the resulting actions.
    fn dispatch(&mut self, event: ClientEvent) {
        let actions = self.client.handle(event);

        self.promote_staged();
        for action in actions {
            self.execute(action);
        }

        // Anything still staged was not accepted
        for (generation, mut handle) in self.staged.drain() {
            tracing::debug!(generation, "closing unaccepted transport");
            handle.stop();
        }
    }

    /// Make a staged transport current once the client is connected on its
    /// generation.
    fn promote_staged(&mut self) {
        if !self.client.is_connected() {
            return;
        }

        let generation = self.client.generation();
        let Some(handle) = self.staged.remove(&generation) else {
            return;
        };

        if let Some((old, mut previous)) = self.transport.replace((generation, handle)) {
            tracing::debug!(old, generation, "replacing transport");
            previous.stop();
        }
    }

    fn execute(&mut self, action: ClientAction) {
        match action {
            ClientAction::OpenTransport { generation, transport, token } => {
                tracing::debug!(generation, ?transport, "opening transport");
                let connector = Arc::clone(&self.connector);
                let completions = self.completions_tx.clone();
                let abort = self.tasks.spawn(async move {
                    let completion = match connector.open(transport, &token).await {
                        Ok(handle) => Completion::Opened { generation, handle },
                        Err(failure) => {
                            Completion::Event(ClientEvent::TransportFailed { generation, failure })
                        },
                    };
                    let _ = completions.send(completion);
                });
                self.opening.insert(generation, abort);
            },
            ClientAction::SendCommand { generation, command } => {
                let Some((current, handle)) = &self.transport else {
                    tracing::debug!(generation, command = command.name(), "no transport, dropping command");
                    return;
                };
                if *current != generation {
                    tracing::debug!(generation, current, "command for stale transport");
                    return;
                }

                let text = match command.encode() {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::error!(%error, "failed to encode command");
                        return;
                    },
                };

                // Never wait on the transport: a stalled peer must not stall the loop
                match handle.to_server.try_send(text) {
                    Ok(()) => {},
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(generation, command = command.name(), "transport backlogged, command dropped");
                    },
                    Err(TrySendError::Closed(_)) => {
                        tracing::warn!(generation, command = command.name(), "transport gone, command dropped");
                        let reason = "transport writer closed".to_string();
                        let _ = self
                            .completions_tx
                            .send(Completion::Event(ClientEvent::TransportClosed { generation, reason }));
                    },
                }
            },
            ClientAction::CloseTransport { generation, reason } => {
                self.close(generation, &reason);
            },
            ClientAction::PollUnread { ticket, session } => {
                let unread = Arc::clone(&self.unread);
                let completions = self.completions_tx.clone();
                self.tasks.spawn(async move {
                    let result = unread.fetch(&session).await;
                    let _ = completions.send(Completion::Event(ClientEvent::UnreadPolled { ticket, result }));
                });
            },
            ClientAction::RequestPermission => {
                let notifier = Arc::clone(&self.notifier);
                let completions = self.completions_tx.clone();
                self.tasks.spawn(async move {
                    let state: PermissionState = notifier.request_permission().await;
                    let _ = completions.send(Completion::Event(ClientEvent::PermissionResolved(state)));
                });
            },
            ClientAction::ShowNotification(request) => {
                let notifier = Arc::clone(&self.notifier);
                self.tasks.spawn(async move {
                    notifier.show(&request).await;
                });
            },
            ClientAction::Publish(event) => self.bus.publish(&event),
        }
    }

    fn close(&mut self, generation: u64, reason: &str) {
        if let Some(abort) = self.opening.remove(&generation) {
            tracing::debug!(generation, reason, "cancelling transport open");
            abort.abort();
        }
        if let Some(mut handle) = self.staged.remove(&generation) {
            handle.stop();
        }
        if self.transport.as_ref().is_some_and(|(current, _)| *current == generation)
            && let Some((_, mut handle)) = self.transport.take()
        {
            tracing::info!(generation, reason, "closing transport");
            handle.stop();
        }
    }

    fn stop_all(&mut self) {
        for (_, abort) in self.opening.drain() {
            abort.abort();
        }
        for (_, mut handle) in self.staged.drain() {
            handle.stop();
        }
        if let Some((_, mut handle)) = self.transport.take() {
            handle.stop();
        }
        self.tasks.abort_all();
    }
}

/// Next frame of the current transport. Pending forever without one.
async fn next_frame(transport: &mut Option<(u64, TransportHandle)>) -> (u64, Option<String>) {
    match transport {
        Some((generation, handle)) => (*generation, handle.from_server.recv().await),
        None => std::future::pending().await,
    }
}
