//! In-memory messaging service.
//!
//! The relay plays the server side of the realtime channel for simulated
//! clients: it accepts transports, keeps room membership, and fans outbound
//! commands out as inbound events to the other members of a room. Transport
//! opens can be made to fail at a seeded rate, so chaos runs are reproducible.

use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use revline_core::TransportFailure;
use revline_proto::{
    InboundEvent, MessageId, MessageRead, NewMessage, NotificationPayload, OutboundCommand,
    Presence, RoomId, ServerError, UserId, UserTyping,
};

/// Index of a simulated client.
pub type ClientIdx = usize;

/// A frame for one transport of one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Receiving client.
    pub client: ClientIdx,
    /// Transport generation the frame travels on.
    pub generation: u64,
    /// Encoded envelope.
    pub text: String,
}

/// Identity the relay knows a client by.
#[derive(Debug, Clone)]
struct Account {
    user_id: UserId,
    nickname: String,
    unread: u64,
}

/// Server side of every simulated transport.
#[derive(Debug)]
pub struct SimRelay {
    rng: ChaCha8Rng,
    open_failure_rate: f64,
    accounts: Vec<Account>,
    /// Open transports per client, by generation.
    connections: BTreeMap<ClientIdx, BTreeSet<u64>>,
    /// Server-side room membership.
    rooms: BTreeMap<RoomId, BTreeSet<ClientIdx>>,
    next_message: u64,
}

impl SimRelay {
    /// Relay for `users`, indexed by client. Opens never fail.
    pub fn new(seed: u64, users: Vec<(UserId, String)>) -> Self {
        let accounts = users
            .into_iter()
            .map(|(user_id, nickname)| Account { user_id, nickname, unread: 0 })
            .collect();

        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            open_failure_rate: 0.0,
            accounts,
            connections: BTreeMap::new(),
            rooms: BTreeMap::new(),
            next_message: 0,
        }
    }

    /// Fail transport opens with probability `rate`, clamped to `[0, 1]`.
    pub fn set_open_failure_rate(&mut self, rate: f64) {
        self.open_failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Accept or refuse a transport.
    pub fn open(&mut self, client: ClientIdx, generation: u64) -> Result<(), TransportFailure> {
        if self.open_failure_rate > 0.0 && self.rng.gen_bool(self.open_failure_rate) {
            tracing::debug!(client, generation, "relay refusing transport");
            return Err(TransportFailure::Unreachable("simulated network failure".to_string()));
        }

        self.connections.entry(client).or_default().insert(generation);
        Ok(())
    }

    /// Drop one transport. The client leaves every room once it has none.
    pub fn close(&mut self, client: ClientIdx, generation: u64) {
        let Some(open) = self.connections.get_mut(&client) else {
            return;
        };
        open.remove(&generation);

        if open.is_empty() {
            self.connections.remove(&client);
            for members in self.rooms.values_mut() {
                members.remove(&client);
            }
        }
    }

    /// Drop every transport of `client`, as a network partition would.
    /// Returns the generations that were open.
    pub fn kill(&mut self, client: ClientIdx) -> Vec<u64> {
        let generations: Vec<u64> =
            self.connections.get(&client).map(|open| open.iter().copied().collect()).unwrap_or_default();
        for generation in &generations {
            self.close(client, *generation);
        }
        generations
    }

    /// Open transports of `client`.
    pub fn live(&self, client: ClientIdx) -> usize {
        self.connections.get(&client).map_or(0, BTreeSet::len)
    }

    /// Clients the relay has subscribed to `room_id`.
    pub fn members(&self, room_id: &RoomId) -> Vec<ClientIdx> {
        self.rooms.get(room_id).map(|members| members.iter().copied().collect()).unwrap_or_default()
    }

    /// Set the unread count the relay reports for `client`.
    pub fn set_unread(&mut self, client: ClientIdx, count: u64) {
        if let Some(account) = self.accounts.get_mut(client) {
            account.unread = count;
        }
    }

    /// Unread count of `client`.
    pub fn unread(&self, client: ClientIdx) -> u64 {
        self.accounts.get(client).map_or(0, |account| account.unread)
    }

    /// Apply a command sent by `client` on `generation`.
    pub fn handle(
        &mut self,
        client: ClientIdx,
        generation: u64,
        command: &OutboundCommand,
    ) -> Vec<Delivery> {
        let connected =
            self.connections.get(&client).is_some_and(|open| open.contains(&generation));
        let Some(account) = self.accounts.get(client).cloned() else {
            return Vec::new();
        };
        if !connected {
            tracing::debug!(client, generation, command = command.name(), "command on closed transport");
            return Vec::new();
        }

        match command {
            OutboundCommand::JoinRoom { room_id } => {
                if !self.rooms.entry(room_id.clone()).or_default().insert(client) {
                    return Vec::new();
                }
                let event = InboundEvent::UserJoined(Presence {
                    room_id: room_id.clone(),
                    user_id: account.user_id,
                });
                self.broadcast(room_id, Some(client), &event)
            },
            OutboundCommand::LeaveRoom { room_id } => {
                let left = self.rooms.get_mut(room_id).is_some_and(|members| members.remove(&client));
                if !left {
                    return Vec::new();
                }
                let event = InboundEvent::UserLeft(Presence {
                    room_id: room_id.clone(),
                    user_id: account.user_id,
                });
                self.broadcast(room_id, Some(client), &event)
            },
            OutboundCommand::Typing { room_id, is_typing } => {
                let event = InboundEvent::UserTyping(UserTyping {
                    room_id: room_id.clone(),
                    user_id: account.user_id,
                    user_nickname: account.nickname,
                    is_typing: *is_typing,
                });
                self.broadcast(room_id, Some(client), &event)
            },
            OutboundCommand::MarkAsRead { room_id, message_ids } => {
                let event = InboundEvent::MessageRead(MessageRead {
                    room_id: room_id.clone(),
                    message_ids: message_ids.clone(),
                });
                self.broadcast(room_id, Some(client), &event)
            },
        }
    }

    /// A message posted by `sender` through another channel (HTTP in
    /// production), delivered to every member including the sender.
    pub fn post_message(&mut self, sender: ClientIdx, room_id: &RoomId, content: &str) -> Vec<Delivery> {
        let Some(account) = self.accounts.get(sender).cloned() else {
            return Vec::new();
        };
        self.next_message += 1;

        let Ok(message_id) = MessageId::new(format!("m{}", self.next_message)) else {
            return Vec::new();
        };
        let event = InboundEvent::NewMessage(NewMessage {
            id: format!("doc-{}", self.next_message),
            message_id,
            room_id: room_id.clone(),
            sender_id: account.user_id,
            content: content.to_string(),
            sender_nickname: account.nickname,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            is_agent: false,
            is_edited: false,
            is_deleted: false,
            is_pinned: false,
            is_system: false,
        });
        self.broadcast(room_id, None, &event)
    }

    /// Push an account notification to `client`.
    pub fn notify(&mut self, client: ClientIdx, payload: NotificationPayload) -> Vec<Delivery> {
        if let Some(count) = payload.unread_count {
            self.set_unread(client, count);
        }
        self.to_client(client, &InboundEvent::NewNotification(payload))
    }

    /// Reject `client`'s token on its open transports.
    pub fn reject_token(&mut self, client: ClientIdx) -> Vec<Delivery> {
        let event = InboundEvent::Error(ServerError {
            code: ServerError::UNAUTHORIZED.to_string(),
            message: "token expired".to_string(),
        });
        self.to_client(client, &event)
    }

    fn broadcast(
        &self,
        room_id: &RoomId,
        except: Option<ClientIdx>,
        event: &InboundEvent,
    ) -> Vec<Delivery> {
        let Some(members) = self.rooms.get(room_id) else {
            return Vec::new();
        };

        members
            .iter()
            .filter(|member| Some(**member) != except)
            .flat_map(|member| self.to_client(*member, event))
            .collect()
    }

    fn to_client(&self, client: ClientIdx, event: &InboundEvent) -> Vec<Delivery> {
        let text = match event.encode() {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(%error, "relay failed to encode event");
                return Vec::new();
            },
        };

        self.connections
            .get(&client)
            .into_iter()
            .flatten()
            .map(|generation| Delivery { client, generation: *generation, text: text.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay() -> SimRelay {
        let users = (0..3)
            .map(|i| (UserId::new(format!("u{i}")).unwrap(), format!("User {i}")))
            .collect();
        SimRelay::new(7, users)
    }

    fn room() -> RoomId {
        RoomId::new("r1").unwrap()
    }

    #[test]
    fn typing_reaches_other_members_only() {
        let mut relay = relay();
        for client in 0..3 {
            relay.open(client, 1).unwrap();
        }
        relay.handle(0, 1, &OutboundCommand::JoinRoom { room_id: room() });
        relay.handle(1, 1, &OutboundCommand::JoinRoom { room_id: room() });

        let deliveries =
            relay.handle(0, 1, &OutboundCommand::Typing { room_id: room(), is_typing: true });

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].client, 1);
    }

    #[test]
    fn closing_last_transport_leaves_rooms() {
        let mut relay = relay();
        relay.open(0, 1).unwrap();
        relay.handle(0, 1, &OutboundCommand::JoinRoom { room_id: room() });

        relay.close(0, 1);

        assert!(relay.members(&room()).is_empty());
        assert_eq!(relay.live(0), 0);
    }

    #[test]
    fn commands_on_closed_transport_ignored() {
        let mut relay = relay();
        relay.open(0, 2).unwrap();

        assert!(relay.handle(0, 1, &OutboundCommand::JoinRoom { room_id: room() }).is_empty());
        assert!(relay.members(&room()).is_empty());
    }

    #[test]
    fn same_seed_same_failures() {
        let outcomes = |seed| {
            let mut relay = SimRelay::new(seed, vec![(UserId::new("u0").unwrap(), String::new())]);
            relay.set_open_failure_rate(0.5);
            (1..=32).map(|generation| relay.open(0, generation).is_ok()).collect::<Vec<_>>()
        };

        assert_eq!(outcomes(42), outcomes(42));
    }
}
