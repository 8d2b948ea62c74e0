//! Standard invariant checks.
//!
//! These capture lifecycle properties that must hold after every processed
//! event, whatever the interleaving.

use revline_core::ConnectionState;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// A client never holds more than one open transport, and a connected client
/// holds exactly one.
pub struct SingleLiveTransport;

impl Invariant for SingleLiveTransport {
    fn name(&self) -> &'static str {
        "single_live_transport"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.live_transports > 1 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: {} transports open",
                        client.id, client.live_transports
                    ),
                });
            }
            if client.state == ConnectionState::Connected && client.live_transports != 1 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {}: connected without a transport", client.id),
                });
            }
        }
        Ok(())
    }
}

/// A disconnected client has no room and no typing entries.
pub struct DisconnectedIsClean;

impl Invariant for DisconnectedIsClean {
    fn name(&self) -> &'static str {
        "disconnected_is_clean"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.state != ConnectionState::Disconnected {
                continue;
            }
            if let Some(room) = &client.current_room {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {}: disconnected but still in room {room}", client.id),
                });
            }
            if !client.typing.is_empty() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: disconnected with {} typing entries",
                        client.id,
                        client.typing.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Typing entries only exist while connected.
pub struct TypingRequiresConnection;

impl Invariant for TypingRequiresConnection {
    fn name(&self) -> &'static str {
        "typing_requires_connection"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if !client.typing.is_empty() && client.state != ConnectionState::Connected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: {} typing entries while {:?}",
                        client.id,
                        client.typing.len(),
                        client.state
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Observers that apply every typing event end up with the client's set.
pub struct ObserversMatchTracker;

impl Invariant for ObserversMatchTracker {
    fn name(&self) -> &'static str {
        "observers_match_tracker"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.typing != client.observed_typing {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: tracker {:?}, observers {:?}",
                        client.id, client.typing, client.observed_typing
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Connect attempts never exceed the configured limit.
pub struct AttemptsBounded;

impl Invariant for AttemptsBounded {
    fn name(&self) -> &'static str {
        "attempts_bounded"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.attempt > client.max_attempts {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: attempt {} of {}",
                        client.id, client.attempt, client.max_attempts
                    ),
                });
            }
        }
        Ok(())
    }
}

/// After shutdown nothing is left behind.
pub struct ShutdownIsFinal;

impl Invariant for ShutdownIsFinal {
    fn name(&self) -> &'static str {
        "shutdown_is_final"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in state.clients.iter().filter(|client| !client.alive) {
            let clean = client.state == ConnectionState::Disconnected
                && client.current_room.is_none()
                && client.typing.is_empty()
                && client.live_transports == 0;
            if !clean {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {}: state left after shutdown: {client:?}", client.id),
                });
            }
        }
        Ok(())
    }
}
