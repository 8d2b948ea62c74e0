//! Connection lifecycle state machine.
//!
//! Owns the decision of when a transport is opened, retried, replaced or torn
//! down. The transport itself belongs to whoever executes the returned
//! [`ConnectionAction`]s. Every `Open` carries a fresh generation number and
//! every result the driver reports back must carry the generation it was
//! opened with; anything else is stale and ignored, so a late transport can
//! never become a second live connection.
//!
//! # State Machine
//!
//! ```text
//!                 connect            opened
//! ┌──────────────┐ ──────> ┌────────────┐ ──────> ┌───────────┐
//! │ Disconnected │         │ Connecting │         │ Connected │
//! └──────────────┘ <────── └────────────┘         └───────────┘
//!        ↑      exhausted / auth   ↑ retry               │
//!        │                         └───────              │ closed
//!        │                                               ↓
//!        │          exhausted / auth              ┌──────────────┐
//!        └─────────────────────────────────────── │ Reconnecting │
//!                                                 └──────────────┘
//! ```

use std::{
    fmt::Debug,
    ops::Sub,
    time::{Duration, Instant},
};

use revline_proto::OutboundCommand;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConnectionError, TransportFailure},
    session::AuthToken,
};

/// Connection attempts made before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for exponential backoff.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Time allowed for a single transport open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Concrete transport used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent WebSocket upgrade.
    WebSocket,
    /// HTTP long-polling.
    Polling,
}

/// Delay policy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// `base * 2^(attempt - 1)`, capped.
    Exponential,
}

impl Backoff {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay(self, base: Duration, max: Duration, attempt: u32) -> Duration {
        match self {
            Self::Fixed => base.min(max),
            Self::Exponential => {
                let factor = 1u32 << attempt.saturating_sub(1).min(31);
                base.saturating_mul(factor).min(max)
            },
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Attempts per connect before settling in Disconnected
    pub max_attempts: u32,
    /// Base retry delay
    pub retry_delay: Duration,
    /// Cap for exponential backoff
    pub max_retry_delay: Duration,
    /// Delay policy
    pub backoff: Backoff,
    /// Time allowed for one transport open
    pub connect_timeout: Duration,
    /// Transports tried in order within one attempt
    pub transports: Vec<TransportKind>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            backoff: Backoff::Exponential,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and nothing scheduled
    Disconnected,
    /// First connect in progress
    Connecting,
    /// Transport open and authenticated
    Connected,
    /// Transport lost; retrying with the same token
    Reconnecting,
}

impl ConnectionState {
    /// Whether a connect is in flight or established.
    pub fn is_live(self) -> bool {
        self != Self::Disconnected
    }
}

/// Actions returned by the connection state machine.
///
/// The driver (runtime or simulation harness) executes these:
/// - `Open`: start opening a transport tagged with `generation`
/// - `Send`: write the command to the transport of `generation`
/// - `Close`: tear down the transport of `generation` if it exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new transport
    Open {
        /// Tag the driver must echo back with the result
        generation: u64,
        /// Which transport to use
        transport: TransportKind,
        /// Bearer token to attach
        token: AuthToken,
    },

    /// Send a command over the live transport
    Send {
        /// Transport the command is addressed to
        generation: u64,
        /// Command to encode and send
        command: OutboundCommand,
    },

    /// Close a transport
    Close {
        /// Transport to close
        generation: u64,
        /// Reason, for logs
        reason: String,
    },

    /// Lifecycle state changed
    StateChanged(ConnectionState),

    /// Something went wrong; surfaced to observers, never thrown
    Failed(ConnectionError),
}

/// Connection lifecycle manager.
///
/// Pure state machine. Time is passed to the methods that need it.
///
/// # Invariants
///
/// - At most one generation is live: only results tagged with
///   [`Self::generation`] are accepted.
/// - `attempt <= config.max_attempts`.
/// - In `Disconnected` there is no pending open and no scheduled retry.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I = Instant>
where
    I: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration>,
{
    state: ConnectionState,
    config: ConnectionConfig,
    token: Option<AuthToken>,
    generation: u64,
    /// 1-based attempt within the current connect; 0 when idle
    attempt: u32,
    /// Position in `config.transports` within the current attempt
    transport_index: usize,
    /// When the pending open started
    opening_since: Option<I>,
    /// Scheduled retry: (scheduled at, delay)
    retry: Option<(I, Duration)>,
    /// Transport in use while connected
    transport: Option<TransportKind>,
}

impl<I> ConnectionManager<I>
where
    I: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration>,
{
    /// Create a manager in [`ConnectionState::Disconnected`].
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            token: None,
            generation: 0,
            attempt: 0,
            transport_index: 0,
            opening_since: None,
            retry: None,
            transport: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Generation of the only transport that may be live.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current attempt (1-based), 0 when idle.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Transport in use while connected.
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        self.transport
    }

    /// Token used for the current or last connect.
    #[must_use]
    pub fn token(&self) -> Option<&AuthToken> {
        self.token.as_ref()
    }

    /// Whether a retry is scheduled.
    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establish a connection with `token`.
    ///
    /// Single-flight: while live with the same token this is a no-op. A
    /// different token fully tears down the current connection before the
    /// new one is opened.
    pub fn connect(&mut self, token: AuthToken, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if self.state.is_live() {
            if self.token.as_ref() == Some(&token) {
                tracing::debug!(state = ?self.state, "connect ignored, already in progress");
                return actions;
            }

            tracing::info!(generation = self.generation, "token changed, re-authenticating");
            actions.extend(self.teardown("re-authenticating"));
        }

        self.token = Some(token);
        actions.extend(self.begin(ConnectionState::Connecting, now));
        actions
    }

    /// Tear down the transport and cancel any pending retry.
    ///
    /// The token is kept so [`Self::reconnect`] can use it.
    pub fn disconnect(&mut self, reason: &str) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        tracing::info!(generation = self.generation, reason, "disconnecting");
        self.teardown(reason)
    }

    /// Start a new connect with the stored token.
    ///
    /// Required after retries are exhausted. No-op while live.
    pub fn reconnect(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.state.is_live() {
            tracing::debug!(state = ?self.state, "reconnect ignored, already live");
            return Vec::new();
        }

        if self.token.is_none() {
            return vec![ConnectionAction::Failed(ConnectionError::MissingToken)];
        }

        self.begin(ConnectionState::Connecting, now)
    }

    /// Driver reports that the transport of `generation` is open.
    pub fn transport_opened(&mut self, generation: u64) -> Vec<ConnectionAction> {
        if generation == self.generation && self.is_connected() {
            tracing::debug!(generation, "duplicate open report ignored");
            return Vec::new();
        }

        if !self.is_pending(generation) {
            tracing::debug!(generation, current = self.generation, "closing stale transport");
            return vec![ConnectionAction::Close {
                generation,
                reason: "stale transport".to_string(),
            }];
        }

        let transport = self.current_kind();
        tracing::info!(generation, attempt = self.attempt, ?transport, "connected");

        self.state = ConnectionState::Connected;
        self.transport = Some(transport);
        self.opening_since = None;
        self.attempt = 0;
        self.transport_index = 0;

        vec![ConnectionAction::StateChanged(ConnectionState::Connected)]
    }

    /// Driver reports that opening the transport of `generation` failed.
    pub fn transport_failed(
        &mut self,
        generation: u64,
        failure: TransportFailure,
        now: I,
    ) -> Vec<ConnectionAction> {
        if !self.is_pending(generation) {
            tracing::debug!(generation, current = self.generation, %failure, "stale failure ignored");
            return Vec::new();
        }

        self.fail_attempt(failure, now)
    }

    /// Driver reports that the transport of `generation` closed.
    pub fn transport_closed(
        &mut self,
        generation: u64,
        reason: &str,
        now: I,
    ) -> Vec<ConnectionAction> {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "stale close ignored");
            return Vec::new();
        }

        match self.state {
            ConnectionState::Connected => {
                tracing::info!(generation, reason, "transport lost, reconnecting");
                self.transport = None;
                self.begin(ConnectionState::Reconnecting, now)
            },
            ConnectionState::Connecting | ConnectionState::Reconnecting
                if self.opening_since.is_some() =>
            {
                self.fail_attempt(TransportFailure::Closed(reason.to_string()), now)
            },
            _ => Vec::new(),
        }
    }

    /// Server rejected the token on an open transport.
    ///
    /// Not retried. The token is discarded; a new one must be supplied with
    /// [`Self::connect`].
    pub fn auth_rejected(&mut self, reason: &str) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        tracing::warn!(generation = self.generation, reason, "authentication rejected");
        let mut actions = self.teardown(reason);
        self.token = None;
        actions.push(ConnectionAction::Failed(ConnectionError::Auth(reason.to_string())));
        actions
    }

    /// Process periodic maintenance: due retries and connect timeouts.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        if let Some((since, delay)) = self.retry
            && now - since >= delay
        {
            self.retry = None;
            self.attempt += 1;
            self.transport_index = 0;
            tracing::debug!(attempt = self.attempt, "retry due");
            return self.open(now);
        }

        if let Some(since) = self.opening_since
            && now - since >= self.config.connect_timeout
        {
            let mut actions = vec![ConnectionAction::Close {
                generation: self.generation,
                reason: "connect timeout".to_string(),
            }];
            actions.extend(self.fail_attempt(TransportFailure::Timeout(self.config.connect_timeout), now));
            return actions;
        }

        Vec::new()
    }

    /// Address `command` to the live transport.
    ///
    /// Returns `None` when not connected; the command is dropped. There is no
    /// delivery guarantee for anything sent while disconnected.
    pub fn send(&self, command: OutboundCommand) -> Option<ConnectionAction> {
        if !self.is_connected() {
            tracing::debug!(command = command.name(), state = ?self.state, "not connected, dropping command");
            return None;
        }

        Some(ConnectionAction::Send { generation: self.generation, command })
    }

    fn is_pending(&self, generation: u64) -> bool {
        generation == self.generation && self.opening_since.is_some()
    }

    fn current_kind(&self) -> TransportKind {
        self.config
            .transports
            .get(self.transport_index)
            .copied()
            .unwrap_or(TransportKind::WebSocket)
    }

    fn begin(&mut self, state: ConnectionState, now: I) -> Vec<ConnectionAction> {
        self.state = state;
        self.attempt = 1;
        self.transport_index = 0;
        self.retry = None;

        let mut actions = vec![ConnectionAction::StateChanged(state)];
        actions.extend(self.open(now));
        actions
    }

    fn open(&mut self, now: I) -> Vec<ConnectionAction> {
        let Some(token) = self.token.clone() else {
            let mut actions = self.settle();
            actions.push(ConnectionAction::Failed(ConnectionError::MissingToken));
            return actions;
        };

        self.generation += 1;
        self.opening_since = Some(now);

        let transport = self.current_kind();
        tracing::debug!(generation = self.generation, attempt = self.attempt, ?transport, "opening transport");

        vec![ConnectionAction::Open { generation: self.generation, transport, token }]
    }

    fn fail_attempt(&mut self, failure: TransportFailure, now: I) -> Vec<ConnectionAction> {
        self.opening_since = None;

        if failure.is_auth() {
            tracing::warn!(generation = self.generation, %failure, "transport rejected token");
            self.token = None;
            let mut actions = self.settle();
            actions.push(ConnectionAction::Failed(ConnectionError::Auth(failure.to_string())));
            return actions;
        }

        tracing::warn!(generation = self.generation, attempt = self.attempt, %failure, "connection attempt failed");
        let mut actions = vec![ConnectionAction::Failed(ConnectionError::Transport {
            attempt: self.attempt,
            failure,
        })];

        if self.transport_index + 1 < self.config.transports.len() {
            self.transport_index += 1;
            actions.extend(self.open(now));
            return actions;
        }

        if self.attempt >= self.config.max_attempts {
            let attempts = self.attempt;
            tracing::warn!(attempts, "retries exhausted");
            actions.extend(self.settle());
            actions.push(ConnectionAction::Failed(ConnectionError::RetriesExhausted { attempts }));
            return actions;
        }

        let delay = self.config.backoff.delay(
            self.config.retry_delay,
            self.config.max_retry_delay,
            self.attempt,
        );
        tracing::debug!(attempt = self.attempt, ?delay, "retry scheduled");
        self.retry = Some((now, delay));

        actions
    }

    /// Close the current generation and settle in Disconnected.
    fn teardown(&mut self, reason: &str) -> Vec<ConnectionAction> {
        let mut actions = vec![ConnectionAction::Close {
            generation: self.generation,
            reason: reason.to_string(),
        }];
        actions.extend(self.settle());
        actions
    }

    fn settle(&mut self) -> Vec<ConnectionAction> {
        // Invalidate anything still in flight for the old generation.
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        self.attempt = 0;
        self.transport_index = 0;
        self.opening_since = None;
        self.retry = None;
        self.transport = None;

        vec![ConnectionAction::StateChanged(ConnectionState::Disconnected)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Manager = ConnectionManager<Instant>;

    fn token(value: &str) -> AuthToken {
        AuthToken::new(value)
    }

    fn open_generation(actions: &[ConnectionAction]) -> Option<(u64, TransportKind)> {
        actions.iter().rev().find_map(|action| match action {
            ConnectionAction::Open { generation, transport, .. } => Some((*generation, *transport)),
            _ => None,
        })
    }

    fn connected(now: Instant) -> Manager {
        let mut conn = Manager::new(ConnectionConfig::default());
        let actions = conn.connect(token("t1"), now);
        let (generation, _) = open_generation(&actions).unwrap();
        conn.transport_opened(generation);
        conn
    }

    #[test]
    fn connection_lifecycle() {
        let t0 = Instant::now();
        let mut conn = Manager::new(ConnectionConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let actions = conn.connect(token("t1"), t0);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(actions[0], ConnectionAction::StateChanged(ConnectionState::Connecting));
        let (generation, transport) = open_generation(&actions).unwrap();
        assert_eq!(transport, TransportKind::WebSocket);

        let actions = conn.transport_opened(generation);
        assert_eq!(actions, vec![ConnectionAction::StateChanged(ConnectionState::Connected)]);
        assert!(conn.is_connected());
        assert_eq!(conn.transport(), Some(TransportKind::WebSocket));

        let actions = conn.disconnect("logout");
        assert!(matches!(actions[0], ConnectionAction::Close { generation: g, .. } if g == generation));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.generation() > generation);
    }

    #[test]
    fn connect_twice_is_single_flight() {
        let t0 = Instant::now();
        let mut conn = Manager::new(ConnectionConfig::default());

        let first = conn.connect(token("t1"), t0);
        let second = conn.connect(token("t1"), t0);

        assert!(open_generation(&first).is_some());
        assert!(second.is_empty());
    }

    #[test]
    fn new_token_reauthenticates() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let old = conn.generation();

        let actions = conn.connect(token("t2"), t0);

        assert!(matches!(actions[0], ConnectionAction::Close { generation, .. } if generation == old));
        assert!(actions.contains(&ConnectionAction::StateChanged(ConnectionState::Disconnected)));
        let (generation, _) = open_generation(&actions).unwrap();
        assert!(generation > old);
        assert_eq!(conn.token(), Some(&token("t2")));
    }

    #[test]
    fn upgrade_failure_falls_back_to_polling() {
        let t0 = Instant::now();
        let mut conn = Manager::new(ConnectionConfig::default());
        let (generation, _) = open_generation(&conn.connect(token("t1"), t0)).unwrap();

        let actions = conn.transport_failed(
            generation,
            TransportFailure::UpgradeRejected("400".to_string()),
            t0,
        );

        let (fallback, transport) = open_generation(&actions).unwrap();
        assert_eq!(transport, TransportKind::Polling);
        assert_eq!(conn.attempt(), 1);

        conn.transport_opened(fallback);
        assert_eq!(conn.transport(), Some(TransportKind::Polling));
    }

    #[test]
    fn failures_retry_with_backoff_then_exhaust() {
        let t0 = Instant::now();
        let config = ConnectionConfig {
            max_attempts: 2,
            transports: vec![TransportKind::WebSocket],
            ..ConnectionConfig::default()
        };
        let mut conn = Manager::new(config);
        let (generation, _) = open_generation(&conn.connect(token("t1"), t0)).unwrap();

        let unreachable = TransportFailure::Unreachable("refused".to_string());
        let actions = conn.transport_failed(generation, unreachable.clone(), t0);
        assert!(open_generation(&actions).is_none());
        assert!(conn.retry_pending());

        // Not due yet
        assert!(conn.tick(t0 + Duration::from_millis(500)).is_empty());

        let actions = conn.tick(t0 + DEFAULT_RETRY_DELAY);
        let (generation, _) = open_generation(&actions).unwrap();
        assert_eq!(conn.attempt(), 2);

        let actions = conn.transport_failed(generation, unreachable, t0 + DEFAULT_RETRY_DELAY);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(
            actions.contains(&ConnectionAction::Failed(ConnectionError::RetriesExhausted {
                attempts: 2
            }))
        );
        assert!(!conn.retry_pending());
    }

    #[test]
    fn stale_results_are_ignored() {
        let t0 = Instant::now();
        let mut conn = Manager::new(ConnectionConfig::default());
        let (stale, _) = open_generation(&conn.connect(token("t1"), t0)).unwrap();
        conn.disconnect("logout");

        let actions = conn.transport_opened(stale);
        assert!(matches!(actions[..], [ConnectionAction::Close { generation, .. }] if generation == stale));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        assert!(conn.transport_failed(stale, TransportFailure::Closed("x".into()), t0).is_empty());
        assert!(conn.transport_closed(stale, "x", t0).is_empty());
    }

    #[test]
    fn unexpected_close_reconnects() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let actions = conn.transport_closed(conn.generation(), "reset", t0);

        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(actions[0], ConnectionAction::StateChanged(ConnectionState::Reconnecting));
        assert!(open_generation(&actions).is_some());
    }

    #[test]
    fn auth_failure_is_not_retried() {
        let t0 = Instant::now();
        let mut conn = Manager::new(ConnectionConfig::default());
        let (generation, _) = open_generation(&conn.connect(token("t1"), t0)).unwrap();

        let actions =
            conn.transport_failed(generation, TransportFailure::Unauthorized("401".into()), t0);

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(actions.last(), Some(ConnectionAction::Failed(ConnectionError::Auth(_)))));
        assert!(open_generation(&actions).is_none());
        assert_eq!(conn.reconnect(t0), vec![ConnectionAction::Failed(
            ConnectionError::MissingToken
        )]);
    }

    #[test]
    fn connect_timeout_counts_as_failure() {
        let t0 = Instant::now();
        let config =
            ConnectionConfig { transports: vec![TransportKind::WebSocket], ..Default::default() };
        let mut conn = Manager::new(config);
        let (generation, _) = open_generation(&conn.connect(token("t1"), t0)).unwrap();

        let actions = conn.tick(t0 + DEFAULT_CONNECT_TIMEOUT);

        assert!(matches!(actions[0], ConnectionAction::Close { generation: g, .. } if g == generation));
        assert!(actions.iter().any(|a| matches!(
            a,
            ConnectionAction::Failed(ConnectionError::Transport {
                failure: TransportFailure::Timeout(_),
                ..
            })
        )));
        assert!(conn.retry_pending());
    }

    #[test]
    fn send_only_when_connected() {
        let t0 = Instant::now();
        let room = revline_proto::RoomId::new("r1").unwrap();
        let command = OutboundCommand::JoinRoom { room_id: room };

        let idle = Manager::new(ConnectionConfig::default());
        assert_eq!(idle.send(command.clone()), None);

        let conn = connected(t0);
        assert!(matches!(
            conn.send(command),
            Some(ConnectionAction::Send { generation, .. }) if generation == conn.generation()
        ));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        assert_eq!(Backoff::Exponential.delay(base, max, 1), Duration::from_secs(1));
        assert_eq!(Backoff::Exponential.delay(base, max, 3), Duration::from_secs(4));
        assert_eq!(Backoff::Exponential.delay(base, max, 10), max);
        assert_eq!(Backoff::Exponential.delay(base, max, u32::MAX), max);
        assert_eq!(Backoff::Fixed.delay(base, max, 4), base);
    }
}
