//! Property-based tests for the connection manager.
//!
//! Drives the manager with arbitrary interleavings of caller operations and
//! transport results, including results for generations that are long gone,
//! and checks the lifecycle invariants after every step.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use revline_core::{
    AuthToken, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState,
    TransportFailure,
};

#[derive(Debug, Clone)]
enum Op {
    Connect(u8),
    Disconnect,
    Reconnect,
    /// Report opened for `generation - back`
    Opened { back: u8 },
    Failed { back: u8, auth: bool },
    Closed { back: u8 },
    Advance(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => (0u8..2).prop_map(Op::Connect),
        1 => Just(Op::Disconnect),
        1 => Just(Op::Reconnect),
        3 => (0u8..3).prop_map(|back| Op::Opened { back }),
        3 => (0u8..3, prop::bool::weighted(0.1)).prop_map(|(back, auth)| Op::Failed { back, auth }),
        1 => (0u8..3).prop_map(|back| Op::Closed { back }),
        2 => (0u16..40_000).prop_map(Op::Advance),
    ]
}

/// Tracks which generations the driver would hold open.
#[derive(Default)]
struct Driver {
    pending: Vec<u64>,
    live: Vec<u64>,
}

impl Driver {
    fn apply(&mut self, actions: &[ConnectionAction]) {
        for action in actions {
            match action {
                ConnectionAction::Open { generation, .. } => self.pending.push(*generation),
                ConnectionAction::Close { generation, .. } => {
                    self.pending.retain(|g| g != generation);
                    self.live.retain(|g| g != generation);
                },
                _ => {},
            }
        }
    }

    fn promote(&mut self, generation: u64) {
        if let Some(pos) = self.pending.iter().position(|g| *g == generation) {
            self.pending.remove(pos);
            self.live.push(generation);
        }
    }
}

proptest! {
    #[test]
    fn prop_lifecycle_invariants_hold(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let config = ConnectionConfig::default();
        let max_attempts = config.max_attempts;
        let mut conn: ConnectionManager<Instant> = ConnectionManager::new(config);
        let mut driver = Driver::default();
        let mut now = Instant::now();

        for op in ops {
            let before = conn.generation();
            let actions = match op {
                Op::Connect(t) => conn.connect(AuthToken::new(format!("token-{t}")), now),
                Op::Disconnect => conn.disconnect("test"),
                Op::Reconnect => conn.reconnect(now),
                Op::Opened { back } => {
                    let generation = before.saturating_sub(u64::from(back));
                    driver.promote(generation);
                    conn.transport_opened(generation)
                },
                Op::Failed { back, auth } => {
                    let generation = before.saturating_sub(u64::from(back));
                    let failure = if auth {
                        TransportFailure::Unauthorized("401".to_string())
                    } else {
                        TransportFailure::Unreachable("refused".to_string())
                    };
                    driver.pending.retain(|g| *g != generation);
                    conn.transport_failed(generation, failure, now)
                },
                Op::Closed { back } => {
                    let generation = before.saturating_sub(u64::from(back));
                    driver.live.retain(|g| *g != generation);
                    conn.transport_closed(generation, "reset", now)
                },
                Op::Advance(ms) => {
                    now += Duration::from_millis(u64::from(ms));
                    conn.tick(now)
                },
            };
            driver.apply(&actions);

            // Only the current generation may remain live.
            prop_assert!(driver.live.len() <= 1, "live transports: {:?}", driver.live);
            if let Some(live) = driver.live.first() {
                prop_assert_eq!(*live, conn.generation());
                prop_assert_eq!(conn.state(), ConnectionState::Connected);
            }

            prop_assert!(conn.attempt() <= max_attempts);
            prop_assert!(conn.generation() >= before);

            if conn.state() == ConnectionState::Disconnected {
                prop_assert!(!conn.retry_pending());
                prop_assert_eq!(conn.attempt(), 0);
            }
        }
    }

    #[test]
    fn prop_stale_results_never_change_state(back in 1u64..5, auth in any::<bool>()) {
        let now = Instant::now();
        let mut conn: ConnectionManager<Instant> = ConnectionManager::new(ConnectionConfig::default());
        conn.connect(AuthToken::new("t"), now);
        conn.transport_opened(conn.generation());
        let stale = conn.generation().saturating_sub(back);

        let failure = if auth {
            TransportFailure::Unauthorized("401".to_string())
        } else {
            TransportFailure::Closed("reset".to_string())
        };

        prop_assert!(conn.transport_failed(stale, failure, now).is_empty());
        prop_assert!(conn.transport_closed(stale, "reset", now).is_empty());
        prop_assert_eq!(conn.state(), ConnectionState::Connected);
    }
}

#[test]
fn back_to_back_connects_open_one_transport() {
    let now = Instant::now();
    let mut conn: ConnectionManager<Instant> = ConnectionManager::new(ConnectionConfig::default());

    let mut actions = conn.connect(AuthToken::new("t"), now);
    actions.extend(conn.connect(AuthToken::new("t"), now));

    let opens = actions.iter().filter(|a| matches!(a, ConnectionAction::Open { .. })).count();
    assert_eq!(opens, 1);
}
