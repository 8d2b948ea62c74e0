//! Random operation sequences against the simulated world.
//!
//! Every step of every run checks the standard invariants; a property failure
//! prints the violations together with the shrunk operation list.

use std::time::Duration;

use proptest::prelude::*;
use revline_client::ClientEvent;
use revline_core::{AuthToken, ConnectionState, RoomId, SessionContext, UserId};
use revline_harness::{SimOptions, SimWorld};
use revline_proto::MessageId;

const USERS: [&str; 3] = ["alice", "bob", "carol"];
const ROOMS: [&str; 2] = ["r1", "r2"];

#[derive(Debug, Clone)]
enum Op {
    Connect(usize),
    Disconnect(usize),
    Reconnect(usize),
    Join(usize, usize),
    Leave(usize, usize),
    Typing(usize, usize, bool),
    MarkRead(usize, usize),
    Post(usize, usize),
    Kill(usize),
    RejectToken(usize),
    RefreshToken(usize),
    Advance(u64),
}

fn op() -> impl Strategy<Value = Op> {
    let client = 0..USERS.len();
    let room = 0..ROOMS.len();
    prop_oneof![
        4 => client.clone().prop_map(Op::Connect),
        1 => client.clone().prop_map(Op::Disconnect),
        1 => client.clone().prop_map(Op::Reconnect),
        3 => (client.clone(), room.clone()).prop_map(|(c, r)| Op::Join(c, r)),
        1 => (client.clone(), room.clone()).prop_map(|(c, r)| Op::Leave(c, r)),
        4 => (client.clone(), room.clone(), any::<bool>()).prop_map(|(c, r, t)| Op::Typing(c, r, t)),
        1 => (client.clone(), room.clone()).prop_map(|(c, r)| Op::MarkRead(c, r)),
        2 => (client.clone(), room.clone()).prop_map(|(c, r)| Op::Post(c, r)),
        1 => client.clone().prop_map(Op::Kill),
        1 => client.clone().prop_map(Op::RejectToken),
        1 => client.prop_map(Op::RefreshToken),
        4 => (0u64..8_000).prop_map(Op::Advance),
    ]
}

fn room(idx: usize) -> RoomId {
    RoomId::new(ROOMS[idx]).unwrap()
}

fn apply(world: &mut SimWorld, op: &Op) -> Result<(), String> {
    let result = match op {
        Op::Connect(c) => world.send(*c, ClientEvent::Connect),
        Op::Disconnect(c) => world.send(*c, ClientEvent::Disconnect),
        Op::Reconnect(c) => world.send(*c, ClientEvent::Reconnect),
        Op::Join(c, r) => world.send(*c, ClientEvent::JoinRoom { room_id: room(*r) }),
        Op::Leave(c, r) => world.send(*c, ClientEvent::LeaveRoom { room_id: room(*r) }),
        Op::Typing(c, r, is_typing) => {
            world.send(*c, ClientEvent::SendTyping { room_id: room(*r), is_typing: *is_typing })
        },
        Op::MarkRead(c, r) => world.send(*c, ClientEvent::MarkAsRead {
            room_id: room(*r),
            message_ids: vec![MessageId::new("m1").unwrap()],
        }),
        Op::Post(c, r) => world.post_message(*c, &room(*r), "hello"),
        Op::Kill(c) => world.kill(*c),
        Op::RejectToken(c) => world.reject_token(*c),
        Op::RefreshToken(c) => {
            let user = UserId::new(USERS[*c]).unwrap();
            let session = SessionContext::authenticated(user, AuthToken::new(format!("fresh-{c}")));
            world.send(*c, ClientEvent::SessionChanged(session))
        },
        Op::Advance(ms) => {
            world.advance_in_steps(Duration::from_millis(*ms), Duration::from_millis(250))
        },
    };
    result.map_err(|violations| format!("{op:?}: {violations:?}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_under_chaos(
        seed in any::<u64>(),
        failure_rate in 0.0f64..0.6,
        ops in prop::collection::vec(op(), 1..80),
    ) {
        let options = SimOptions { open_failure_rate: failure_rate, ..SimOptions::default() };
        let mut world = SimWorld::with_options(seed, &USERS, options).unwrap();

        for op in &ops {
            if let Err(message) = apply(&mut world, op) {
                prop_assert!(false, "{}", message);
            }
        }
    }

    #[test]
    fn same_seed_same_outcome(
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let run = || {
            let options = SimOptions { open_failure_rate: 0.3, ..SimOptions::default() };
            let mut world = SimWorld::with_options(seed, &USERS, options).unwrap();
            for op in &ops {
                apply(&mut world, op).unwrap();
            }
            (0..world.len())
                .map(|c| (world.client(c).client().connection_state(), world.client(c).published().len()))
                .collect::<Vec<_>>()
        };

        prop_assert_eq!(run(), run());
    }
}

#[test]
fn every_client_settles_after_quiet_period() {
    let options = SimOptions { open_failure_rate: 0.5, ..SimOptions::default() };
    let mut world = SimWorld::with_options(11, &USERS, options).unwrap();
    for c in 0..USERS.len() {
        world.send(c, ClientEvent::Connect).unwrap();
    }

    world.advance_in_steps(Duration::from_secs(180), Duration::from_millis(500)).unwrap();

    for c in 0..USERS.len() {
        let state = world.client(c).client().connection_state();
        assert!(
            matches!(state, ConnectionState::Connected | ConnectionState::Disconnected),
            "client {c} still {state:?}"
        );
    }
}
