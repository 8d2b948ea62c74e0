//! Property-based tests for unread-count reconciliation.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use revline_core::{
    NotificationAction, NotificationAggregator, NotificationConfig, PermissionState, UserId,
};
use revline_proto::NotificationPayload;

/// Feed `counts` as consecutive poll results and collect the deltas shown.
fn shown_deltas(counts: &[u64]) -> Vec<u64> {
    let user = UserId::new("u1").unwrap();
    let config = NotificationConfig::default();
    let interval = config.poll_interval;
    let mut agg = NotificationAggregator::new(config, PermissionState::Granted);
    let mut now = Instant::now();
    let mut deltas = Vec::new();

    for count in counts {
        let ticket = match agg.tick(now, Some(&user)).as_slice() {
            [NotificationAction::Poll { ticket }] => *ticket,
            other => panic!("expected one poll, got {other:?}"),
        };

        for action in agg.poll_completed(ticket, Ok(*count), now) {
            if let NotificationAction::Show(request) = action {
                deltas.extend(request.delta);
            }
        }
        now += interval;
    }

    deltas
}

#[test]
fn first_load_from_zero_is_quiet() {
    assert_eq!(shown_deltas(&[0, 5]), Vec::<u64>::new());
}

#[test]
fn increase_from_three_to_five() {
    assert_eq!(shown_deltas(&[3, 5]), vec![2]);
}

#[test]
fn unchanged_then_increase() {
    assert_eq!(shown_deltas(&[5, 5, 8]), vec![3]);
}

#[test]
fn decrease_is_adopted_silently() {
    assert_eq!(shown_deltas(&[7, 2, 4]), vec![2]);
}

proptest! {
    #[test]
    fn prop_notifications_match_increases(counts in prop::collection::vec(0u64..50, 1..30)) {
        let expected: Vec<u64> = counts
            .windows(2)
            .filter(|w| w[1] > w[0] && w[0] > 0)
            .map(|w| w[1] - w[0])
            .collect();

        prop_assert_eq!(shown_deltas(&counts), expected);
    }

    #[test]
    fn prop_pushed_counts_never_sum(counts in prop::collection::vec(0u64..50, 1..20)) {
        let mut agg: NotificationAggregator<Instant> =
            NotificationAggregator::new(NotificationConfig::default(), PermissionState::Denied);
        let now = Instant::now();

        for count in &counts {
            let payload = NotificationPayload { unread_count: Some(*count), ..Default::default() };
            agg.handle_pushed(&payload, now + Duration::from_millis(*count));
        }

        prop_assert_eq!(Some(agg.unread_count()), counts.last().copied());
    }
}
