//! Unread-count reconciliation and native notifications.
//!
//! Two sources feed the unread counter: a periodic poll of the unread-count
//! query, and `newNotification` pushes that may carry the server's absolute
//! count. Both are treated as observations of the same absolute value; the
//! latest one wins and nothing is ever summed. A notification is surfaced
//! only when an observation is strictly greater than the previous one and the
//! previous one was non-zero, so the first load after login stays quiet.
//!
//! # Phases
//!
//! ```text
//! ┌──────┐  tick   ┌─────────┐  result   ┌───────────┐  increase  ┌───────────┐
//! │ Idle │───────> │ Polling │─────────> │ Comparing │──────────> │ Notifying │
//! └──────┘         └─────────┘           └───────────┘            └───────────┘
//!    ↑                  │ error               │ no increase             │
//!    └──────────────────┴─────────────────────┴─────────────────────────┘
//! ```

use std::{collections::BTreeMap, fmt::Debug, ops::Sub, time::Duration};

use revline_proto::{NotificationPayload, UserId};

use crate::error::PollError;

/// Interval between unread-count polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Title used for unread-message notifications.
pub const DEFAULT_TITLE: &str = "New messages";

/// Platform notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    /// Not asked yet
    #[default]
    Default,
    /// Allowed
    Granted,
    /// Refused; notifications are silently skipped
    Denied,
}

/// Notification category. Each has a fixed dedup tag so the platform replaces
/// the previous notification instead of stacking a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotificationCategory {
    /// Unread-count increase
    UnreadMessages,
    /// Pushed account activity (offers, sales, new chats)
    Activity,
}

impl NotificationCategory {
    /// Dedup tag for this category.
    pub fn tag(self) -> &'static str {
        match self {
            Self::UnreadMessages => "revline-unread",
            Self::Activity => "revline-activity",
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Time between polls
    pub poll_interval: Duration,
    /// Title for unread-message notifications
    pub title: String,
    /// Icon URL or path passed to the platform
    pub icon: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL, title: DEFAULT_TITLE.to_string(), icon: None }
    }
}

/// A native notification to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Headline
    pub title: String,
    /// Body text
    pub body: String,
    /// Icon
    pub icon: Option<String>,
    /// Dedup tag
    pub tag: &'static str,
    /// Category the tag was derived from
    pub category: NotificationCategory,
    /// Unread increase that triggered it, for unread notifications
    pub delta: Option<u64>,
}

/// Last display per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationRecord<I> {
    /// Dedup tag
    pub tag: &'static str,
    /// When it was shown
    pub shown_at: I,
}

/// Last observed unread count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadCounter<I> {
    /// Absolute unread count
    pub count: u64,
    /// When it was last observed
    pub last_synced_at: Option<I>,
}

impl<I> Default for UnreadCounter<I> {
    fn default() -> Self {
        Self { count: 0, last_synced_at: None }
    }
}

/// Where the aggregator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorPhase {
    /// Waiting for the next poll
    Idle,
    /// Poll in flight
    Polling,
    /// Comparing an observation with the previous one
    Comparing,
    /// Holding a notification until permission is resolved
    Notifying,
}

/// Actions returned by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationAction {
    /// Query the unread count; report back with the same ticket
    Poll {
        /// Identifies this poll
        ticket: u64,
    },
    /// Ask the platform for notification permission
    RequestPermission,
    /// Display a notification
    Show(NotificationRequest),
    /// Unread count changed
    UnreadChanged {
        /// New count
        count: u64,
        /// Count before
        previous: u64,
    },
}

/// Reconciles polled and pushed unread counts and decides what to surface.
#[derive(Debug, Clone)]
pub struct NotificationAggregator<I> {
    config: NotificationConfig,
    phase: AggregatorPhase,
    permission: PermissionState,
    permission_requested: bool,
    pending: Option<NotificationRequest>,
    counter: UnreadCounter<I>,
    records: BTreeMap<NotificationCategory, NotificationRecord<I>>,
    last_poll: Option<I>,
    in_flight: Option<u64>,
    next_ticket: u64,
    poll_now: bool,
}

impl<I> NotificationAggregator<I>
where
    I: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration>,
{
    /// Create an aggregator. `permission` is the platform state at startup.
    pub fn new(config: NotificationConfig, permission: PermissionState) -> Self {
        Self {
            config,
            phase: AggregatorPhase::Idle,
            permission,
            permission_requested: false,
            pending: None,
            counter: UnreadCounter::default(),
            records: BTreeMap::new(),
            last_poll: None,
            in_flight: None,
            next_ticket: 0,
            poll_now: false,
        }
    }

    /// Current phase
    pub fn phase(&self) -> AggregatorPhase {
        self.phase
    }

    /// Current permission state
    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    /// Last observed unread count.
    pub fn unread_count(&self) -> u64 {
        self.counter.count
    }

    /// Full counter record.
    pub fn counter(&self) -> UnreadCounter<I> {
        self.counter
    }

    /// Last display for `category`.
    pub fn record(&self, category: NotificationCategory) -> Option<NotificationRecord<I>> {
        self.records.get(&category).copied()
    }

    /// Ticket of the poll in flight.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Notification held until permission is resolved.
    pub fn pending(&self) -> Option<&NotificationRequest> {
        self.pending.as_ref()
    }

    /// Issue a poll when one is due.
    ///
    /// The first poll is due immediately. Skipped without a user, and while a
    /// poll is already in flight.
    pub fn tick(&mut self, now: I, user: Option<&UserId>) -> Vec<NotificationAction> {
        if user.is_none() || self.in_flight.is_some() {
            return Vec::new();
        }

        let due = self.poll_now
            || self.last_poll.is_none_or(|last| now - last >= self.config.poll_interval);
        if !due {
            return Vec::new();
        }

        self.next_ticket += 1;
        self.poll_now = false;
        self.last_poll = Some(now);
        self.in_flight = Some(self.next_ticket);
        self.phase = AggregatorPhase::Polling;

        vec![NotificationAction::Poll { ticket: self.next_ticket }]
    }

    /// Apply the result of poll `ticket`.
    ///
    /// Results for any other ticket are ignored. A failure keeps the previous
    /// count and leaves the schedule alone.
    pub fn poll_completed(
        &mut self,
        ticket: u64,
        result: Result<u64, PollError>,
        now: I,
    ) -> Vec<NotificationAction> {
        if self.in_flight != Some(ticket) {
            tracing::debug!(ticket, in_flight = ?self.in_flight, "stale poll result ignored");
            return Vec::new();
        }
        self.in_flight = None;

        match result {
            Ok(count) => self.observe(count, now),
            Err(error) => {
                tracing::warn!(ticket, %error, "unread count poll failed");
                self.settle();
                Vec::new()
            },
        }
    }

    /// Apply a pushed `newNotification`.
    ///
    /// An absolute `unreadCount` is observed like a poll result and discards
    /// the result of any poll still in flight. Without one,
    /// the next tick polls immediately instead of guessing. A push with both
    /// title and body is shown under the activity tag.
    pub fn handle_pushed(
        &mut self,
        payload: &NotificationPayload,
        now: I,
    ) -> Vec<NotificationAction> {
        let mut actions = match payload.unread_count {
            Some(count) => {
                // A poll issued before this push would report an older count
                if let Some(ticket) = self.in_flight.take() {
                    tracing::debug!(ticket, "push supersedes in-flight poll");
                }
                self.observe(count, now)
            },
            None => {
                self.poll_now = true;
                Vec::new()
            },
        };

        if let (Some(title), Some(body)) = (&payload.title, &payload.body) {
            let request = NotificationRequest {
                title: title.clone(),
                body: body.clone(),
                icon: self.config.icon.clone(),
                tag: NotificationCategory::Activity.tag(),
                category: NotificationCategory::Activity,
                delta: None,
            };
            actions.extend(self.notify(request, now));
        }

        actions
    }

    /// Platform answered the permission request.
    pub fn permission_resolved(&mut self, state: PermissionState, now: I) -> Vec<NotificationAction> {
        tracing::info!(?state, "notification permission resolved");
        self.permission = state;

        let pending = self.pending.take();
        self.settle();

        match (state, pending) {
            (PermissionState::Granted, Some(request)) => vec![self.show(request, now)],
            _ => Vec::new(),
        }
    }

    /// Forget everything tied to the session. Permission is kept.
    pub fn reset(&mut self) {
        self.phase = AggregatorPhase::Idle;
        self.permission_requested = false;
        self.pending = None;
        self.counter = UnreadCounter::default();
        self.records.clear();
        self.last_poll = None;
        self.in_flight = None;
        self.poll_now = false;
    }

    fn observe(&mut self, count: u64, now: I) -> Vec<NotificationAction> {
        self.phase = AggregatorPhase::Comparing;

        let previous = self.counter.count;
        self.counter = UnreadCounter { count, last_synced_at: Some(now) };

        let mut actions = Vec::new();
        if count != previous {
            actions.push(NotificationAction::UnreadChanged { count, previous });
        }

        if count > previous && previous > 0 {
            let delta = count - previous;
            tracing::debug!(previous, count, delta, "unread count increased");

            let request = NotificationRequest {
                title: self.config.title.clone(),
                body: unread_body(delta),
                icon: self.config.icon.clone(),
                tag: NotificationCategory::UnreadMessages.tag(),
                category: NotificationCategory::UnreadMessages,
                delta: Some(delta),
            };
            actions.extend(self.notify(request, now));
        } else {
            self.settle();
        }

        actions
    }

    fn notify(&mut self, request: NotificationRequest, now: I) -> Vec<NotificationAction> {
        match self.permission {
            PermissionState::Granted => {
                let action = self.show(request, now);
                self.settle();
                vec![action]
            },
            PermissionState::Default => {
                self.phase = AggregatorPhase::Notifying;
                self.pending = Some(request);

                if self.permission_requested {
                    Vec::new()
                } else {
                    self.permission_requested = true;
                    vec![NotificationAction::RequestPermission]
                }
            },
            PermissionState::Denied => {
                tracing::debug!(tag = request.tag, "notification permission denied, skipping");
                self.settle();
                Vec::new()
            },
        }
    }

    fn show(&mut self, request: NotificationRequest, now: I) -> NotificationAction {
        self.records
            .insert(request.category, NotificationRecord { tag: request.tag, shown_at: now });
        NotificationAction::Show(request)
    }

    fn settle(&mut self) {
        self.phase = if self.in_flight.is_some() {
            AggregatorPhase::Polling
        } else if self.pending.is_some() {
            AggregatorPhase::Notifying
        } else {
            AggregatorPhase::Idle
        };
    }
}

fn unread_body(delta: u64) -> String {
    if delta == 1 {
        "You have 1 new message".to_string()
    } else {
        format!("You have {delta} new messages")
    }
}
