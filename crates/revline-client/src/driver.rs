//! I/O seams for the runtime.
//!
//! The [`Runtime`](crate::Runtime) never touches a socket or a platform API
//! directly. Every side effect goes through one of these traits, so the same
//! orchestration runs against the real transports in production and against
//! in-memory fakes in tests.
//!
//! - [`Connector`]: opens realtime transports
//! - [`UnreadSource`]: answers unread-count queries
//! - [`Notifier`]: native notification permission and display

use async_trait::async_trait;
use revline_core::{
    AuthToken, NotificationRequest, PermissionState, PollError, SessionContext, TransportFailure,
    TransportKind,
};
use tokio::sync::mpsc;

/// Buffered text frames per direction.
pub const FRAME_CHANNEL_CAPACITY: usize = 64;

/// An open transport.
///
/// Text frames are exchanged through the channels; a task owned by the
/// connector does the actual I/O. `from_server` yielding `None` means the
/// transport closed.
#[derive(Debug)]
pub struct TransportHandle {
    /// Send encoded commands to the server.
    pub to_server: mpsc::Sender<String>,
    /// Receive raw envelopes from the server.
    pub from_server: mpsc::Receiver<String>,
    /// Abort handle of the I/O task.
    abort_handle: Option<tokio::task::AbortHandle>,
}

impl TransportHandle {
    /// Wrap channels driven by the task behind `abort_handle`.
    pub fn new(
        to_server: mpsc::Sender<String>,
        from_server: mpsc::Receiver<String>,
        abort_handle: tokio::task::AbortHandle,
    ) -> Self {
        Self { to_server, from_server, abort_handle: Some(abort_handle) }
    }

    /// Handle whose I/O is driven by the caller through the other channel
    /// ends. Used by in-memory transports.
    pub fn detached(to_server: mpsc::Sender<String>, from_server: mpsc::Receiver<String>) -> Self {
        Self { to_server, from_server, abort_handle: None }
    }

    /// Stop the I/O task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
        self.from_server.close();
    }
}

/// Opens realtime transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport of `kind`, authenticated with `token`.
    ///
    /// Resolves once the transport can carry frames. The runtime enforces the
    /// connect timeout and may drop this future at any point.
    async fn open(
        &self,
        kind: TransportKind,
        token: &AuthToken,
    ) -> Result<TransportHandle, TransportFailure>;
}

/// Answers unread-count queries.
#[async_trait]
pub trait UnreadSource: Send + Sync + 'static {
    /// Current unread message count for `session`.
    async fn fetch(&self, session: &SessionContext) -> Result<u64, PollError>;
}

/// Native notification surface.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Permission state at startup.
    fn permission(&self) -> PermissionState;

    /// Prompt the user. Resolves with the outcome.
    async fn request_permission(&self) -> PermissionState;

    /// Display a notification. Notifications with the same tag replace each
    /// other.
    async fn show(&self, request: &NotificationRequest);
}

/// Notifier that only logs. For headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn request_permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn show(&self, request: &NotificationRequest) {
        tracing::info!(
            tag = request.tag,
            title = %request.title,
            body = %request.body,
            "notification"
        );
    }
}
