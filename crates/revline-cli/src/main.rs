//! Revline realtime watcher.
//!
//! Connects to a Revline server, optionally joins a chat room, and logs every
//! realtime event until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Watch a room on a local development server
//! revline-watch --user u1 --token "$TOKEN" --room listing-42
//!
//! # Load connection settings from a file
//! revline-watch --config revline.toml --token "$TOKEN"
//! ```

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use revline_client::{
    Client, ClientConfig, EventBus, LogNotifier, Notifier, PresenceChange, RealtimeHandle, Runtime,
    Subscription, SystemEnv,
    transport::{GraphqlUnreadSource, SocketConnector},
};
use revline_core::{AuthToken, ConnectionState, RoomId, SessionContext, TypingChange, UserId};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Revline realtime watcher
#[derive(Parser, Debug)]
#[command(name = "revline-watch")]
#[command(about = "Log Revline realtime events")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server base URL, overrides the configuration file
    #[arg(short, long)]
    server: Option<String>,

    /// Bearer token
    #[arg(short, long)]
    token: Option<String>,

    /// Authenticated user id, enables unread polling
    #[arg(short, long)]
    user: Option<String>,

    /// Room to join once connected
    #[arg(short, long)]
    room: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn session(&self) -> Result<SessionContext, Box<dyn std::error::Error>> {
        let token = self.token.as_deref().map(AuthToken::new);
        let user_id = self.user.as_deref().map(UserId::new).transpose()?;
        Ok(SessionContext { user_id, token })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = &args.server {
        config.server.url.clone_from(server);
    }

    let session = args.session()?;
    if !session.is_authenticated() {
        tracing::warn!("No token provided - the server will refuse the connection");
    }

    tracing::info!("Revline watcher starting");
    tracing::info!("Server {}", config.server.url);

    let notifier = Arc::new(LogNotifier);
    let client = Client::new(SystemEnv::new(), session, &config, notifier.permission());
    let bus = EventBus::new();

    let (runtime, handle) = Runtime::new(
        client,
        bus.clone(),
        Arc::new(SocketConnector::new(&config.server)?),
        Arc::new(GraphqlUnreadSource::new(&config.server)?),
        notifier,
        config.tick_interval(),
    );

    let room = args.room.map(RoomId::new).transpose()?;
    let _subscriptions = subscribe(&bus, &handle, room);

    let mut task = tokio::spawn(runtime.run());
    handle.connect()?;

    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            true
        },
        result = &mut task => {
            result?;
            false
        },
    };

    if interrupted {
        tracing::info!("Interrupted, shutting down");
        handle.shutdown()?;
        task.await?;
    } else {
        tracing::warn!("Realtime client stopped");
    }

    Ok(())
}

/// Log every bus event. The room is joined on the first connection; the
/// client rejoins it by itself after reconnects.
fn subscribe(
    bus: &EventBus,
    handle: &RealtimeHandle,
    room: Option<RoomId>,
) -> Vec<Subscription> {
    let joined = AtomicBool::new(false);
    let join_handle = handle.clone();

    vec![
        bus.on_connection_change(move |state| {
            tracing::info!(?state, "connection");
            if *state != ConnectionState::Connected || joined.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(room_id) = &room
                && let Err(error) = join_handle.join_room(room_id.clone())
            {
                tracing::error!(%error, "join failed");
            }
        }),
        bus.on_message(|message| {
            tracing::info!(
                room = %message.room_id,
                from = %message.sender_nickname,
                "{}",
                message.content
            );
        }),
        bus.on_typing(|change| match change {
            TypingChange::Started { room_id, user_nickname, .. } => {
                tracing::info!(room = %room_id, "{user_nickname} is typing");
            },
            TypingChange::Stopped { room_id, user_id, reason } => {
                tracing::debug!(room = %room_id, user = %user_id, ?reason, "stopped typing");
            },
        }),
        bus.on_presence(|change| match change {
            PresenceChange::Joined(p) => tracing::info!(room = %p.room_id, user = %p.user_id, "joined"),
            PresenceChange::Left(p) => tracing::info!(room = %p.room_id, user = %p.user_id, "left"),
        }),
        bus.on_read(|read| {
            tracing::info!(room = %read.room_id, count = read.message_ids.len(), "messages read");
        }),
        bus.on_notification(|payload| {
            tracing::info!(kind = ?payload.kind, title = ?payload.title, "notification");
        }),
        bus.on_unread_count(|update| {
            tracing::info!(count = update.count, previous = update.previous, "unread count");
        }),
        bus.on_error(|error| tracing::warn!(%error, "realtime error")),
    ]
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn user_without_token_is_anonymous() {
        let args = Args::parse_from(["revline-watch", "--user", "u1"]);

        let session = args.session().unwrap();

        assert!(!session.is_authenticated());
        assert_eq!(session.user_id.map(|u| u.to_string()), Some("u1".to_string()));
    }

    #[test]
    fn empty_user_is_rejected() {
        let args = Args::parse_from(["revline-watch", "--user", "", "--token", "t"]);

        assert!(args.session().is_err());
    }
}
