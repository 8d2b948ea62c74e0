//! Realtime client for Revline
//!
//! Composes the core state machines into one [`Client`] and drives it from a
//! tokio [`Runtime`], enabling deterministic simulation testing with the same
//! client code that runs in production.
//!
//! # Components
//!
//! - [`Client`]: sans-IO state machine (session, connection, room, typing,
//!   receipts, notifications)
//! - [`Runtime`]: event loop executing client actions against the I/O seams
//! - [`RealtimeHandle`]: cloneable, non-blocking entry point for the UI
//! - [`EventBus`]: callback registry with RAII [`Subscription`]s
//! - [`driver`]: the [`Connector`], [`UnreadSource`] and [`Notifier`] seams
//! - `transport` (feature `transport`): WebSocket/long-polling connector and
//!   the GraphQL unread source

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bus;
mod client;
pub mod config;
pub mod driver;
mod error;
mod event;
mod runtime;
mod system_env;
#[cfg(feature = "transport")]
pub mod transport;

pub use bus::{BusEvent, EventBus, PresenceChange, Subscription, UnreadUpdate};
pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use driver::{Connector, LogNotifier, Notifier, TransportHandle, UnreadSource};
pub use error::{ClientError, RealtimeError};
pub use event::{ClientAction, ClientEvent};
pub use runtime::{RealtimeHandle, Runtime};
pub use system_env::SystemEnv;
