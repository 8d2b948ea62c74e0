//! Client configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration; the core component configs are derived from it.

use std::{path::Path, time::Duration};

use revline_core::{
    Backoff, ConnectionConfig, NotificationConfig, TransportKind, TypingConfig,
    connection::{
        DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RETRY_DELAY, DEFAULT_RETRY_DELAY,
    },
    notification::{DEFAULT_POLL_INTERVAL, DEFAULT_TITLE},
    typing::DEFAULT_TYPING_EXPIRY,
};
use serde::Deserialize;
use thiserror::Error;

/// Default interval at which the runtime ticks the client.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where the messaging service lives.
    pub server: ServerSection,
    /// Connect, retry and fallback policy.
    pub connection: ConnectionSection,
    /// Typing indicators.
    pub typing: TypingSection,
    /// Unread polling and native notifications.
    pub notifications: NotificationSection,
    /// Event loop.
    pub runtime: RuntimeSection,
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Base URL, e.g. `https://api.example.com`.
    pub url: String,
    /// Path of the realtime endpoint.
    pub socket_path: String,
    /// Path of the GraphQL endpoint used for the unread count.
    pub graphql_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:4000".to_string(),
            socket_path: "/socket".to_string(),
            graphql_path: "/graphql".to_string(),
        }
    }
}

/// `[connection]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// Attempts per connect.
    pub max_attempts: u32,
    /// Base retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_retry_delay_ms: u64,
    /// `fixed` or `exponential`.
    pub backoff: Backoff,
    /// Per-open timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Transports in fallback order.
    pub transports: Vec<TransportKind>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY.as_millis() as u64,
            backoff: Backoff::Exponential,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
        }
    }
}

/// `[typing]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TypingSection {
    /// Entry lifetime without refresh, in milliseconds.
    pub expiry_ms: u64,
}

impl Default for TypingSection {
    fn default() -> Self {
        Self { expiry_ms: DEFAULT_TYPING_EXPIRY.as_millis() as u64 }
    }
}

/// `[notifications]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationSection {
    /// Seconds between unread-count polls.
    pub poll_interval_secs: u64,
    /// Title of unread-message notifications.
    pub title: String,
    /// Icon passed to the platform.
    pub icon: Option<String>,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            title: DEFAULT_TITLE.to_string(),
            icon: None,
        }
    }
}

/// `[runtime]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Tick interval in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self { tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64 }
    }
}

impl ClientConfig {
    /// Load and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "connection.max_attempts",
                reason: "must be at least 1",
            });
        }
        if self.connection.transports.is_empty() {
            return Err(ConfigError::Invalid {
                field: "connection.transports",
                reason: "must name at least one transport",
            });
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "connection.connect_timeout_ms",
                reason: "must be positive",
            });
        }
        if self.notifications.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "notifications.poll_interval_secs",
                reason: "must be positive",
            });
        }
        if self.runtime.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "runtime.tick_interval_ms",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// Connection manager configuration.
    pub fn connection_config(&self) -> ConnectionConfig {
        let c = &self.connection;
        ConnectionConfig {
            max_attempts: c.max_attempts,
            retry_delay: Duration::from_millis(c.retry_delay_ms),
            max_retry_delay: Duration::from_millis(c.max_retry_delay_ms),
            backoff: c.backoff,
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            transports: c.transports.clone(),
        }
    }

    /// Typing tracker configuration.
    pub fn typing_config(&self) -> TypingConfig {
        TypingConfig { expiry: Duration::from_millis(self.typing.expiry_ms) }
    }

    /// Notification aggregator configuration.
    pub fn notification_config(&self) -> NotificationConfig {
        NotificationConfig {
            poll_interval: Duration::from_secs(self.notifications.poll_interval_secs),
            title: self.notifications.title.clone(),
            icon: self.notifications.icon.clone(),
        }
    }

    /// Runtime tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.tick_interval_ms)
    }
}
