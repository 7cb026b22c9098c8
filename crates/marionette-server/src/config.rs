//! Server configuration.

use std::time::Duration;

use marionette_settings::ServerSettings;

/// Listener and gateway configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// How long a client may go without answering a ping.
    pub pong_timeout: Duration,
    /// Outbound frames buffered per connection.
    pub outbound_queue: usize,
}

impl ServerConfig {
    /// Build from the `server` settings section.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_message_size: settings.max_message_size,
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            pong_timeout: Duration::from_secs(settings.pong_timeout_secs),
            outbound_queue: settings.outbound_queue,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            ..Self::from_settings(&ServerSettings::default())
        }
    }
}
