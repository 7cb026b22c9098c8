//! WebSocket gateway: connection registry, heartbeat, message dispatch.

use std::sync::Arc;
use std::time::Duration;

use marionette_rpc::{MethodRegistry, ServiceContext};
use tokio_util::sync::CancellationToken;

pub mod connection;
pub mod handler;
pub mod registry;
pub mod session;

use registry::ConnectionRegistry;

/// Everything a connection task needs, cloned once per upgrade.
#[derive(Clone)]
pub struct Gateway {
    /// Operation handlers.
    pub registry: Arc<MethodRegistry>,
    /// Collaborators shared by all sessions.
    pub services: Arc<ServiceContext>,
    /// Open connections.
    pub connections: Arc<ConnectionRegistry>,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// How long a client may go without answering a ping.
    pub pong_timeout: Duration,
    /// Outbound frames buffered per connection.
    pub outbound_queue: usize,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("methods", &self.registry.methods().len())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("pong_timeout", &self.pong_timeout)
            .field("outbound_queue", &self.outbound_queue)
            .finish_non_exhaustive()
    }
}
