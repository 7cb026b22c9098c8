//! Stopping the listener and the open sessions together.
//!
//! Upgraded sockets outlive the HTTP server task, so draining waits on the
//! connection registry as well as on the listener.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::registry::ConnectionRegistry;

/// How often the registry is checked while sessions wind down.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// One token shared by the listener and every session.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// An untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by the listener and each session.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ask everything to stop. Repeated calls do nothing.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether [`trigger`](Self::trigger) was called.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger, then wait up to `grace` for the listener to return and for
    /// every session to deregister.
    ///
    /// Returns `false` when the grace period ran out first.
    pub async fn drain(
        &self,
        listener: JoinHandle<()>,
        connections: &ConnectionRegistry,
        grace: Duration,
    ) -> bool {
        self.trigger();
        let open = connections.connection_count().await;
        info!(open_connections = open, grace_secs = grace.as_secs(), "draining");

        let wait = async {
            if let Err(e) = listener.await {
                warn!(error = %e, "listener task failed");
            }
            while connections.connection_count().await > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        };
        if tokio::time::timeout(grace, wait).await.is_ok() {
            info!("all sessions closed");
            true
        } else {
            let left = connections.connection_count().await;
            warn!(open_connections = left, "grace period over, abandoning sessions");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use marionette_core::ConnectionId;

    use crate::websocket::connection::ClientConnection;

    #[test]
    fn trigger_cancels_every_token() {
        let signal = ShutdownSignal::new();
        let listener = signal.token();
        let session = signal.token();
        assert!(!signal.is_triggered());
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
        assert!(listener.is_cancelled() && session.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_sessions_to_deregister() {
        let signal = ShutdownSignal::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let id = ConnectionId::new();
        registry.add(Arc::new(ClientConnection::new(id.clone()))).await;

        let token = signal.token();
        let listener = tokio::spawn(async move { token.cancelled().await });
        let session = {
            let registry = registry.clone();
            let token = signal.token();
            tokio::spawn(async move {
                token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = registry.remove(&id).await;
            })
        };

        assert!(signal.drain(listener, &registry, Duration::from_secs(5)).await);
        assert_eq!(registry.connection_count().await, 0);
        session.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_a_stuck_session() {
        let signal = ShutdownSignal::new();
        let registry = ConnectionRegistry::new();
        registry.add(Arc::new(ClientConnection::new(ConnectionId::new()))).await;
        let listener = tokio::spawn(async {});

        assert!(!signal.drain(listener, &registry, Duration::from_millis(200)).await);
        assert!(signal.is_triggered());
        assert_eq!(registry.connection_count().await, 1);
    }
}
