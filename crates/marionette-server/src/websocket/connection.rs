//! Liveness bookkeeping for one WebSocket client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use marionette_core::ConnectionId;
use parking_lot::Mutex;

/// A connected client as seen by the gateway.
#[derive(Debug)]
pub struct ClientConnection {
    /// Connection id shared with the session.
    pub id: ConnectionId,
    connected_at: Instant,
    is_alive: AtomicBool,
    dispatching: AtomicBool,
    last_pong: Mutex<Instant>,
}

impl ClientConnection {
    /// A connection that counts as alive right now.
    pub fn new(id: ConnectionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            dispatching: AtomicBool::new(false),
            last_pong: Mutex::new(now),
        }
    }

    /// Record a pong (or any sign of life).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong, or since connecting.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag.
    ///
    /// Returns `true` if the client showed life since the previous check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// A request started; pongs go unread until it finishes.
    pub fn begin_dispatch(&self) {
        self.dispatching.store(true, Ordering::Relaxed);
    }

    /// The request finished. Pongs missed while it ran do not count
    /// against the client.
    pub fn end_dispatch(&self) {
        self.mark_alive();
        self.dispatching.store(false, Ordering::Relaxed);
    }

    /// Whether the client should be dropped for missing pongs.
    ///
    /// Never true while a request is being dispatched.
    pub fn is_unresponsive(&self, pong_timeout: Duration) -> bool {
        if self.dispatching.load(Ordering::Relaxed) {
            return false;
        }
        !self.check_alive() && self.last_pong_elapsed() > pong_timeout
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_alive_resets_flag() {
        let conn = ClientConnection::new("c1".into());
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn fresh_connection_is_responsive() {
        let conn = ClientConnection::new("c2".into());
        assert!(!conn.is_unresponsive(Duration::from_secs(60)));
        // the first check consumed the flag, but the pong is still recent
        assert!(!conn.is_unresponsive(Duration::from_secs(60)));
    }

    #[test]
    fn silent_client_past_timeout_is_unresponsive() {
        let conn = ClientConnection::new("c3".into());
        let _ = conn.check_alive();
        assert!(conn.is_unresponsive(Duration::ZERO));
    }

    #[test]
    fn silence_during_a_dispatch_is_tolerated() {
        let conn = ClientConnection::new("c5".into());
        let _ = conn.check_alive();
        conn.begin_dispatch();
        assert!(!conn.is_unresponsive(Duration::ZERO));

        conn.end_dispatch();
        assert!(!conn.is_unresponsive(Duration::from_secs(60)));
        // back to normal checks once the request is done
        assert!(conn.is_unresponsive(Duration::ZERO));
    }

    #[test]
    fn age_grows() {
        let conn = ClientConnection::new("c4".into());
        assert!(conn.age() < Duration::from_secs(2));
    }
}
