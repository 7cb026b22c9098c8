//! # marionette-server
//!
//! Axum HTTP + `WebSocket` server.
//!
//! - Page routes: dashboard, the auth-guarded application view, test suites
//! - Token-endpoint and no-op auth services selected from settings
//! - `WebSocket` gateway: one session per connection, heartbeat, sequential dispatch
//! - Health check and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{RemoteAuthService, SettingsAuthProvider};
pub use config::ServerConfig;
pub use routes::{Access, Pages};
pub use server::MarionetteServer;
pub use shutdown::ShutdownSignal;
pub use websocket::registry::ConnectionRegistry;
