//! # marionette-rpc
//!
//! Message protocol and command dispatch for simulation project sessions.
//!
//! - Wire types: inbound requests, outbound envelopes, binary download frames
//! - Connection sessions owning one project manager each
//! - Method registry with per-operation handlers for projects, experiments,
//!   trees, watch lists, downloads, and storage accounts
//! - Typed experiment/project property patches
//! - Zip packaging of download artifacts and URL fetching

#![deny(unsafe_code)]

pub mod archive;
pub mod context;
pub mod errors;
pub mod fetch;
pub mod handlers;
pub mod outbox;
pub mod properties;
pub mod registry;
pub mod session;
pub mod trees;
pub mod types;

pub use context::{ConnectionDirectory, ServiceContext};
pub use errors::DispatchError;
pub use fetch::{HttpFetcher, ResourceFetcher};
pub use handlers::default_registry;
pub use outbox::{Frame, Outbox};
pub use registry::{DispatchStatus, MethodHandler, MethodRegistry};
pub use session::{ConnectionSession, SessionState};
pub use types::{InboundRequest, MessageKind, OutboundMessage};
