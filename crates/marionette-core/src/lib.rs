//! # marionette-core
//!
//! Foundation types for the Marionette control layer.
//!
//! - Branded IDs for projects, experiments, and connections
//! - The project / experiment / aspect-configuration domain model
//! - Collaborator traits consumed by the dispatcher: [`ProjectManager`],
//!   [`DataManager`], [`AuthService`], [`FormatRegistry`], [`TreeSerializer`]
//! - Default collaborators usable without an external backend, including a
//!   bookkeeping [`LocalProjectManager`]
//! - `tracing` subscriber setup and a log-capture layer for tests

#![deny(unsafe_code)]

pub mod auth;
pub mod data;
pub mod errors;
pub mod formats;
pub mod ids;
pub mod local;
pub mod logging;
pub mod manager;
pub mod model;
pub mod tree;

pub use auth::{
    AuthProvider, AuthService, LocalLogin, LocalSession, NoLocalLogin, NoopAuthService,
    RequestIdentity, StaticAuthProvider,
};
pub use data::{DataManager, Entity, InMemoryDataManager};
pub use errors::{BoxError, DataError, ManagerError};
pub use formats::{FormatCatalog, FormatRegistry, ModelFormat, ResultsFormat};
pub use ids::{ConnectionId, ExperimentId, ProjectId};
pub use local::{LocalManagerFactory, LocalProjectManager};
pub use manager::{Artifact, ManagerFactory, ProjectManager};
pub use model::{
    AspectConfiguration, Experiment, ExperimentStatus, Project, SimulatorConfiguration, User,
};
pub use tree::{
    AspectSubtree, JsonTreeSerializer, SharedSubtree, SubtreeMap, TreeNode, TreeSerializer,
};
