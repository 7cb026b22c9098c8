//! Per-connection session: owned manager, active project, lifecycle state.

use std::path::PathBuf;
use std::sync::Arc;

use marionette_core::{ConnectionId, Experiment, ExperimentId, Project, ProjectId, ProjectManager};
use tracing::{debug, info, warn};

use crate::archive;
use crate::context::ServiceContext;
use crate::errors::DispatchError;
use crate::outbox::Outbox;
use crate::types::OutboundMessage;

/// Lifecycle of a connection session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Open, no project loaded.
    Connected,
    /// A project is active.
    ProjectLoaded,
    /// An experiment of the active project was loaded.
    ExperimentLoaded,
    /// Terminal.
    Closed,
}

/// State owned by one client connection.
///
/// Requests on a connection are handled one at a time, so handlers get the
/// session by `&mut` and nothing here is locked.
pub struct ConnectionSession {
    id: ConnectionId,
    manager: Box<dyn ProjectManager>,
    services: Arc<ServiceContext>,
    outbox: Outbox,
    active_project: Option<Project>,
    state: SessionState,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("active_project", &self.active_project.as_ref().map(|p| p.id))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// Open a session with a fresh manager from the factory.
    pub fn new(id: ConnectionId, services: Arc<ServiceContext>, outbox: Outbox) -> Self {
        let manager = services.managers.create();
        debug!(connection_id = %id, "connection session opened");
        Self {
            id,
            manager,
            services,
            outbox,
            active_project: None,
            state: SessionState::Connected,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// This connection's manager.
    pub fn manager(&self) -> &dyn ProjectManager {
        self.manager.as_ref()
    }

    /// Shared collaborators.
    pub fn services(&self) -> &ServiceContext {
        &self.services
    }

    /// Outbound frame queue.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Queue a text envelope.
    pub async fn send(&self, message: OutboundMessage) {
        let _ = self.outbox.send(message).await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Project loaded on this connection, if any.
    pub fn active_project(&self) -> Option<&Project> {
        self.active_project.as_ref()
    }

    /// Make `project` the active one, closing the previous project first.
    pub async fn set_active_project(&mut self, project: Project) {
        if let Some(previous) = self.active_project.take() {
            debug!(connection_id = %self.id, project_id = %previous.id, "closing previous project");
            if let Err(e) = self.manager.close_project(&previous).await {
                warn!(connection_id = %self.id, project_id = %previous.id, error = %e, "failed to close previous project");
            }
        }
        self.active_project = Some(project);
        self.state = SessionState::ProjectLoaded;
    }

    /// Record that an experiment of the active project is loaded.
    pub fn mark_experiment_loaded(&mut self) {
        if self.active_project.is_some() {
            self.state = SessionState::ExperimentLoaded;
        }
    }

    /// Replace the active project's copy when `project` is the same project.
    pub fn refresh_project(&mut self, project: &Project) {
        if let Some(active) = self.active_project.as_mut().filter(|p| p.id == project.id) {
            active.clone_from(project);
        }
    }

    /// Look a project up in the data backend, falling back to the active
    /// project for documents that were loaded inline or from a URL.
    pub async fn resolve_project(&self, project_id: ProjectId) -> Result<Project, DispatchError> {
        let stored = self
            .services
            .data
            .project_by_id(project_id)
            .await
            .map_err(DispatchError::data(format!("Error looking up project {project_id}")))?;
        stored
            .or_else(|| self.active_project.clone().filter(|p| p.id == project_id))
            .ok_or(DispatchError::ProjectNotFound { project_id })
    }

    /// Find an experiment of `project`.
    pub fn resolve_experiment(
        project: &Project,
        experiment_id: ExperimentId,
        action: &'static str,
    ) -> Result<Experiment, DispatchError> {
        project
            .experiment(experiment_id)
            .cloned()
            .ok_or(DispatchError::ExperimentNotFound {
                action,
                project_id: project.id,
                experiment_id,
            })
    }

    /// Fails with [`DispatchError::Unsupported`] on the non-persistent backend.
    pub fn require_persistent(&self) -> Result<(), DispatchError> {
        if self.services.data.is_default() {
            Err(DispatchError::Unsupported)
        } else {
            Ok(())
        }
    }

    /// Fails with [`DispatchError::VolatileProject`] for volatile projects.
    pub fn require_not_volatile(project: &Project) -> Result<(), DispatchError> {
        if project.volatile {
            Err(DispatchError::VolatileProject)
        } else {
            Ok(())
        }
    }

    /// Archive directory for one aspect of an experiment.
    pub fn archive_dir(&self, experiment: &Experiment, aspect_path: &str) -> PathBuf {
        archive::archive_location(
            &self.services.archive_root,
            &self.id,
            experiment.project_id,
            experiment.id,
            aspect_path,
        )
    }

    /// Close the active project, leave the connection registry, and drop
    /// scratch files. Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = SessionState::Closed;

        if let Some(project) = self.active_project.take() {
            if let Err(e) = self.manager.close_project(&project).await {
                warn!(connection_id = %self.id, project_id = %project.id, error = %e, "failed to close project");
            }
        }
        self.services.connections.deregister(&self.id).await;

        let scratch = archive::connection_dir(&self.services.archive_root, &self.id);
        match tokio::fs::remove_dir_all(&scratch).await {
            Ok(()) => debug!(path = %scratch.display(), "removed archive scratch"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %scratch.display(), error = %e, "failed to remove archive scratch"),
        }
        info!(connection_id = %self.id, "connection session closed");
    }
}
