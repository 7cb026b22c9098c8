//! Project handlers: load (by id, inline content, URL), persist, save properties.

use async_trait::async_trait;
use marionette_core::{Entity, ExperimentId, Project, ProjectId};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::errors::DispatchError;
use crate::fetch::parse_url;
use crate::handlers::experiment::load_experiment;
use crate::handlers::{optional_experiment_id, require_project_id, string_or_field, string_pairs};
use crate::properties::ProjectPatch;
use crate::registry::MethodHandler;
use crate::session::ConnectionSession;
use crate::types::{InboundRequest, MessageKind, OutboundMessage};

/// Payload of `project_persisted`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedProject {
    project_id: ProjectId,
    #[serde(with = "marionette_core::model::active_experiment")]
    active_experiment_id: Option<ExperimentId>,
}

/// Hand `project` to the manager, make it active, announce it, then load
/// `experiment_id` or else the project's recorded active experiment.
pub(crate) async fn load_and_cascade(
    request: &InboundRequest,
    session: &mut ConnectionSession,
    project: Project,
    experiment_id: Option<ExperimentId>,
) -> Result<(), DispatchError> {
    session
        .manager()
        .load_project(&project)
        .await
        .map_err(|e| DispatchError::ProjectLoad {
            message: format!("Could not load project {}: {e}", project.id),
        })?;

    let payload = serde_json::to_string(&project)?;
    let project_id = project.id;
    let cascade = experiment_id.or(project.active_experiment_id);
    session.set_active_project(project).await;
    session
        .send(OutboundMessage::new(request.token(), MessageKind::ProjectLoaded, payload))
        .await;

    if let Some(experiment_id) = cascade {
        debug!(%project_id, %experiment_id, "cascading into experiment load");
        load_experiment(request, session, project_id, experiment_id).await?;
    }
    Ok(())
}

/// Load a stored project by id.
pub struct LoadFromIdHandler;

#[async_trait]
impl MethodHandler for LoadFromIdHandler {
    #[instrument(skip(self, request, session), fields(method = "load_project_from_id"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let project_id = require_project_id(&params)?;
        let experiment_id = optional_experiment_id(&params)?;

        let project = session
            .services()
            .data
            .project_by_id(project_id)
            .await
            .map_err(DispatchError::data("Error looking up project"))?
            .ok_or_else(|| DispatchError::ProjectLoad {
                message: "Project not found".into(),
            })?;
        load_and_cascade(request, session, project, experiment_id).await
    }
}

/// Load a project from an inline JSON document.
pub struct LoadFromContentHandler;

#[async_trait]
impl MethodHandler for LoadFromContentHandler {
    #[instrument(skip(self, request, session), fields(method = "load_project_from_content"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let content = match &request.data {
            Value::String(raw) => raw.clone(),
            Value::Null => {
                return Err(DispatchError::InvalidParams {
                    message: "Missing project content".into(),
                });
            }
            other => other.to_string(),
        };
        let project = session
            .services()
            .data
            .project_from_json(&content)
            .map_err(DispatchError::data("Error parsing project content"))?;
        load_and_cascade(request, session, project, None).await
    }
}

/// Load a project document from a URL.
pub struct LoadFromUrlHandler;

#[async_trait]
impl MethodHandler for LoadFromUrlHandler {
    #[instrument(skip(self, request, session), fields(method = "load_project_from_url"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let url = parse_url(&string_or_field(&request.params(), "url")?)?;
        let content = session.services().fetcher.fetch_text(&url).await?;
        let project = session
            .services()
            .data
            .project_from_json(&content)
            .map_err(DispatchError::data(format!("Error parsing project from {url}")))?;
        load_and_cascade(request, session, project, None).await
    }
}

/// Persist a (usually volatile) project.
pub struct PersistHandler;

#[async_trait]
impl MethodHandler for PersistHandler {
    #[instrument(skip(self, request, session), fields(method = "persist_project"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        session.require_persistent()?;
        let project_id = require_project_id(&request.params())?;
        let project = session.resolve_project(project_id).await?;

        let persisted = session
            .manager()
            .persist_project(&project)
            .await
            .map_err(DispatchError::execution("Error persisting project"))?;
        session
            .services()
            .data
            .save(Entity::Project(persisted.clone()))
            .await
            .map_err(DispatchError::data("Error persisting project"))?;
        session.refresh_project(&persisted);

        let payload = serde_json::to_string(&PersistedProject {
            project_id: persisted.id,
            active_experiment_id: persisted.active_experiment_id,
        })?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::ProjectPersisted, payload))
            .await;
        Ok(())
    }
}

/// Save editable project properties.
pub struct SavePropertiesHandler;

#[async_trait]
impl MethodHandler for SavePropertiesHandler {
    #[instrument(skip(self, request, session), fields(method = "save_project_properties"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        session.require_persistent()?;
        let params = request.params();
        let project_id = require_project_id(&params)?;
        let mut project = session.resolve_project(project_id).await?;
        ConnectionSession::require_not_volatile(&project)?;

        let patch = ProjectPatch::parse(string_pairs(&params, "properties")?, project_id)?;
        if let Some(entity) = patch.apply(&mut project) {
            session
                .services()
                .data
                .save(entity)
                .await
                .map_err(DispatchError::data("Error saving project properties"))?;
            session.refresh_project(&project);
        }
        session
            .send(OutboundMessage::empty(request.token(), MessageKind::ProjectPropsSaved))
            .await;
        Ok(())
    }
}
