//! Experiment handlers: new, load, run, play, delete, status, save properties.

use async_trait::async_trait;
use marionette_core::{Entity, ExperimentId, ExperimentStatus, ProjectId};
use serde::Serialize;
use tracing::instrument;

use crate::errors::DispatchError;
use crate::handlers::{require_experiment_id, require_project_id, string_pairs};
use crate::properties::ExperimentPatch;
use crate::registry::MethodHandler;
use crate::session::ConnectionSession;
use crate::trees::{format_runtime_tree, format_subtrees};
use crate::types::{InboundRequest, MessageKind, OutboundMessage};

/// `{id, name}` payload identifying an experiment.
#[derive(Debug, Serialize)]
struct ExperimentRef<'a> {
    id: ExperimentId,
    name: &'a str,
}

/// One row of the `experiment_status` payload.
#[derive(Debug, Serialize)]
pub struct ExperimentStatusEntry {
    /// Owning project.
    #[serde(rename = "projectID")]
    pub project_id: ProjectId,
    /// Experiment.
    #[serde(rename = "experimentID")]
    pub experiment_id: ExperimentId,
    /// Current status.
    pub status: ExperimentStatus,
}

/// Load an experiment and send its runtime tree.
///
/// Shared by `load_experiment` and the cascade after a project load.
pub(crate) async fn load_experiment(
    request: &InboundRequest,
    session: &mut ConnectionSession,
    project_id: ProjectId,
    experiment_id: ExperimentId,
) -> Result<(), DispatchError> {
    let project = session.resolve_project(project_id).await?;
    let experiment =
        ConnectionSession::resolve_experiment(&project, experiment_id, "loading experiment")?;

    session
        .send(OutboundMessage::empty(request.token(), MessageKind::ExperimentLoading))
        .await;
    let tree = session
        .manager()
        .load_experiment(&experiment)
        .await
        .map_err(DispatchError::execution("Error loading experiment"))?;
    let payload = format_runtime_tree(session.services().serializer.as_ref(), experiment.id, &tree)?;
    session
        .send(OutboundMessage::new(request.token(), MessageKind::ExperimentLoaded, payload))
        .await;
    session.mark_experiment_loaded();
    Ok(())
}

/// Create an experiment in a project.
pub struct NewHandler;

#[async_trait]
impl MethodHandler for NewHandler {
    #[instrument(skip(self, request, session), fields(method = "new_experiment"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        session.require_persistent()?;
        let project_id = require_project_id(&request.params())?;
        let mut project = session.resolve_project(project_id).await?;

        let experiment = session
            .manager()
            .new_experiment(&project)
            .await
            .map_err(DispatchError::execution("Error creating experiment"))?;
        session
            .services()
            .data
            .save(Entity::Experiment(experiment.clone()))
            .await
            .map_err(DispatchError::data("Error saving new experiment"))?;

        let payload = serde_json::to_string(&experiment)?;
        project.experiments.push(experiment);
        session.refresh_project(&project);
        session
            .send(OutboundMessage::new(request.token(), MessageKind::ExperimentCreated, payload))
            .await;
        Ok(())
    }
}

/// Load an experiment of a project.
pub struct LoadHandler;

#[async_trait]
impl MethodHandler for LoadHandler {
    #[instrument(skip(self, request, session), fields(method = "load_experiment"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let project_id = require_project_id(&params)?;
        let experiment_id = require_experiment_id(&params)?;
        load_experiment(request, session, project_id, experiment_id).await
    }
}

/// Queue an experiment for simulation.
pub struct RunHandler;

#[async_trait]
impl MethodHandler for RunHandler {
    #[instrument(skip(self, request, session), fields(method = "run_experiment"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        session.require_persistent()?;
        let params = request.params();
        let project = session.resolve_project(require_project_id(&params)?).await?;
        ConnectionSession::require_not_volatile(&project)?;
        let experiment = ConnectionSession::resolve_experiment(
            &project,
            require_experiment_id(&params)?,
            "running experiment",
        )?;

        session
            .manager()
            .run_experiment(&experiment)
            .await
            .map_err(DispatchError::execution("Error running experiment"))?;
        let payload = serde_json::to_string(&ExperimentRef {
            id: experiment.id,
            name: &experiment.name,
        })?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::ExperimentRunning, payload))
            .await;
        Ok(())
    }
}

/// Send recorded results of a finished experiment.
pub struct PlayHandler;

#[async_trait]
impl MethodHandler for PlayHandler {
    #[instrument(skip(self, request, session), fields(method = "play_experiment"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let project = session.resolve_project(require_project_id(&params)?).await?;
        let experiment = ConnectionSession::resolve_experiment(
            &project,
            require_experiment_id(&params)?,
            "playing experiment",
        )?;

        let subtrees = session
            .manager()
            .play_experiment(&experiment)
            .await
            .map_err(DispatchError::execution("Error playing experiment"))?;
        let payload = format_subtrees(session.services().serializer.as_ref(), &subtrees)?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::PlayExperiment, payload))
            .await;
        Ok(())
    }
}

/// Delete an experiment.
pub struct DeleteHandler;

#[async_trait]
impl MethodHandler for DeleteHandler {
    #[instrument(skip(self, request, session), fields(method = "delete_experiment"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        session.require_persistent()?;
        let params = request.params();
        let mut project = session.resolve_project(require_project_id(&params)?).await?;
        let experiment = ConnectionSession::resolve_experiment(
            &project,
            require_experiment_id(&params)?,
            "deleting experiment",
        )?;

        session
            .manager()
            .delete_experiment(&experiment)
            .await
            .map_err(DispatchError::execution("Error deleting experiment"))?;

        // documents loaded inline or from a URL live only in the session
        let data = &session.services().data;
        let stored = data
            .project_by_id(project.id)
            .await
            .map_err(DispatchError::data("Error deleting experiment"))?
            .is_some();
        if stored {
            data.delete_experiment(project.id, experiment.id)
                .await
                .map_err(DispatchError::data("Error deleting experiment"))?;
        }

        project.experiments.retain(|e| e.id != experiment.id);
        if project.active_experiment_id == Some(experiment.id) {
            project.active_experiment_id = None;
        }
        session.refresh_project(&project);

        let payload = serde_json::to_string(&ExperimentRef {
            id: experiment.id,
            name: &experiment.name,
        })?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::DeleteExperiment, payload))
            .await;
        Ok(())
    }
}

/// Report the status of every experiment in a project.
pub struct StatusHandler;

#[async_trait]
impl MethodHandler for StatusHandler {
    #[instrument(skip(self, request, session), fields(method = "experiment_status"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let project = session
            .resolve_project(require_project_id(&request.params())?)
            .await?;
        let experiments = session
            .manager()
            .check_experiments_status(&project)
            .await
            .map_err(DispatchError::execution("Error checking experiment status"))?;

        let entries: Vec<ExperimentStatusEntry> = experiments
            .iter()
            .map(|e| ExperimentStatusEntry {
                project_id: project.id,
                experiment_id: e.id,
                status: e.status,
            })
            .collect();
        let payload = serde_json::to_string(&entries)?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::ExperimentStatus, payload))
            .await;
        Ok(())
    }
}

/// Apply a property patch to an experiment and persist what changed.
pub struct SavePropertiesHandler;

#[async_trait]
impl MethodHandler for SavePropertiesHandler {
    #[instrument(skip(self, request, session), fields(method = "save_experiment_properties"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        session.require_persistent()?;
        let params = request.params();
        let mut project = session.resolve_project(require_project_id(&params)?).await?;
        ConnectionSession::require_not_volatile(&project)?;
        let mut experiment = ConnectionSession::resolve_experiment(
            &project,
            require_experiment_id(&params)?,
            "saving experiment properties",
        )?;

        let patch = ExperimentPatch::parse(string_pairs(&params, "properties")?, experiment.id)?;
        let entities = patch.apply(&mut experiment)?;
        for entity in entities {
            session
                .services()
                .data
                .save(entity)
                .await
                .map_err(DispatchError::data("Error saving experiment properties"))?;
        }

        if let Some(slot) = project.experiment_mut(experiment.id) {
            *slot = experiment;
        }
        session.refresh_project(&project);
        session
            .send(OutboundMessage::empty(request.token(), MessageKind::ExperimentPropsSaved))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{UNSUPPORTED_OPERATION, VOLATILE_PROJECT};
    use crate::handlers::test_helpers::Harness;
    use crate::registry::DispatchStatus;
    use crate::types::{ErrorBody, MessageKind};
    use marionette_core::{DataManager, Entity, ExperimentId, ProjectId};
    use serde_json::{Value, json};

    fn info_text(data: &str) -> String {
        serde_json::from_str(data).unwrap()
    }

    #[tokio::test]
    async fn load_sends_loading_then_loaded_tree() {
        let mut h = Harness::new(true);
        let status = h
            .request("load_experiment", json!({"projectId": 1, "experimentId": 3}))
            .await;
        assert_eq!(status, DispatchStatus::Completed);
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::ExperimentLoading);
        assert!(msgs[0].data.is_empty());
        assert_eq!(msgs[1].kind, MessageKind::ExperimentLoaded);
        let tree: Value = serde_json::from_str(&msgs[1].data).unwrap();
        assert_eq!(tree["experimentId"], 3);
    }

    #[tokio::test]
    async fn unknown_experiment_names_both_ids_without_manager_call() {
        let mut h = Harness::new(true);
        let _ = h
            .request("load_experiment", json!({"projectId": 1, "experimentId": 99}))
            .await;
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageKind::Error);
        assert_eq!(msgs[0].request_id.as_deref(), Some("req-1"));
        let body: ErrorBody = serde_json::from_str(&msgs[0].data).unwrap();
        assert_eq!(
            body.message,
            "Error loading experiment, the experiment 99 was not found in project 1"
        );
        assert!(h.log.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let mut h = Harness::new(true);
        let _ = h
            .request("play_experiment", json!({"projectId": 5, "experimentId": 2}))
            .await;
        let body: ErrorBody = serde_json::from_str(&h.messages()[0].data).unwrap();
        assert_eq!(body.message, "Project 5 was not found");
    }

    #[tokio::test]
    async fn run_on_default_backend_sends_only_unsupported_info() {
        let mut h = Harness::new(false);
        let _ = h
            .request("run_experiment", json!({"projectId": 1, "experimentId": 2}))
            .await;
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageKind::InfoMessage);
        assert_eq!(info_text(&msgs[0].data), UNSUPPORTED_OPERATION);
        assert!(h.log.calls().is_empty());
    }

    #[tokio::test]
    async fn writes_on_default_backend_send_only_unsupported_info() {
        for (kind, params) in [
            ("new_experiment", json!({"projectId": 1})),
            ("delete_experiment", json!({"projectId": 1, "experimentId": 3})),
        ] {
            let mut h = Harness::new(false);
            let _ = h.request(kind, params).await;
            let msgs = h.messages();
            assert_eq!(msgs.len(), 1, "{kind}");
            assert_eq!(msgs[0].kind, MessageKind::InfoMessage, "{kind}");
            assert_eq!(info_text(&msgs[0].data), UNSUPPORTED_OPERATION, "{kind}");
            assert!(h.log.calls().is_empty(), "{kind}");
            assert!(h.data.deleted().is_empty(), "{kind}");
        }
    }

    #[tokio::test]
    async fn run_on_volatile_project_sends_only_volatile_info() {
        let mut h = Harness::new(true);
        let _ = h
            .request("run_experiment", json!({"projectId": 9, "experimentId": 10}))
            .await;
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(info_text(&msgs[0].data), VOLATILE_PROJECT);
        assert!(!h.log.called("run_experiment"));
    }

    #[tokio::test]
    async fn run_acknowledges_queued_experiment() {
        let mut h = Harness::new(true);
        let _ = h
            .request("run_experiment", json!({"projectId": 1, "experimentId": 2}))
            .await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::ExperimentRunning);
        assert_eq!(h.log.calls(), vec!["run_experiment:2"]);
    }

    #[tokio::test]
    async fn manager_failure_becomes_error_envelope_with_cause() {
        let mut h = Harness::new(true);
        h.log.fail("run_experiment");
        let status = h
            .request("run_experiment", json!({"projectId": 1, "experimentId": 2}))
            .await;
        assert_eq!(status, DispatchStatus::Failed);
        let body: ErrorBody = serde_json::from_str(&h.messages()[0].data).unwrap();
        assert_eq!(body.message, "Error running experiment");
        assert_eq!(body.exception.as_deref(), Some("run_experiment rejected"));
    }

    #[tokio::test]
    async fn play_sends_aspect_collection() {
        let mut h = Harness::new(true);
        let _ = h
            .request("play_experiment", json!({"projectId": 1, "experimentId": 2}))
            .await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::PlayExperiment);
        let entries: Value = serde_json::from_str(&msgs[0].data).unwrap();
        assert_eq!(entries[0]["aspectInstancePath"], "hh.electrical");
    }

    #[tokio::test]
    async fn delete_replies_with_id_and_name() {
        let mut h = Harness::new(true);
        let _ = h.request("load_project_from_id", json!({"projectId": 1})).await;
        let _ = h.messages();
        let _ = h
            .request("delete_experiment", json!({"projectId": 1, "experimentId": 3}))
            .await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::DeleteExperiment);
        let payload: Value = serde_json::from_str(&msgs[0].data).unwrap();
        assert_eq!(payload, json!({"id": 3, "name": "variant"}));
        let active = h.session.active_project().unwrap();
        assert!(active.experiment(ExperimentId::new(3)).is_none());
        assert_eq!(h.data.deleted(), vec![ExperimentId::new(3)]);
    }

    #[tokio::test]
    async fn deleted_experiment_cannot_be_loaded_or_listed() {
        let mut h = Harness::new(true);
        let _ = h
            .request("delete_experiment", json!({"projectId": 1, "experimentId": 3}))
            .await;
        let _ = h.messages();

        let status = h
            .request("load_experiment", json!({"projectId": 1, "experimentId": 3}))
            .await;
        assert_eq!(status, DispatchStatus::Failed);
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        let body: ErrorBody = serde_json::from_str(&msgs[0].data).unwrap();
        assert!(body.message.contains("experiment 3 was not found"));
        assert!(!h.log.calls().contains(&"load_experiment:3".to_owned()));

        let _ = h.request("experiment_status", json!({"projectId": 1})).await;
        let rows: Value = serde_json::from_str(&h.messages()[0].data).unwrap();
        assert_eq!(rows, json!([{"projectID": 1, "experimentID": 2, "status": "DESIGN"}]));
    }

    #[tokio::test]
    async fn deleting_active_experiment_clears_it_in_the_store() {
        let mut h = Harness::new(true);
        let _ = h
            .request("delete_experiment", json!({"projectId": 1, "experimentId": 2}))
            .await;
        let stored = h.data.project_by_id(ProjectId::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.active_experiment_id, None);
        assert!(stored.experiment(ExperimentId::new(2)).is_none());
    }

    #[tokio::test]
    async fn status_rows_use_upper_case_id_keys() {
        let mut h = Harness::new(true);
        let _ = h.request("experiment_status", json!({"projectId": 1})).await;
        let msgs = h.messages();
        let rows: Value = serde_json::from_str(&msgs[0].data).unwrap();
        assert_eq!(
            rows,
            json!([
                {"projectID": 1, "experimentID": 2, "status": "DESIGN"},
                {"projectID": 1, "experimentID": 3, "status": "DESIGN"}
            ])
        );
    }

    #[tokio::test]
    async fn new_experiment_is_saved_and_announced() {
        let mut h = Harness::new(true);
        let _ = h.request("new_experiment", json!({"projectId": 1})).await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::ExperimentCreated);
        let stored = h.data.project_by_id(ProjectId::new(1)).await.unwrap().unwrap();
        assert!(stored.experiment(ExperimentId::new(100)).is_some());
    }

    #[tokio::test]
    async fn timestep_patch_persists_only_the_simulator_configuration() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "save_experiment_properties",
                json!({
                    "projectId": 1,
                    "experimentId": 2,
                    "properties": {"aspectInstancePath": "hh.electrical", "timeStep": "0.5"}
                }),
            )
            .await;
        assert_eq!(h.messages()[0].kind, MessageKind::ExperimentPropsSaved);
        let saved = h.data.saved();
        assert_eq!(saved.len(), 1);
        assert!(matches!(
            &saved[0],
            Entity::SimulatorConfiguration { instance_path, configuration, .. }
                if instance_path == "hh.electrical" && (configuration.timestep - 0.5).abs() < f32::EPSILON
        ));
    }

    #[tokio::test]
    async fn unknown_property_updates_nothing() {
        let mut h = Harness::new(true);
        let status = h
            .request(
                "save_experiment_properties",
                json!({
                    "projectId": 1,
                    "experimentId": 2,
                    "properties": {"name": "renamed", "foo": "1"}
                }),
            )
            .await;
        assert_eq!(status, DispatchStatus::Failed);
        let body: ErrorBody = serde_json::from_str(&h.messages()[0].data).unwrap();
        assert!(body.message.contains("'foo'"));
        assert!(body.message.contains("experiment 2"));
        assert!(h.data.saved().is_empty());
        let stored = h.data.project_by_id(ProjectId::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.experiments[0].name, "baseline");
    }

    #[tokio::test]
    async fn properties_of_volatile_project_are_not_saved() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "save_experiment_properties",
                json!({"projectId": 9, "experimentId": 10, "properties": {"name": "renamed"}}),
            )
            .await;
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageKind::InfoMessage);
        assert_eq!(info_text(&msgs[0].data), VOLATILE_PROJECT);
        assert!(h.data.saved().is_empty());
    }

    #[tokio::test]
    async fn properties_of_unknown_experiment_are_not_saved() {
        let mut h = Harness::new(true);
        let status = h
            .request(
                "save_experiment_properties",
                json!({"projectId": 1, "experimentId": 99, "properties": {"name": "renamed"}}),
            )
            .await;
        assert_eq!(status, DispatchStatus::Failed);
        let body: ErrorBody = serde_json::from_str(&h.messages()[0].data).unwrap();
        assert!(body.message.contains("the experiment 99 was not found in project 1"));
        assert!(h.data.saved().is_empty());
    }
}
