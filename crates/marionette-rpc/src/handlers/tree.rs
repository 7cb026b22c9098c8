//! Tree handlers: model tree, simulation tree, set parameters, supported outputs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use marionette_core::{Experiment, ModelFormat};
use serde_json::Value;
use tracing::instrument;

use crate::errors::DispatchError;
use crate::handlers::{require_experiment_id, require_project_id, require_string_param, string_pairs};
use crate::properties::ASPECT_KEY;
use crate::registry::MethodHandler;
use crate::session::ConnectionSession;
use crate::trees::{format_subtrees, reset_subtrees};
use crate::types::{InboundRequest, MessageKind, OutboundMessage};

async fn target(
    session: &ConnectionSession,
    params: &Value,
    action: &'static str,
) -> Result<Experiment, DispatchError> {
    let project = session.resolve_project(require_project_id(params)?).await?;
    ConnectionSession::resolve_experiment(&project, require_experiment_id(params)?, action)
}

/// Send the model tree of one aspect.
pub struct GetModelTreeHandler;

#[async_trait]
impl MethodHandler for GetModelTreeHandler {
    #[instrument(skip(self, request, session), fields(method = "get_model_tree"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let experiment = target(session, &params, "getting model tree").await?;
        let aspect = require_string_param(&params, ASPECT_KEY)?;

        let subtrees = session
            .manager()
            .model_tree(&aspect, &experiment)
            .await
            .map_err(DispatchError::execution("Error populating model tree"))?;
        let serializer = session.services().serializer.as_ref();
        let payload = format_subtrees(serializer, &subtrees)?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::GetModelTree, payload))
            .await;
        reset_subtrees(serializer, &subtrees);
        Ok(())
    }
}

/// Send the simulation tree of one aspect.
pub struct GetSimulationTreeHandler;

#[async_trait]
impl MethodHandler for GetSimulationTreeHandler {
    #[instrument(skip(self, request, session), fields(method = "get_simulation_tree"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let experiment = target(session, &params, "getting simulation tree").await?;
        let aspect = require_string_param(&params, ASPECT_KEY)?;

        let subtrees = session
            .manager()
            .simulation_tree(&aspect, &experiment)
            .await
            .map_err(DispatchError::execution("Error populating simulation tree"))?;
        let payload = format_subtrees(session.services().serializer.as_ref(), &subtrees)?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::GetSimulationTree, payload))
            .await;
        Ok(())
    }
}

/// Change model parameters and send the updated model tree.
pub struct SetParametersHandler;

#[async_trait]
impl MethodHandler for SetParametersHandler {
    #[instrument(skip(self, request, session), fields(method = "set_parameters"))]
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
            "setting parameters",
        )?;
        let model_path = require_string_param(&params, "modelPath")?;
        let parameters: BTreeMap<String, String> =
            string_pairs(&params, "modelParameters")?.into_iter().collect();

        let subtrees = session
            .manager()
            .set_model_parameters(&model_path, &parameters, &experiment)
            .await
            .map_err(DispatchError::execution("Error setting model parameters"))?;
        let serializer = session.services().serializer.as_ref();
        let payload = format_subtrees(serializer, &subtrees)?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::UpdateModelTree, payload))
            .await;
        reset_subtrees(serializer, &subtrees);
        Ok(())
    }
}

/// Send the model formats an aspect can be exported to.
pub struct GetSupportedOutputsHandler;

#[async_trait]
impl MethodHandler for GetSupportedOutputsHandler {
    #[instrument(skip(self, request, session), fields(method = "get_supported_outputs"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let experiment = target(session, &params, "getting supported outputs").await?;
        let aspect = require_string_param(&params, ASPECT_KEY)?;

        let formats = session
            .manager()
            .supported_outputs(&aspect, &experiment)
            .await
            .map_err(DispatchError::execution("Error getting supported outputs"))?;
        let names: Vec<&str> = formats.iter().map(ModelFormat::name).collect();
        let payload = serde_json::to_string(&names)?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::GetSupportedOutputs, payload))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_helpers::Harness;
    use crate::registry::DispatchStatus;
    use crate::types::{ErrorBody, MessageKind};
    use serde_json::{Value, json};

    #[tokio::test]
    async fn model_tree_is_sent_then_flags_reset() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "get_model_tree",
                json!({"projectId": 1, "experimentId": 2, "aspectInstancePath": "hh.electrical"}),
            )
            .await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::GetModelTree);
        let entries: Value = serde_json::from_str(&msgs[0].data).unwrap();
        assert_eq!(entries[0]["ModelTree"]["v"]["modified"], true);

        let shared = h.log.last_tree.lock().clone().unwrap();
        assert!(!shared.read().root.any_modified());
    }

    #[tokio::test]
    async fn simulation_tree_keeps_flags() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "get_simulation_tree",
                json!({"projectId": 1, "experimentId": 2, "aspectInstancePath": "hh.electrical"}),
            )
            .await;
        assert_eq!(h.messages()[0].kind, MessageKind::GetSimulationTree);
        let shared = h.log.last_tree.lock().clone().unwrap();
        assert!(shared.read().root.any_modified());
    }

    #[tokio::test]
    async fn set_parameters_replies_with_updated_tree() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "set_parameters",
                json!({
                    "projectId": 1,
                    "experimentId": 2,
                    "modelPath": "hh.electrical",
                    "modelParameters": {"hh.gNa": "120", "hh.gK": 36}
                }),
            )
            .await;
        assert_eq!(h.messages()[0].kind, MessageKind::UpdateModelTree);
        assert_eq!(h.log.calls(), vec!["set_model_parameters:2:hh.electrical:2"]);
        let shared = h.log.last_tree.lock().clone().unwrap();
        assert!(!shared.read().root.any_modified());
    }

    #[tokio::test]
    async fn set_parameters_on_volatile_project_is_declined() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "set_parameters",
                json!({"projectId": 9, "experimentId": 10, "modelPath": "x", "modelParameters": {}}),
            )
            .await;
        assert_eq!(h.messages()[0].kind, MessageKind::InfoMessage);
        assert!(h.log.calls().is_empty());
    }

    #[tokio::test]
    async fn supported_outputs_are_names() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "get_supported_outputs",
                json!({"projectId": 1, "experimentId": 2, "aspectInstancePath": "hh.electrical"}),
            )
            .await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::GetSupportedOutputs);
        assert_eq!(msgs[0].data, r#"["NeuroML","NEURON"]"#);
    }

    #[tokio::test]
    async fn missing_aspect_path_is_invalid() {
        let mut h = Harness::new(true);
        let _ = h
            .request("get_model_tree", json!({"projectId": 1, "experimentId": 2}))
            .await;
        assert_eq!(h.messages()[0].kind, MessageKind::Error);
        assert!(h.log.calls().is_empty());
    }

    #[tokio::test]
    async fn set_parameters_on_unknown_experiment_changes_nothing() {
        let mut h = Harness::new(true);
        let status = h
            .request(
                "set_parameters",
                json!({
                    "projectId": 1,
                    "experimentId": 99,
                    "modelPath": "hh.electrical",
                    "modelParameters": {"hh.gNa": "120"}
                }),
            )
            .await;
        assert_eq!(status, DispatchStatus::Failed);
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        let body: ErrorBody = serde_json::from_str(&msgs[0].data).unwrap();
        assert!(body.message.contains("the experiment 99 was not found in project 1"));
        assert!(h.log.calls().is_empty());
        assert!(h.data.saved().is_empty());
    }
}
