//! Watch-list handlers.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::errors::DispatchError;
use crate::handlers::{require_experiment_id, require_param, require_project_id};
use crate::registry::MethodHandler;
use crate::session::ConnectionSession;
use crate::types::{InboundRequest, MessageKind, OutboundMessage};

fn variables(params: &Value) -> Result<Vec<String>, DispatchError> {
    let invalid = || DispatchError::InvalidParams {
        message: "Parameter 'variables' must be an array of strings".into(),
    };
    require_param(params, "variables")?
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|v| v.as_str().map(ToOwned::to_owned).ok_or_else(invalid))
        .collect()
}

/// Record the variables to watch during the next run.
pub struct SetWatchedVariablesHandler;

#[async_trait]
impl MethodHandler for SetWatchedVariablesHandler {
    #[instrument(skip(self, request, session), fields(method = "set_watched_variables"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        session.require_persistent()?;
        let params = request.params();
        let project = session.resolve_project(require_project_id(&params)?).await?;
        let experiment = ConnectionSession::resolve_experiment(
            &project,
            require_experiment_id(&params)?,
            "setting watched variables",
        )?;
        let variables = variables(&params)?;

        session
            .manager()
            .set_watched_variables(&variables, &experiment)
            .await
            .map_err(DispatchError::execution("Error setting watched variables"))?;
        let payload = serde_json::to_string(&variables)?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::WatchedVariablesSet, payload))
            .await;
        Ok(())
    }
}

/// Clear every watch list of an experiment.
pub struct ClearWatchedVariablesHandler;

#[async_trait]
impl MethodHandler for ClearWatchedVariablesHandler {
    #[instrument(skip(self, request, session), fields(method = "clear_watched_variables"))]
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
            "clearing watched variables",
        )?;

        session
            .manager()
            .clear_watch_lists(&experiment)
            .await
            .map_err(DispatchError::execution("Error clearing watched variables"))?;
        session
            .send(OutboundMessage::empty(request.token(), MessageKind::ClearWatch))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::UNSUPPORTED_OPERATION;
    use crate::handlers::test_helpers::Harness;
    use crate::types::MessageKind;
    use serde_json::json;

    #[tokio::test]
    async fn set_echoes_the_list() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "set_watched_variables",
                json!({"projectId": 1, "experimentId": 2, "variables": ["hh.v", "hh.m"]}),
            )
            .await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::WatchedVariablesSet);
        assert_eq!(msgs[0].data, r#"["hh.v","hh.m"]"#);
        assert_eq!(h.log.calls(), vec!["set_watched_variables:2:hh.v,hh.m"]);
    }

    #[tokio::test]
    async fn set_is_unsupported_on_default_backend() {
        let mut h = Harness::new(false);
        let _ = h
            .request(
                "set_watched_variables",
                json!({"projectId": 1, "experimentId": 2, "variables": ["hh.v"]}),
            )
            .await;
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageKind::InfoMessage);
        let text: String = serde_json::from_str(&msgs[0].data).unwrap();
        assert_eq!(text, UNSUPPORTED_OPERATION);
        assert!(h.log.calls().is_empty());
    }

    #[tokio::test]
    async fn non_string_variables_are_invalid() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "set_watched_variables",
                json!({"projectId": 1, "experimentId": 2, "variables": [1]}),
            )
            .await;
        assert_eq!(h.messages()[0].kind, MessageKind::Error);
        assert!(h.log.calls().is_empty());
    }

    #[tokio::test]
    async fn clear_works_on_default_backend() {
        let mut h = Harness::new(false);
        let _ = h
            .request("clear_watched_variables", json!({"projectId": 1, "experimentId": 2}))
            .await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::ClearWatch);
        assert!(msgs[0].data.is_empty());
    }
}
