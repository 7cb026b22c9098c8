//! Storage-account handlers: link, unlink, upload model, upload results.

use async_trait::async_trait;
use marionette_core::{Experiment, ResultsFormat};
use serde_json::Value;
use tracing::instrument;

use crate::errors::DispatchError;
use crate::handlers::{
    optional_string_param, require_experiment_id, require_project_id, require_string_param,
    string_or_field,
};
use crate::properties::ASPECT_KEY;
use crate::registry::MethodHandler;
use crate::session::ConnectionSession;
use crate::types::{InboundRequest, MessageKind, OutboundMessage};

/// Results format uploaded when the request names none.
pub const DEFAULT_RESULTS_FORMAT: &str = "RECORDING";

fn unknown_format(name: &str) -> DispatchError {
    DispatchError::InvalidParams {
        message: format!("Unknown format '{name}'"),
    }
}

async fn target(
    session: &ConnectionSession,
    params: &Value,
    action: &'static str,
) -> Result<(Experiment, String), DispatchError> {
    let project = session.resolve_project(require_project_id(params)?).await?;
    let experiment =
        ConnectionSession::resolve_experiment(&project, require_experiment_id(params)?, action)?;
    let aspect = require_string_param(params, ASPECT_KEY)?;
    Ok((experiment, aspect))
}

/// Link the connection's manager to a storage account.
pub struct LinkHandler;

#[async_trait]
impl MethodHandler for LinkHandler {
    #[instrument(skip(self, request, session), fields(method = "link_dropbox"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let key = string_or_field(&request.params(), "key")?;
        session
            .manager()
            .link_storage_account(&key)
            .await
            .map_err(DispatchError::execution("Error linking storage account"))?;
        session
            .send(OutboundMessage::empty(request.token(), MessageKind::DropboxLinked))
            .await;
        Ok(())
    }
}

/// Unlink the storage account.
pub struct UnlinkHandler;

#[async_trait]
impl MethodHandler for UnlinkHandler {
    #[instrument(skip(self, request, session), fields(method = "unlink_dropbox"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let key = string_or_field(&request.params(), "key")?;
        session
            .manager()
            .unlink_storage_account(&key)
            .await
            .map_err(DispatchError::execution("Error unlinking storage account"))?;
        session
            .send(OutboundMessage::empty(request.token(), MessageKind::DropboxUnlinked))
            .await;
        Ok(())
    }
}

/// Push an exported model to the linked account.
pub struct UploadModelHandler;

#[async_trait]
impl MethodHandler for UploadModelHandler {
    #[instrument(skip(self, request, session), fields(method = "upload_model"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let format = match optional_string_param(&params, "format") {
            None => None,
            Some(name) => Some(
                session
                    .services()
                    .formats
                    .model_format(&name)
                    .ok_or_else(|| unknown_format(&name))?,
            ),
        };
        let (experiment, aspect) = target(session, &params, "uploading model").await?;

        session
            .manager()
            .upload_model(&aspect, format.as_ref(), &experiment)
            .await
            .map_err(DispatchError::execution("Error uploading model"))?;
        session
            .send(OutboundMessage::empty(request.token(), MessageKind::ModelUploaded))
            .await;
        Ok(())
    }
}

/// Push recorded results to the linked account.
pub struct UploadResultsHandler;

#[async_trait]
impl MethodHandler for UploadResultsHandler {
    #[instrument(skip(self, request, session), fields(method = "upload_results"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let name = optional_string_param(&params, "format")
            .unwrap_or_else(|| DEFAULT_RESULTS_FORMAT.to_owned());
        let format: ResultsFormat = session
            .services()
            .formats
            .results_format(&name)
            .ok_or_else(|| unknown_format(&name))?;
        let (experiment, aspect) = target(session, &params, "uploading results").await?;

        session
            .manager()
            .upload_results(&aspect, &format, &experiment)
            .await
            .map_err(DispatchError::execution("Error uploading results"))?;
        session
            .send(OutboundMessage::empty(request.token(), MessageKind::ResultsUploaded))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_helpers::Harness;
    use crate::types::{ErrorBody, MessageKind};
    use serde_json::json;

    #[tokio::test]
    async fn link_accepts_a_bare_key() {
        let mut h = Harness::new(false);
        let _ = h.request("link_dropbox", json!("abc123")).await;
        assert_eq!(h.messages()[0].kind, MessageKind::DropboxLinked);
        assert_eq!(h.log.calls(), vec!["link_storage_account:abc123"]);
    }

    #[tokio::test]
    async fn unlink_accepts_a_key_field() {
        let mut h = Harness::new(false);
        let _ = h.request("unlink_dropbox", json!({"key": "abc123"})).await;
        assert_eq!(h.messages()[0].kind, MessageKind::DropboxUnlinked);
    }

    #[tokio::test]
    async fn upload_model_without_format_is_native() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "upload_model",
                json!({"projectId": 1, "experimentId": 2, "aspectInstancePath": "hh.electrical"}),
            )
            .await;
        assert_eq!(h.messages()[0].kind, MessageKind::ModelUploaded);
        assert_eq!(h.log.calls(), vec!["upload_model:2:hh.electrical:native"]);
    }

    #[tokio::test]
    async fn upload_results_defaults_to_recording() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "upload_results",
                json!({"projectId": 1, "experimentId": 2, "aspectInstancePath": "hh.electrical"}),
            )
            .await;
        assert_eq!(h.messages()[0].kind, MessageKind::ResultsUploaded);
        assert_eq!(h.log.calls(), vec!["upload_results:2:hh.electrical:RECORDING"]);
    }

    #[tokio::test]
    async fn upload_with_unknown_format_is_invalid() {
        let mut h = Harness::new(true);
        let _ = h
            .request(
                "upload_model",
                json!({"projectId": 1, "experimentId": 2, "aspectInstancePath": "hh.electrical", "format": "XYZ"}),
            )
            .await;
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::Error);
        let body: ErrorBody = serde_json::from_str(&msgs[0].data).unwrap();
        assert_eq!(body.message, "Unknown format 'XYZ'");
        assert!(h.log.calls().is_empty());
    }
}
