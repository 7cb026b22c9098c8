//! Download handlers: export a model or results, zip, send as a binary frame.

use async_trait::async_trait;
use marionette_core::{Artifact, Experiment};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::archive::{self, PackagedArchive};
use crate::errors::DispatchError;
use crate::handlers::{
    optional_string_param, require_experiment_id, require_project_id, require_string_param,
};
use crate::properties::ASPECT_KEY;
use crate::registry::MethodHandler;
use crate::session::ConnectionSession;
use crate::types::{BinaryFrame, BinaryKind, InboundRequest, MessageKind, OutboundMessage};

async fn target(
    session: &ConnectionSession,
    params: &Value,
    action: &'static str,
) -> Result<Experiment, DispatchError> {
    let project = session.resolve_project(require_project_id(params)?).await?;
    ConnectionSession::resolve_experiment(&project, require_experiment_id(params)?, action)
}

/// Zip `artifact` under the session's archive directory for `aspect`.
async fn package(
    session: &ConnectionSession,
    artifact: Artifact,
    experiment: &Experiment,
    aspect: &str,
    archive_name: &str,
) -> Result<PackagedArchive, DispatchError> {
    let dest = session.archive_dir(experiment, aspect);
    let archive = match artifact {
        Artifact::Local(path) => {
            archive::package_path(path, dest, archive_name.to_owned()).await?
        }
        Artifact::Remote(url) => {
            let bytes = session.services().fetcher.fetch_bytes(&url).await?;
            let entry = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .unwrap_or(archive_name)
                .to_owned();
            archive::package_bytes(entry, bytes, dest, archive_name.to_owned()).await?
        }
    };
    debug!(path = %archive.path.display(), "artifact packaged");
    Ok(archive)
}

async fn deliver(
    session: &ConnectionSession,
    request: &InboundRequest,
    kind: BinaryKind,
    archive: PackagedArchive,
    done: MessageKind,
) {
    let frame = BinaryFrame {
        kind,
        request_id: request.request_id.clone(),
        file_name: archive.file_name(),
        payload: archive.bytes,
    };
    let _ = session.outbox().send_binary(&frame).await;
    session.send(OutboundMessage::empty(request.token(), done)).await;
}

/// Export a model, optionally converted to a registered format.
pub struct DownloadModelHandler;

#[async_trait]
impl MethodHandler for DownloadModelHandler {
    #[instrument(skip(self, request, session), fields(method = "download_model"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let format = match optional_string_param(&params, "format") {
            None => None,
            Some(name) => Some(session.services().formats.model_format(&name).ok_or(
                DispatchError::UnknownFormat {
                    reply: MessageKind::ErrorDownloadingModel,
                    name,
                },
            )?),
        };
        let experiment = target(session, &params, "downloading model").await?;
        let aspect = require_string_param(&params, ASPECT_KEY)?;

        let artifact = session
            .manager()
            .download_model(&aspect, format.as_ref(), &experiment)
            .await
            .map_err(DispatchError::execution("Error downloading model"))?;
        let name = format.as_ref().map_or("model", |f| f.name());
        let archive = package(session, artifact, &experiment, &aspect, name).await?;
        deliver(session, request, BinaryKind::ModelArchive, archive, MessageKind::DownloadModel)
            .await;
        Ok(())
    }
}

/// Export recorded results in a registered format.
pub struct DownloadResultsHandler;

#[async_trait]
impl MethodHandler for DownloadResultsHandler {
    #[instrument(skip(self, request, session), fields(method = "download_results"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let params = request.params();
        let name = optional_string_param(&params, "format").unwrap_or_default();
        let format = session
            .services()
            .formats
            .results_format(&name)
            .ok_or(DispatchError::UnknownFormat {
                reply: MessageKind::ErrorDownloadingResults,
                name,
            })?;
        let experiment = target(session, &params, "downloading results").await?;
        let aspect = require_string_param(&params, ASPECT_KEY)?;

        let artifact = session
            .manager()
            .download_results(&aspect, &format, &experiment)
            .await
            .map_err(DispatchError::execution("Error downloading results"))?
            .ok_or_else(|| DispatchError::ResultsNotFound {
                format: format.name().to_owned(),
            })?;
        let archive = package(session, artifact, &experiment, &aspect, format.name()).await?;
        deliver(session, request, BinaryKind::ResultsArchive, archive, MessageKind::DownloadResults)
            .await;
        Ok(())
    }
}
