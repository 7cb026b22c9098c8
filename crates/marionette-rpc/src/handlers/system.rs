//! System handlers: version, script fetch, idle/close.

use async_trait::async_trait;
use tracing::instrument;

use crate::errors::DispatchError;
use crate::fetch::parse_url;
use crate::handlers::string_or_field;
use crate::registry::MethodHandler;
use crate::session::ConnectionSession;
use crate::types::{InboundRequest, MessageKind, OutboundMessage};

/// Report the server version.
pub struct GetVersionHandler;

#[async_trait]
impl MethodHandler for GetVersionHandler {
    #[instrument(skip(self, request, session), fields(method = "get_version"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let version = session.services().version.clone();
        session
            .send(OutboundMessage::new(request.token(), MessageKind::Version, version))
            .await;
        Ok(())
    }
}

/// Fetch a script by URL and send its text.
pub struct GetScriptHandler;

#[async_trait]
impl MethodHandler for GetScriptHandler {
    #[instrument(skip(self, request, session), fields(method = "get_script"))]
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        let url = parse_url(&string_or_field(&request.params(), "url")?)?;
        let script = session.services().fetcher.fetch_text(&url).await?;
        session
            .send(OutboundMessage::new(request.token(), MessageKind::ScriptFetched, script))
            .await;
        Ok(())
    }
}

/// Idle timeout or explicit close: release the project and leave.
///
/// No reply is sent.
pub struct CloseHandler;

#[async_trait]
impl MethodHandler for CloseHandler {
    #[instrument(skip(self, _request, session), fields(method = "close"))]
    async fn handle(
        &self,
        _request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError> {
        session.close().await;
        Ok(())
    }
}
