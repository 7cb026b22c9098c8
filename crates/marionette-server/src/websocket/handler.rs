//! Decode an incoming text frame and route it through the registry.

use marionette_rpc::{ConnectionSession, DispatchError, DispatchStatus, InboundRequest, MethodRegistry};
use tracing::{debug, instrument, warn};

/// Handle one inbound frame.
///
/// Frames that are not a valid request get an error envelope without a
/// correlation token and return `None`.
#[instrument(skip_all, fields(kind))]
pub async fn handle_message(
    message: &str,
    registry: &MethodRegistry,
    session: &mut ConnectionSession,
) -> Option<DispatchStatus> {
    let request: InboundRequest = match serde_json::from_str(message) {
        Ok(request) => request,
        Err(e) => {
            warn!(connection_id = %session.id(), error = %e, "invalid JSON received");
            let err = DispatchError::InvalidParams {
                message: format!("Invalid JSON: {e}"),
            };
            session.send(err.to_message(None)).await;
            return None;
        }
    };

    let _ = tracing::Span::current().record("kind", request.kind.as_str());
    debug!(kind = %request.kind, request_id = ?request.request_id, "dispatching request");
    Some(registry.dispatch(&request, session).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use marionette_core::{
        FormatCatalog, InMemoryDataManager, JsonTreeSerializer, LocalManagerFactory,
    };
    use marionette_rpc::outbox::{self, Frame};
    use marionette_rpc::types::ErrorBody;
    use marionette_rpc::{HttpFetcher, MessageKind, MethodHandler, OutboundMessage, ServiceContext};
    use tokio::sync::mpsc;

    use crate::websocket::registry::ConnectionRegistry;

    struct Pong;

    #[async_trait]
    impl MethodHandler for Pong {
        async fn handle(
            &self,
            request: &InboundRequest,
            session: &mut ConnectionSession,
        ) -> Result<(), DispatchError> {
            session
                .send(OutboundMessage::new(request.token(), MessageKind::Version, "pong"))
                .await;
            Ok(())
        }
    }

    fn session(scratch: &std::path::Path) -> (ConnectionSession, mpsc::Receiver<Frame>) {
        let services = Arc::new(ServiceContext {
            data: Arc::new(InMemoryDataManager::new()),
            formats: Arc::new(FormatCatalog::new(["NeuroML"], ["HDF5"])),
            serializer: Arc::new(JsonTreeSerializer),
            managers: Arc::new(LocalManagerFactory::new(scratch, Vec::new())),
            fetcher: Arc::new(HttpFetcher::new()),
            connections: Arc::new(ConnectionRegistry::new()),
            archive_root: scratch.to_path_buf(),
            version: "test".into(),
        });
        let (outbox, rx) = outbox::channel(8);
        (ConnectionSession::new("conn-1".into(), services, outbox), rx)
    }

    fn next_message(rx: &mut mpsc::Receiver<Frame>) -> OutboundMessage {
        match rx.try_recv().unwrap() {
            Frame::Text(json) => serde_json::from_str(&json).unwrap(),
            Frame::Binary(_) => panic!("unexpected binary frame"),
        }
    }

    #[tokio::test]
    async fn valid_request_is_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = session(dir.path());
        let mut registry = MethodRegistry::new();
        registry.register("ping", Pong);

        let status = handle_message(
            r#"{"requestID": "r1", "type": "ping", "data": ""}"#,
            &registry,
            &mut session,
        )
        .await;
        assert_eq!(status, Some(DispatchStatus::Completed));
        let msg = next_message(&mut rx);
        assert_eq!(msg.request_id.as_deref(), Some("r1"));
        assert_eq!(msg.data, "pong");
    }

    #[tokio::test]
    async fn invalid_json_gets_an_untagged_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = session(dir.path());
        let status = handle_message("{nope", &MethodRegistry::new(), &mut session).await;
        assert_eq!(status, None);

        let msg = next_message(&mut rx);
        assert_eq!(msg.kind, MessageKind::Error);
        assert_eq!(msg.request_id, None);
        let body: ErrorBody = serde_json::from_str(&msg.data).unwrap();
        assert!(body.message.starts_with("Invalid JSON"));
    }

    #[tokio::test]
    async fn client_cannot_read_server_files_through_get_script() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "top-secret").unwrap();
        let url = url::Url::from_file_path(&secret).unwrap();
        let (mut session, mut rx) = session(dir.path());

        let frame = serde_json::json!({
            "requestID": "s1",
            "type": "get_script",
            "data": url.as_str(),
        });
        let registry = marionette_rpc::default_registry();
        let status = handle_message(&frame.to_string(), &registry, &mut session).await;
        assert_eq!(status, Some(DispatchStatus::Failed));
        let msg = next_message(&mut rx);
        assert_eq!(msg.kind, MessageKind::Error);
        assert!(!msg.data.contains("top-secret"));
    }

    #[tokio::test]
    async fn unknown_type_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = session(dir.path());
        let status = handle_message(
            r#"{"requestID": "r2", "type": "warp_drive"}"#,
            &MethodRegistry::new(),
            &mut session,
        )
        .await;
        assert_eq!(status, Some(DispatchStatus::Unknown));
        assert_eq!(next_message(&mut rx).kind, MessageKind::Error);
    }
}
