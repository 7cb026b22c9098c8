//! Method registry and per-connection dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::warn;

use crate::errors::DispatchError;
use crate::session::ConnectionSession;
use crate::types::InboundRequest;

/// Trait implemented by every operation handler.
///
/// Handlers send their own replies through the session's outbox; an `Err`
/// is turned into the matching error or informational message by
/// [`MethodRegistry::dispatch`].
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the operation.
    async fn handle(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> Result<(), DispatchError>;
}

/// How a dispatched request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStatus {
    /// The handler finished.
    Completed,
    /// The handler failed and a failure message was sent.
    Failed,
    /// No handler for the request type.
    Unknown,
}

/// Registry mapping request types to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a request type.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Run the handler for `request` to completion, cascades included.
    pub async fn dispatch(
        &self,
        request: &InboundRequest,
        session: &mut ConnectionSession,
    ) -> DispatchStatus {
        let method = request.kind.clone();
        counter!("rpc_requests_total", "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            let err = DispatchError::UnknownRequest {
                kind: method.clone(),
            };
            report(&method, request, session, &err).await;
            return DispatchStatus::Unknown;
        };

        if session.is_closed() {
            report(&method, request, session, &DispatchError::SessionClosed).await;
            return DispatchStatus::Failed;
        }

        let start = Instant::now();
        let status = match handler.handle(request, session).await {
            Ok(()) => DispatchStatus::Completed,
            Err(err) => {
                report(&method, request, session, &err).await;
                DispatchStatus::Failed
            }
        };

        let duration = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => method.clone())
            .record(duration.as_secs_f64());

        if duration.as_secs() >= 5 {
            warn!(
                method,
                duration_secs = duration.as_secs_f64(),
                "slow request"
            );
        }

        status
    }

    /// List all registered request types (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a request type is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn report(
    method: &str,
    request: &InboundRequest,
    session: &ConnectionSession,
    err: &DispatchError,
) {
    counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => err.label()).increment(1);
    let message = err.to_message(request.token());
    match err.reporting() {
        crate::errors::Reporting::Info => {
            tracing::info!(method, connection_id = %session.id(), reason = %err, "request declined");
        }
        _ => {
            tracing::error!(method, connection_id = %session.id(), error = %err, kind = ?message.kind, "request failed");
        }
    }
    session.send(message).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::Harness;
    use crate::types::{ErrorBody, MessageKind};
    use marionette_core::logging::test_utils::capture_logs;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(
            &self,
            request: &InboundRequest,
            session: &mut ConnectionSession,
        ) -> Result<(), DispatchError> {
            session
                .send(crate::types::OutboundMessage::new(
                    request.token(),
                    MessageKind::Version,
                    request.params().to_string(),
                ))
                .await;
            Ok(())
        }
    }

    struct FailHandler;

    #[async_trait]
    impl MethodHandler for FailHandler {
        async fn handle(
            &self,
            _request: &InboundRequest,
            _session: &mut ConnectionSession,
        ) -> Result<(), DispatchError> {
            Err(DispatchError::InvalidParams {
                message: "boom".into(),
            })
        }
    }

    fn registry() -> MethodRegistry {
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);
        reg.register("fail", FailHandler);
        reg
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let mut h = Harness::new(true);
        let status = registry()
            .dispatch(&InboundRequest::new(Some("r1"), "echo", json!({"x": 1})), &mut h.session)
            .await;
        assert_eq!(status, DispatchStatus::Completed);
        let msgs = h.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].request_id.as_deref(), Some("r1"));
        assert_eq!(msgs[0].data, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn unknown_type_gets_error_with_token() {
        let mut h = Harness::new(true);
        let status = registry()
            .dispatch(&InboundRequest::new(Some("r2"), "bogus", json!(null)), &mut h.session)
            .await;
        assert_eq!(status, DispatchStatus::Unknown);
        let msgs = h.messages();
        assert_eq!(msgs[0].kind, MessageKind::Error);
        assert_eq!(msgs[0].request_id.as_deref(), Some("r2"));
        let body: ErrorBody = serde_json::from_str(&msgs[0].data).unwrap();
        assert_eq!(body.message, "Unknown request type 'bogus'");
    }

    #[tokio::test]
    async fn handler_errors_are_logged_before_sending() {
        let mut h = Harness::new(true);
        let (logs, _guard) = capture_logs();
        let status = registry()
            .dispatch(&InboundRequest::new(Some("r3"), "fail", json!(null)), &mut h.session)
            .await;
        assert_eq!(status, DispatchStatus::Failed);
        assert!(logs.has_message("request failed"));
        assert_eq!(h.messages()[0].kind, MessageKind::Error);
    }

    #[tokio::test]
    async fn closed_sessions_reject_requests() {
        let mut h = Harness::new(true);
        h.session.close().await;
        let status = registry()
            .dispatch(&InboundRequest::new(None, "echo", json!(null)), &mut h.session)
            .await;
        assert_eq!(status, DispatchStatus::Failed);
        let body: ErrorBody = serde_json::from_str(&h.messages()[0].data).unwrap();
        assert_eq!(body.message, "The connection session is closed");
    }

    #[test]
    fn methods_are_sorted() {
        let reg = registry();
        assert_eq!(reg.methods(), vec!["echo", "fail"]);
        assert!(reg.has_method("echo"));
        assert!(!reg.has_method("nope"));
    }
}
