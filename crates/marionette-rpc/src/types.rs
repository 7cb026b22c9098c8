//! Wire types: inbound requests, outbound envelopes, binary frames.

use std::error::Error;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request decoded from a client text frame.
///
/// Browser clients usually send `data` as a JSON document encoded in a
/// string; [`InboundRequest::params`] unwraps that.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundRequest {
    /// Correlation token echoed on every reply.
    #[serde(rename = "requestID", default)]
    pub request_id: Option<String>,
    /// Operation name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Operation arguments.
    #[serde(default)]
    pub data: Value,
}

impl InboundRequest {
    /// Build a request with structured arguments.
    pub fn new(request_id: Option<&str>, kind: &str, data: Value) -> Self {
        Self {
            request_id: request_id.map(ToOwned::to_owned),
            kind: kind.to_owned(),
            data,
        }
    }

    /// Arguments as structured JSON.
    ///
    /// A string holding a JSON object or array is parsed; anything else is
    /// returned as sent.
    pub fn params(&self) -> Value {
        if let Value::String(raw) = &self.data {
            if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) =
                serde_json::from_str::<Value>(raw)
            {
                return parsed;
            }
        }
        self.data.clone()
    }

    /// Correlation token as a slice.
    pub fn token(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

/// Kind tag of an outbound envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Serialized project after a load.
    ProjectLoaded,
    /// An experiment load has started.
    ExperimentLoading,
    /// Runtime tree of a loaded experiment.
    ExperimentLoaded,
    /// A new experiment.
    ExperimentCreated,
    /// An experiment was queued.
    ExperimentRunning,
    /// Status of every experiment in a project.
    ExperimentStatus,
    /// Recorded results per aspect.
    PlayExperiment,
    /// An experiment was removed.
    DeleteExperiment,
    /// Watched variables were recorded.
    WatchedVariablesSet,
    /// Watch lists were cleared.
    ClearWatch,
    /// Server version.
    Version,
    /// Text of a fetched script.
    ScriptFetched,
    /// Model tree per aspect.
    GetModelTree,
    /// Simulation tree per aspect.
    GetSimulationTree,
    /// Export formats of an aspect.
    GetSupportedOutputs,
    /// Model tree after a parameter change.
    UpdateModelTree,
    /// A model archive was sent.
    DownloadModel,
    /// A results archive was sent.
    DownloadResults,
    /// A project was persisted.
    ProjectPersisted,
    /// Project properties were saved.
    ProjectPropsSaved,
    /// Experiment properties were saved.
    ExperimentPropsSaved,
    /// Storage account linked.
    DropboxLinked,
    /// Storage account unlinked.
    DropboxUnlinked,
    /// Model pushed to storage.
    ModelUploaded,
    /// Results pushed to storage.
    ResultsUploaded,
    /// Informational notice that is not a failure.
    InfoMessage,
    /// Failure with an [`ErrorBody`] payload.
    Error,
    /// A project could not be loaded.
    ErrorLoadingProject,
    /// A model could not be exported.
    ErrorDownloadingModel,
    /// Results could not be exported.
    ErrorDownloadingResults,
}

/// Text envelope sent to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Correlation token of the request being answered.
    #[serde(rename = "requestID")]
    pub request_id: Option<String>,
    /// Kind tag.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Payload, usually JSON encoded as a string.
    pub data: String,
}

impl OutboundMessage {
    /// Envelope with a raw payload.
    pub fn new(request_id: Option<&str>, kind: MessageKind, data: impl Into<String>) -> Self {
        Self {
            request_id: request_id.map(ToOwned::to_owned),
            kind,
            data: data.into(),
        }
    }

    /// Envelope with an empty payload.
    pub fn empty(request_id: Option<&str>, kind: MessageKind) -> Self {
        Self::new(request_id, kind, String::new())
    }

    /// Informational notice; the payload is the text as a JSON string.
    pub fn info(request_id: Option<&str>, text: &str) -> Self {
        Self::new(request_id, MessageKind::InfoMessage, Value::from(text).to_string())
    }

    /// Failure notice carrying an [`ErrorBody`].
    pub fn error(request_id: Option<&str>, body: &ErrorBody) -> Self {
        let data = serde_json::to_string(body).unwrap_or_default();
        Self::new(request_id, MessageKind::Error, data)
    }
}

/// Error code carried by every [`ErrorBody`].
pub const EXCEPTION: &str = "EXCEPTION";

/// Payload of an error envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always [`EXCEPTION`].
    pub error_code: String,
    /// Human-readable message.
    pub message: String,
    /// Underlying failure: omitted when there is none, its own message when
    /// it has no cause, otherwise the whole cause chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl ErrorBody {
    /// Body for `message`, describing `cause` if there is one.
    pub fn new(message: impl Into<String>, cause: Option<&(dyn Error + 'static)>) -> Self {
        Self {
            error_code: EXCEPTION.to_owned(),
            message: message.into(),
            exception: cause.map(describe_chain),
        }
    }
}

/// `top: cause: cause` for an error and its sources.
pub fn describe_chain(err: &(dyn Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Kind byte of a binary frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryKind {
    /// Zipped model export.
    ModelArchive = 1,
    /// Zipped results export.
    ResultsArchive = 2,
}

/// Binary frame: `kind | u16 token len | token | u16 name len | name | payload`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryFrame {
    /// What the payload is.
    pub kind: BinaryKind,
    /// Correlation token of the request being answered.
    pub request_id: Option<String>,
    /// File name the client should save the payload as.
    pub file_name: String,
    /// Archive bytes.
    pub payload: Bytes,
}

impl BinaryFrame {
    /// Encode into a single buffer. Token and name are truncated to
    /// `u16::MAX` bytes on a character boundary.
    pub fn encode(&self) -> Bytes {
        let token = truncated(self.request_id.as_deref().unwrap_or_default());
        let name = truncated(&self.file_name);
        let mut buf = BytesMut::with_capacity(5 + token.len() + name.len() + self.payload.len());
        buf.put_u8(self.kind as u8);
        put_str(&mut buf, token);
        put_str(&mut buf, name);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

fn truncated(s: &str) -> &str {
    let max = usize::from(u16::MAX);
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn put_str(buf: &mut BytesMut, s: &str) {
    // callers truncate to u16::MAX first
    buf.put_u16(u16::try_from(s.len()).unwrap_or(u16::MAX));
    buf.put_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_unwraps_json_strings() {
        let req: InboundRequest = serde_json::from_value(json!({
            "requestID": "r1",
            "type": "load_project_from_id",
            "data": "{\"projectId\": 4}"
        }))
        .unwrap();
        assert_eq!(req.params()["projectId"], 4);
        assert_eq!(req.token(), Some("r1"));
    }

    #[test]
    fn params_keeps_plain_strings() {
        let req = InboundRequest::new(None, "get_script", json!("http://host/script.js"));
        assert_eq!(req.params(), json!("http://host/script.js"));
    }

    #[test]
    fn missing_request_id_and_data_default() {
        let req: InboundRequest = serde_json::from_str(r#"{"type": "idle_user"}"#).unwrap();
        assert_eq!(req.request_id, None);
        assert_eq!(req.data, Value::Null);
    }

    #[test]
    fn envelope_field_names() {
        let msg = OutboundMessage::new(Some("r9"), MessageKind::ProjectLoaded, "{}");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v, json!({"requestID": "r9", "type": "project_loaded", "data": "{}"}));
    }

    #[test]
    fn info_payload_is_a_json_string() {
        let msg = OutboundMessage::info(None, "Unsupported \"op\"");
        assert_eq!(msg.kind, MessageKind::InfoMessage);
        let decoded: String = serde_json::from_str(&msg.data).unwrap();
        assert_eq!(decoded, "Unsupported \"op\"");
    }

    #[test]
    fn error_body_without_cause_omits_exception() {
        let body = ErrorBody::new("boom", None);
        insta::assert_json_snapshot!(body, @r###"
        {
          "error_code": "EXCEPTION",
          "message": "boom"
        }
        "###);
    }

    #[test]
    fn error_body_without_chain_repeats_cause_message() {
        let cause = std::io::Error::other("disk full");
        let body = ErrorBody::new("Error saving", Some(&cause));
        assert_eq!(body.exception.as_deref(), Some("disk full"));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("run failed")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn error_body_with_chain_lists_every_cause() {
        let err = Outer(std::io::Error::other("engine offline"));
        let body = ErrorBody::new("Error running experiment", Some(&err));
        assert_eq!(body.exception.as_deref(), Some("run failed: engine offline"));
    }

    #[test]
    fn binary_frame_layout() {
        let frame = BinaryFrame {
            kind: BinaryKind::ResultsArchive,
            request_id: Some("r1".into()),
            file_name: "out.zip".into(),
            payload: Bytes::from_static(b"PK"),
        };
        let encoded = frame.encode();
        assert_eq!(encoded[0], 2);
        assert_eq!(&encoded[1..3], &[0, 2]);
        assert_eq!(&encoded[3..5], b"r1");
        assert_eq!(&encoded[5..7], &[0, 7]);
        assert_eq!(&encoded[7..14], b"out.zip");
        assert_eq!(&encoded[14..], b"PK");
    }

    #[test]
    fn binary_frame_without_token_has_zero_length() {
        let frame = BinaryFrame {
            kind: BinaryKind::ModelArchive,
            request_id: None,
            file_name: String::new(),
            payload: Bytes::new(),
        };
        assert_eq!(frame.encode().as_ref(), &[1, 0, 0, 0, 0]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(40_000);
        let cut = truncated(&long);
        assert!(cut.len() <= usize::from(u16::MAX));
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
