//! Dispatch error taxonomy and how each failure is reported to the client.

use std::error::Error as _;

use marionette_core::{DataError, ExperimentId, ManagerError, ProjectId};

use crate::archive::ArchiveError;
use crate::fetch::FetchError;
use crate::properties::PatchError;
use crate::types::{ErrorBody, MessageKind, OutboundMessage};

/// Informational text sent when the data backend cannot persist.
pub const UNSUPPORTED_OPERATION: &str =
    "Unsupported operation: the current data backend does not persist changes";

/// Informational text sent for execution-affecting requests on a volatile project.
pub const VOLATILE_PROJECT: &str =
    "This project is volatile: persist it before running or editing experiments";

/// Failure of a single request.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Argument missing or of the wrong type.
    #[error("{message}")]
    InvalidParams {
        /// What is wrong.
        message: String,
    },

    /// No handler for the request type.
    #[error("Unknown request type '{kind}'")]
    UnknownRequest {
        /// The request type received.
        kind: String,
    },

    /// Project lookup miss outside of a project load.
    #[error("Project {project_id} was not found")]
    ProjectNotFound {
        /// Requested project.
        project_id: ProjectId,
    },

    /// Experiment lookup miss inside a resolved project.
    #[error("Error {action}, the experiment {experiment_id} was not found in project {project_id}")]
    ExperimentNotFound {
        /// What was being attempted, e.g. `loading experiment`.
        action: &'static str,
        /// Project that was searched.
        project_id: ProjectId,
        /// Requested experiment.
        experiment_id: ExperimentId,
    },

    /// A project load could not start.
    #[error("{message}")]
    ProjectLoad {
        /// Text sent with the load-error message.
        message: String,
    },

    /// The manager failed.
    #[error("{context}")]
    Execution {
        /// What was being attempted.
        context: String,
        /// Manager failure.
        #[source]
        source: ManagerError,
    },

    /// The data backend failed.
    #[error("{context}")]
    Data {
        /// What was being attempted.
        context: String,
        /// Backend failure.
        #[source]
        source: DataError,
    },

    /// Packaging a download failed.
    #[error("Error packaging download")]
    Archive(#[from] ArchiveError),

    /// Fetching a remote resource failed.
    #[error("Error fetching remote resource")]
    Fetch(#[from] FetchError),

    /// A property patch was rejected before anything was applied.
    #[error("{0}")]
    Patch(#[from] PatchError),

    /// A payload could not be encoded.
    #[error("Error encoding response")]
    Encode(#[from] serde_json::Error),

    /// The manager produced no results for the requested format.
    #[error("Results of type {format} not found")]
    ResultsNotFound {
        /// Requested results format.
        format: String,
    },

    /// Format name not registered.
    #[error("Unknown format '{name}'")]
    UnknownFormat {
        /// Message kind sent in reply.
        reply: MessageKind,
        /// Requested format name.
        name: String,
    },

    /// The data backend is the non-persistent default.
    #[error("{}", UNSUPPORTED_OPERATION)]
    Unsupported,

    /// The project is volatile.
    #[error("{}", VOLATILE_PROJECT)]
    VolatileProject,

    /// The connection session already closed.
    #[error("The connection session is closed")]
    SessionClosed,
}

/// How a [`DispatchError`] reaches the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reporting {
    /// `error` envelope with an [`ErrorBody`].
    Error,
    /// `info_message` envelope.
    Info,
    /// A dedicated message kind with a plain-text payload.
    Kind(MessageKind),
}

impl DispatchError {
    /// Wrap a manager failure with what was being attempted.
    pub fn execution(context: impl Into<String>) -> impl FnOnce(ManagerError) -> Self {
        let context = context.into();
        move |source| Self::Execution { context, source }
    }

    /// Wrap a backend failure with what was being attempted.
    pub fn data(context: impl Into<String>) -> impl FnOnce(DataError) -> Self {
        let context = context.into();
        move |source| Self::Data { context, source }
    }

    /// Reporting channel for this failure.
    pub fn reporting(&self) -> Reporting {
        match self {
            Self::Unsupported | Self::VolatileProject => Reporting::Info,
            Self::UnknownFormat { reply, .. } => Reporting::Kind(*reply),
            Self::ProjectLoad { .. } => Reporting::Kind(MessageKind::ErrorLoadingProject),
            _ => Reporting::Error,
        }
    }

    /// Stable label used in metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => "invalid_params",
            Self::UnknownRequest { .. } => "unknown_request",
            Self::ProjectNotFound { .. } | Self::ExperimentNotFound { .. } => "not_found",
            Self::ProjectLoad { .. } => "project_load",
            Self::Execution { .. } => "execution",
            Self::Data { .. } => "data",
            Self::Archive(_) => "archive",
            Self::Fetch(_) => "fetch",
            Self::Patch(_) => "patch",
            Self::Encode(_) => "encode",
            Self::ResultsNotFound { .. } => "results_not_found",
            Self::UnknownFormat { .. } => "unknown_format",
            Self::Unsupported => "unsupported",
            Self::VolatileProject => "volatile_project",
            Self::SessionClosed => "session_closed",
        }
    }

    /// Envelope answering the request identified by `request_id`.
    pub fn to_message(&self, request_id: Option<&str>) -> OutboundMessage {
        match self.reporting() {
            Reporting::Info => OutboundMessage::info(request_id, &self.to_string()),
            Reporting::Kind(kind) => match self {
                Self::ProjectLoad { message } => OutboundMessage::new(request_id, kind, message),
                _ => OutboundMessage::empty(request_id, kind),
            },
            Reporting::Error => {
                OutboundMessage::error(request_id, &ErrorBody::new(self.to_string(), self.source()))
            }
        }
    }
}
