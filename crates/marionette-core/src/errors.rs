//! Error types raised by external collaborators.

use thiserror::Error;

/// Boxed error used as the underlying cause of collaborator failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a project manager or auth provider.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The collaborator could not be brought up.
    #[error("{message}")]
    Initialization {
        /// What failed.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// An operation started but did not complete.
    #[error("{message}")]
    Execution {
        /// What failed.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl ManagerError {
    /// Initialization failure without an underlying cause.
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
            source: None,
        }
    }

    /// Execution failure without an underlying cause.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            source: None,
        }
    }

    /// Execution failure wrapping another error.
    pub fn execution_caused_by(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Failure reported by the data backend.
#[derive(Debug, Error)]
pub enum DataError {
    /// Project JSON could not be parsed.
    #[error("invalid project document: {0}")]
    Parse(#[from] serde_json::Error),

    /// An entity referenced by a save does not exist in the store.
    #[error("cannot persist {entity}: {reason}")]
    MissingEntity {
        /// Kind of entity being saved.
        entity: &'static str,
        /// Which lookup failed.
        reason: String,
    },

    /// The store rejected the operation.
    #[error("storage failure: {0}")]
    Storage(String),
}
