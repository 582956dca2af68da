//! Error hierarchy for the Gemini resource layer
//!
//! Every public operation returns [`RelayError`]. Remote failures keep their
//! HTTP status where the backend exposes one so that retry classification can
//! look at structured data before falling back to message heuristics.

use crate::context::ContextError;
use thiserror::Error;

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid input: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("Gemini API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        timeout: bool,
        connect: bool,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{operation} failed: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<RelayError>,
    },
}

/// Remote resource kinds, used for not-found reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    File,
    Cache,
    Model,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::File => "File",
            ResourceKind::Cache => "Cache",
            ResourceKind::Model => "Model",
        };
        f.write_str(name)
    }
}

impl RelayError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn from_reqwest_error(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::Api {
                status: status.as_u16(),
                message: error.to_string(),
            };
        }
        if error.is_decode() {
            return Self::Decode(error.to_string());
        }
        Self::Transport {
            message: error.to_string(),
            timeout: error.is_timeout(),
            connect: error.is_connect(),
        }
    }

    /// Wrap the error with the name of the operation that produced it.
    pub fn context(self, operation: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping operation wrappers.
    pub fn root(&self) -> &RelayError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation { .. })
    }

    pub fn is_context(&self) -> bool {
        matches!(self.root(), Self::Context(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.root() {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
