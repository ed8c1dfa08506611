//! Error types for the Coraza WAF operator

use thiserror::Error;

/// Main error type for Coraza WAF operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A CorazaWaf spec field violates a declared constraint
    #[error("validation error for {field}: {message}")]
    Validation {
        /// Wire path of the offending field (e.g. "backend.port")
        field: String,
        /// Description of what's invalid
        message: String,
    },

    /// Converging a dependent object against the API server failed
    #[error("failed to converge {kind} {name}: {message}")]
    Collaborator {
        /// Kind of the object being converged
        kind: String,
        /// Name of the object being converged
        name: String,
        /// Underlying failure
        message: String,
    },

    /// A value that validation guarantees was missing at compile time
    #[error("internal error: {0}")]
    Internal(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error for the given field
    pub fn validation(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a collaborator error for the given object
    pub fn collaborator(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Collaborator {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an internal invariant error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the error is the user's fault and needs a spec change
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
