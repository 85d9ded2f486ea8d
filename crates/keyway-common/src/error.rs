//! Error types for Keyway
//!
//! Every orchestrator step returns `Result<T, Error>`. Variants carry the
//! context an operator needs to repair state by hand: which cluster, which
//! upstream operation, and for partial completions which steps already ran.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Keyway operations
#[derive(Debug, Error)]
pub enum Error {
    /// A required request field was missing or malformed
    #[error("validation error for {operation}: {message}")]
    Validation {
        /// Operation being validated (e.g., "create-access-entry")
        operation: String,
        /// The offending property name, if known
        field: Option<String>,
        /// Description of what's invalid
        message: String,
    },

    /// A cluster, role or association does not exist
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Kind of the missing object ("cluster", "pod identity association")
        kind: String,
        /// Identifier that was looked up
        name: String,
    },

    /// No ambient AWS credentials could be resolved for signing
    #[error("credentials unavailable: {message}")]
    CredentialsUnavailable {
        /// Why resolution failed
        message: String,
    },

    /// An AWS API call failed
    #[error("{service} {operation} failed: {message}")]
    Upstream {
        /// AWS service name (eks, iam, sts)
        service: String,
        /// API operation name (e.g., "CreateAccessEntry")
        operation: String,
        /// Rendered SDK error
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// IAM accepted the create call but returned no role
    #[error("role {role_name} could not be created: {message}")]
    RoleCreation {
        /// Generated role name
        role_name: String,
        /// Description of what failed
        message: String,
    },

    /// A multi-step operation failed after earlier steps took effect
    #[error("{operation} partially completed ({}): {source}", .completed.join(", "))]
    PartialCompletion {
        /// Operation that was running
        operation: String,
        /// Steps that took effect before the failure
        completed: Vec<String>,
        /// The failure that stopped the sequence
        source: Box<Error>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid process configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "token", "kube_client")
        context: String,
    },
}

impl Error {
    /// Create a validation error for an operation
    pub fn validation(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            operation: operation.into(),
            field: None,
            message: msg.into(),
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(
        operation: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            operation: operation.into(),
            field: Some(field.into()),
            message: msg.into(),
        }
    }

    /// Create a validation error for a missing required field
    pub fn missing_field(operation: impl Into<String>, field: &str) -> Self {
        Self::validation_for_field(operation, field, format!("{} must be provided", field))
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a credentials error
    pub fn credentials_unavailable(msg: impl Into<String>) -> Self {
        Self::CredentialsUnavailable {
            message: msg.into(),
        }
    }

    /// Create an upstream AWS error
    pub fn upstream(
        service: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Upstream {
            service: service.into(),
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a role creation error
    pub fn role_creation(role_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RoleCreation {
            role_name: role_name.into(),
            message: msg.into(),
        }
    }

    /// Wrap `source` as a partial completion of `operation`
    pub fn partial(operation: impl Into<String>, completed: Vec<String>, source: Error) -> Self {
        Self::PartialCompletion {
            operation: operation.into(),
            completed,
            source: Box::new(source),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether earlier steps of the failed operation took effect
    pub fn is_partial(&self) -> bool {
        matches!(self, Error::PartialCompletion { .. })
    }

    /// Steps that completed before the failure (empty unless partial)
    pub fn completed_steps(&self) -> &[String] {
        match self {
            Error::PartialCompletion { completed, .. } => completed,
            _ => &[],
        }
    }

    /// Whether this error means the target object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube { source } => {
                matches!(source, kube::Error::Api(ae) if ae.code == 404)
            }
            Error::PartialCompletion { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether the cluster's API server could not be reached at all
    ///
    /// Requests failing this way never reached the server, so they are
    /// safe to retry against a re-described endpoint.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::HyperError(_) | kube::Error::Service(_)
            }
        )
    }

    /// Status code reported in the response envelope
    ///
    /// The calling framework only distinguishes success from failure, so
    /// every error maps to 400.
    pub fn status_code(&self) -> u16 {
        400
    }

    /// Get the field name if this is a validation error on a specific field
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
