//! Error types for the resource pipeline.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::client::ClientFault;
use crate::invoker::OperationKind;
use crate::schema::Diagnostic;

/// The error taxonomy surfaced to the command host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A resource path did not match the expected segment structure.
    MalformedIdentifier,
    /// User input was missing, conflicting or unparseable.
    InvalidArgument,
    /// The management client returned a fault.
    Service,
    /// A long-running operation did not finish within its bound.
    Timeout,
    /// A value could not be encoded or decoded.
    Serialization,
}

/// The resource an operation was acting on when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// The operation that failed.
    pub operation: OperationKind,
    /// The resource group, when the operation is group-scoped.
    pub resource_group: Option<String>,
    /// The resource name, when the operation targets one resource.
    pub name: Option<String>,
}

impl OperationContext {
    /// Create a context for an operation.
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            resource_group: None,
            name: None,
        }
    }

    /// Set the resource group.
    pub fn with_resource_group(mut self, resource_group: impl Into<String>) -> Self {
        self.resource_group = Some(resource_group.into());
        self
    }

    /// Set the resource name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        match (&self.resource_group, &self.name) {
            (Some(group), Some(name)) => write!(f, " of '{}' in resource group '{}'", name, group),
            (Some(group), None) => write!(f, " in resource group '{}'", group),
            (None, Some(name)) => write!(f, " of '{}'", name),
            (None, None) => Ok(()),
        }
    }
}

/// Errors produced by the resource pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The resource path does not have the expected segment structure.
    #[error("Malformed resource identifier '{path}': {reason}")]
    MalformedIdentifier {
        /// The offending path.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },

    /// Mutually exclusive, missing or unparseable user input.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// A summary of the problem.
        message: String,
        /// Every individual problem found, when validation produced several.
        diagnostics: Vec<Diagnostic>,
    },

    /// The management client returned a fault.
    #[error("{context} failed: {fault}")]
    Service {
        /// What was being done when the fault occurred.
        context: OperationContext,
        /// The fault as reported by the client.
        fault: ClientFault,
    },

    /// A long-running operation did not reach a terminal state in time.
    #[error("{context} did not complete within {limit:?}")]
    Timeout {
        /// What was being waited on.
        context: OperationContext,
        /// The configured bound.
        limit: Duration,
        /// The status location that was being polled.
        location: Option<String>,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create a [`PipelineError::MalformedIdentifier`].
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a [`PipelineError::InvalidArgument`] with no diagnostics.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            diagnostics: Vec::new(),
        }
    }

    /// Create a [`PipelineError::InvalidArgument`] carrying validation diagnostics.
    pub fn invalid_with_diagnostics(
        message: impl Into<String>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            diagnostics,
        }
    }

    /// The error raised when two mutually exclusive parameters are both set.
    ///
    /// # Examples
    ///
    /// ```
    /// use resource_pipeline::PipelineError;
    ///
    /// let err = PipelineError::conflict("BackendIPAddresses", "BackendFqdns");
    /// assert_eq!(
    ///     err.message(),
    ///     "at most one of BackendIPAddresses and BackendFqdns may be specified"
    /// );
    /// ```
    pub fn conflict(first: &str, second: &str) -> Self {
        Self::invalid_argument(format!(
            "at most one of {} and {} may be specified",
            first, second
        ))
    }

    /// Create a [`PipelineError::Service`].
    pub fn service(context: OperationContext, fault: ClientFault) -> Self {
        Self::Service { context, fault }
    }

    /// The taxonomy bucket this error falls into.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedIdentifier { .. } => ErrorKind::MalformedIdentifier,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Service { .. } => ErrorKind::Service,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Get the error message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::MalformedIdentifier { reason, .. } => reason,
            Self::InvalidArgument { message, .. } => message,
            Self::Service { fault, .. } => &fault.message,
            Self::Timeout { .. } => "long-running operation timed out",
            Self::Serialization(_err) => "serialization error (see Debug output)",
        }
    }

    /// Validation diagnostics attached to an [`PipelineError::InvalidArgument`].
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::InvalidArgument { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}
