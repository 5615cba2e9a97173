//! Error types for the bootstrapper
//!
//! Errors are structured with fields to aid debugging in production. Every
//! variant maps to one class of failure the bootstrapper distinguishes:
//! load-time defects, connection preconditions, retryable or fatal apply
//! failures, and cancellation. `Stage` attributes any of them to the
//! bootstrap stage that produced it.

use thiserror::Error;

/// Main error type for bootstrap operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed embedded resource definition
    #[error("failed to load resource set {set}: {message}")]
    Load {
        /// Name of the resource set being loaded
        set: String,
        /// Description of what's malformed
        message: String,
    },

    /// Invalid or unobtainable base connection
    #[error("connection error [{profile}]: {message}")]
    Connection {
        /// Connection profile (kubeconfig context) or scope being connected
        profile: String,
        /// Description of what failed
        message: String,
    },

    /// A remote write was rejected
    #[error("failed to apply {resource} in scope {scope}: {message}")]
    Apply {
        /// Identity of the resource (kind/namespace/name)
        resource: String,
        /// Logical scope the write targeted
        scope: String,
        /// Description of what failed
        message: String,
        /// Whether this error is expected to self-resolve
        retryable: bool,
    },

    /// The lifetime signal fired
    #[error("cancelled during {context}")]
    Cancelled {
        /// What was in progress when cancellation was observed
        context: String,
    },

    /// Error attributed to a bootstrap stage
    #[error("stage {stage} failed: {source}")]
    Stage {
        /// Name of the failing stage
        stage: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a load error for the named resource set
    pub fn load(set: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Load {
            set: set.into(),
            message: msg.into(),
        }
    }

    /// Create a connection error for the named profile
    pub fn connection(profile: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connection {
            profile: profile.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error that the retry driver will retry
    pub fn apply_retryable(
        resource: impl Into<String>,
        scope: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Apply {
            resource: resource.into(),
            scope: scope.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create an apply error that aborts the owning stage
    pub fn apply_fatal(
        resource: impl Into<String>,
        scope: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Apply {
            resource: resource.into(),
            scope: scope.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Attribute this error to a bootstrap stage
    ///
    /// An error already attributed to a stage is returned unchanged.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage: stage.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether the condition is expected to self-resolve as the control plane converges
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Apply { retryable, .. } => *retryable,
            Self::Stage { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether this error reports that shutdown was requested
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Name of the stage this error is attributed to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
