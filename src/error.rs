//! Error types for context operations.
//!
//! [`ContextError`] covers misuse of stores, chains and the registry.
//! [`BoundaryError`] is what an isolation [`Boundary`](crate::boundary::Boundary)
//! hands to its error handlers when a contained callback panics or fails.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors raised by stores, chained contexts and the registry.
///
/// # Examples
///
/// ```
/// use taskctx::ContextError;
///
/// let err = ContextError::Inactive {
///     scope: "app".to_string(),
/// };
/// assert!(err.to_string().contains("app"));
/// ```
#[derive(Debug, Error)]
pub enum ContextError {
    /// A write was attempted while the store had no active frame on this task.
    #[error("no active context for scope '{scope}': run() or bind() must be entered first")]
    Inactive {
        /// The scope that was written to.
        scope: String,
    },

    /// A chained context has neither a child nor a parent to write to.
    #[error("chained context has no child or parent to write to")]
    Unbound,

    /// Another scope is already published as the process-wide default.
    #[error("default scope is already '{current}', refusing to publish '{requested}'")]
    DefaultScopeConflict {
        /// The scope currently published.
        current: String,
        /// The scope that was requested.
        requested: String,
    },

    /// Scope names must be non-empty.
    #[error("invalid scope name: {0:?}")]
    InvalidScopeName(String),

    /// Configuration could not be parsed or is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Reading a configuration file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ContextError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// An error contained by an isolation boundary.
#[derive(Debug, Error)]
pub enum BoundaryError {
    /// The contained callback panicked.
    #[error("callback panicked: {message}")]
    Panicked {
        /// The panic payload rendered as text.
        message: String,
    },

    /// The contained callback returned an error.
    #[error("callback failed: {error}")]
    Failed {
        /// The error returned by the callback.
        #[source]
        error: anyhow::Error,
    },
}

impl BoundaryError {
    /// Returns `true` if the error came from a panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}
