//! Error types for cache synchronization and load balancer reconciliation.
//!
//! This module provides [`SyncError`], the single error type shared by the
//! loaders, the on-demand path and the upsert engine. Callers that need to
//! tell "try again later" apart from "the request itself is wrong" use
//! [`SyncError::is_transient`] and [`SyncError::is_contract_violation`].

/// Error type for cloudsync operations.
///
/// # Example
///
/// ```rust
/// use cloudsync_core::SyncError;
///
/// fn require_name(name: &str) -> Result<(), SyncError> {
///     if name.is_empty() {
///         return Err(SyncError::InvalidRequest {
///             field: "name".to_string(),
///             reason: "load balancer name cannot be empty".to_string(),
///         });
///     }
///     Ok(())
/// }
///
/// assert!(require_name("").unwrap_err().is_contract_violation());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A call against the remote cloud API failed.
    #[error("remote call {operation} failed: {message}")]
    Remote {
        /// The remote operation that failed (e.g. `list_server_groups`).
        operation: String,
        /// Error message.
        message: String,
        /// Whether the failure is expected to clear on its own.
        transient: bool,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Polling an asynchronous remote task ran out of attempts.
    ///
    /// The outcome of the mutation is unknown; it may still complete.
    #[error("task {task_id} did not finish after {attempts} polls")]
    TaskTimeout {
        /// The remote task identifier.
        task_id: String,
        /// Number of polls performed.
        attempts: u32,
    },

    /// The remote side reported the task as failed.
    #[error("task {task_id} failed: {message}")]
    TaskFailed {
        /// The remote task identifier.
        task_id: String,
        /// Failure reason reported by the remote side.
        message: String,
    },

    /// An on-demand payload could not be decoded.
    #[error("cannot decode on-demand payload for {key}: {message}")]
    Deserialization {
        /// Key of the on-demand entry.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// A cache key does not follow the key scheme.
    #[error("invalid cache key {key:?}: {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A resource is missing the fields its key is derived from.
    #[error("cannot derive {namespace} key: {reason}")]
    MissingIdentity {
        /// Namespace the key was being derived for.
        namespace: String,
        /// Which field was missing.
        reason: String,
    },

    /// A caller-supplied request is malformed.
    #[error("invalid request field {field}: {reason}")]
    InvalidRequest {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An operation type nobody handles.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SyncError {
    /// Create a non-transient remote error.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
            transient: false,
            source: None,
        }
    }

    /// Create a transient remote error (timeout, throttling, 5xx).
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
            transient: true,
            source: None,
        }
    }

    /// Create an internal error from any error type.
    pub fn internal<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Remote {
                transient: true,
                ..
            }
        )
    }

    /// Whether the error is the caller's fault and fatal to its request only.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. } | Self::UnknownOperation(_) | Self::InvalidKey { .. }
        )
    }

    /// Whether the outcome of a remote mutation is unknown rather than failed.
    #[must_use]
    pub fn is_unknown_outcome(&self) -> bool {
        matches!(self, Self::TaskTimeout { .. })
    }
}
