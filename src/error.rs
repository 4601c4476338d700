//! Error taxonomy for the pool engine and its adapters.

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Errors surfaced by [`crate::engine::PoolEngine`] and its adapters.
///
/// Variants map onto the kinds named by the acquisition algorithm: only
/// [`ShuttingDown`](PoolError::ShuttingDown), [`BadConfig`](PoolError::BadConfig),
/// and [`NoResource`](PoolError::NoResource) are ever returned from
/// `PoolEngine::acquire` — the rest are logged internally at the call site and
/// either retried or folded into `NoResource`.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The manager has begun (or completed) shutdown; no new resources are admitted.
    #[error("pool is shutting down")]
    ShuttingDown,

    /// Mandatory configuration for the adapter is missing or invalid.
    #[error("bad configuration: {0}")]
    BadConfig(String),

    /// `Adapter::create` did not complete within the creation deadline.
    #[error("creation of {resource_type} resource timed out after {timeout_ms}ms")]
    CreationTimeout {
        /// The adapter's type tag (`worker`, `process`, `container`, `pod`).
        resource_type: &'static str,
        /// The configured creation timeout, in milliseconds.
        timeout_ms: u64,
    },

    /// The backend rejected creation outright.
    #[error("failed to create {resource_type} resource: {reason}")]
    CreationFailure {
        /// The adapter's type tag.
        resource_type: &'static str,
        /// Free-text cause, as reported by the backend.
        reason: String,
    },

    /// The pool is empty and creation failed or was not attempted.
    #[error("no resource available for {resource_type}")]
    NoResource {
        /// The adapter's type tag.
        resource_type: &'static str,
    },

    /// Graceful termination exceeded `shutdown_timeout`; the adapter fell
    /// back to a force-kill. Never surfaced from `acquire` — logged at the
    /// call site.
    #[error("termination of {name} timed out after {timeout_ms}ms, forcing removal")]
    TerminationTimeout {
        /// The handle's name.
        name: String,
        /// The configured shutdown timeout, in milliseconds.
        timeout_ms: u64,
    },

    /// A liveness probe failed or could not be evaluated; treated as "not alive".
    #[error("liveness probe failed for {name}: {reason}")]
    LivenessUnknown {
        /// The handle's name.
        name: String,
        /// Free-text cause.
        reason: String,
    },

    /// A transient failure in a background timer loop (eviction or
    /// monitoring); the loop swallows this and continues on the next tick.
    #[error("transient error in {loop_name} loop: {reason}")]
    Transient {
        /// Which background loop hit the error (`"eviction"` or `"monitor"`).
        loop_name: &'static str,
        /// Free-text cause.
        reason: String,
    },
}

impl PoolError {
    /// Whether this error kind is safe to retry (another `acquire` call may succeed).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoResource { .. } | Self::CreationTimeout { .. } | Self::CreationFailure { .. }
        )
    }

    /// The adapter type tag associated with this error, if any.
    #[must_use]
    pub fn resource_type(&self) -> Option<&'static str> {
        match self {
            Self::CreationTimeout { resource_type, .. }
            | Self::CreationFailure { resource_type, .. }
            | Self::NoResource { resource_type } => Some(resource_type),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutting_down_is_not_retryable() {
        assert!(!PoolError::ShuttingDown.is_retryable());
        assert!(PoolError::ShuttingDown.resource_type().is_none());
    }

    #[test]
    fn no_resource_is_retryable_and_carries_type() {
        let err = PoolError::NoResource {
            resource_type: "worker",
        };
        assert!(err.is_retryable());
        assert_eq!(err.resource_type(), Some("worker"));
        assert_eq!(err.to_string(), "no resource available for worker");
    }

    #[test]
    fn bad_config_message_carries_reason() {
        let err = PoolError::BadConfig("script_dir_path missing".to_string());
        assert!(err.to_string().contains("script_dir_path missing"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn creation_timeout_is_retryable() {
        let err = PoolError::CreationTimeout {
            resource_type: "pod",
            timeout_ms: 60_000,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("60000"));
    }

    #[test]
    fn termination_timeout_not_retryable_and_carries_name() {
        let err = PoolError::TerminationTimeout {
            name: "worker-8080-1".to_string(),
            timeout_ms: 5_000,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("worker-8080-1"));
    }
}
