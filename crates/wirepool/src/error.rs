//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by pool operations.
///
/// Acquisition failures are delivered as values inside an
/// [`Acquisition`](crate::pool::Acquisition) so callers must branch on them.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The pool already holds `max_connections` connections.
    #[error("pool limit reached: {active} active connections (max {max})")]
    CapacityExceeded {
        /// Connections currently stored.
        active: usize,
        /// Configured maximum.
        max: u32,
    },

    /// A queued acquisition exceeded its time budget.
    #[error("request timeout: no connection available after {waited:?}")]
    AcquisitionTimeout {
        /// How long the request waited in the queue.
        waited: Duration,
    },

    /// The adapter rejected a connection.
    #[error("connection validation failed: {0}")]
    Validation(String),

    /// The adapter failed to create a connection.
    #[error("failed to create protocol connection: {0}")]
    ProtocolCreation(String),

    /// Graceful close did not finish within its budget.
    #[error("shutdown timed out after {elapsed:?}")]
    ShutdownTimeout {
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// The pool is being (or has been) destroyed.
    #[error("pool is being destroyed")]
    Destroyed,

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No adapter is registered for the protocol.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// A cached pool was built with a different adapter type.
    #[error("pool for {0} uses a different adapter type")]
    AdapterMismatch(String),
}

impl PoolError {
    /// Whether the error is the fail-fast capacity condition.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Whether the error is an acquisition timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout { .. })
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. }
                | Self::AcquisitionTimeout { .. }
                | Self::ProtocolCreation(_)
        )
    }
}

/// Errors reported by protocol adapter hooks.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// IO error from the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The hook did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Error returned by an event listener.
///
/// A listener that returns this error, or panics, counts one consecutive
/// failure against its registration.
#[derive(Debug, Clone, Error)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Create a listener error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_visible_messages() {
        let capacity = PoolError::CapacityExceeded { active: 2, max: 2 };
        assert!(capacity.to_string().contains("pool limit reached"));

        let timeout = PoolError::AcquisitionTimeout {
            waited: Duration::from_millis(50),
        };
        assert!(timeout.to_string().contains("request timeout"));

        assert_eq!(PoolError::Destroyed.to_string(), "pool is being destroyed");
    }

    #[test]
    fn test_classifiers() {
        assert!(PoolError::CapacityExceeded { active: 1, max: 1 }.is_capacity());
        assert!(
            PoolError::AcquisitionTimeout {
                waited: Duration::ZERO
            }
            .is_timeout()
        );
        assert!(PoolError::ProtocolCreation("refused".into()).is_transient());
        assert!(!PoolError::Destroyed.is_transient());
        assert!(!PoolError::InvalidConfig("x".into()).is_transient());
    }
}
