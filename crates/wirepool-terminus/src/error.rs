//! Shutdown error types.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by shutdown targets.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the shutdown coordinator.
#[derive(Debug, Clone, Error)]
pub enum TerminusError {
    /// A registered server failed to shut down.
    #[error("server {id} failed to shut down: {message}")]
    Server {
        /// Registration id of the server.
        id: String,
        /// Failure description.
        message: String,
    },

    /// Servers did not finish draining before the force timeout.
    #[error("shutdown forced after {elapsed:?}")]
    ShutdownTimeout {
        /// Time spent draining.
        elapsed: Duration,
    },

    /// A shutdown sequence is already running.
    #[error("shutdown already in progress")]
    AlreadyShuttingDown,
}
