//! Statistics error types.

use thiserror::Error;

/// Errors that can occur when constructing statistics containers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    /// A ring buffer was requested with zero capacity.
    #[error("ring buffer capacity must be greater than zero")]
    ZeroCapacity,
}
