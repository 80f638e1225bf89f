//! Pool health classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Utilization above which a pool is reported as degraded.
pub const DEGRADED_UTILIZATION: f64 = 0.80;

/// Utilization above which a pool is reported as overloaded.
pub const OVERLOADED_UTILIZATION: f64 = 0.95;

/// Coarse health state used for load shedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Utilization at or below 80%.
    Healthy,
    /// Utilization above 80%.
    Degraded,
    /// Utilization above 95%.
    Overloaded,
    /// The pool has been destroyed.
    Unavailable,
}

impl HealthStatus {
    /// Classify a utilization ratio (`active / max`).
    #[must_use]
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization > OVERLOADED_UTILIZATION {
            Self::Overloaded
        } else if utilization > DEGRADED_UTILIZATION {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    /// Whether new work should still be routed to the pool.
    #[must_use]
    pub fn accepts_traffic(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Overloaded => write!(f, "OVERLOADED"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// Snapshot returned by [`ConnectionPoolManager::health`].
///
/// [`ConnectionPoolManager::health`]: crate::pool::ConnectionPoolManager::health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolHealth {
    /// Current status.
    pub status: HealthStatus,
    /// `active_connections / max_connections`.
    pub utilization: f64,
    /// Connections currently stored.
    pub active_connections: usize,
    /// Configured maximum.
    pub max_connections: u32,
    /// Requests waiting for a connection.
    pub waiting_requests: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_bands() {
        assert_eq!(HealthStatus::from_utilization(0.50), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_utilization(0.85), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_utilization(0.97), HealthStatus::Overloaded);
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(HealthStatus::from_utilization(0.79), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_utilization(0.80), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_utilization(0.81), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_utilization(0.94), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_utilization(0.95), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_utilization(0.96), HealthStatus::Overloaded);
    }

    #[test]
    fn test_accepts_traffic() {
        assert!(HealthStatus::Healthy.accepts_traffic());
        assert!(HealthStatus::Degraded.accepts_traffic());
        assert!(!HealthStatus::Overloaded.accepts_traffic());
        assert!(!HealthStatus::Unavailable.accepts_traffic());
    }
}
