//! Type-erased pool handle.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::health::PoolHealth;
use crate::lifecycle::ProtocolAdapter;
use crate::metrics::{PoolMetrics, PoolStatus};
use crate::pool::ConnectionPoolManager;
use crate::protocol::Protocol;

/// Protocol-independent view of a pool.
///
/// The factory stores pools of different adapter types side by side through
/// this trait, and the shutdown coordinator drains them through it.
#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    /// Protocol served by the pool.
    fn protocol(&self) -> Protocol;

    /// Metrics snapshot.
    fn metrics(&self) -> PoolMetrics;

    /// Health snapshot.
    fn health(&self) -> PoolHealth;

    /// Status snapshot.
    fn status(&self) -> PoolStatus;

    /// Configuration snapshot.
    fn config(&self) -> PoolConfig;

    /// Whether the pool has been destroyed.
    fn is_destroyed(&self) -> bool;

    /// Destroy the pool with its default budget.
    async fn destroy(&self) -> Result<(), PoolError>;

    /// Upcast for downcasting to the concrete pool type.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[async_trait]
impl<A: ProtocolAdapter> ManagedPool for ConnectionPoolManager<A> {
    fn protocol(&self) -> Protocol {
        ConnectionPoolManager::protocol(self)
    }

    fn metrics(&self) -> PoolMetrics {
        ConnectionPoolManager::metrics(self)
    }

    fn health(&self) -> PoolHealth {
        ConnectionPoolManager::health(self)
    }

    fn status(&self) -> PoolStatus {
        ConnectionPoolManager::status(self)
    }

    fn config(&self) -> PoolConfig {
        ConnectionPoolManager::config(self)
    }

    fn is_destroyed(&self) -> bool {
        ConnectionPoolManager::is_destroyed(self)
    }

    async fn destroy(&self) -> Result<(), PoolError> {
        ConnectionPoolManager::destroy(self).await
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Downcast a type-erased pool to its concrete manager.
///
/// Returns `None` if the pool was built with a different adapter type.
#[must_use]
pub fn downcast_pool<A: ProtocolAdapter>(
    pool: Arc<dyn ManagedPool>,
) -> Option<ConnectionPoolManager<A>> {
    pool.as_any()
        .downcast::<ConnectionPoolManager<A>>()
        .ok()
        .map(|manager| ConnectionPoolManager::clone(&manager))
}
