//! Protocol registry and pool instance cache.
//!
//! The factory binds protocol names to pool constructors and memoizes one
//! pool per distinct `(protocol, config)` pair. Names are case-insensitive,
//! and known aliases (`h2`, `ws`, ...) resolve to their canonical protocol.

use std::sync::Arc;

use futures_util::future::join_all;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::adapters::{
    GrpcAdapter, Http2Adapter, Http3Adapter, HttpAdapter, HttpsAdapter, WebSocketAdapter,
};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ProtocolAdapter;
use crate::managed::{ManagedPool, downcast_pool};
use crate::metrics::PoolMetrics;
use crate::pool::ConnectionPoolManager;
use crate::protocol::Protocol;

/// Builds a pool from a configuration.
pub type PoolConstructor =
    Arc<dyn Fn(PoolConfig) -> Result<Arc<dyn ManagedPool>, PoolError> + Send + Sync>;

#[derive(Default)]
struct FactoryState {
    constructors: HashMap<String, PoolConstructor>,
    instances: HashMap<(String, String), Arc<dyn ManagedPool>>,
}

/// Registry of pool constructors with a per-configuration instance cache.
///
/// # Example
///
/// ```rust,ignore
/// use wirepool::{ConnectionPoolFactory, PoolConfig};
/// use wirepool::adapters::HttpAdapter;
///
/// let factory = ConnectionPoolFactory::with_default_adapters();
/// let pool = factory.create_typed::<HttpAdapter>("HTTP", PoolConfig::http())?;
///
/// // Same protocol and configuration: same pool.
/// let again = factory.create("http", PoolConfig::http())?;
/// assert_eq!(factory.len(), 1);
///
/// factory.destroy_all().await?;
/// ```
#[derive(Default)]
pub struct ConnectionPoolFactory {
    state: Mutex<FactoryState>,
}

impl ConnectionPoolFactory {
    /// Create an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with the six built-in adapters registered.
    ///
    /// Adapters are configured from the pool config's `protocol_specific`
    /// values where they have tunables.
    #[must_use]
    pub fn with_default_adapters() -> Self {
        let factory = Self::new();
        factory.register_adapter(Protocol::Http.as_str(), |_| <HttpAdapter>::new());
        factory.register_adapter(Protocol::Https.as_str(), <HttpsAdapter>::from_config);
        factory.register_adapter(Protocol::Http2.as_str(), <Http2Adapter>::from_config);
        factory.register_adapter(Protocol::Http3.as_str(), <Http3Adapter>::from_config);
        factory.register_adapter(Protocol::WebSocket.as_str(), |_| <WebSocketAdapter>::new());
        factory.register_adapter(Protocol::Grpc.as_str(), |_| <GrpcAdapter>::new());
        factory
    }

    /// Register a constructor under `name`, replacing any previous one.
    pub fn register<F>(&self, name: &str, constructor: F)
    where
        F: Fn(PoolConfig) -> Result<Arc<dyn ManagedPool>, PoolError> + Send + Sync + 'static,
    {
        let key = normalize(name);
        tracing::debug!(protocol = %key, "pool constructor registered");
        self.state
            .lock()
            .constructors
            .insert(key, Arc::new(constructor));
    }

    /// Register an adapter type under `name`.
    ///
    /// `make_adapter` receives the pool's configuration.
    pub fn register_adapter<A, F>(&self, name: &str, make_adapter: F)
    where
        A: ProtocolAdapter,
        F: Fn(&PoolConfig) -> A + Send + Sync + 'static,
    {
        self.register(name, move |config| {
            let pool = ConnectionPoolManager::new(make_adapter(&config), config)?;
            Ok(Arc::new(pool) as Arc<dyn ManagedPool>)
        });
    }

    /// Whether a constructor is registered under `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.state.lock().constructors.contains_key(&normalize(name))
    }

    /// Get or build the pool for `(name, config)`.
    ///
    /// Configurations with equal contents share one instance. Destroyed
    /// instances are replaced.
    pub fn create(&self, name: &str, config: PoolConfig) -> Result<Arc<dyn ManagedPool>, PoolError> {
        let protocol = normalize(name);
        let key = (protocol.clone(), config.cache_key());

        let mut state = self.state.lock();
        if let Some(pool) = state.instances.get(&key) {
            if !pool.is_destroyed() {
                return Ok(Arc::clone(pool));
            }
        }

        let constructor = state
            .constructors
            .get(&protocol)
            .cloned()
            .ok_or_else(|| PoolError::UnknownProtocol(name.to_string()))?;
        let pool = constructor(config)?;
        tracing::debug!(protocol = %protocol, "pool instance created");
        state.instances.insert(key, Arc::clone(&pool));
        Ok(pool)
    }

    /// Like [`create`](Self::create), returning the concrete pool type.
    pub fn create_typed<A: ProtocolAdapter>(
        &self,
        name: &str,
        config: PoolConfig,
    ) -> Result<ConnectionPoolManager<A>, PoolError> {
        let pool = self.create(name, config)?;
        downcast_pool::<A>(pool).ok_or_else(|| PoolError::AdapterMismatch(normalize(name)))
    }

    /// Destroy and evict every instance registered under `name`.
    ///
    /// Returns the number of instances destroyed, or the first teardown
    /// error after every instance has been destroyed.
    pub async fn destroy(&self, name: &str) -> Result<usize, PoolError> {
        let protocol = normalize(name);
        let evicted = {
            let mut state = self.state.lock();
            let keys: Vec<(String, String)> = state
                .instances
                .keys()
                .filter(|(instance_protocol, _)| *instance_protocol == protocol)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| state.instances.remove(&key))
                .collect::<Vec<_>>()
        };
        destroy_pools(evicted).await
    }

    /// Destroy and evict every instance.
    pub async fn destroy_all(&self) -> Result<usize, PoolError> {
        let evicted: Vec<Arc<dyn ManagedPool>> = self
            .state
            .lock()
            .instances
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        destroy_pools(evicted).await
    }

    /// Metrics of every live instance.
    #[must_use]
    pub fn get_all_metrics(&self) -> Vec<PoolMetrics> {
        let mut metrics: Vec<PoolMetrics> = self
            .pools()
            .iter()
            .filter(|pool| !pool.is_destroyed())
            .map(|pool| pool.metrics())
            .collect();
        metrics.sort_by_key(|m| m.protocol);
        metrics
    }

    /// Every cached instance.
    #[must_use]
    pub fn pools(&self) -> Vec<Arc<dyn ManagedPool>> {
        self.state.lock().instances.values().cloned().collect()
    }

    /// Number of cached instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().instances.len()
    }

    /// Whether no instances are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().instances.is_empty()
    }
}

impl std::fmt::Debug for ConnectionPoolFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionPoolFactory")
            .field("registered", &state.constructors.len())
            .field("instances", &state.instances.len())
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.parse::<Protocol>()
        .map(|protocol| protocol.as_str().to_string())
        .unwrap_or_else(|_| name.trim().to_ascii_lowercase())
}

async fn destroy_pools(pools: Vec<Arc<dyn ManagedPool>>) -> Result<usize, PoolError> {
    let count = pools.len();
    let results = join_all(pools.iter().map(|pool| pool.destroy())).await;
    let mut first_error = None;
    for (pool, result) in pools.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!(protocol = %pool.protocol(), error = %e, "pool teardown failed");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(count),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapters::Http2Session;

    #[tokio::test]
    async fn test_create_memoizes_per_config() {
        let factory = ConnectionPoolFactory::with_default_adapters();

        let a = factory.create("HTTP", PoolConfig::http()).unwrap();
        let b = factory.create("http", PoolConfig::http()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = factory
            .create("http", PoolConfig::http().max_connections(10))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(factory.len(), 2);
    }

    #[tokio::test]
    async fn test_aliases_resolve_to_protocol() {
        let factory = ConnectionPoolFactory::with_default_adapters();
        let pool = factory.create("H2", PoolConfig::http2()).unwrap();
        assert_eq!(pool.protocol(), Protocol::Http2);

        let again = factory.create("http2", PoolConfig::http2()).unwrap();
        assert!(Arc::ptr_eq(&pool, &again));
        assert!(factory.is_registered("WS"));
    }

    #[test]
    fn test_unknown_protocol() {
        let factory = ConnectionPoolFactory::with_default_adapters();
        let err = factory.create("smtp", PoolConfig::http()).err().unwrap();
        assert!(matches!(err, PoolError::UnknownProtocol(name) if name == "smtp"));
        assert!(!factory.is_registered("smtp"));
    }

    #[test]
    fn test_invalid_config_is_not_cached() {
        let factory = ConnectionPoolFactory::with_default_adapters();
        let result = factory.create("grpc", PoolConfig::grpc().max_connections(0));
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
        assert!(factory.is_empty());
    }

    #[tokio::test]
    async fn test_create_typed() {
        let factory = ConnectionPoolFactory::with_default_adapters();
        let pool = factory
            .create_typed::<Http2Adapter>("http2", PoolConfig::http2())
            .unwrap();
        assert_eq!(pool.protocol(), Protocol::Http2);

        let mismatch = factory.create_typed::<HttpAdapter>("http2", PoolConfig::http2());
        assert!(matches!(mismatch, Err(PoolError::AdapterMismatch(name)) if name == "http2"));

        let boxed = factory
            .create_typed::<Http2Adapter<Box<dyn Http2Session>>>("h2", PoolConfig::http2())
            .unwrap();
        assert_eq!(boxed.config(), pool.config());
    }

    #[tokio::test]
    async fn test_destroy_evicts_only_protocol() {
        let factory = ConnectionPoolFactory::with_default_adapters();
        let http = factory.create("http", PoolConfig::http()).unwrap();
        factory
            .create("http", PoolConfig::http().max_connections(5))
            .unwrap();
        factory.create("grpc", PoolConfig::grpc()).unwrap();

        assert_eq!(factory.destroy("HTTP").await.unwrap(), 2);
        assert!(http.is_destroyed());
        assert_eq!(factory.len(), 1);

        let metrics = factory.get_all_metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].protocol, Protocol::Grpc);

        assert_eq!(factory.destroy_all().await.unwrap(), 1);
        assert!(factory.is_empty());
        assert!(factory.get_all_metrics().is_empty());
    }

    #[tokio::test]
    async fn test_destroyed_instance_is_replaced() {
        let factory = ConnectionPoolFactory::with_default_adapters();
        let first = factory.create("websocket", PoolConfig::websocket()).unwrap();
        first.destroy().await.unwrap();

        let second = factory.create("websocket", PoolConfig::websocket()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_destroyed());
    }

    #[test]
    fn test_register_custom_constructor() {
        let factory = ConnectionPoolFactory::new();
        assert!(!factory.is_registered("http"));

        factory.register_adapter("Edge", |_| <HttpAdapter>::new());
        assert!(factory.is_registered("edge"));
        let pool = factory.create("EDGE", PoolConfig::http()).unwrap();
        assert_eq!(pool.protocol(), Protocol::Http);
    }
}
