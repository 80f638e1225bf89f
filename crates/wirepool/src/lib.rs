//! # wirepool
//!
//! Protocol-agnostic connection pool engine for network servers.
//!
//! A single pool engine stores connections of one wire protocol, enforces a
//! hard capacity limit, queues acquisitions by priority with per-request
//! timeouts, and tracks health, metrics and lifecycle events. Everything
//! protocol-specific (validation, health, teardown, event wiring) lives in a
//! [`ProtocolAdapter`].
//!
//! ## Features
//!
//! - Fail-fast admission: acquisitions beyond `max_connections` are refused
//!   immediately instead of queueing
//! - Priority waiting queue (`High` > `Normal` > `Low`, FIFO within a class)
//! - Adapters for HTTP/1.1, HTTPS, HTTP/2, HTTP/3, WebSocket and gRPC
//! - Health derived from utilization and the adapter's health predicate
//! - Typed lifecycle events with listener isolation
//! - Latency percentiles over a rolling window
//! - A [`ConnectionPoolFactory`] that memoizes one pool per protocol and config
//! - Bounded graceful destruction
//!
//! ## Example
//!
//! ```rust,ignore
//! use wirepool::{ConnectionPoolManager, ReleaseOptions, RequestOptions};
//! use wirepool::adapters::HttpAdapter;
//! use std::time::Duration;
//!
//! let pool = ConnectionPoolManager::builder(HttpAdapter::new())
//!     .max_connections(256)
//!     .request_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! // Hand accepted sockets to the pool.
//! pool.add_connection(socket);
//!
//! // Borrow one for a request.
//! let acquisition = pool.request_connection(RequestOptions::new()).await;
//! let conn = acquisition.into_result()?;
//! // Use connection...
//! pool.release_connection(conn.id(), ReleaseOptions::new()).await;
//!
//! let health = pool.health();
//! println!("pool is {}", health.status);
//!
//! pool.destroy().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod event;
pub mod factory;
pub mod health;
pub mod instrumentation;
pub mod lifecycle;
pub mod managed;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod queue;

// Configuration
pub use config::{PoolConfig, PoolConfigUpdate};

// Error types
pub use error::{AdapterError, ListenerError, PoolError};

// Events
pub use event::{EventBus, Listener, ListenerId, PoolEvent, PoolEventKind, RemovalReason};

// Factory
pub use factory::{ConnectionPoolFactory, PoolConstructor};

// Health
pub use health::{HealthStatus, PoolHealth};

// Lifecycle management
pub use lifecycle::{
    ConnectionEntry, ConnectionId, ConnectionMetadata, CreatedConnection, PooledConnection,
    ProtocolAdapter,
};

// Pool types
pub use managed::{ManagedPool, downcast_pool};
pub use metrics::{PoolMetrics, PoolStatus};
pub use pool::{
    Acquisition, ConnectionHandle, ConnectionPoolManager, PoolBuilder, ReleaseOptions,
};
pub use protocol::Protocol;
pub use queue::{Priority, RequestOptions};
