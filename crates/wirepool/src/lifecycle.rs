//! Connection lifecycle types and the protocol adapter contract.
//!
//! The pool engine is protocol-agnostic. Everything that depends on the wire
//! protocol (validation, health, teardown, active creation, transport event
//! wiring) is delegated to a [`ProtocolAdapter`].

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::AdapterError;
use crate::pool::ConnectionHandle;
use crate::protocol::Protocol;
use crate::queue::RequestOptions;

/// Identifier of a connection, unique within one pool instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Bookkeeping kept alongside every stored connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata<M> {
    /// Connection identifier.
    pub id: ConnectionId,
    /// When the connection entered the pool.
    pub created_at: Instant,
    /// Last checkout or release.
    pub last_used: Instant,
    /// `true` while idle, `false` while checked out.
    pub available: bool,
    /// Number of times the connection has been checked out.
    pub use_count: u64,
    /// Protocol-specific fields.
    pub protocol: M,
}

impl<M> ConnectionMetadata<M> {
    pub(crate) fn new(id: ConnectionId, now: Instant, protocol: M) -> Self {
        Self {
            id,
            created_at: now,
            last_used: now,
            available: true,
            use_count: 0,
            protocol,
        }
    }

    /// Time since the connection was last checked out or released.
    #[must_use]
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Time since the connection entered the pool.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub(crate) fn mark_in_use(&mut self, now: Instant) {
        self.available = false;
        self.use_count += 1;
        self.last_used = now;
    }

    pub(crate) fn mark_available(&mut self, now: Instant) {
        self.available = true;
        self.last_used = now;
    }
}

/// A connection checked out of the pool.
///
/// Cloning the handle does not check the connection out again; it must be
/// returned exactly once through
/// [`release_connection`](crate::pool::ConnectionPoolManager::release_connection).
#[derive(Debug)]
pub struct PooledConnection<C> {
    id: ConnectionId,
    connection: Arc<C>,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(id: ConnectionId, connection: Arc<C>) -> Self {
        Self { id, connection }
    }

    /// Identifier of the checked-out connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Shared reference to the underlying transport.
    #[must_use]
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }
}

impl<C> Clone for PooledConnection<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

/// A stored connection as seen by [`ProtocolAdapter::get_available_connection`].
pub struct ConnectionEntry<'a, A: ProtocolAdapter> {
    /// Connection identifier.
    pub id: ConnectionId,
    /// The transport.
    pub connection: &'a A::Connection,
    /// Its metadata.
    pub metadata: &'a ConnectionMetadata<A::Metadata>,
}

/// A connection produced by [`ProtocolAdapter::create_protocol_connection`].
pub struct CreatedConnection<A: ProtocolAdapter> {
    /// The new transport.
    pub connection: A::Connection,
    /// Initial protocol metadata.
    pub metadata: A::Metadata,
}

/// Protocol-specific hooks consumed by the pool engine.
///
/// One implementation exists per wire protocol. The engine never inspects a
/// connection itself; every decision that depends on transport state goes
/// through these hooks.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync + Sized + 'static {
    /// The transport object stored by the pool.
    type Connection: Send + Sync + 'static;

    /// Protocol-specific metadata kept with each connection.
    type Metadata: Clone + Default + fmt::Debug + Send + Sync + 'static;

    /// Protocol served by this adapter.
    fn protocol(&self) -> Protocol;

    /// Structural sanity check run before a connection is stored.
    fn validate_connection(&self, connection: &Self::Connection) -> bool;

    /// Protocol metadata for a passively accepted connection.
    fn initial_metadata(&self, _connection: &Self::Connection) -> Self::Metadata {
        Self::Metadata::default()
    }

    /// Protocol health predicate.
    fn is_healthy(
        &self,
        connection: &Self::Connection,
        metadata: &ConnectionMetadata<Self::Metadata>,
        config: &PoolConfig,
        now: Instant,
    ) -> bool;

    /// Whether the connection can take another unit of work.
    ///
    /// Multiplexed protocols use this to require spare stream capacity.
    fn has_spare_capacity(&self, _metadata: &ConnectionMetadata<Self::Metadata>) -> bool {
        true
    }

    /// Choose an idle, healthy connection to hand out.
    ///
    /// Entries are ordered oldest first. The default picks the first entry that
    /// is available, has spare capacity and passes [`Self::is_healthy`].
    fn get_available_connection(
        &self,
        entries: &[ConnectionEntry<'_, Self>],
        config: &PoolConfig,
        now: Instant,
    ) -> Option<ConnectionId> {
        entries
            .iter()
            .find(|entry| {
                entry.metadata.available
                    && self.has_spare_capacity(entry.metadata)
                    && self.is_healthy(entry.connection, entry.metadata, config, now)
            })
            .map(|entry| entry.id)
    }

    /// Protocol-correct teardown of a connection leaving the pool.
    async fn cleanup_connection(&self, connection: Arc<Self::Connection>)
    -> Result<(), AdapterError>;

    /// Actively create a connection for an acquisition.
    ///
    /// Server-side protocols whose connections are accepted passively return
    /// `Ok(None)`, which sends the request to the waiting queue.
    async fn create_protocol_connection(
        &self,
        _options: &RequestOptions,
        _config: &PoolConfig,
    ) -> Result<Option<CreatedConnection<Self>>, AdapterError> {
        Ok(None)
    }

    /// Wire transport callbacks (close, error, timeout, ping/pong) to the pool.
    fn setup_protocol_handlers(
        &self,
        _connection: &Arc<Self::Connection>,
        _handle: ConnectionHandle<Self>,
    ) {
    }
}
