//! Connection pool engine.
//!
//! This module provides the protocol-agnostic pool: admission control under
//! `max_connections`, reuse of idle connections, a priority-ordered waiting
//! queue with per-request timeouts, health tracking, and bounded shutdown.
//! Everything protocol-specific is delegated to a [`ProtocolAdapter`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{PoolConfig, PoolConfigUpdate};
use crate::error::{ListenerError, PoolError};
use crate::event::{EventBus, ListenerId, PoolEvent, PoolEventKind, RemovalReason};
use crate::health::{HealthStatus, PoolHealth};
use crate::instrumentation::span_names;
use crate::lifecycle::{
    ConnectionEntry, ConnectionId, ConnectionMetadata, CreatedConnection, PooledConnection,
    ProtocolAdapter,
};
use crate::metrics::{MetricsRecorder, PoolMetrics, PoolStatus};
use crate::protocol::Protocol;
use crate::queue::{Priority, RequestOptions, WaitingQueue};

/// Cadence of the background health refresh.
pub const HEALTH_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Cadence of the background idle-connection sweep.
pub const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Budget used by [`ConnectionPoolManager::destroy`].
pub const DEFAULT_DESTROY_TIMEOUT: Duration = Duration::from_secs(10);

type Waiter<C> = oneshot::Sender<Result<PooledConnection<C>, PoolError>>;

/// Outcome of [`ConnectionPoolManager::request_connection`].
///
/// Capacity exhaustion and timeouts are reported here rather than raised,
/// so callers always branch on [`Acquisition::is_success`] or the outcome.
#[derive(Debug)]
pub struct Acquisition<C> {
    /// The checked-out connection, or why none was handed out.
    pub outcome: Result<PooledConnection<C>, PoolError>,
    /// Time between the request and its resolution.
    pub wait_time: Duration,
}

impl<C> Acquisition<C> {
    /// Whether a connection was handed out.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The checked-out connection, if any.
    #[must_use]
    pub fn connection(&self) -> Option<&PooledConnection<C>> {
        self.outcome.as_ref().ok()
    }

    /// Identifier of the checked-out connection, if any.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection().map(PooledConnection::id)
    }

    /// The failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&PoolError> {
        self.outcome.as_ref().err()
    }

    /// Convert into a plain `Result`.
    pub fn into_result(self) -> Result<PooledConnection<C>, PoolError> {
        self.outcome
    }
}

/// Options for [`ConnectionPoolManager::release_connection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// Tear the connection down instead of returning it to the idle set.
    pub destroy: bool,
    /// The request failed; the connection is torn down and the message
    /// recorded as the removal reason.
    pub error: Option<String>,
}

impl ReleaseOptions {
    /// Return the connection to the idle set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear the connection down on release.
    #[must_use]
    pub fn destroyed() -> Self {
        Self {
            destroy: true,
            error: None,
        }
    }

    /// Tear the connection down because of an error.
    #[must_use]
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            destroy: false,
            error: Some(error.into()),
        }
    }

    fn removal_reason(self) -> Option<RemovalReason> {
        match self.error {
            Some(error) => Some(RemovalReason::Error(error)),
            None if self.destroy => Some(RemovalReason::Released),
            None => None,
        }
    }
}

/// A protocol-agnostic connection pool.
///
/// The pool stores connections handed to it by a protocol listener
/// (passive acceptance) or created by its adapter (active creation), and
/// serves acquisitions from them.
///
/// # Features
///
/// - Fail-fast admission control at `max_connections`
/// - Reuse of idle, healthy connections chosen by the adapter
/// - Priority-ordered waiting queue with per-request timeouts
/// - Health classification with change events for load shedding
/// - Background health refresh and idle sweep
/// - Bounded, idempotent shutdown
///
/// The manager is cheap to clone; clones share the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use wirepool::{ConnectionPoolManager, PoolConfig, ReleaseOptions, RequestOptions};
/// use wirepool::adapters::HttpAdapter;
///
/// let pool = ConnectionPoolManager::builder(HttpAdapter::new())
///     .config(PoolConfig::http().max_connections(512))
///     .build()?;
///
/// // The listener hands accepted sockets to the pool.
/// pool.add_connection(socket);
///
/// let acquisition = pool.request_connection(RequestOptions::new()).await;
/// if let Ok(conn) = acquisition.into_result() {
///     // Serve the request...
///     pool.release_connection(conn.id(), ReleaseOptions::new()).await;
/// }
/// ```
pub struct ConnectionPoolManager<A: ProtocolAdapter> {
    inner: Arc<PoolInner<A>>,
}

impl<A: ProtocolAdapter> Clone for ConnectionPoolManager<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: ProtocolAdapter> fmt::Debug for ConnectionPoolManager<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionPoolManager")
            .field("protocol", &self.inner.protocol)
            .field("active", &state.connections.len())
            .field("waiting", &state.waiting.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

impl<A: ProtocolAdapter> ConnectionPoolManager<A> {
    /// Create a new pool builder for `adapter`.
    #[must_use]
    pub fn builder(adapter: A) -> PoolBuilder<A> {
        PoolBuilder::new(adapter)
    }

    /// Create a pool with the given configuration.
    ///
    /// For more control over pool creation, use [`ConnectionPoolManager::builder()`].
    pub fn new(adapter: A, config: PoolConfig) -> Result<Self, PoolError> {
        PoolBuilder::new(adapter).config(config).build()
    }

    /// Protocol served by this pool.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.inner.protocol
    }

    /// The adapter driving this pool.
    #[must_use]
    pub fn adapter(&self) -> &A {
        &self.inner.adapter
    }

    /// Acquire a connection.
    ///
    /// In order: fail fast when the pool already stores `max_connections`
    /// connections, reuse an idle connection chosen by the adapter, ask the
    /// adapter to create one, and finally wait in the priority queue until a
    /// connection is released or the timeout fires.
    pub async fn request_connection(&self, options: RequestOptions) -> Acquisition<A::Connection> {
        let span = tracing::debug_span!(
            span_names::ACQUIRE,
            protocol = %self.inner.protocol,
            priority = %options.priority
        );
        self.inner.request_connection(options).instrument(span).await
    }

    /// Return a checked-out connection.
    ///
    /// With [`ReleaseOptions::destroy`] or an error the connection is torn
    /// down and removed; otherwise it becomes available for reuse. Either way
    /// the waiting queue is drained before this returns. Returns `false` if
    /// the connection is unknown or was not checked out.
    pub async fn release_connection(&self, id: ConnectionId, options: ReleaseOptions) -> bool {
        let span = tracing::trace_span!(span_names::RELEASE, connection_id = %id);
        match options.removal_reason() {
            Some(reason) => {
                self.inner
                    .remove_connection(id, reason)
                    .instrument(span)
                    .await
            }
            None => span.in_scope(|| self.inner.mark_released(id)),
        }
    }

    /// Store a connection with explicit protocol metadata.
    ///
    /// Returns `None` if the adapter rejects the connection, the pool is
    /// destroyed, or the pool already stores `max_connections` connections.
    pub fn register_connection(
        &self,
        connection: impl Into<Arc<A::Connection>>,
        metadata: A::Metadata,
    ) -> Option<ConnectionId> {
        self.inner.store(connection.into(), metadata, true)
    }

    /// Store a passively accepted connection.
    ///
    /// Protocol metadata comes from [`ProtocolAdapter::initial_metadata`].
    /// Unlike [`register_connection`](Self::register_connection) this path
    /// is not capacity gated, so listeners never drop accepted connections;
    /// the stored count may then exceed `max_connections` while new
    /// acquisitions are refused.
    pub fn add_connection(&self, connection: impl Into<Arc<A::Connection>>) -> Option<ConnectionId> {
        let connection = connection.into();
        let metadata = self.inner.adapter.initial_metadata(&connection);
        self.inner.store(connection, metadata, false)
    }

    /// Remove a connection and run the adapter teardown.
    ///
    /// Bookkeeping is updated before the teardown runs; teardown failures are
    /// logged. Returns `false` if the connection is not stored.
    pub async fn remove_connection(&self, id: ConnectionId, reason: RemovalReason) -> bool {
        let span = tracing::debug_span!(span_names::REMOVE, connection_id = %id, reason = %reason);
        self.inner
            .remove_connection(id, reason)
            .instrument(span)
            .await
    }

    /// Whether a new acquisition would pass admission control.
    #[must_use]
    pub fn can_accept_connection(&self) -> bool {
        let state = self.inner.state.lock();
        !state.destroyed && state.connections.len() < state.config.max_connections as usize
    }

    /// Number of stored connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Number of checked-out connections.
    #[must_use]
    pub fn in_use_connections(&self) -> usize {
        self.inner.state.lock().in_use()
    }

    /// Number of queued acquisitions.
    #[must_use]
    pub fn waiting_requests(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    /// Metadata snapshot for a stored connection.
    #[must_use]
    pub fn connection_metadata(&self, id: ConnectionId) -> Option<ConnectionMetadata<A::Metadata>> {
        self.inner
            .state
            .lock()
            .connections
            .get(&id)
            .map(|entry| entry.metadata.clone())
    }

    /// Current health, classified from utilization.
    #[must_use]
    pub fn health(&self) -> PoolHealth {
        self.inner.state.lock().health_snapshot()
    }

    /// Re-classify health and emit `HEALTH_STATUS_CHANGED` on a transition.
    pub fn update_health_status(&self) -> PoolHealth {
        self.inner.update_health_status()
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let total = state.connections.len();
        let in_use = state.in_use();
        PoolStatus {
            available: total - in_use,
            in_use,
            total,
            waiting: state.waiting.len(),
            max: state.config.max_connections,
        }
    }

    /// Record a request latency sample.
    pub fn record_latency(&self, latency: Duration) {
        self.inner.state.lock().metrics.record_latency(latency);
    }

    /// Apply a partial configuration change.
    ///
    /// The merged configuration is validated first; on failure nothing
    /// changes and `false` is returned.
    pub fn update_config(&self, update: &PoolConfigUpdate) -> bool {
        self.inner.update_config(update)
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.state.lock().config.clone()
    }

    /// Register an event listener.
    pub fn on<F>(&self, kind: PoolEventKind, listener: F) -> ListenerId
    where
        F: Fn(&PoolEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    /// Unregister an event listener.
    pub fn off(&self, kind: PoolEventKind, id: ListenerId) -> bool {
        self.inner.events.off(kind, id)
    }

    /// Remove idle or unhealthy available connections.
    ///
    /// An available connection is swept when it has been idle longer than
    /// `connection_timeout` or fails the adapter's health predicate. Returns
    /// the number of connections removed.
    pub async fn sweep_idle_connections(&self) -> usize {
        let span = tracing::trace_span!(span_names::SWEEP, protocol = %self.inner.protocol);
        self.inner.sweep_idle_connections().instrument(span).await
    }

    /// Destroy the pool with the default budget.
    ///
    /// See [`destroy_with_timeout`](Self::destroy_with_timeout).
    pub async fn destroy(&self) -> Result<(), PoolError> {
        self.destroy_with_timeout(DEFAULT_DESTROY_TIMEOUT).await
    }

    /// Destroy the pool.
    ///
    /// Every queued acquisition resolves with [`PoolError::Destroyed`], every
    /// connection is removed and torn down, and listeners are cleared.
    /// Teardown races `budget`; if it loses, bookkeeping is still complete
    /// and [`PoolError::ShutdownTimeout`] is returned. Calling this again is
    /// a no-op that returns `Ok(())`.
    pub async fn destroy_with_timeout(&self, budget: Duration) -> Result<(), PoolError> {
        let span = tracing::info_span!(span_names::DESTROY, protocol = %self.inner.protocol);
        self.inner.destroy(budget).instrument(span).await
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = ConnectionPoolManager::builder(Http2Adapter::new())
///     .max_connections(64)
///     .request_timeout(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct PoolBuilder<A: ProtocolAdapter> {
    adapter: A,
    config: PoolConfig,
    background_tasks: bool,
}

impl<A: ProtocolAdapter> PoolBuilder<A> {
    /// Create a builder using the adapter protocol's default configuration.
    pub fn new(adapter: A) -> Self {
        let config = PoolConfig::for_protocol(adapter.protocol());
        Self {
            adapter,
            config,
            background_tasks: true,
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the default acquisition timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Enable or disable the background health refresh and idle sweep.
    ///
    /// Background tasks are only started when a tokio runtime is present.
    #[must_use]
    pub fn background_tasks(mut self, enabled: bool) -> Self {
        self.background_tasks = enabled;
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<ConnectionPoolManager<A>, PoolError> {
        self.config.validate()?;

        let protocol = self.adapter.protocol();
        tracing::info!(
            protocol = %protocol,
            max = self.config.max_connections,
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            protocol,
            adapter: self.adapter,
            state: Mutex::new(PoolState::new(protocol, self.config)),
            events: EventBus::new(),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            shutdown: CancellationToken::new(),
        });

        if self.background_tasks {
            PoolInner::spawn_maintenance(&inner);
        }

        Ok(ConnectionPoolManager { inner })
    }
}

/// A weak reference from a transport callback back to its pool entry.
///
/// Adapters receive one per stored connection through
/// [`ProtocolAdapter::setup_protocol_handlers`]. The handle never keeps the
/// pool alive; once the pool or the entry is gone every method is a no-op.
pub struct ConnectionHandle<A: ProtocolAdapter> {
    pool: Weak<PoolInner<A>>,
    id: ConnectionId,
}

impl<A: ProtocolAdapter> Clone for ConnectionHandle<A> {
    fn clone(&self) -> Self {
        Self {
            pool: Weak::clone(&self.pool),
            id: self.id,
        }
    }
}

impl<A: ProtocolAdapter> fmt::Debug for ConnectionHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<A: ProtocolAdapter> ConnectionHandle<A> {
    /// The connection this handle refers to.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the connection is still stored in a live pool.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.pool
            .upgrade()
            .is_some_and(|pool| pool.state.lock().connections.contains_key(&self.id))
    }

    /// Mutate the connection's metadata. Returns `false` if it is gone.
    pub fn update_metadata<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut ConnectionMetadata<A::Metadata>),
    {
        let Some(pool) = self.pool.upgrade() else {
            return false;
        };
        let mut state = pool.state.lock();
        if let Some(entry) = state.connections.get_mut(&self.id) {
            update(&mut entry.metadata);
            return true;
        }
        false
    }

    /// Refresh `last_used`, e.g. on transport activity.
    pub fn touch(&self) -> bool {
        self.update_metadata(|metadata| metadata.last_used = Instant::now())
    }

    /// Record a transport error and emit `CONNECTION_ERROR`.
    pub fn report_error(&self, error: impl Into<String>) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let error = error.into();
        pool.state.lock().metrics.connection_errors += 1;
        tracing::debug!(connection_id = %self.id, error = %error, "transport error reported");
        pool.emit_all(&[PoolEvent::ConnectionError {
            protocol: pool.protocol,
            id: self.id,
            error,
        }]);
    }

    /// Emit `CONNECTION_TIMEOUT`.
    pub fn report_timeout(&self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        tracing::debug!(connection_id = %self.id, "transport timeout reported");
        pool.emit_all(&[PoolEvent::ConnectionTimeout {
            protocol: pool.protocol,
            id: self.id,
        }]);
    }

    /// Remove the connection from its pool.
    ///
    /// Bookkeeping happens immediately; the adapter teardown is spawned on
    /// the current tokio runtime. Returns `false` if the connection was
    /// already gone.
    pub fn remove(&self, reason: RemovalReason) -> bool {
        let Some(pool) = self.pool.upgrade() else {
            return false;
        };
        let Some(connection) = pool.detach(self.id, reason) else {
            return false;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    pool.cleanup(id, connection).await;
                });
            }
            Err(_) => {
                tracing::debug!(connection_id = %id, "no tokio runtime, skipping connection teardown");
            }
        }
        true
    }
}

struct PoolInner<A: ProtocolAdapter> {
    adapter: A,
    protocol: Protocol,
    state: Mutex<PoolState<A>>,
    events: EventBus,
    next_connection_id: AtomicU64,
    created_at: Instant,
    shutdown: CancellationToken,
}

enum Admission<C> {
    Reused(PooledConnection<C>),
    Create(PoolConfig),
}

type WaiterReceiver<C> = oneshot::Receiver<Result<PooledConnection<C>, PoolError>>;

enum Enqueued<C> {
    Reused(PooledConnection<C>),
    Waiting(u64, WaiterReceiver<C>),
}

/// A queued acquisition. Dropped before it settles, it gives back anything
/// already delivered to it.
struct PendingWaiter<A: ProtocolAdapter> {
    pool: Arc<PoolInner<A>>,
    waiter_id: u64,
    receiver: WaiterReceiver<A::Connection>,
    settled: bool,
}

impl<A: ProtocolAdapter> Drop for PendingWaiter<A> {
    fn drop(&mut self) {
        if !self.settled {
            self.pool.abandon_waiter(self.waiter_id, &mut self.receiver);
        }
    }
}

impl<A: ProtocolAdapter> PoolInner<A> {
    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    fn handle(self: &Arc<Self>, id: ConnectionId) -> ConnectionHandle<A> {
        ConnectionHandle {
            pool: Arc::downgrade(self),
            id,
        }
    }

    fn emit_all(&self, events: &[PoolEvent]) {
        for event in events {
            self.events.emit(event);
        }
    }

    fn spawn_maintenance(inner: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                protocol = %inner.protocol,
                "no tokio runtime, background maintenance disabled"
            );
            return;
        };

        let pool = Arc::downgrade(inner);
        let shutdown = inner.shutdown.clone();
        runtime.spawn(async move {
            let start = Instant::now();
            let mut health = tokio::time::interval_at(
                start + HEALTH_REFRESH_INTERVAL,
                HEALTH_REFRESH_INTERVAL,
            );
            let mut sweep =
                tokio::time::interval_at(start + IDLE_SWEEP_INTERVAL, IDLE_SWEEP_INTERVAL);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = health.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.update_health_status();
                    }
                    _ = sweep.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.sweep_idle_connections().await;
                    }
                }
            }
            tracing::trace!("pool maintenance stopped");
        });
    }

    async fn request_connection(
        self: &Arc<Self>,
        options: RequestOptions,
    ) -> Acquisition<A::Connection> {
        let started = Instant::now();
        let outcome = self.acquire(&options, started).await;
        let wait_time = started.elapsed();

        {
            let mut state = self.state.lock();
            state.metrics.requests_total += 1;
            match &outcome {
                Ok(_) => state.metrics.record_wait(wait_time),
                Err(e) => {
                    state.metrics.requests_failed += 1;
                    if e.is_timeout() {
                        state.metrics.acquisition_timeouts += 1;
                    }
                }
            }
        }

        match &outcome {
            Ok(pooled) => tracing::trace!(connection_id = %pooled.id(), ?wait_time, "connection acquired"),
            Err(e) => tracing::debug!(error = %e, ?wait_time, "acquisition failed"),
        }

        Acquisition { outcome, wait_time }
    }

    async fn acquire(
        self: &Arc<Self>,
        options: &RequestOptions,
        started: Instant,
    ) -> Result<PooledConnection<A::Connection>, PoolError> {
        let config = match self.admit()? {
            Admission::Reused(pooled) => return Ok(pooled),
            Admission::Create(config) => config,
        };

        match self.adapter.create_protocol_connection(options, &config).await {
            Ok(Some(created)) => return self.adopt_created(created).await,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(protocol = %self.protocol, error = %e, "protocol connection creation failed");
                return Err(PoolError::ProtocolCreation(e.to_string()));
            }
        }

        // The creation hook may have suspended; re-check reuse before queueing.
        let mut pending = match self.enqueue(options.priority)? {
            Enqueued::Reused(pooled) => return Ok(pooled),
            Enqueued::Waiting(waiter_id, receiver) => PendingWaiter {
                pool: Arc::clone(self),
                waiter_id,
                receiver,
                settled: false,
            },
        };

        let timeout = options.timeout.unwrap_or(config.request_timeout);
        tracing::debug!(priority = %options.priority, ?timeout, "acquisition queued");

        let outcome = match tokio::time::timeout(timeout, &mut pending.receiver).await {
            Ok(delivered) => delivered.unwrap_or(Err(PoolError::Destroyed)),
            Err(_) => {
                if self.cancel_waiter(pending.waiter_id) {
                    Err(PoolError::AcquisitionTimeout {
                        waited: started.elapsed(),
                    })
                } else {
                    // Fulfilled between the timer firing and the queue lock.
                    (&mut pending.receiver)
                        .await
                        .unwrap_or(Err(PoolError::Destroyed))
                }
            }
        };
        pending.settled = true;
        outcome
    }

    fn admit(&self) -> Result<Admission<A::Connection>, PoolError> {
        let mut events = Vec::new();
        let admission = self
            .state
            .lock()
            .admit(&self.adapter, Instant::now(), &mut events);
        self.emit_all(&events);
        admission
    }

    fn enqueue(&self, priority: Priority) -> Result<Enqueued<A::Connection>, PoolError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(PoolError::Destroyed);
        }
        let now = Instant::now();
        if let Some(pooled) = state.try_checkout(&self.adapter, now) {
            return Ok(Enqueued::Reused(pooled));
        }
        let (sender, receiver) = oneshot::channel();
        let id = state.waiting.push(priority, now, sender);
        Ok(Enqueued::Waiting(id, receiver))
    }

    fn cancel_waiter(&self, waiter_id: u64) -> bool {
        self.state.lock().waiting.remove(waiter_id).is_some()
    }

    /// Withdraw a queued request whose caller stopped waiting.
    ///
    /// A connection handed over before the receiver closed is returned to
    /// the pool and offered to the next waiter.
    fn abandon_waiter(&self, waiter_id: u64, receiver: &mut WaiterReceiver<A::Connection>) {
        receiver.close();
        let mut state = self.state.lock();
        state.waiting.remove(waiter_id);
        if let Ok(Ok(pooled)) = receiver.try_recv() {
            let now = Instant::now();
            tracing::debug!(connection_id = %pooled.id(), "returning connection from abandoned acquisition");
            state.mark_available(pooled.id(), now);
            state.drain_waiters(&self.adapter, now);
        }
    }

    async fn adopt_created(
        self: &Arc<Self>,
        created: CreatedConnection<A>,
    ) -> Result<PooledConnection<A::Connection>, PoolError> {
        let id = self.next_connection_id();
        let connection = Arc::new(created.connection);

        if !self.adapter.validate_connection(&connection) {
            self.cleanup(id, connection).await;
            return Err(PoolError::Validation(format!(
                "created {} connection failed validation",
                self.protocol
            )));
        }

        match self.store_created(id, Arc::clone(&connection), created.metadata) {
            Ok(pooled) => {
                tracing::debug!(connection_id = %id, "protocol connection created");
                self.adapter
                    .setup_protocol_handlers(&connection, self.handle(id));
                Ok(pooled)
            }
            Err(e) => {
                self.cleanup(id, connection).await;
                Err(e)
            }
        }
    }

    fn store_created(
        &self,
        id: ConnectionId,
        connection: Arc<A::Connection>,
        metadata: A::Metadata,
    ) -> Result<PooledConnection<A::Connection>, PoolError> {
        let mut events = Vec::new();
        let stored = {
            let mut state = self.state.lock();
            if state.destroyed {
                Err(PoolError::Destroyed)
            } else if state.at_capacity() {
                Err(state.limit_reached(&mut events))
            } else {
                let now = Instant::now();
                let mut metadata = ConnectionMetadata::new(id, now, metadata);
                metadata.mark_in_use(now);
                state.insert(metadata, Arc::clone(&connection), &mut events);
                Ok(PooledConnection::new(id, connection))
            }
        };
        self.emit_all(&events);
        stored
    }

    fn store(
        self: &Arc<Self>,
        connection: Arc<A::Connection>,
        metadata: A::Metadata,
        gated: bool,
    ) -> Option<ConnectionId> {
        if !self.adapter.validate_connection(&connection) {
            tracing::debug!(protocol = %self.protocol, "connection rejected by adapter validation");
            return None;
        }

        let id = self.next_connection_id();
        let mut events = Vec::new();
        let stored = {
            let mut state = self.state.lock();
            let admitted = !state.destroyed && !(gated && state.at_capacity());
            if admitted {
                let metadata = ConnectionMetadata::new(id, Instant::now(), metadata);
                state.insert(metadata, Arc::clone(&connection), &mut events);
            }
            admitted
        };
        if !stored {
            tracing::debug!(protocol = %self.protocol, "connection refused");
            return None;
        }

        self.emit_all(&events);
        self.adapter
            .setup_protocol_handlers(&connection, self.handle(id));
        self.drain_waiting();
        Some(id)
    }

    fn drain_waiting(&self) {
        let served = self
            .state
            .lock()
            .drain_waiters(&self.adapter, Instant::now());
        if served > 0 {
            tracing::trace!(served, "served queued acquisitions");
        }
    }

    fn mark_released(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let Some(entry) = state.connections.get_mut(&id) else {
            tracing::debug!(connection_id = %id, "release of unknown connection");
            return false;
        };
        if entry.metadata.available {
            tracing::debug!(connection_id = %id, "release of connection that was not checked out");
            return false;
        }
        entry.metadata.mark_available(now);
        state.drain_waiters(&self.adapter, now);
        true
    }

    fn detach(&self, id: ConnectionId, reason: RemovalReason) -> Option<Arc<A::Connection>> {
        let mut events = Vec::new();
        let connection = {
            let mut state = self.state.lock();
            let connection = state.detach(id, reason, &mut events)?;
            state.drain_waiters(&self.adapter, Instant::now());
            connection
        };
        self.emit_all(&events);
        Some(connection)
    }

    async fn cleanup(&self, id: ConnectionId, connection: Arc<A::Connection>) {
        if let Err(e) = self.adapter.cleanup_connection(connection).await {
            tracing::warn!(
                protocol = %self.protocol,
                connection_id = %id,
                error = %e,
                "connection teardown failed"
            );
        }
    }

    async fn remove_connection(&self, id: ConnectionId, reason: RemovalReason) -> bool {
        let Some(connection) = self.detach(id, reason) else {
            return false;
        };
        self.cleanup(id, connection).await;
        true
    }

    fn update_health_status(&self) -> PoolHealth {
        let mut events = Vec::new();
        let health = {
            let mut state = self.state.lock();
            state.refresh_health(&mut events);
            state.health_snapshot()
        };
        self.emit_all(&events);
        health
    }

    fn update_config(&self, update: &PoolConfigUpdate) -> bool {
        let mut events = Vec::new();
        let applied = {
            let mut state = self.state.lock();
            let merged = state.config.merged(update);
            match merged.validate() {
                Ok(()) => {
                    state.config = merged;
                    state.refresh_health(&mut events);
                    state.drain_waiters(&self.adapter, Instant::now());
                    true
                }
                Err(e) => {
                    tracing::warn!(protocol = %self.protocol, error = %e, "rejected configuration update");
                    false
                }
            }
        };
        self.emit_all(&events);
        applied
    }

    fn metrics(&self) -> PoolMetrics {
        let uptime = self.created_at.elapsed();
        let now = Instant::now();
        let state = self.state.lock();
        PoolMetrics {
            protocol: self.protocol,
            uptime,
            active_connections: state.connections.len(),
            in_use_connections: state.in_use(),
            waiting_requests: state.waiting.len(),
            longest_wait: state.waiting.longest_wait(now),
            connections_created: state.metrics.connections_created,
            connections_closed: state.metrics.connections_closed,
            requests_total: state.metrics.requests_total,
            requests_failed: state.metrics.requests_failed,
            acquisition_timeouts: state.metrics.acquisition_timeouts,
            connection_errors: state.metrics.connection_errors,
            connections_per_second: state.metrics.connections_per_second(uptime),
            error_rate: state.metrics.error_rate(),
            latency: state.metrics.latency_summary(),
            acquire_wait: state.metrics.wait_summary(),
        }
    }

    fn expired_connections(&self) -> Vec<(ConnectionId, RemovalReason)> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .connections
            .iter()
            .filter(|(_, entry)| entry.metadata.available)
            .filter_map(|(id, entry)| {
                if entry.metadata.idle_time(now) > state.config.connection_timeout {
                    Some((*id, RemovalReason::Idle))
                } else if !self.adapter.is_healthy(
                    &entry.connection,
                    &entry.metadata,
                    &state.config,
                    now,
                ) {
                    Some((*id, RemovalReason::Unhealthy))
                } else {
                    None
                }
            })
            .collect()
    }

    async fn sweep_idle_connections(&self) -> usize {
        let mut teardowns = Vec::new();
        for (id, reason) in self.expired_connections() {
            if let Some(connection) = self.detach(id, reason) {
                teardowns.push(self.cleanup(id, connection));
            }
        }
        let removed = teardowns.len();
        join_all(teardowns).await;
        if removed > 0 {
            tracing::debug!(protocol = %self.protocol, removed, "swept idle connections");
        }
        removed
    }

    fn begin_destroy(&self) -> Vec<(ConnectionId, Arc<A::Connection>)> {
        let mut events = Vec::new();
        let (waiters, drained) = {
            let mut state = self.state.lock();
            if !state.destroyed {
                tracing::info!(
                    protocol = %self.protocol,
                    active = state.connections.len(),
                    waiting = state.waiting.len(),
                    "destroying connection pool"
                );
            }
            state.destroyed = true;

            let waiters = state.waiting.drain();
            let entries = std::mem::take(&mut state.connections);
            let mut remaining = entries.len();
            let mut drained = Vec::with_capacity(remaining);
            for (id, entry) in entries {
                remaining -= 1;
                state.metrics.connections_closed += 1;
                events.push(PoolEvent::ConnectionRemoved {
                    protocol: self.protocol,
                    id,
                    reason: RemovalReason::PoolDestroyed,
                    total: remaining,
                });
                drained.push((id, entry.connection));
            }

            if state.health != HealthStatus::Unavailable {
                let previous = std::mem::replace(&mut state.health, HealthStatus::Unavailable);
                events.push(PoolEvent::HealthStatusChanged {
                    protocol: self.protocol,
                    previous,
                    current: HealthStatus::Unavailable,
                    utilization: 0.0,
                });
            }
            (waiters, drained)
        };

        for waiter in waiters {
            let _ = waiter.item.send(Err(PoolError::Destroyed));
        }
        self.emit_all(&events);
        self.shutdown.cancel();
        drained
    }

    async fn destroy(&self, budget: Duration) -> Result<(), PoolError> {
        let started = Instant::now();
        let drained = self.begin_destroy();
        let count = drained.len();

        let teardowns = drained
            .into_iter()
            .map(|(id, connection)| self.cleanup(id, connection));
        let outcome = tokio::time::timeout(budget, join_all(teardowns)).await;
        self.events.clear();

        match outcome {
            Ok(_) => {
                if count > 0 {
                    tracing::info!(protocol = %self.protocol, closed = count, "connection pool destroyed");
                }
                Ok(())
            }
            Err(_) => {
                let elapsed = started.elapsed();
                tracing::error!(
                    protocol = %self.protocol,
                    ?elapsed,
                    "connection teardown exceeded shutdown budget"
                );
                Err(PoolError::ShutdownTimeout { elapsed })
            }
        }
    }
}

impl<A: ProtocolAdapter> Drop for PoolInner<A> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct PoolEntry<A: ProtocolAdapter> {
    connection: Arc<A::Connection>,
    metadata: ConnectionMetadata<A::Metadata>,
}

struct PoolState<A: ProtocolAdapter> {
    protocol: Protocol,
    config: PoolConfig,
    /// Keyed by id, so iteration is oldest first.
    connections: BTreeMap<ConnectionId, PoolEntry<A>>,
    waiting: WaitingQueue<Waiter<A::Connection>>,
    health: HealthStatus,
    destroyed: bool,
    metrics: MetricsRecorder,
}

impl<A: ProtocolAdapter> PoolState<A> {
    fn new(protocol: Protocol, config: PoolConfig) -> Self {
        Self {
            protocol,
            config,
            connections: BTreeMap::new(),
            waiting: WaitingQueue::new(),
            health: HealthStatus::Healthy,
            destroyed: false,
            metrics: MetricsRecorder::new(),
        }
    }

    fn in_use(&self) -> usize {
        self.connections
            .values()
            .filter(|entry| !entry.metadata.available)
            .count()
    }

    fn at_capacity(&self) -> bool {
        self.connections.len() >= self.config.max_connections as usize
    }

    fn utilization(&self) -> f64 {
        if self.config.max_connections == 0 {
            return 0.0;
        }
        self.connections.len() as f64 / f64::from(self.config.max_connections)
    }

    fn limit_reached(&self, events: &mut Vec<PoolEvent>) -> PoolError {
        let active = self.connections.len();
        let max = self.config.max_connections;
        tracing::debug!(protocol = %self.protocol, active, max, "pool limit reached");
        events.push(PoolEvent::PoolLimitReached {
            protocol: self.protocol,
            active,
            max,
        });
        PoolError::CapacityExceeded { active, max }
    }

    fn admit(
        &mut self,
        adapter: &A,
        now: Instant,
        events: &mut Vec<PoolEvent>,
    ) -> Result<Admission<A::Connection>, PoolError> {
        if self.destroyed {
            return Err(PoolError::Destroyed);
        }
        if self.at_capacity() {
            return Err(self.limit_reached(events));
        }
        if let Some(pooled) = self.try_checkout(adapter, now) {
            tracing::trace!(connection_id = %pooled.id(), "reusing idle connection");
            return Ok(Admission::Reused(pooled));
        }
        Ok(Admission::Create(self.config.clone()))
    }

    /// Check out the connection the adapter picks, if checkouts are below
    /// `max_connections`.
    fn try_checkout(&mut self, adapter: &A, now: Instant) -> Option<PooledConnection<A::Connection>> {
        if self.in_use() >= self.config.max_connections as usize {
            return None;
        }
        let id = {
            let entries: Vec<ConnectionEntry<'_, A>> = self
                .connections
                .iter()
                .map(|(id, entry)| ConnectionEntry {
                    id: *id,
                    connection: entry.connection.as_ref(),
                    metadata: &entry.metadata,
                })
                .collect();
            adapter.get_available_connection(&entries, &self.config, now)?
        };
        let entry = self.connections.get_mut(&id)?;
        if !entry.metadata.available {
            return None;
        }
        entry.metadata.mark_in_use(now);
        Some(PooledConnection::new(id, Arc::clone(&entry.connection)))
    }

    /// Hand available connections to queued requests in priority order.
    fn drain_waiters(&mut self, adapter: &A, now: Instant) -> usize {
        self.waiting.retain(|waiter| !waiter.is_closed());
        let mut served = 0;
        while !self.waiting.is_empty() {
            let Some(pooled) = self.try_checkout(adapter, now) else {
                break;
            };
            let Some(waiter) = self.waiting.pop_front() else {
                self.mark_available(pooled.id(), now);
                break;
            };
            match waiter.item.send(Ok(pooled)) {
                Ok(()) => served += 1,
                Err(unsent) => {
                    if let Ok(pooled) = unsent {
                        self.mark_available(pooled.id(), now);
                    }
                }
            }
        }
        served
    }

    fn mark_available(&mut self, id: ConnectionId, now: Instant) {
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.metadata.mark_available(now);
        }
    }

    fn insert(
        &mut self,
        metadata: ConnectionMetadata<A::Metadata>,
        connection: Arc<A::Connection>,
        events: &mut Vec<PoolEvent>,
    ) {
        let id = metadata.id;
        self.connections
            .insert(id, PoolEntry { connection, metadata });
        self.metrics.connections_created += 1;

        let total = self.connections.len();
        tracing::debug!(protocol = %self.protocol, connection_id = %id, total, "connection added");
        events.push(PoolEvent::ConnectionAdded {
            protocol: self.protocol,
            id,
            total,
        });
        self.refresh_health(events);
    }

    fn detach(
        &mut self,
        id: ConnectionId,
        reason: RemovalReason,
        events: &mut Vec<PoolEvent>,
    ) -> Option<Arc<A::Connection>> {
        let entry = self.connections.remove(&id)?;
        self.metrics.connections_closed += 1;

        let total = self.connections.len();
        tracing::debug!(
            protocol = %self.protocol,
            connection_id = %id,
            reason = %reason,
            total,
            "connection removed"
        );
        events.push(PoolEvent::ConnectionRemoved {
            protocol: self.protocol,
            id,
            reason,
            total,
        });
        self.refresh_health(events);
        Some(entry.connection)
    }

    fn refresh_health(&mut self, events: &mut Vec<PoolEvent>) {
        if self.destroyed {
            return;
        }
        let utilization = self.utilization();
        let current = HealthStatus::from_utilization(utilization);
        if current == self.health {
            return;
        }
        let previous = std::mem::replace(&mut self.health, current);
        tracing::info!(
            protocol = %self.protocol,
            %previous,
            %current,
            utilization,
            "pool health changed"
        );
        events.push(PoolEvent::HealthStatusChanged {
            protocol: self.protocol,
            previous,
            current,
            utilization,
        });
    }

    fn health_snapshot(&self) -> PoolHealth {
        let utilization = self.utilization();
        let status = if self.destroyed {
            HealthStatus::Unavailable
        } else {
            HealthStatus::from_utilization(utilization)
        };
        PoolHealth {
            status,
            utilization,
            active_connections: self.connections.len(),
            max_connections: self.config.max_connections,
            waiting_requests: self.waiting.len(),
        }
    }
}
