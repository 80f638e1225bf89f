//! Pool lifecycle events and the self-healing listener registry.
//!
//! Listeners are isolated from each other: a listener that returns an error
//! or panics never prevents delivery to the others. Each registration keeps
//! a consecutive-failure counter that resets on success; once a listener
//! fails more than [`MAX_CONSECUTIVE_LISTENER_FAILURES`] times in a row it is
//! unregistered.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::ListenerError;
use crate::health::HealthStatus;
use crate::lifecycle::ConnectionId;
use crate::protocol::Protocol;

/// Consecutive failures a listener may accumulate before removal.
///
/// A listener is removed on its 11th consecutive failure.
pub const MAX_CONSECUTIVE_LISTENER_FAILURES: u32 = 10;

/// Event categories listeners subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolEventKind {
    /// A connection was stored.
    ConnectionAdded,
    /// A connection left the pool.
    ConnectionRemoved,
    /// A transport reported a timeout.
    ConnectionTimeout,
    /// A transport reported an error.
    ConnectionError,
    /// An acquisition was refused at capacity.
    PoolLimitReached,
    /// The health status changed.
    HealthStatusChanged,
}

impl PoolEventKind {
    /// Every event category.
    pub const ALL: [PoolEventKind; 6] = [
        PoolEventKind::ConnectionAdded,
        PoolEventKind::ConnectionRemoved,
        PoolEventKind::ConnectionTimeout,
        PoolEventKind::ConnectionError,
        PoolEventKind::PoolLimitReached,
        PoolEventKind::HealthStatusChanged,
    ];
}

impl fmt::Display for PoolEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionAdded => "CONNECTION_ADDED",
            Self::ConnectionRemoved => "CONNECTION_REMOVED",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::PoolLimitReached => "POOL_LIMIT_REACHED",
            Self::HealthStatusChanged => "HEALTH_STATUS_CHANGED",
        };
        f.write_str(name)
    }
}

/// Why a connection left the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// Released with `destroy = true`.
    Released,
    /// Released or removed because of an error.
    Error(String),
    /// The transport closed.
    Closed,
    /// The transport timed out.
    Timeout,
    /// Idle past the configured timeout.
    Idle,
    /// Failed the protocol health predicate.
    Unhealthy,
    /// The pool is being destroyed.
    PoolDestroyed,
    /// Removed explicitly by the application.
    Manual(String),
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Released => write!(f, "released"),
            Self::Error(message) => write!(f, "error: {message}"),
            Self::Closed => write!(f, "closed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Idle => write!(f, "idle"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::PoolDestroyed => write!(f, "pool destroyed"),
            Self::Manual(message) => write!(f, "{message}"),
        }
    }
}

/// An event emitted by a pool.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A connection was stored.
    ConnectionAdded {
        /// Pool protocol.
        protocol: Protocol,
        /// Stored connection.
        id: ConnectionId,
        /// Connections stored after the addition.
        total: usize,
    },
    /// A connection left the pool.
    ConnectionRemoved {
        /// Pool protocol.
        protocol: Protocol,
        /// Removed connection.
        id: ConnectionId,
        /// Why it was removed.
        reason: RemovalReason,
        /// Connections stored after the removal.
        total: usize,
    },
    /// A transport reported a timeout.
    ConnectionTimeout {
        /// Pool protocol.
        protocol: Protocol,
        /// Affected connection.
        id: ConnectionId,
    },
    /// A transport reported an error.
    ConnectionError {
        /// Pool protocol.
        protocol: Protocol,
        /// Affected connection.
        id: ConnectionId,
        /// Error description.
        error: String,
    },
    /// An acquisition was refused at capacity.
    PoolLimitReached {
        /// Pool protocol.
        protocol: Protocol,
        /// Connections stored.
        active: usize,
        /// Configured maximum.
        max: u32,
    },
    /// The health status changed.
    HealthStatusChanged {
        /// Pool protocol.
        protocol: Protocol,
        /// Status before the change.
        previous: HealthStatus,
        /// Status after the change.
        current: HealthStatus,
        /// Utilization that triggered the change.
        utilization: f64,
    },
}

impl PoolEvent {
    /// The category this event is delivered under.
    #[must_use]
    pub fn kind(&self) -> PoolEventKind {
        match self {
            Self::ConnectionAdded { .. } => PoolEventKind::ConnectionAdded,
            Self::ConnectionRemoved { .. } => PoolEventKind::ConnectionRemoved,
            Self::ConnectionTimeout { .. } => PoolEventKind::ConnectionTimeout,
            Self::ConnectionError { .. } => PoolEventKind::ConnectionError,
            Self::PoolLimitReached { .. } => PoolEventKind::PoolLimitReached,
            Self::HealthStatusChanged { .. } => PoolEventKind::HealthStatusChanged,
        }
    }
}

/// Handle identifying a listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&PoolEvent) -> Result<(), ListenerError> + Send + Sync>;

struct Registration {
    id: ListenerId,
    listener: Listener,
    consecutive_failures: u32,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    listeners: HashMap<PoolEventKind, Vec<Registration>>,
}

/// Per-event listener sets with failure isolation.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: PoolEventKind, listener: F) -> ListenerId
    where
        F: Fn(&PoolEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ListenerId(state.next_id);
        state.listeners.entry(kind).or_default().push(Registration {
            id,
            listener: Arc::new(listener),
            consecutive_failures: 0,
        });
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn off(&self, kind: PoolEventKind, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        let Some(registrations) = state.listeners.get_mut(&kind) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        before != registrations.len()
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: PoolEventKind) -> usize {
        self.state.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.state.lock().listeners.clear();
    }

    /// Deliver an event to every listener of its kind.
    ///
    /// Listeners run without the registry lock held, so they may call back
    /// into the pool. Returns the number of listeners that succeeded.
    pub fn emit(&self, event: &PoolEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(ListenerId, Listener)> = {
            let state = self.state.lock();
            match state.listeners.get(&kind) {
                Some(registrations) => registrations
                    .iter()
                    .map(|r| (r.id, Arc::clone(&r.listener)))
                    .collect(),
                None => return 0,
            }
        };

        let outcomes: Vec<(ListenerId, bool)> = snapshot
            .into_iter()
            .map(|(id, listener)| {
                let ok = match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::warn!(event = %kind, error = %e, "event listener failed");
                        false
                    }
                    Err(_) => {
                        tracing::warn!(event = %kind, "event listener panicked");
                        false
                    }
                };
                (id, ok)
            })
            .collect();

        let mut delivered = 0;
        let mut state = self.state.lock();
        if let Some(registrations) = state.listeners.get_mut(&kind) {
            for (id, ok) in outcomes {
                let Some(registration) = registrations.iter_mut().find(|r| r.id == id) else {
                    continue;
                };
                if ok {
                    registration.consecutive_failures = 0;
                    delivered += 1;
                } else {
                    registration.consecutive_failures += 1;
                }
            }
            registrations.retain(|r| {
                let keep = r.consecutive_failures <= MAX_CONSECUTIVE_LISTENER_FAILURES;
                if !keep {
                    tracing::warn!(
                        event = %kind,
                        failures = r.consecutive_failures,
                        "unregistering repeatedly failing event listener"
                    );
                }
                keep
            });
        }
        delivered
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let total: usize = state.listeners.values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("listeners", &total).finish()
    }
}
