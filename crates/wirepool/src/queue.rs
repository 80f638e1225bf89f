//! Acquisition options and the priority-ordered waiting queue.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Priority of a queued acquisition.
///
/// Ordered `Low < Normal < High`; higher priorities are served first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Served after everything else.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Served before everything else.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Options for [`ConnectionPoolManager::request_connection`].
///
/// [`ConnectionPoolManager::request_connection`]: crate::pool::ConnectionPoolManager::request_connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// How long to wait in the queue. Defaults to the pool's `request_timeout`.
    pub timeout: Option<Duration>,
    /// Queue priority.
    pub priority: Priority,
    /// Opaque caller metadata, forwarded to active connection creation.
    pub metadata: Option<serde_json::Value>,
}

impl RequestOptions {
    /// Options with default priority and timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the queue priority.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach caller metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A request waiting for a connection.
#[derive(Debug)]
pub(crate) struct QueueEntry<T> {
    pub(crate) id: u64,
    pub(crate) priority: Priority,
    pub(crate) enqueued_at: Instant,
    pub(crate) item: T,
}

/// Waiting requests ordered by priority, then arrival.
///
/// Insertion places an entry after every entry of equal or higher priority,
/// which keeps arrival order stable within a priority level.
#[derive(Debug)]
pub(crate) struct WaitingQueue<T> {
    entries: Vec<QueueEntry<T>>,
    next_id: u64,
}

impl<T> WaitingQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Enqueue an item, returning the id used to prune it later.
    pub(crate) fn push(&mut self, priority: Priority, enqueued_at: Instant, item: T) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let position = self.entries.partition_point(|e| e.priority >= priority);
        self.entries.insert(
            position,
            QueueEntry {
                id,
                priority,
                enqueued_at,
                item,
            },
        );
        id
    }

    /// Remove and return the next entry to serve.
    pub(crate) fn pop_front(&mut self) -> Option<QueueEntry<T>> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Remove a specific entry, if it is still queued.
    pub(crate) fn remove(&mut self, id: u64) -> Option<QueueEntry<T>> {
        let position = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(position))
    }

    /// Keep only entries whose item satisfies `keep`.
    pub(crate) fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.entries.retain(|e| keep(&e.item));
    }

    /// Remove every entry, in serving order.
    pub(crate) fn drain(&mut self) -> Vec<QueueEntry<T>> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time the oldest still-queued request has been waiting.
    pub(crate) fn longest_wait(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|e| now.saturating_duration_since(e.enqueued_at))
            .max()
    }
}
