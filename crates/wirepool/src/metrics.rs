//! Pool status and metrics.

use std::time::Duration;

use serde::Serialize;
use wirepool_stats::{LatencySummary, RingBuffer};

use crate::protocol::Protocol;

/// Number of samples retained per distribution for percentile queries.
pub const LATENCY_WINDOW: usize = 1000;

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently checked out.
    pub in_use: usize,
    /// Total number of stored connections.
    pub total: usize,
    /// Requests waiting for a connection.
    pub waiting: usize,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.total as f64 / f64::from(self.max)) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max as usize
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    /// Pool protocol.
    pub protocol: Protocol,
    /// Time since pool creation.
    pub uptime: Duration,
    /// Connections currently stored.
    pub active_connections: usize,
    /// Connections currently checked out.
    pub in_use_connections: usize,
    /// Requests waiting for a connection.
    pub waiting_requests: usize,
    /// How long the oldest queued request has been waiting.
    pub longest_wait: Option<Duration>,
    /// Total connections stored since pool start.
    pub connections_created: u64,
    /// Total connections removed since pool start.
    pub connections_closed: u64,
    /// Total acquisition requests.
    pub requests_total: u64,
    /// Acquisitions that did not produce a connection.
    pub requests_failed: u64,
    /// Acquisitions that timed out in the queue.
    pub acquisition_timeouts: u64,
    /// Transport errors reported by adapters.
    pub connection_errors: u64,
    /// Average rate of new connections over the pool lifetime.
    pub connections_per_second: f64,
    /// `requests_failed / requests_total`.
    pub error_rate: f64,
    /// Request latencies reported through `record_latency`.
    pub latency: LatencySummary,
    /// Time successful acquisitions spent obtaining a connection.
    pub acquire_wait: LatencySummary,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            return 1.0;
        }
        1.0 - self.error_rate
    }
}

/// Internal metrics tracking.
#[derive(Debug)]
pub(crate) struct MetricsRecorder {
    pub(crate) connections_created: u64,
    pub(crate) connections_closed: u64,
    pub(crate) requests_total: u64,
    pub(crate) requests_failed: u64,
    pub(crate) acquisition_timeouts: u64,
    pub(crate) connection_errors: u64,
    latencies: Option<RingBuffer<f64>>,
    wait_times: Option<RingBuffer<f64>>,
}

impl MetricsRecorder {
    pub(crate) fn new() -> Self {
        Self {
            connections_created: 0,
            connections_closed: 0,
            requests_total: 0,
            requests_failed: 0,
            acquisition_timeouts: 0,
            connection_errors: 0,
            latencies: RingBuffer::new(LATENCY_WINDOW).ok(),
            wait_times: RingBuffer::new(LATENCY_WINDOW).ok(),
        }
    }

    pub(crate) fn record_latency(&mut self, latency: Duration) {
        push_millis(self.latencies.as_mut(), latency);
    }

    pub(crate) fn record_wait(&mut self, wait: Duration) {
        push_millis(self.wait_times.as_mut(), wait);
    }

    pub(crate) fn latency_summary(&self) -> LatencySummary {
        summarize(self.latencies.as_ref())
    }

    pub(crate) fn wait_summary(&self) -> LatencySummary {
        summarize(self.wait_times.as_ref())
    }

    pub(crate) fn error_rate(&self) -> f64 {
        if self.requests_total == 0 {
            return 0.0;
        }
        self.requests_failed as f64 / self.requests_total as f64
    }

    pub(crate) fn connections_per_second(&self, uptime: Duration) -> f64 {
        let secs = uptime.as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        self.connections_created as f64 / secs
    }
}

fn push_millis(buffer: Option<&mut RingBuffer<f64>>, sample: Duration) {
    if let Some(buffer) = buffer {
        buffer.push(sample.as_nanos() as f64 / 1_000_000.0);
    }
}

fn summarize(buffer: Option<&RingBuffer<f64>>) -> LatencySummary {
    buffer.map(LatencySummary::from_buffer).unwrap_or_default()
}
