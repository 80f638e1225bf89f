//! Latency summaries derived from a sample window.

use serde::{Deserialize, Serialize};

use crate::ring_buffer::RingBuffer;

/// Point-in-time percentile view of recorded latencies, in milliseconds.
///
/// Every statistic is `None` when no samples have been recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Number of samples in the window.
    pub samples: usize,
    /// Arithmetic mean.
    pub average_ms: Option<f64>,
    /// Median.
    pub p50_ms: Option<f64>,
    /// 95th percentile.
    pub p95_ms: Option<f64>,
    /// 99th percentile.
    pub p99_ms: Option<f64>,
}

impl LatencySummary {
    /// Summarize the current contents of a latency buffer.
    #[must_use]
    pub fn from_buffer(buffer: &RingBuffer<f64>) -> Self {
        Self {
            samples: buffer.len(),
            average_ms: buffer.average(),
            p50_ms: buffer.percentile(0.50),
            p95_ms: buffer.percentile(0.95),
            p99_ms: buffer.percentile(0.99),
        }
    }

    /// Whether any samples contributed to this summary.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        let buffer = RingBuffer::<f64>::new(8).unwrap();
        let summary = LatencySummary::from_buffer(&buffer);

        assert!(summary.is_empty());
        assert_eq!(summary, LatencySummary::default());
    }

    #[test]
    fn test_summary_percentiles() {
        let mut buffer = RingBuffer::new(1000).unwrap();
        for ms in 1..=200 {
            buffer.push(f64::from(ms));
        }
        let summary = LatencySummary::from_buffer(&buffer);

        assert_eq!(summary.samples, 200);
        assert_eq!(summary.p50_ms, Some(101.0));
        assert_eq!(summary.p95_ms, Some(191.0));
        assert_eq!(summary.p99_ms, Some(199.0));
        assert!((summary.average_ms.unwrap() - 100.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_serializes() {
        let mut buffer = RingBuffer::new(4).unwrap();
        buffer.push(2.0);
        let json = serde_json::to_value(LatencySummary::from_buffer(&buffer)).unwrap();

        assert_eq!(json["samples"], 1);
        assert_eq!(json["p50_ms"], 2.0);
    }
}
