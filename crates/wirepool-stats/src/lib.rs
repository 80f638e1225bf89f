//! # wirepool-stats
//!
//! Fixed-capacity sample storage and percentile statistics used by the
//! wirepool connection pool engine.
//!
//! The crate has no async or runtime dependencies and can be used anywhere a
//! bounded window of recent samples is needed.
//!
//! ## Features
//!
//! - O(1) sample recording with oldest-first overwrite
//! - Percentile queries over a sorted snapshot (`floor(len * p)` indexing)
//! - Arithmetic mean of the current window
//! - Serializable latency summaries (p50/p95/p99)
//!
//! ## Example
//!
//! ```rust
//! use wirepool_stats::RingBuffer;
//!
//! let mut latencies = RingBuffer::new(3).unwrap();
//! for ms in [10.0, 20.0, 30.0, 40.0] {
//!     latencies.push(ms);
//! }
//!
//! // The oldest sample (10.0) was overwritten.
//! assert_eq!(latencies.to_vec(), vec![20.0, 30.0, 40.0]);
//! assert_eq!(latencies.percentile(0.5), Some(30.0));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod ring_buffer;
pub mod summary;

pub use error::StatsError;
pub use ring_buffer::RingBuffer;
pub use summary::LatencySummary;
