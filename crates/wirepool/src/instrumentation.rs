//! Tracing span names.
//!
//! Pool operations that can suspend (acquisition, removal, sweeping,
//! destruction) run inside `tracing` spans with the names below, so
//! subscribers can time them and correlate the events logged within.

/// Span names for pool operations.
pub mod span_names {
    /// Span name for connection acquisition.
    pub const ACQUIRE: &str = "wirepool.acquire";
    /// Span name for releasing a connection.
    pub const RELEASE: &str = "wirepool.release";
    /// Span name for removing a connection.
    pub const REMOVE: &str = "wirepool.remove";
    /// Span name for the idle sweep.
    pub const SWEEP: &str = "wirepool.sweep";
    /// Span name for pool destruction.
    pub const DESTROY: &str = "wirepool.destroy";
}
