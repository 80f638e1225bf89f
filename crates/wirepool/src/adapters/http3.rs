//! HTTP/3 adapter.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::http2::{DEFAULT_MAX_CONCURRENT_STREAMS, SessionMetadata, SessionState, stream_limit};
use super::transport::{QuicSession, apply_common};
use crate::config::PoolConfig;
use crate::error::AdapterError;
use crate::lifecycle::{ConnectionMetadata, ProtocolAdapter};
use crate::pool::ConnectionHandle;
use crate::protocol::Protocol;

/// Round-trip time at or above which a session is unhealthy.
pub const MAX_RTT: Duration = Duration::from_millis(5000);

/// `H3_NO_ERROR`, the application close code for a graceful shutdown.
pub const H3_NO_ERROR: u64 = 0x100;

/// Adapter for HTTP/3 sessions over QUIC.
///
/// Health is the HTTP/2 rule plus a round-trip time below [`MAX_RTT`]
/// (or `max_rtt_ms` from the config). Teardown closes the QUIC connection
/// with `H3_NO_ERROR`.
pub struct Http3Adapter<S = Box<dyn QuicSession>> {
    max_concurrent_streams: u32,
    _session: PhantomData<fn() -> S>,
}

impl<S: QuicSession> Http3Adapter<S> {
    /// Create the adapter with the default stream limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            _session: PhantomData,
        }
    }

    /// Create the adapter from `max_concurrent_streams` in `config`.
    #[must_use]
    pub fn from_config(config: &PoolConfig) -> Self {
        let limit = config
            .protocol_u64("max_concurrent_streams")
            .and_then(|limit| u32::try_from(limit).ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENT_STREAMS);
        Self::new().max_concurrent_streams(limit)
    }

    /// Set the local concurrent-stream limit.
    #[must_use]
    pub fn max_concurrent_streams(mut self, limit: u32) -> Self {
        self.max_concurrent_streams = limit;
        self
    }
}

impl<S: QuicSession> Default for Http3Adapter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: QuicSession> ProtocolAdapter for Http3Adapter<S> {
    type Connection = S;
    type Metadata = SessionMetadata;

    fn protocol(&self) -> Protocol {
        Protocol::Http3
    }

    fn validate_connection(&self, session: &S) -> bool {
        !session.is_closed()
    }

    fn initial_metadata(&self, session: &S) -> SessionMetadata {
        SessionMetadata::new(
            session.active_streams(),
            stream_limit(session.max_concurrent_streams(), self.max_concurrent_streams),
        )
    }

    fn is_healthy(
        &self,
        session: &S,
        metadata: &ConnectionMetadata<SessionMetadata>,
        config: &PoolConfig,
        now: Instant,
    ) -> bool {
        let state = SessionState {
            closed: session.is_closed(),
            goaway: session.goaway_received(),
            window: session.remote_window_size(),
        };
        let max_rtt = config.protocol_duration_ms("max_rtt_ms").unwrap_or(MAX_RTT);
        state.healthy(&metadata.protocol, config.keep_alive_timeout, now)
            && session.rtt().is_none_or(|rtt| rtt < max_rtt)
    }

    fn has_spare_capacity(&self, metadata: &ConnectionMetadata<SessionMetadata>) -> bool {
        metadata.protocol.has_spare_streams()
    }

    async fn cleanup_connection(&self, session: Arc<S>) -> Result<(), AdapterError> {
        if session.is_closed() {
            return Ok(());
        }
        session
            .close(H3_NO_ERROR)
            .await
            .map_err(AdapterError::from)
    }

    fn setup_protocol_handlers(&self, session: &Arc<S>, handle: ConnectionHandle<Self>) {
        session.on_event(Box::new(move |event| {
            if let Some(event) = apply_common(&handle, event) {
                handle.update_metadata(|metadata| metadata.protocol.record(&event));
            }
        }));
    }
}
