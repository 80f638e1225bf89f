//! HTTP/2 adapter.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::transport::{Http2Session, TransportEvent, apply_common};
use crate::config::PoolConfig;
use crate::error::AdapterError;
use crate::lifecycle::{ConnectionMetadata, ProtocolAdapter};
use crate::pool::ConnectionHandle;
use crate::protocol::Protocol;

/// Stream limit used when neither the peer nor the config sets one.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// Protocol metadata for multiplexed sessions (HTTP/2 and HTTP/3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    /// Streams currently open.
    pub active_streams: u32,
    /// Stream limit for this session.
    pub max_concurrent_streams: u32,
    /// Streams opened over the session's lifetime.
    pub streams_total: u64,
    /// Most recent keep-alive ping.
    pub last_ping_sent: Option<Instant>,
    /// Most recent ping acknowledgement.
    pub last_pong: Option<Instant>,
    /// The peer sent GOAWAY.
    pub goaway: bool,
}

impl SessionMetadata {
    pub(crate) fn new(active_streams: u32, max_concurrent_streams: u32) -> Self {
        Self {
            active_streams,
            max_concurrent_streams,
            ..Self::default()
        }
    }

    /// Whether another stream fits under the limit.
    #[must_use]
    pub fn has_spare_streams(&self) -> bool {
        self.active_streams < self.max_concurrent_streams
    }

    /// Last ping acknowledged, or sent within `keep_alive`.
    #[must_use]
    pub fn ping_within_budget(&self, keep_alive: Duration, now: Instant) -> bool {
        match self.last_ping_sent {
            None => true,
            Some(sent) => {
                self.last_pong.is_some_and(|pong| pong >= sent)
                    || now.saturating_duration_since(sent) <= keep_alive
            }
        }
    }

    pub(crate) fn record(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::PingSent => self.last_ping_sent = Some(Instant::now()),
            TransportEvent::Pong => self.last_pong = Some(Instant::now()),
            TransportEvent::GoAway => self.goaway = true,
            TransportEvent::StreamOpened => {
                self.active_streams += 1;
                self.streams_total += 1;
            }
            TransportEvent::StreamClosed => {
                self.active_streams = self.active_streams.saturating_sub(1);
            }
            _ => {}
        }
    }
}

/// Session-level state common to HTTP/2 and HTTP/3.
pub(crate) struct SessionState {
    pub(crate) closed: bool,
    pub(crate) goaway: bool,
    pub(crate) window: i64,
}

impl SessionState {
    pub(crate) fn healthy(
        &self,
        metadata: &SessionMetadata,
        keep_alive: Duration,
        now: Instant,
    ) -> bool {
        !self.closed
            && !self.goaway
            && !metadata.goaway
            && self.window > 0
            && metadata.ping_within_budget(keep_alive, now)
    }
}

pub(crate) fn stream_limit(peer: Option<u32>, local: u32) -> u32 {
    peer.map_or(local, |peer| peer.min(local))
}

/// Adapter for HTTP/2 sessions.
///
/// A session is healthy while it is open, has not received GOAWAY, has a
/// positive flow-control window, and its last keep-alive ping was acked or
/// is still within `keep_alive_timeout`. It is only reused while it has
/// spare concurrent-stream capacity. Teardown cancels open streams and
/// closes the session.
pub struct Http2Adapter<S = Box<dyn Http2Session>> {
    max_concurrent_streams: u32,
    _session: PhantomData<fn() -> S>,
}

impl<S: Http2Session> Http2Adapter<S> {
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

impl<S: Http2Session> Default for Http2Adapter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: Http2Session> ProtocolAdapter for Http2Adapter<S> {
    type Connection = S;
    type Metadata = SessionMetadata;

    fn protocol(&self) -> Protocol {
        Protocol::Http2
    }

    fn validate_connection(&self, session: &S) -> bool {
        !session.is_destroyed() && !session.is_closed()
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
            closed: session.is_destroyed() || session.is_closed(),
            goaway: session.goaway_received(),
            window: session.remote_window_size(),
        };
        state.healthy(&metadata.protocol, config.keep_alive_timeout, now)
    }

    fn has_spare_capacity(&self, metadata: &ConnectionMetadata<SessionMetadata>) -> bool {
        metadata.protocol.has_spare_streams()
    }

    async fn cleanup_connection(&self, session: Arc<S>) -> Result<(), AdapterError> {
        if session.is_destroyed() {
            return Ok(());
        }
        session.cancel_streams();
        if session.is_closed() {
            return Ok(());
        }
        session.close().await.map_err(AdapterError::from)
    }

    fn setup_protocol_handlers(&self, session: &Arc<S>, handle: ConnectionHandle<Self>) {
        session.on_event(Box::new(move |event| {
            if let Some(event) = apply_common(&handle, event) {
                handle.update_metadata(|metadata| metadata.protocol.record(&event));
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ping_budget() {
        let keep_alive = Duration::from_secs(30);
        let mut metadata = SessionMetadata::new(0, 10);
        assert!(metadata.ping_within_budget(keep_alive, Instant::now()));

        metadata.record(&TransportEvent::PingSent);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!metadata.ping_within_budget(keep_alive, Instant::now()));

        metadata.record(&TransportEvent::Pong);
        assert!(metadata.ping_within_budget(keep_alive, Instant::now()));
    }

    #[test]
    fn test_stream_accounting() {
        let mut metadata = SessionMetadata::new(0, 2);
        metadata.record(&TransportEvent::StreamOpened);
        assert!(metadata.has_spare_streams());
        metadata.record(&TransportEvent::StreamOpened);
        assert!(!metadata.has_spare_streams());

        metadata.record(&TransportEvent::StreamClosed);
        metadata.record(&TransportEvent::StreamClosed);
        metadata.record(&TransportEvent::StreamClosed);
        assert_eq!(metadata.active_streams, 0);
        assert_eq!(metadata.streams_total, 2);
    }

    #[test]
    fn test_stream_limit_prefers_smaller() {
        assert_eq!(stream_limit(Some(50), 100), 50);
        assert_eq!(stream_limit(Some(500), 100), 100);
        assert_eq!(stream_limit(None, 100), 100);
    }

    #[test]
    fn test_from_config_reads_stream_limit() {
        let adapter: Http2Adapter = Http2Adapter::from_config(
            &PoolConfig::http2().protocol_value("max_concurrent_streams", 8),
        );
        assert_eq!(adapter.max_concurrent_streams, 8);
    }
}
