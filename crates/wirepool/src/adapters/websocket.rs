//! WebSocket adapter.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::transport::{ReadyState, TransportEvent, WebSocketStream, apply_common};
use crate::config::PoolConfig;
use crate::error::AdapterError;
use crate::lifecycle::{ConnectionMetadata, CreatedConnection, ProtocolAdapter};
use crate::pool::ConnectionHandle;
use crate::protocol::Protocol;
use crate::queue::RequestOptions;

/// Time a ping may go unanswered when the config does not set `pong_timeout_ms`.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(5);

/// Protocol metadata for WebSocket connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSocketMetadata {
    /// Most recent ping sent to the peer.
    pub last_ping_sent: Option<Instant>,
    /// Most recent pong received.
    pub last_pong: Option<Instant>,
    /// Activity reports received.
    pub messages: u64,
}

impl WebSocketMetadata {
    /// A ping is outstanding for longer than `pong_timeout`.
    #[must_use]
    pub fn pong_overdue(&self, pong_timeout: Duration, now: Instant) -> bool {
        let Some(sent) = self.last_ping_sent else {
            return false;
        };
        let acked = self.last_pong.is_some_and(|pong| pong >= sent);
        !acked && now.saturating_duration_since(sent) > pong_timeout
    }

    fn record(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::PingSent => self.last_ping_sent = Some(Instant::now()),
            TransportEvent::Pong => self.last_pong = Some(Instant::now()),
            TransportEvent::Activity { .. } => self.messages += 1,
            _ => {}
        }
    }
}

/// Opens client WebSocket connections for active creation.
#[async_trait]
pub trait WebSocketDialer<S>: Send + Sync + 'static {
    /// Dial a new connection for an acquisition.
    async fn dial(&self, options: &RequestOptions) -> Result<S, AdapterError>;
}

/// Adapter for WebSocket connections.
///
/// A connection is healthy while its ready state is `Open` and no ping has
/// gone unanswered for longer than the pong timeout. Teardown terminates the
/// connection. Server pools receive connections passively; with a dialer
/// the adapter also creates client connections on demand.
pub struct WebSocketAdapter<S = Box<dyn WebSocketStream>> {
    dialer: Option<Arc<dyn WebSocketDialer<S>>>,
    _stream: PhantomData<fn() -> S>,
}

impl<S: WebSocketStream> WebSocketAdapter<S> {
    /// Create a passive adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dialer: None,
            _stream: PhantomData,
        }
    }

    /// Create connections on demand with `dialer`.
    #[must_use]
    pub fn with_dialer(dialer: impl WebSocketDialer<S>) -> Self {
        Self {
            dialer: Some(Arc::new(dialer)),
            _stream: PhantomData,
        }
    }
}

impl<S: WebSocketStream> Default for WebSocketAdapter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: WebSocketStream> ProtocolAdapter for WebSocketAdapter<S> {
    type Connection = S;
    type Metadata = WebSocketMetadata;

    fn protocol(&self) -> Protocol {
        Protocol::WebSocket
    }

    fn validate_connection(&self, stream: &S) -> bool {
        matches!(stream.ready_state(), ReadyState::Connecting | ReadyState::Open)
    }

    fn is_healthy(
        &self,
        stream: &S,
        metadata: &ConnectionMetadata<WebSocketMetadata>,
        config: &PoolConfig,
        now: Instant,
    ) -> bool {
        let pong_timeout = config
            .protocol_duration_ms("pong_timeout_ms")
            .unwrap_or(DEFAULT_PONG_TIMEOUT);
        stream.ready_state() == ReadyState::Open
            && !metadata.protocol.pong_overdue(pong_timeout, now)
    }

    async fn cleanup_connection(&self, stream: Arc<S>) -> Result<(), AdapterError> {
        if stream.ready_state() != ReadyState::Closed {
            stream.terminate();
        }
        Ok(())
    }

    async fn create_protocol_connection(
        &self,
        options: &RequestOptions,
        _config: &PoolConfig,
    ) -> Result<Option<CreatedConnection<Self>>, AdapterError> {
        let Some(dialer) = &self.dialer else {
            return Ok(None);
        };
        let connection = dialer.dial(options).await?;
        Ok(Some(CreatedConnection {
            connection,
            metadata: WebSocketMetadata::default(),
        }))
    }

    fn setup_protocol_handlers(&self, stream: &Arc<S>, handle: ConnectionHandle<Self>) {
        stream.on_event(Box::new(move |event| {
            if let Some(event) = apply_common(&handle, event) {
                handle.update_metadata(|metadata| metadata.protocol.record(&event));
            }
        }));
    }
}
