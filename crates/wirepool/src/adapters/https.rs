//! HTTPS adapter.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::http::{HttpMetadata, socket_usable};
use super::transport::{TlsSocket, apply_common};
use crate::config::PoolConfig;
use crate::error::AdapterError;
use crate::lifecycle::{ConnectionMetadata, ProtocolAdapter};
use crate::pool::ConnectionHandle;
use crate::protocol::Protocol;

/// Time a TLS socket gets to finish `close_notify` before it is destroyed.
pub const TLS_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Protocol metadata for HTTPS connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpsMetadata {
    /// Byte counters.
    pub http: HttpMetadata,
    /// Negotiated TLS version at accept time.
    pub protocol_version: Option<String>,
}

/// Adapter for TLS sockets accepted by an HTTPS listener.
///
/// Health is the HTTP rule plus a verified peer. Teardown sends
/// `close_notify` and destroys the socket if the close has not completed
/// within the grace period.
pub struct HttpsAdapter<S = Box<dyn TlsSocket>> {
    grace_period: Duration,
    _socket: PhantomData<fn() -> S>,
}

impl<S: TlsSocket> HttpsAdapter<S> {
    /// Create the adapter with the default grace period.
    #[must_use]
    pub fn new() -> Self {
        Self {
            grace_period: TLS_GRACE_PERIOD,
            _socket: PhantomData,
        }
    }

    /// Create the adapter from `tls_grace_period_ms` in `config`.
    #[must_use]
    pub fn from_config(config: &PoolConfig) -> Self {
        let grace = config
            .protocol_duration_ms("tls_grace_period_ms")
            .unwrap_or(TLS_GRACE_PERIOD);
        Self::new().grace_period(grace)
    }

    /// Set the close grace period.
    #[must_use]
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

impl<S: TlsSocket> Default for HttpsAdapter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: TlsSocket> ProtocolAdapter for HttpsAdapter<S> {
    type Connection = S;
    type Metadata = HttpsMetadata;

    fn protocol(&self) -> Protocol {
        Protocol::Https
    }

    fn validate_connection(&self, socket: &S) -> bool {
        !socket.is_destroyed()
    }

    fn initial_metadata(&self, socket: &S) -> HttpsMetadata {
        HttpsMetadata {
            http: HttpMetadata::default(),
            protocol_version: socket.protocol_version(),
        }
    }

    fn is_healthy(
        &self,
        socket: &S,
        metadata: &ConnectionMetadata<HttpsMetadata>,
        config: &PoolConfig,
        now: Instant,
    ) -> bool {
        socket_usable(socket, metadata.idle_time(now), config) && socket.is_authorized()
    }

    async fn cleanup_connection(&self, socket: Arc<S>) -> Result<(), AdapterError> {
        if socket.is_destroyed() {
            return Ok(());
        }
        match tokio::time::timeout(self.grace_period, socket.end()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "TLS close_notify failed");
            }
            Err(_) => {
                tracing::debug!(grace = ?self.grace_period, "TLS close did not finish in time");
            }
        }
        if !socket.is_destroyed() {
            socket.destroy();
        }
        Ok(())
    }

    fn setup_protocol_handlers(&self, socket: &Arc<S>, handle: ConnectionHandle<Self>) {
        socket.on_event(Box::new(move |event| {
            if let Some(event) = apply_common(&handle, event) {
                handle.update_metadata(|metadata| metadata.protocol.http.record(&event));
            }
        }));
    }
}
