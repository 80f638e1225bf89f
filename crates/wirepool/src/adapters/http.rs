//! HTTP/1.1 adapter.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use super::transport::{TcpSocket, TransportEvent, apply_common};
use crate::config::PoolConfig;
use crate::error::AdapterError;
use crate::lifecycle::{ConnectionMetadata, ProtocolAdapter};
use crate::pool::ConnectionHandle;
use crate::protocol::Protocol;

/// Protocol metadata for HTTP/1.1 and HTTPS connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMetadata {
    /// Bytes read over the connection.
    pub bytes_read: u64,
    /// Bytes written over the connection.
    pub bytes_written: u64,
}

impl HttpMetadata {
    pub(crate) fn record(&mut self, event: &TransportEvent) {
        if let TransportEvent::Activity {
            bytes_read,
            bytes_written,
        } = event
        {
            self.bytes_read += bytes_read;
            self.bytes_written += bytes_written;
        }
    }
}

/// Socket liveness shared by HTTP and HTTPS.
pub(crate) fn socket_usable<S: TcpSocket + ?Sized>(
    socket: &S,
    idle: std::time::Duration,
    config: &PoolConfig,
) -> bool {
    !socket.is_destroyed()
        && socket.is_readable()
        && socket.is_writable()
        && idle <= config.keep_alive_timeout
}

/// Adapter for keep-alive HTTP/1.1 sockets accepted by a listener.
///
/// A socket is healthy while it is open in both directions and has not
/// idled past `keep_alive_timeout`. Teardown destroys the socket.
pub struct HttpAdapter<S = Box<dyn TcpSocket>> {
    _socket: PhantomData<fn() -> S>,
}

impl<S: TcpSocket> HttpAdapter<S> {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _socket: PhantomData,
        }
    }
}

impl<S: TcpSocket> Default for HttpAdapter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: TcpSocket> ProtocolAdapter for HttpAdapter<S> {
    type Connection = S;
    type Metadata = HttpMetadata;

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn validate_connection(&self, socket: &S) -> bool {
        !socket.is_destroyed()
    }

    fn is_healthy(
        &self,
        socket: &S,
        metadata: &ConnectionMetadata<HttpMetadata>,
        config: &PoolConfig,
        now: Instant,
    ) -> bool {
        socket_usable(socket, metadata.idle_time(now), config)
    }

    async fn cleanup_connection(&self, socket: Arc<S>) -> Result<(), AdapterError> {
        if !socket.is_destroyed() {
            socket.destroy();
        }
        Ok(())
    }

    fn setup_protocol_handlers(&self, socket: &Arc<S>, handle: ConnectionHandle<Self>) {
        socket.on_event(Box::new(move |event| {
            if let Some(event) = apply_common(&handle, event) {
                handle.update_metadata(|metadata| metadata.protocol.record(&event));
            }
        }));
    }
}
