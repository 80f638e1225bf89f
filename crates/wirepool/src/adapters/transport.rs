//! Transport capability traits consumed by the built-in adapters.
//!
//! Protocol listeners own the wire-level machinery; the pool only needs a
//! small view of each transport: liveness flags, a teardown primitive, and
//! a callback for lifecycle events. Each trait is object safe, and boxed
//! trait objects implement their trait, so a listener can hand the pool
//! `Box<dyn TcpSocket>` and friends.

use std::io;
use std::time::Duration;

use async_trait::async_trait;

use crate::event::RemovalReason;
use crate::lifecycle::ProtocolAdapter;
use crate::pool::ConnectionHandle;

/// Lifecycle events a transport reports to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport closed.
    Close,
    /// The transport failed.
    Error(String),
    /// The transport timed out.
    Timeout,
    /// Bytes moved over the transport.
    Activity {
        /// Bytes read since the previous report.
        bytes_read: u64,
        /// Bytes written since the previous report.
        bytes_written: u64,
    },
    /// A keep-alive ping was sent to the peer.
    PingSent,
    /// The peer acknowledged a ping.
    Pong,
    /// The peer sent GOAWAY.
    GoAway,
    /// A stream was opened on a multiplexed session.
    StreamOpened,
    /// A stream on a multiplexed session finished.
    StreamClosed,
}

/// Callback registered through the `on_event` methods.
pub type TransportCallback = Box<dyn Fn(TransportEvent) + Send + Sync>;

/// A plain TCP socket carrying HTTP/1.1.
pub trait TcpSocket: Send + Sync + 'static {
    /// The socket was destroyed.
    fn is_destroyed(&self) -> bool;
    /// The read side is open.
    fn is_readable(&self) -> bool;
    /// The write side is open.
    fn is_writable(&self) -> bool;
    /// Close immediately.
    fn destroy(&self);
    /// Subscribe to lifecycle events.
    fn on_event(&self, callback: TransportCallback);
}

/// A TLS socket carrying HTTPS.
#[async_trait]
pub trait TlsSocket: TcpSocket {
    /// The peer certificate chain was verified.
    fn is_authorized(&self) -> bool;
    /// Negotiated protocol version, e.g. `TLSv1.3`.
    fn protocol_version(&self) -> Option<String>;
    /// Send `close_notify` and wait for the close to complete.
    async fn end(&self) -> io::Result<()>;
}

/// An HTTP/2 session.
#[async_trait]
pub trait Http2Session: Send + Sync + 'static {
    /// The session was destroyed.
    fn is_destroyed(&self) -> bool;
    /// The session finished closing.
    fn is_closed(&self) -> bool;
    /// The peer sent GOAWAY.
    fn goaway_received(&self) -> bool;
    /// Remaining connection-level flow-control window.
    fn remote_window_size(&self) -> i64;
    /// Streams currently open.
    fn active_streams(&self) -> u32;
    /// The peer's `SETTINGS_MAX_CONCURRENT_STREAMS`, if advertised.
    fn max_concurrent_streams(&self) -> Option<u32>;
    /// Reset every open stream.
    fn cancel_streams(&self);
    /// Close the session gracefully.
    async fn close(&self) -> io::Result<()>;
    /// Subscribe to lifecycle events.
    fn on_event(&self, callback: TransportCallback);
}

/// A QUIC session carrying HTTP/3.
#[async_trait]
pub trait QuicSession: Send + Sync + 'static {
    /// The connection is closed or draining.
    fn is_closed(&self) -> bool;
    /// The peer sent GOAWAY.
    fn goaway_received(&self) -> bool;
    /// Remaining connection-level flow-control window.
    fn remote_window_size(&self) -> i64;
    /// Streams currently open.
    fn active_streams(&self) -> u32;
    /// The peer's concurrent bidirectional stream limit, if known.
    fn max_concurrent_streams(&self) -> Option<u32>;
    /// Smoothed round-trip time.
    fn rtt(&self) -> Option<Duration>;
    /// Close the connection with an application error code.
    async fn close(&self, error_code: u64) -> io::Result<()>;
    /// Subscribe to lifecycle events.
    fn on_event(&self, callback: TransportCallback);
}

/// WebSocket `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting,
    /// Open for messages.
    Open,
    /// Close handshake in progress.
    Closing,
    /// Closed.
    Closed,
}

/// A WebSocket stream.
pub trait WebSocketStream: Send + Sync + 'static {
    /// Current ready state.
    fn ready_state(&self) -> ReadyState;
    /// Close immediately without a close handshake.
    fn terminate(&self);
    /// Subscribe to lifecycle events.
    fn on_event(&self, callback: TransportCallback);
}

/// A server-side gRPC call.
pub trait GrpcCall: Send + Sync + 'static {
    /// Fully qualified method name, e.g. `/pkg.Service/Method`.
    fn method(&self) -> Option<String>;
    /// The call was cancelled.
    fn is_cancelled(&self) -> bool;
    /// Mark the call cancelled.
    fn cancel(&self);
    /// Subscribe to lifecycle events.
    fn on_event(&self, callback: TransportCallback);
}

impl<T: TcpSocket + ?Sized> TcpSocket for Box<T> {
    fn is_destroyed(&self) -> bool {
        (**self).is_destroyed()
    }

    fn is_readable(&self) -> bool {
        (**self).is_readable()
    }

    fn is_writable(&self) -> bool {
        (**self).is_writable()
    }

    fn destroy(&self) {
        (**self).destroy();
    }

    fn on_event(&self, callback: TransportCallback) {
        (**self).on_event(callback);
    }
}

#[async_trait]
impl<T: TlsSocket + ?Sized> TlsSocket for Box<T> {
    fn is_authorized(&self) -> bool {
        (**self).is_authorized()
    }

    fn protocol_version(&self) -> Option<String> {
        (**self).protocol_version()
    }

    async fn end(&self) -> io::Result<()> {
        (**self).end().await
    }
}

#[async_trait]
impl<T: Http2Session + ?Sized> Http2Session for Box<T> {
    fn is_destroyed(&self) -> bool {
        (**self).is_destroyed()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn goaway_received(&self) -> bool {
        (**self).goaway_received()
    }

    fn remote_window_size(&self) -> i64 {
        (**self).remote_window_size()
    }

    fn active_streams(&self) -> u32 {
        (**self).active_streams()
    }

    fn max_concurrent_streams(&self) -> Option<u32> {
        (**self).max_concurrent_streams()
    }

    fn cancel_streams(&self) {
        (**self).cancel_streams();
    }

    async fn close(&self) -> io::Result<()> {
        (**self).close().await
    }

    fn on_event(&self, callback: TransportCallback) {
        (**self).on_event(callback);
    }
}

#[async_trait]
impl<T: QuicSession + ?Sized> QuicSession for Box<T> {
    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn goaway_received(&self) -> bool {
        (**self).goaway_received()
    }

    fn remote_window_size(&self) -> i64 {
        (**self).remote_window_size()
    }

    fn active_streams(&self) -> u32 {
        (**self).active_streams()
    }

    fn max_concurrent_streams(&self) -> Option<u32> {
        (**self).max_concurrent_streams()
    }

    fn rtt(&self) -> Option<Duration> {
        (**self).rtt()
    }

    async fn close(&self, error_code: u64) -> io::Result<()> {
        (**self).close(error_code).await
    }

    fn on_event(&self, callback: TransportCallback) {
        (**self).on_event(callback);
    }
}

impl<T: WebSocketStream + ?Sized> WebSocketStream for Box<T> {
    fn ready_state(&self) -> ReadyState {
        (**self).ready_state()
    }

    fn terminate(&self) {
        (**self).terminate();
    }

    fn on_event(&self, callback: TransportCallback) {
        (**self).on_event(callback);
    }
}

impl<T: GrpcCall + ?Sized> GrpcCall for Box<T> {
    fn method(&self) -> Option<String> {
        (**self).method()
    }

    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }

    fn cancel(&self) {
        (**self).cancel();
    }

    fn on_event(&self, callback: TransportCallback) {
        (**self).on_event(callback);
    }
}

/// Apply the lifecycle effects every protocol shares.
///
/// Close, error and timeout remove the connection. Everything else is handed
/// back for protocol-specific handling, and only [`TransportEvent::Activity`]
/// refreshes `last_used`. Keep-alive and stream control traffic does not keep
/// an unused connection out of the idle sweep.
pub(crate) fn apply_common<A: ProtocolAdapter>(
    handle: &ConnectionHandle<A>,
    event: TransportEvent,
) -> Option<TransportEvent> {
    match event {
        TransportEvent::Close => {
            handle.remove(RemovalReason::Closed);
            None
        }
        TransportEvent::Error(message) => {
            handle.report_error(message.clone());
            handle.remove(RemovalReason::Error(message));
            None
        }
        TransportEvent::Timeout => {
            handle.report_timeout();
            handle.remove(RemovalReason::Timeout);
            None
        }
        TransportEvent::Activity { .. } => {
            handle.touch();
            Some(event)
        }
        other => Some(other),
    }
}
