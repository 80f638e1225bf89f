//! Scriptable transports implementing the adapter capability traits.
//!
//! Every mock keeps its flags in atomics so a test can hold an `Arc` to the
//! same object the pool stores, flip state, and fire lifecycle events with
//! [`emit`](MockTcpSocket::emit).

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use wirepool::adapters::{
    GrpcCall, Http2Session, QuicSession, ReadyState, TcpSocket, TlsSocket, TransportCallback,
    TransportEvent, WebSocketDialer, WebSocketStream,
};
use wirepool::{AdapterError, RequestOptions};

/// Connection-level flow-control window a fresh HTTP/2 or QUIC session starts with.
pub const INITIAL_WINDOW_SIZE: i64 = 65_535;

type SharedCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Registered `on_event` callbacks.
#[derive(Default)]
struct Subscribers {
    callbacks: Mutex<Vec<SharedCallback>>,
}

impl Subscribers {
    fn push(&self, callback: TransportCallback) {
        self.callbacks.lock().push(Arc::from(callback));
    }

    fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    // Callbacks re-enter the pool, so they run on a snapshot with the lock released.
    fn emit(&self, event: &TransportEvent) -> usize {
        let snapshot: Vec<SharedCallback> = self.callbacks.lock().clone();
        tracing::trace!(?event, subscribers = snapshot.len(), "mock transport event");
        for callback in &snapshot {
            callback(event.clone());
        }
        snapshot.len()
    }
}

macro_rules! impl_event_source {
    ($ty:ty) => {
        impl $ty {
            /// Deliver `event` to every registered callback.
            ///
            /// Returns the number of callbacks invoked.
            pub fn emit(&self, event: TransportEvent) -> usize {
                self.subscribers.emit(&event)
            }

            /// Number of registered callbacks.
            #[must_use]
            pub fn subscriber_count(&self) -> usize {
                self.subscribers.len()
            }
        }
    };
}

// =============================================================================
// TCP
// =============================================================================

/// A TCP socket for the HTTP adapter.
pub struct MockTcpSocket {
    destroyed: AtomicBool,
    readable: AtomicBool,
    writable: AtomicBool,
    destroy_calls: AtomicUsize,
    subscribers: Subscribers,
}

impl MockTcpSocket {
    /// An open socket.
    #[must_use]
    pub fn new() -> Self {
        Self {
            destroyed: AtomicBool::new(false),
            readable: AtomicBool::new(true),
            writable: AtomicBool::new(true),
            destroy_calls: AtomicUsize::new(0),
            subscribers: Subscribers::default(),
        }
    }

    /// An open socket behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Open or close the read side.
    pub fn set_readable(&self, readable: bool) {
        self.readable.store(readable, Ordering::SeqCst);
    }

    /// Open or close the write side.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Mark the socket destroyed without counting a `destroy` call.
    pub fn set_destroyed(&self, destroyed: bool) {
        self.destroyed.store(destroyed, Ordering::SeqCst);
    }

    /// Times `destroy` was called.
    #[must_use]
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTcpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl_event_source!(MockTcpSocket);

impl TcpSocket for MockTcpSocket {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn is_readable(&self) -> bool {
        self.readable.load(Ordering::SeqCst)
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn on_event(&self, callback: TransportCallback) {
        self.subscribers.push(callback);
    }
}

// =============================================================================
// TLS
// =============================================================================

/// How [`MockTlsSocket::end`](TlsSocket::end) behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseBehavior {
    /// `close_notify` completes and the socket ends up destroyed.
    Complete,
    /// `close_notify` fails with an I/O error.
    Fail,
    /// `close_notify` never completes.
    Hang,
}

/// A TLS socket for the HTTPS adapter.
pub struct MockTlsSocket {
    socket: MockTcpSocket,
    authorized: AtomicBool,
    protocol_version: Option<String>,
    close_behavior: Mutex<CloseBehavior>,
    end_calls: AtomicUsize,
}

impl MockTlsSocket {
    /// An authorized TLS 1.3 socket.
    #[must_use]
    pub fn new() -> Self {
        Self {
            socket: MockTcpSocket::new(),
            authorized: AtomicBool::new(true),
            protocol_version: Some("TLSv1.3".to_string()),
            close_behavior: Mutex::new(CloseBehavior::Complete),
            end_calls: AtomicUsize::new(0),
        }
    }

    /// An authorized socket behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The underlying TCP state.
    #[must_use]
    pub fn socket(&self) -> &MockTcpSocket {
        &self.socket
    }

    /// Set whether the peer certificate verified.
    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    /// Script the behavior of `end`.
    pub fn set_close_behavior(&self, behavior: CloseBehavior) {
        *self.close_behavior.lock() = behavior;
    }

    /// Times `end` was called.
    #[must_use]
    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }

    /// Deliver `event` to every registered callback.
    pub fn emit(&self, event: TransportEvent) -> usize {
        self.socket.emit(event)
    }
}

impl Default for MockTlsSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocket for MockTlsSocket {
    fn is_destroyed(&self) -> bool {
        self.socket.is_destroyed()
    }

    fn is_readable(&self) -> bool {
        self.socket.is_readable()
    }

    fn is_writable(&self) -> bool {
        self.socket.is_writable()
    }

    fn destroy(&self) {
        self.socket.destroy();
    }

    fn on_event(&self, callback: TransportCallback) {
        self.socket.on_event(callback);
    }
}

#[async_trait]
impl TlsSocket for MockTlsSocket {
    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    fn protocol_version(&self) -> Option<String> {
        self.protocol_version.clone()
    }

    async fn end(&self) -> io::Result<()> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.close_behavior.lock();
        match behavior {
            CloseBehavior::Complete => {
                self.socket.set_destroyed(true);
                Ok(())
            }
            CloseBehavior::Fail => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "peer reset during close_notify",
            )),
            CloseBehavior::Hang => std::future::pending().await,
        }
    }
}

// =============================================================================
// HTTP/2
// =============================================================================

/// An HTTP/2 session for the HTTP/2 adapter.
pub struct MockHttp2Session {
    destroyed: AtomicBool,
    closed: AtomicBool,
    goaway: AtomicBool,
    window: AtomicI64,
    active_streams: AtomicU32,
    peer_max_streams: Mutex<Option<u32>>,
    cancel_calls: AtomicUsize,
    close_calls: AtomicUsize,
    subscribers: Subscribers,
}

impl MockHttp2Session {
    /// An open session with no streams and no advertised stream limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            destroyed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            goaway: AtomicBool::new(false),
            window: AtomicI64::new(INITIAL_WINDOW_SIZE),
            active_streams: AtomicU32::new(0),
            peer_max_streams: Mutex::new(None),
            cancel_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            subscribers: Subscribers::default(),
        }
    }

    /// An open session behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advertise `SETTINGS_MAX_CONCURRENT_STREAMS`.
    #[must_use]
    pub fn with_peer_max_streams(self, limit: u32) -> Self {
        *self.peer_max_streams.lock() = Some(limit);
        self
    }

    /// Mark the session destroyed.
    pub fn set_destroyed(&self, destroyed: bool) {
        self.destroyed.store(destroyed, Ordering::SeqCst);
    }

    /// Mark the session closed.
    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }

    /// Set the GOAWAY flag the session reports.
    pub fn set_goaway(&self, goaway: bool) {
        self.goaway.store(goaway, Ordering::SeqCst);
    }

    /// Set the remaining flow-control window.
    pub fn set_window(&self, window: i64) {
        self.window.store(window, Ordering::SeqCst);
    }

    /// Set the open stream count the session reports.
    pub fn set_active_streams(&self, streams: u32) {
        self.active_streams.store(streams, Ordering::SeqCst);
    }

    /// Times `cancel_streams` was called.
    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Times `close` was called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockHttp2Session {
    fn default() -> Self {
        Self::new()
    }
}

impl_event_source!(MockHttp2Session);

#[async_trait]
impl Http2Session for MockHttp2Session {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn goaway_received(&self) -> bool {
        self.goaway.load(Ordering::SeqCst)
    }

    fn remote_window_size(&self) -> i64 {
        self.window.load(Ordering::SeqCst)
    }

    fn active_streams(&self) -> u32 {
        self.active_streams.load(Ordering::SeqCst)
    }

    fn max_concurrent_streams(&self) -> Option<u32> {
        *self.peer_max_streams.lock()
    }

    fn cancel_streams(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.active_streams.store(0, Ordering::SeqCst);
    }

    async fn close(&self) -> io::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_event(&self, callback: TransportCallback) {
        self.subscribers.push(callback);
    }
}

// =============================================================================
// QUIC
// =============================================================================

/// A QUIC session for the HTTP/3 adapter.
pub struct MockQuicSession {
    closed: AtomicBool,
    goaway: AtomicBool,
    window: AtomicI64,
    active_streams: AtomicU32,
    peer_max_streams: Mutex<Option<u32>>,
    rtt: Mutex<Option<Duration>>,
    close_codes: Mutex<Vec<u64>>,
    subscribers: Subscribers,
}

impl MockQuicSession {
    /// An open session with a 20ms round-trip time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            goaway: AtomicBool::new(false),
            window: AtomicI64::new(INITIAL_WINDOW_SIZE),
            active_streams: AtomicU32::new(0),
            peer_max_streams: Mutex::new(None),
            rtt: Mutex::new(Some(Duration::from_millis(20))),
            close_codes: Mutex::new(Vec::new()),
            subscribers: Subscribers::default(),
        }
    }

    /// An open session behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advertise a concurrent bidirectional stream limit.
    #[must_use]
    pub fn with_peer_max_streams(self, limit: u32) -> Self {
        *self.peer_max_streams.lock() = Some(limit);
        self
    }

    /// Mark the session closed.
    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }

    /// Set the GOAWAY flag the session reports.
    pub fn set_goaway(&self, goaway: bool) {
        self.goaway.store(goaway, Ordering::SeqCst);
    }

    /// Set the remaining flow-control window.
    pub fn set_window(&self, window: i64) {
        self.window.store(window, Ordering::SeqCst);
    }

    /// Set the smoothed round-trip time.
    pub fn set_rtt(&self, rtt: Option<Duration>) {
        *self.rtt.lock() = rtt;
    }

    /// Error codes passed to `close`, in call order.
    #[must_use]
    pub fn close_codes(&self) -> Vec<u64> {
        self.close_codes.lock().clone()
    }
}

impl Default for MockQuicSession {
    fn default() -> Self {
        Self::new()
    }
}

impl_event_source!(MockQuicSession);

#[async_trait]
impl QuicSession for MockQuicSession {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn goaway_received(&self) -> bool {
        self.goaway.load(Ordering::SeqCst)
    }

    fn remote_window_size(&self) -> i64 {
        self.window.load(Ordering::SeqCst)
    }

    fn active_streams(&self) -> u32 {
        self.active_streams.load(Ordering::SeqCst)
    }

    fn max_concurrent_streams(&self) -> Option<u32> {
        *self.peer_max_streams.lock()
    }

    fn rtt(&self) -> Option<Duration> {
        *self.rtt.lock()
    }

    async fn close(&self, error_code: u64) -> io::Result<()> {
        self.close_codes.lock().push(error_code);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_event(&self, callback: TransportCallback) {
        self.subscribers.push(callback);
    }
}

// =============================================================================
// WebSocket
// =============================================================================

/// A WebSocket stream for the WebSocket adapter.
pub struct MockWebSocket {
    state: Mutex<ReadyState>,
    terminate_calls: AtomicUsize,
    subscribers: Subscribers,
}

impl MockWebSocket {
    /// A stream in the `Open` state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(ReadyState::Open)
    }

    /// A stream in `state`.
    #[must_use]
    pub fn with_state(state: ReadyState) -> Self {
        Self {
            state: Mutex::new(state),
            terminate_calls: AtomicUsize::new(0),
            subscribers: Subscribers::default(),
        }
    }

    /// An open stream behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Move the stream to `state`.
    pub fn set_ready_state(&self, state: ReadyState) {
        *self.state.lock() = state;
    }

    /// Times `terminate` was called.
    #[must_use]
    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl_event_source!(MockWebSocket);

impl WebSocketStream for MockWebSocket {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn terminate(&self) {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ReadyState::Closed;
    }

    fn on_event(&self, callback: TransportCallback) {
        self.subscribers.push(callback);
    }
}

/// Dials [`MockWebSocket`] streams for active creation.
#[derive(Clone, Default)]
pub struct MockDialer {
    dials: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MockDialer {
    /// A dialer whose dials succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent dials fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Dial attempts so far.
    #[must_use]
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSocketDialer<MockWebSocket> for MockDialer {
    async fn dial(&self, _options: &RequestOptions) -> Result<MockWebSocket, AdapterError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::from(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "upstream refused the handshake",
            )));
        }
        Ok(MockWebSocket::new())
    }
}

// =============================================================================
// gRPC
// =============================================================================

/// A server-side gRPC call for the gRPC adapter.
pub struct MockGrpcCall {
    method: Option<String>,
    cancelled: AtomicBool,
    cancel_calls: AtomicUsize,
    subscribers: Subscribers,
}

impl MockGrpcCall {
    /// A live call serving `method`.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            cancelled: AtomicBool::new(false),
            cancel_calls: AtomicUsize::new(0),
            subscribers: Subscribers::default(),
        }
    }

    /// A live call behind an `Arc`.
    #[must_use]
    pub fn shared(method: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(method))
    }

    /// Mark the call cancelled without counting a `cancel` call.
    pub fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::SeqCst);
    }

    /// Times `cancel` was called.
    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

impl_event_source!(MockGrpcCall);

impl GrpcCall for MockGrpcCall {
    fn method(&self) -> Option<String> {
        self.method.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn on_event(&self, callback: TransportCallback) {
        self.subscribers.push(callback);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let socket = MockTcpSocket::new();
        let seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            socket.on_event(Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(socket.emit(TransportEvent::PingSent), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(socket.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_tls_close_behaviors() {
        let socket = MockTlsSocket::new();
        socket.end().await.unwrap();
        assert!(socket.is_destroyed());

        let failing = MockTlsSocket::new();
        failing.set_close_behavior(CloseBehavior::Fail);
        assert!(failing.end().await.is_err());
        assert!(!failing.is_destroyed());
        assert_eq!(failing.end_calls(), 1);
    }

    #[tokio::test]
    async fn test_dialer_failure() {
        let dialer = MockDialer::new();
        assert!(dialer.dial(&RequestOptions::new()).await.is_ok());
        dialer.set_failing(true);
        assert!(dialer.dial(&RequestOptions::new()).await.is_err());
        assert_eq!(dialer.dials(), 2);
    }
}
