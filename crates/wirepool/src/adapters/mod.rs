//! Built-in protocol adapters.
//!
//! One adapter per supported wire protocol. Each is generic over the
//! transport type it pools and defaults to the boxed trait object, so
//! `HttpAdapter` alone means `HttpAdapter<Box<dyn TcpSocket>>`.
//!
//! | Adapter | Transport | Health | Teardown |
//! |---|---|---|---|
//! | [`HttpAdapter`] | [`TcpSocket`] | open both ways, idle within keep-alive | destroy |
//! | [`HttpsAdapter`] | [`TlsSocket`] | HTTP rule plus authorized peer | `close_notify`, destroy after grace |
//! | [`Http2Adapter`] | [`Http2Session`] | open, no GOAWAY, window > 0, ping acked or recent | cancel streams, close |
//! | [`Http3Adapter`] | [`QuicSession`] | HTTP/2 rule plus RTT below 5s | QUIC close |
//! | [`WebSocketAdapter`] | [`WebSocketStream`] | `Open`, no overdue pong | terminate |
//! | [`GrpcAdapter`] | [`GrpcCall`] | not cancelled, idle within `connection_timeout` | cancel |

mod grpc;
mod http;
mod http2;
mod http3;
mod https;
pub mod transport;
mod websocket;

pub use grpc::{GrpcAdapter, GrpcMetadata};
pub use http::{HttpAdapter, HttpMetadata};
pub use http2::{DEFAULT_MAX_CONCURRENT_STREAMS, Http2Adapter, SessionMetadata};
pub use http3::{H3_NO_ERROR, Http3Adapter, MAX_RTT};
pub use https::{HttpsAdapter, HttpsMetadata, TLS_GRACE_PERIOD};
pub use transport::{
    GrpcCall, Http2Session, QuicSession, ReadyState, TcpSocket, TlsSocket, TransportCallback,
    TransportEvent, WebSocketStream,
};
pub use websocket::{DEFAULT_PONG_TIMEOUT, WebSocketAdapter, WebSocketDialer, WebSocketMetadata};
