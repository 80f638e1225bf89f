//! # wirepool-testing
//!
//! Test infrastructure for wirepool.
//!
//! This crate provides scriptable mock transports for every built-in
//! adapter and an event recorder for asserting on pool lifecycle events.
//! The integration suites that drive whole pools through these mocks live
//! in this crate's `tests/` directory.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wirepool::{ConnectionPoolManager, PoolConfig, PoolEventKind};
//! use wirepool::adapters::{HttpAdapter, TransportEvent};
//! use wirepool_testing::{EventRecorder, MockTcpSocket, settle};
//!
//! let pool = ConnectionPoolManager::new(HttpAdapter::<MockTcpSocket>::new(), PoolConfig::http())?;
//! let recorder = EventRecorder::attach(&pool);
//!
//! let socket = MockTcpSocket::shared();
//! pool.add_connection(socket.clone());
//!
//! socket.emit(TransportEvent::Close);
//! settle().await;
//! assert_eq!(recorder.count(PoolEventKind::ConnectionRemoved), 1);
//! assert_eq!(socket.destroy_calls(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod recorder;
pub mod transport;

pub use recorder::{EventRecorder, settle};
pub use transport::{
    CloseBehavior, INITIAL_WINDOW_SIZE, MockDialer, MockGrpcCall, MockHttp2Session,
    MockQuicSession, MockTcpSocket, MockTlsSocket, MockWebSocket,
};
