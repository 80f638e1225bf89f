//! Built-in adapter integration tests.
//!
//! Each suite drives a real pool through the mock transports and checks the
//! adapter's validation, health predicate, teardown and event wiring.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use wirepool::adapters::{
    GrpcAdapter, H3_NO_ERROR, Http2Adapter, Http3Adapter, HttpAdapter, HttpsAdapter, ReadyState,
    TcpSocket, TransportEvent, WebSocketAdapter, WebSocketStream,
};
use wirepool::{
    ConnectionPoolManager, PoolConfig, PoolError, PoolEvent, PoolEventKind, ProtocolAdapter,
    ReleaseOptions, RemovalReason, RequestOptions,
};
use wirepool_testing::{
    CloseBehavior, EventRecorder, MockDialer, MockGrpcCall, MockHttp2Session, MockQuicSession,
    MockTcpSocket, MockTlsSocket, MockWebSocket, settle,
};

fn pool<A: ProtocolAdapter>(adapter: A, config: PoolConfig) -> ConnectionPoolManager<A> {
    ConnectionPoolManager::builder(adapter)
        .config(config)
        .background_tasks(false)
        .build()
        .unwrap()
}

fn removal_reasons(recorder: &EventRecorder) -> Vec<RemovalReason> {
    recorder
        .of_kind(PoolEventKind::ConnectionRemoved)
        .into_iter()
        .map(|event| match event {
            PoolEvent::ConnectionRemoved { reason, .. } => reason,
            other => panic!("unexpected event {other:?}"),
        })
        .collect()
}

fn short_wait() -> RequestOptions {
    RequestOptions::new().timeout(Duration::from_millis(50))
}

// =============================================================================
// HTTP/1.1
// =============================================================================

#[tokio::test]
async fn test_http_close_event_removes_and_destroys() {
    let pool = pool(HttpAdapter::<MockTcpSocket>::new(), PoolConfig::http());
    let recorder = EventRecorder::attach(&pool);
    let socket = MockTcpSocket::shared();
    pool.add_connection(Arc::clone(&socket)).unwrap();
    assert_eq!(socket.subscriber_count(), 1);

    socket.emit(TransportEvent::Close);
    assert_eq!(pool.active_connections(), 0);

    settle().await;
    assert_eq!(socket.destroy_calls(), 1);
    assert_eq!(removal_reasons(&recorder), vec![RemovalReason::Closed]);
}

#[tokio::test]
async fn test_http_error_event_is_reported_then_removed() {
    let pool = pool(HttpAdapter::<MockTcpSocket>::new(), PoolConfig::http());
    let recorder = EventRecorder::attach(&pool);
    let socket = MockTcpSocket::shared();
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();

    socket.emit(TransportEvent::Error("connection reset".into()));
    settle().await;

    let errors = recorder.of_kind(PoolEventKind::ConnectionError);
    assert_eq!(
        errors,
        vec![PoolEvent::ConnectionError {
            protocol: pool.protocol(),
            id,
            error: "connection reset".into(),
        }]
    );
    assert_eq!(
        removal_reasons(&recorder),
        vec![RemovalReason::Error("connection reset".into())]
    );
    assert_eq!(pool.metrics().connection_errors, 1);
    assert_eq!(socket.destroy_calls(), 1);
}

#[tokio::test]
async fn test_http_timeout_event() {
    let pool = pool(HttpAdapter::<MockTcpSocket>::new(), PoolConfig::http());
    let recorder = EventRecorder::attach(&pool);
    let socket = MockTcpSocket::shared();
    pool.add_connection(Arc::clone(&socket)).unwrap();

    socket.emit(TransportEvent::Timeout);
    settle().await;

    assert_eq!(recorder.count(PoolEventKind::ConnectionTimeout), 1);
    assert_eq!(removal_reasons(&recorder), vec![RemovalReason::Timeout]);
}

#[tokio::test]
async fn test_http_activity_updates_byte_counters() {
    let pool = pool(HttpAdapter::<MockTcpSocket>::new(), PoolConfig::http());
    let socket = MockTcpSocket::shared();
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();

    socket.emit(TransportEvent::Activity {
        bytes_read: 100,
        bytes_written: 40,
    });
    socket.emit(TransportEvent::Activity {
        bytes_read: 20,
        bytes_written: 2,
    });

    let metadata = pool.connection_metadata(id).unwrap();
    assert_eq!(metadata.protocol.bytes_read, 120);
    assert_eq!(metadata.protocol.bytes_written, 42);
}

#[tokio::test(start_paused = true)]
async fn test_http_half_closed_socket_is_not_reused() {
    let pool = pool(HttpAdapter::<MockTcpSocket>::new(), PoolConfig::http());
    let socket = MockTcpSocket::shared();
    pool.add_connection(Arc::clone(&socket)).unwrap();
    socket.set_writable(false);

    let acquisition = pool.request_connection(short_wait()).await;
    assert!(acquisition.error().unwrap().is_timeout());

    assert_eq!(pool.sweep_idle_connections().await, 1);
    assert_eq!(socket.destroy_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_http_keep_alive_expiry() {
    let pool = pool(HttpAdapter::<MockTcpSocket>::new(), PoolConfig::http());
    let recorder = EventRecorder::attach(&pool);
    let socket = MockTcpSocket::shared();
    pool.add_connection(Arc::clone(&socket)).unwrap();

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(pool.sweep_idle_connections().await, 0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(pool.sweep_idle_connections().await, 1);
    assert_eq!(removal_reasons(&recorder), vec![RemovalReason::Unhealthy]);
}

#[tokio::test]
async fn test_http_destroyed_socket_rejected() {
    let pool = pool(HttpAdapter::<MockTcpSocket>::new(), PoolConfig::http());
    let socket = MockTcpSocket::shared();
    socket.set_destroyed(true);
    assert!(pool.add_connection(socket).is_none());
    assert_eq!(pool.active_connections(), 0);
}

// =============================================================================
// HTTPS
// =============================================================================

#[tokio::test]
async fn test_https_records_tls_version() {
    let pool = pool(HttpsAdapter::<MockTlsSocket>::new(), PoolConfig::https());
    let socket = MockTlsSocket::shared();
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();

    let metadata = pool.connection_metadata(id).unwrap();
    assert_eq!(metadata.protocol.protocol_version.as_deref(), Some("TLSv1.3"));

    socket.emit(TransportEvent::Activity {
        bytes_read: 7,
        bytes_written: 0,
    });
    assert_eq!(pool.connection_metadata(id).unwrap().protocol.http.bytes_read, 7);
}

#[tokio::test]
async fn test_https_unauthorized_peer_is_unhealthy() {
    let pool = pool(HttpsAdapter::<MockTlsSocket>::new(), PoolConfig::https());
    let socket = MockTlsSocket::shared();
    pool.add_connection(Arc::clone(&socket)).unwrap();

    assert_eq!(pool.sweep_idle_connections().await, 0);
    socket.set_authorized(false);
    assert_eq!(pool.sweep_idle_connections().await, 1);
}

#[tokio::test]
async fn test_https_graceful_close() {
    let pool = pool(HttpsAdapter::<MockTlsSocket>::new(), PoolConfig::https());
    let socket = MockTlsSocket::shared();
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();

    assert!(pool.remove_connection(id, RemovalReason::Manual("drain".into())).await);
    assert_eq!(socket.end_calls(), 1);
    assert!(socket.is_destroyed());
    assert_eq!(socket.socket().destroy_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_https_hanging_close_is_destroyed_after_grace() {
    let pool = pool(HttpsAdapter::<MockTlsSocket>::new(), PoolConfig::https());
    let socket = MockTlsSocket::shared();
    socket.set_close_behavior(CloseBehavior::Hang);
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();

    let started = tokio::time::Instant::now();
    assert!(pool.remove_connection(id, RemovalReason::Released).await);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(socket.end_calls(), 1);
    assert_eq!(socket.socket().destroy_calls(), 1);
}

#[tokio::test]
async fn test_https_failed_close_is_destroyed() {
    let pool = pool(
        HttpsAdapter::<MockTlsSocket>::from_config(&PoolConfig::https()),
        PoolConfig::https(),
    );
    let socket = MockTlsSocket::shared();
    socket.set_close_behavior(CloseBehavior::Fail);
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();

    let acquisition = pool.request_connection(RequestOptions::new()).await;
    assert_eq!(acquisition.connection_id(), Some(id));

    assert!(pool.release_connection(id, ReleaseOptions::destroyed()).await);
    assert_eq!(socket.end_calls(), 1);
    assert_eq!(socket.socket().destroy_calls(), 1);
    assert_eq!(pool.active_connections(), 0);
}

// =============================================================================
// HTTP/2
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_http2_reuse_requires_spare_streams() {
    let pool = pool(Http2Adapter::<MockHttp2Session>::new(), PoolConfig::http2());
    let session = Arc::new(MockHttp2Session::new().with_peer_max_streams(1));
    let id = pool.add_connection(Arc::clone(&session)).unwrap();
    assert_eq!(
        pool.connection_metadata(id).unwrap().protocol.max_concurrent_streams,
        1
    );

    session.emit(TransportEvent::StreamOpened);
    let acquisition = pool.request_connection(short_wait()).await;
    assert!(acquisition.error().unwrap().is_timeout());

    session.emit(TransportEvent::StreamClosed);
    let acquisition = pool.request_connection(short_wait()).await;
    assert_eq!(acquisition.connection_id(), Some(id));

    let metadata = pool.connection_metadata(id).unwrap();
    assert_eq!(metadata.protocol.active_streams, 0);
    assert_eq!(metadata.protocol.streams_total, 1);
}

#[tokio::test]
async fn test_http2_goaway_event_marks_unhealthy() {
    let pool = pool(Http2Adapter::<MockHttp2Session>::new(), PoolConfig::http2());
    let recorder = EventRecorder::attach(&pool);
    let session = MockHttp2Session::shared();
    let id = pool.add_connection(Arc::clone(&session)).unwrap();

    session.emit(TransportEvent::GoAway);
    assert!(pool.connection_metadata(id).unwrap().protocol.goaway);

    assert_eq!(pool.sweep_idle_connections().await, 1);
    assert_eq!(removal_reasons(&recorder), vec![RemovalReason::Unhealthy]);
    assert_eq!(session.cancel_calls(), 1);
    assert_eq!(session.close_calls(), 1);
}

#[tokio::test]
async fn test_http2_exhausted_window_is_unhealthy() {
    let pool = pool(Http2Adapter::<MockHttp2Session>::new(), PoolConfig::http2());
    let session = MockHttp2Session::shared();
    pool.add_connection(Arc::clone(&session)).unwrap();

    session.set_window(0);
    assert_eq!(pool.sweep_idle_connections().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_http2_unacknowledged_ping() {
    let config = PoolConfig::http2().connection_timeout(Duration::from_secs(300));
    let pool = pool(Http2Adapter::<MockHttp2Session>::new(), config);
    let recorder = EventRecorder::attach(&pool);

    let acked = MockHttp2Session::shared();
    let silent = MockHttp2Session::shared();
    pool.add_connection(Arc::clone(&acked)).unwrap();
    let silent_id = pool.add_connection(Arc::clone(&silent)).unwrap();

    acked.emit(TransportEvent::PingSent);
    silent.emit(TransportEvent::PingSent);
    tokio::time::advance(Duration::from_secs(1)).await;
    acked.emit(TransportEvent::Pong);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(pool.sweep_idle_connections().await, 1);

    let removed = recorder.of_kind(PoolEventKind::ConnectionRemoved);
    assert!(matches!(
        &removed[..],
        [PoolEvent::ConnectionRemoved { id, reason: RemovalReason::Unhealthy, .. }] if *id == silent_id
    ));
}

#[tokio::test]
async fn test_http2_closed_session_teardown_skips_close() {
    let pool = pool(Http2Adapter::<MockHttp2Session>::new(), PoolConfig::http2());
    let session = MockHttp2Session::shared();
    let id = pool.add_connection(Arc::clone(&session)).unwrap();

    session.set_closed(true);
    assert!(pool.remove_connection(id, RemovalReason::Closed).await);
    assert_eq!(session.cancel_calls(), 1);
    assert_eq!(session.close_calls(), 0);

    let destroyed = MockHttp2Session::shared();
    destroyed.set_destroyed(true);
    assert!(pool.add_connection(destroyed).is_none());
}

#[tokio::test]
async fn test_http2_local_stream_limit_from_config() {
    let config = PoolConfig::http2().protocol_value("max_concurrent_streams", 4);
    let pool = pool(Http2Adapter::<MockHttp2Session>::from_config(&config), config);
    let session = Arc::new(MockHttp2Session::new().with_peer_max_streams(250));
    let id = pool.add_connection(session).unwrap();

    assert_eq!(
        pool.connection_metadata(id).unwrap().protocol.max_concurrent_streams,
        4
    );
}

// =============================================================================
// HTTP/3
// =============================================================================

#[tokio::test]
async fn test_http3_high_rtt_is_unhealthy() {
    let pool = pool(Http3Adapter::<MockQuicSession>::new(), PoolConfig::http3());
    let session = MockQuicSession::shared();
    pool.add_connection(Arc::clone(&session)).unwrap();

    session.set_rtt(None);
    assert_eq!(pool.sweep_idle_connections().await, 0);

    session.set_rtt(Some(Duration::from_millis(4999)));
    assert_eq!(pool.sweep_idle_connections().await, 0);

    session.set_rtt(Some(Duration::from_millis(5000)));
    assert_eq!(pool.sweep_idle_connections().await, 1);
    assert_eq!(session.close_codes(), vec![H3_NO_ERROR]);
}

#[tokio::test]
async fn test_http3_rtt_limit_from_config() {
    let config = PoolConfig::http3().protocol_value("max_rtt_ms", 100);
    let pool = pool(Http3Adapter::<MockQuicSession>::new(), config);
    let session = MockQuicSession::shared();
    session.set_rtt(Some(Duration::from_millis(200)));
    pool.add_connection(Arc::clone(&session)).unwrap();

    assert_eq!(pool.sweep_idle_connections().await, 1);
}

#[tokio::test]
async fn test_http3_goaway_and_closed_sessions() {
    let pool = pool(Http3Adapter::<MockQuicSession>::new(), PoolConfig::http3());
    let session = MockQuicSession::shared();
    pool.add_connection(Arc::clone(&session)).unwrap();

    session.set_goaway(true);
    assert_eq!(pool.sweep_idle_connections().await, 1);

    let closed = MockQuicSession::shared();
    closed.set_closed(true);
    assert!(pool.add_connection(closed).is_none());
}

// =============================================================================
// WebSocket
// =============================================================================

#[tokio::test]
async fn test_websocket_ready_states() {
    let pool = pool(WebSocketAdapter::<MockWebSocket>::new(), PoolConfig::websocket());

    let closed = Arc::new(MockWebSocket::with_state(ReadyState::Closed));
    assert!(pool.add_connection(closed).is_none());

    let connecting = Arc::new(MockWebSocket::with_state(ReadyState::Connecting));
    pool.add_connection(Arc::clone(&connecting)).unwrap();
    assert_eq!(pool.sweep_idle_connections().await, 1);
    assert_eq!(connecting.terminate_calls(), 1);

    let open = MockWebSocket::shared();
    pool.add_connection(Arc::clone(&open)).unwrap();
    assert_eq!(pool.sweep_idle_connections().await, 0);

    open.set_ready_state(ReadyState::Closing);
    assert_eq!(pool.sweep_idle_connections().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_websocket_keepalive_does_not_refresh_idle_time() {
    let config = PoolConfig::websocket().connection_timeout(Duration::from_secs(60));
    let pool = pool(WebSocketAdapter::<MockWebSocket>::new(), config);
    let recorder = EventRecorder::attach(&pool);
    let pinging = MockWebSocket::shared();
    let busy = MockWebSocket::shared();
    let pinging_id = pool.add_connection(Arc::clone(&pinging)).unwrap();
    let busy_id = pool.add_connection(Arc::clone(&busy)).unwrap();

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(20)).await;
        pinging.emit(TransportEvent::PingSent);
        pinging.emit(TransportEvent::Pong);
        busy.emit(TransportEvent::Activity {
            bytes_read: 16,
            bytes_written: 16,
        });
    }

    assert_eq!(pool.sweep_idle_connections().await, 1);
    assert!(pool.connection_metadata(pinging_id).is_none());
    assert!(pool.connection_metadata(busy_id).is_some());
    assert!(matches!(
        &recorder.of_kind(PoolEventKind::ConnectionRemoved)[..],
        [PoolEvent::ConnectionRemoved { id, reason: RemovalReason::Idle, .. }] if *id == pinging_id
    ));
}

#[tokio::test(start_paused = true)]
async fn test_websocket_overdue_pong() {
    let pool = pool(WebSocketAdapter::<MockWebSocket>::new(), PoolConfig::websocket());
    let recorder = EventRecorder::attach(&pool);
    let stream = MockWebSocket::shared();
    let id = pool.add_connection(Arc::clone(&stream)).unwrap();

    stream.emit(TransportEvent::PingSent);
    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(pool.sweep_idle_connections().await, 0);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(pool.sweep_idle_connections().await, 1);
    assert!(matches!(
        &recorder.of_kind(PoolEventKind::ConnectionRemoved)[..],
        [PoolEvent::ConnectionRemoved { id: removed, reason: RemovalReason::Unhealthy, .. }] if *removed == id
    ));
    assert_eq!(stream.terminate_calls(), 1);
}

#[tokio::test]
async fn test_websocket_counts_messages() {
    let pool = pool(WebSocketAdapter::<MockWebSocket>::new(), PoolConfig::websocket());
    let stream = MockWebSocket::shared();
    let id = pool.add_connection(Arc::clone(&stream)).unwrap();

    for _ in 0..3 {
        stream.emit(TransportEvent::Activity {
            bytes_read: 1,
            bytes_written: 0,
        });
    }
    assert_eq!(pool.connection_metadata(id).unwrap().protocol.messages, 3);
}

#[tokio::test]
async fn test_websocket_dialer_creates_connections() {
    let dialer = MockDialer::new();
    let pool = pool(
        WebSocketAdapter::<MockWebSocket>::with_dialer(dialer.clone()),
        PoolConfig::websocket(),
    );

    let acquisition = pool.request_connection(RequestOptions::new()).await;
    let conn = acquisition.into_result().unwrap();
    assert_eq!(dialer.dials(), 1);
    assert_eq!(pool.active_connections(), 1);
    assert_eq!(pool.in_use_connections(), 1);
    assert_eq!(conn.ready_state(), ReadyState::Open);
    assert_eq!(conn.subscriber_count(), 1);

    // Released connections are reused before dialing again.
    assert!(pool.release_connection(conn.id(), ReleaseOptions::new()).await);
    let again = pool.request_connection(RequestOptions::new()).await;
    assert_eq!(again.connection_id(), Some(conn.id()));
    assert_eq!(dialer.dials(), 1);

    dialer.set_failing(true);
    let failed = pool.request_connection(RequestOptions::new()).await;
    assert!(matches!(failed.error(), Some(PoolError::ProtocolCreation(_))));
    assert_eq!(pool.metrics().requests_failed, 1);
}

// =============================================================================
// gRPC
// =============================================================================

#[tokio::test]
async fn test_grpc_records_method_and_messages() {
    let pool = pool(GrpcAdapter::<MockGrpcCall>::new(), PoolConfig::grpc());
    let call = MockGrpcCall::shared("/echo.Echo/Say");
    let id = pool.add_connection(Arc::clone(&call)).unwrap();

    call.emit(TransportEvent::Activity {
        bytes_read: 12,
        bytes_written: 12,
    });
    let metadata = pool.connection_metadata(id).unwrap();
    assert_eq!(metadata.protocol.method.as_deref(), Some("/echo.Echo/Say"));
    assert_eq!(metadata.protocol.messages, 1);
}

#[tokio::test]
async fn test_grpc_cancelled_call_rejected() {
    let pool = pool(GrpcAdapter::<MockGrpcCall>::new(), PoolConfig::grpc());
    let call = MockGrpcCall::shared("/echo.Echo/Say");
    call.set_cancelled(true);
    assert!(pool.add_connection(call).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_grpc_idle_call_is_swept_and_cancelled() {
    let pool = pool(GrpcAdapter::<MockGrpcCall>::new(), PoolConfig::grpc());
    let recorder = EventRecorder::attach(&pool);
    let call = MockGrpcCall::shared("/echo.Echo/Stream");
    pool.add_connection(Arc::clone(&call)).unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(pool.sweep_idle_connections().await, 1);
    assert_eq!(removal_reasons(&recorder), vec![RemovalReason::Idle]);
    assert_eq!(call.cancel_calls(), 1);
}
