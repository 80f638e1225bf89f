//! End-to-end pool scenarios over mock transports.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use wirepool::adapters::{Http2Adapter, HttpAdapter, TransportEvent};
use wirepool::{
    ConnectionPoolFactory, ConnectionPoolManager, HealthStatus, PoolConfig,
    PoolConfigUpdate, PoolError, PoolEvent, PoolEventKind, Priority, ReleaseOptions,
    RemovalReason, RequestOptions,
};
use wirepool_testing::{EventRecorder, MockHttp2Session, MockTcpSocket, settle};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn http_pool(max: u32) -> ConnectionPoolManager<HttpAdapter<MockTcpSocket>> {
    init_tracing();
    ConnectionPoolManager::builder(HttpAdapter::new())
        .config(PoolConfig::http().max_connections(max))
        .background_tasks(false)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_capacity_scenario() {
    let pool = http_pool(2);
    let recorder = EventRecorder::attach(&pool);
    let first = MockTcpSocket::shared();
    let second = MockTcpSocket::shared();
    pool.add_connection(Arc::clone(&first)).unwrap();
    pool.add_connection(Arc::clone(&second)).unwrap();

    // Two stored connections at max 2: the pool refuses further work.
    assert!(!pool.can_accept_connection());
    let refused = pool.request_connection(RequestOptions::new()).await;
    assert!(refused.error().unwrap().is_capacity());
    assert_eq!(recorder.count(PoolEventKind::PoolLimitReached), 1);
    assert_eq!(pool.health().status, HealthStatus::Overloaded);

    // The first socket closes; the slot frees up immediately.
    first.emit(TransportEvent::Close);
    assert_eq!(pool.active_connections(), 1);
    assert!(pool.can_accept_connection());
    assert_eq!(pool.health().status, HealthStatus::Healthy);

    let served = pool.request_connection(RequestOptions::new()).await;
    let conn = served.into_result().unwrap();
    assert!(Arc::ptr_eq(conn.connection(), &second));

    settle().await;
    assert_eq!(first.destroy_calls(), 1);

    let health_changes: Vec<(HealthStatus, HealthStatus)> = recorder
        .of_kind(PoolEventKind::HealthStatusChanged)
        .into_iter()
        .map(|event| match event {
            PoolEvent::HealthStatusChanged {
                previous, current, ..
            } => (previous, current),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(
        health_changes,
        vec![
            (HealthStatus::Healthy, HealthStatus::Overloaded),
            (HealthStatus::Overloaded, HealthStatus::Healthy),
        ]
    );
}

#[tokio::test]
async fn test_release_hands_connection_to_waiter() {
    let pool = http_pool(4);
    let socket = MockTcpSocket::shared();
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();

    let held = pool.request_connection(RequestOptions::new()).await;
    assert_eq!(held.connection_id(), Some(id));

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.request_connection(RequestOptions::new().timeout(Duration::from_secs(5)))
                .await
        })
    };
    while pool.waiting_requests() == 0 {
        tokio::task::yield_now().await;
    }

    assert!(pool.release_connection(id, ReleaseOptions::new()).await);
    let served = waiter.await.unwrap();
    assert_eq!(served.connection_id(), Some(id));
    assert_eq!(pool.waiting_requests(), 0);
    assert_eq!(pool.connection_metadata(id).unwrap().use_count, 2);
}

#[tokio::test]
async fn test_accepted_connection_serves_waiter() {
    let pool = http_pool(4);

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.request_connection(RequestOptions::new()).await })
    };
    while pool.waiting_requests() == 0 {
        tokio::task::yield_now().await;
    }

    let socket = MockTcpSocket::shared();
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();
    let served = waiter.await.unwrap();
    assert_eq!(served.connection_id(), Some(id));
    assert_eq!(pool.in_use_connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_priority_order_across_release() {
    let pool = http_pool(4);
    let socket = MockTcpSocket::shared();
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();
    pool.request_connection(RequestOptions::new())
        .await
        .into_result()
        .unwrap();

    let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut tasks = Vec::new();
    for priority in [Priority::Low, Priority::Normal, Priority::High] {
        let task_pool = pool.clone();
        let order_tx = order_tx.clone();
        tasks.push(tokio::spawn(async move {
            let acquisition = task_pool
                .request_connection(RequestOptions::new().priority(priority))
                .await;
            let conn = acquisition.into_result().unwrap();
            order_tx.send(priority).unwrap();
            task_pool.release_connection(conn.id(), ReleaseOptions::new()).await;
        }));
        while pool.waiting_requests() < tasks.len() {
            tokio::task::yield_now().await;
        }
    }

    pool.release_connection(id, ReleaseOptions::new()).await;
    for task in tasks {
        task.await.unwrap();
    }

    let mut order = Vec::new();
    while let Ok(priority) = order_rx.try_recv() {
        order.push(priority);
    }
    assert_eq!(order, vec![Priority::High, Priority::Normal, Priority::Low]);
}

#[tokio::test]
async fn test_release_with_error_removes_connection() {
    let pool = http_pool(4);
    let recorder = EventRecorder::attach(&pool);
    let socket = MockTcpSocket::shared();
    let id = pool.add_connection(Arc::clone(&socket)).unwrap();
    pool.request_connection(RequestOptions::new()).await;

    assert!(
        pool.release_connection(id, ReleaseOptions::with_error("malformed request"))
            .await
    );
    assert_eq!(socket.destroy_calls(), 1);
    assert!(matches!(
        &recorder.of_kind(PoolEventKind::ConnectionRemoved)[..],
        [PoolEvent::ConnectionRemoved { reason: RemovalReason::Error(message), total: 0, .. }]
            if message == "malformed request"
    ));
    assert!(!pool.release_connection(id, ReleaseOptions::new()).await);
}

#[tokio::test]
async fn test_destroy_tears_everything_down() {
    let pool = http_pool(4);
    let recorder = EventRecorder::attach(&pool);
    let sockets: Vec<Arc<MockTcpSocket>> = (0..3).map(|_| MockTcpSocket::shared()).collect();
    for socket in &sockets {
        pool.add_connection(Arc::clone(socket)).unwrap();
    }
    for _ in 0..3 {
        pool.request_connection(RequestOptions::new()).await;
    }

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.request_connection(RequestOptions::new()).await })
    };
    while pool.waiting_requests() == 0 {
        tokio::task::yield_now().await;
    }

    pool.destroy().await.unwrap();
    let resolved = waiter.await.unwrap();
    assert!(matches!(resolved.error(), Some(PoolError::Destroyed)));

    assert!(sockets.iter().all(|socket| socket.destroy_calls() == 1));
    assert_eq!(pool.active_connections(), 0);
    assert_eq!(pool.health().status, HealthStatus::Unavailable);
    assert_eq!(recorder.count(PoolEventKind::ConnectionRemoved), 3);
    assert!(pool.add_connection(MockTcpSocket::shared()).is_none());

    // Late transport events are no-ops once the pool is gone.
    assert_eq!(sockets[0].emit(TransportEvent::Close), 1);
    pool.destroy().await.unwrap();
}

#[tokio::test]
async fn test_update_config_raises_capacity() {
    let pool = http_pool(1);
    pool.add_connection(MockTcpSocket::shared()).unwrap();
    assert!(!pool.can_accept_connection());

    assert!(!pool.update_config(&PoolConfigUpdate::new().max_connections(0)));
    assert_eq!(pool.config().max_connections, 1);

    assert!(pool.update_config(&PoolConfigUpdate::new().max_connections(10)));
    assert!(pool.can_accept_connection());
    assert_eq!(pool.health().status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_released_session_keeps_stream_accounting() {
    let pool = ConnectionPoolManager::builder(Http2Adapter::<MockHttp2Session>::new())
        .config(PoolConfig::http2())
        .background_tasks(false)
        .build()
        .unwrap();
    let session = Arc::new(MockHttp2Session::new().with_peer_max_streams(10));
    let id = pool.add_connection(Arc::clone(&session)).unwrap();

    let conn = pool
        .request_connection(RequestOptions::new())
        .await
        .into_result()
        .unwrap();
    session.emit(TransportEvent::StreamOpened);
    pool.release_connection(conn.id(), ReleaseOptions::new()).await;

    let again = pool.request_connection(RequestOptions::new()).await;
    assert_eq!(again.connection_id(), Some(id));
    assert_eq!(pool.connection_metadata(id).unwrap().protocol.active_streams, 1);
}

#[tokio::test]
async fn test_factory_pools_accept_boxed_transports() {
    let factory = ConnectionPoolFactory::with_default_adapters();
    let pool = factory
        .create_typed::<HttpAdapter>("http", PoolConfig::http().max_connections(8))
        .unwrap();

    let socket: Box<dyn wirepool::adapters::TcpSocket> = Box::new(MockTcpSocket::new());
    let id = pool.add_connection(socket).unwrap();
    let conn = pool
        .request_connection(RequestOptions::new())
        .await
        .into_result()
        .unwrap();
    assert_eq!(conn.id(), id);

    let cached = factory
        .create("HTTP", PoolConfig::http().max_connections(8))
        .unwrap();
    assert_eq!(cached.status().in_use, 1);

    let metrics = factory.get_all_metrics();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].active_connections, 1);

    assert_eq!(factory.destroy_all().await.unwrap(), 1);
    assert!(pool.is_destroyed());
    assert!(cached.is_destroyed());
}
