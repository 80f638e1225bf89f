//! Real OS signals delivered to the test process.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use wirepool_terminus::{
    BoxError, Destroyable, EXIT_SUCCESS, ShutdownPhase, ShutdownTarget, TerminusManager,
    TerminusOptions, install_signal_handlers,
};

struct CountingServer {
    destroys: Arc<AtomicUsize>,
}

#[async_trait]
impl Destroyable for CountingServer {
    async fn destroy(&self) -> Result<(), BoxError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct GatedServer {
    gate: Arc<Notify>,
    destroys: Arc<AtomicUsize>,
}

#[async_trait]
impl Destroyable for GatedServer {
    async fn destroy(&self) -> Result<(), BoxError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(())
    }
}

fn send_sigterm() {
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(std::process::id().to_string())
        .status()
        .expect("kill should run");
    assert!(status.success());
}

async fn wait_for_phase(manager: &TerminusManager, phase: ShutdownPhase) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while manager.phase() != phase {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("coordinator never reached {phase:?}"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeated_sigterm_shuts_down_once() {
    let codes = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&codes);
    let manager = TerminusManager::init_instance(
        TerminusOptions::new()
            .handle_signals(false)
            .exit_hook(move |code| recorded.lock().push(code)),
    );

    let app_stops = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&app_stops);
    manager.on_app_stop(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
    });

    let gate = Arc::new(Notify::new());
    let gated_destroys = Arc::new(AtomicUsize::new(0));
    manager.register_server(
        "slow",
        ShutdownTarget::destroyable(GatedServer {
            gate: Arc::clone(&gate),
            destroys: Arc::clone(&gated_destroys),
        }),
    );
    let destroys: Vec<Arc<AtomicUsize>> = (0..2).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for (i, counter) in destroys.iter().enumerate() {
        manager.register_server(
            format!("fast-{i}"),
            ShutdownTarget::destroyable(CountingServer {
                destroys: Arc::clone(counter),
            }),
        );
    }

    assert!(install_signal_handlers());
    assert!(!install_signal_handlers());

    send_sigterm();
    wait_for_phase(&manager, ShutdownPhase::Draining).await;

    send_sigterm();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.phase(), ShutdownPhase::Draining);

    gate.notify_one();
    wait_for_phase(&manager, ShutdownPhase::Stopped).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(app_stops.load(Ordering::SeqCst), 1);
    assert_eq!(gated_destroys.load(Ordering::SeqCst), 1);
    assert!(destroys.iter().all(|counter| counter.load(Ordering::SeqCst) == 1));
    assert_eq!(*codes.lock(), vec![EXIT_SUCCESS]);
}
