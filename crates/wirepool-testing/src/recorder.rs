//! Event capture for assertions.

use std::sync::Arc;

use parking_lot::Mutex;
use wirepool::{ConnectionPoolManager, PoolEvent, PoolEventKind, ProtocolAdapter};

/// Records every event a pool emits, in emission order.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<PoolEvent>>>,
}

impl EventRecorder {
    /// Subscribe a new recorder to every event kind of `pool`.
    pub fn attach<A: ProtocolAdapter>(pool: &ConnectionPoolManager<A>) -> Self {
        let recorder = Self::default();
        for kind in PoolEventKind::ALL {
            let events = Arc::clone(&recorder.events);
            pool.on(kind, move |event| {
                events.lock().push(event.clone());
                Ok(())
            });
        }
        recorder
    }

    /// Every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().clone()
    }

    /// Recorded events of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: PoolEventKind) -> Vec<PoolEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .cloned()
            .collect()
    }

    /// Number of recorded events of one kind.
    #[must_use]
    pub fn count(&self, kind: PoolEventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Let spawned connection teardowns run to completion.
///
/// Transport callbacks detach connections synchronously and spawn the
/// adapter teardown; yielding a few times lets those tasks finish on a
/// current-thread runtime.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
