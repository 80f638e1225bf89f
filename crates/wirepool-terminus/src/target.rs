//! Things the coordinator can shut down.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use wirepool::ManagedPool;

use crate::error::BoxError;

/// A server with an awaitable teardown.
///
/// This is the preferred shutdown interface.
#[async_trait]
pub trait Destroyable: Send + Sync + 'static {
    /// Stop accepting work, drain, and release every resource.
    async fn destroy(&self) -> Result<(), BoxError>;
}

/// Completion callback handed to [`LegacyStop::stop`].
///
/// Called once with `None` on success or a failure description.
pub type StopCallback = Box<dyn FnOnce(Option<String>) + Send>;

/// A server that reports teardown completion through a callback.
pub trait LegacyStop: Send + Sync + 'static {
    /// Begin stopping and call `done` when finished.
    fn stop(&self, done: StopCallback);
}

/// A registered shutdown participant.
#[derive(Clone)]
pub enum ShutdownTarget {
    /// Torn down through [`Destroyable::destroy`].
    Destroyable(Arc<dyn Destroyable>),
    /// Torn down through [`LegacyStop::stop`].
    Legacy(Arc<dyn LegacyStop>),
}

impl ShutdownTarget {
    /// Wrap a server with an awaitable teardown.
    pub fn destroyable(server: impl Destroyable) -> Self {
        Self::Destroyable(Arc::new(server))
    }

    /// Wrap a server with a callback-style teardown.
    pub fn legacy(server: impl LegacyStop) -> Self {
        Self::Legacy(Arc::new(server))
    }

    /// Wrap a connection pool.
    pub fn pool(pool: Arc<dyn ManagedPool>) -> Self {
        Self::Destroyable(Arc::new(PoolTarget(pool)))
    }

    pub(crate) async fn shut_down(&self) -> Result<(), String> {
        match self {
            Self::Destroyable(server) => server.destroy().await.map_err(|e| e.to_string()),
            Self::Legacy(server) => {
                let (done, finished) = oneshot::channel();
                server.stop(Box::new(move |error| {
                    let _ = done.send(error);
                }));
                match finished.await {
                    Ok(None) => Ok(()),
                    Ok(Some(error)) => Err(error),
                    Err(_) => Err("stop callback was dropped without being called".to_string()),
                }
            }
        }
    }
}

impl fmt::Debug for ShutdownTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Destroyable(_) => f.write_str("ShutdownTarget::Destroyable"),
            Self::Legacy(_) => f.write_str("ShutdownTarget::Legacy"),
        }
    }
}

struct PoolTarget(Arc<dyn ManagedPool>);

#[async_trait]
impl Destroyable for PoolTarget {
    async fn destroy(&self) -> Result<(), BoxError> {
        self.0.destroy().await.map_err(BoxError::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Callback(Option<&'static str>);

    impl LegacyStop for Callback {
        fn stop(&self, done: StopCallback) {
            done(self.0.map(str::to_string));
        }
    }

    struct Forgetful;

    impl LegacyStop for Forgetful {
        fn stop(&self, done: StopCallback) {
            drop(done);
        }
    }

    #[tokio::test]
    async fn test_legacy_stop_outcomes() {
        assert!(ShutdownTarget::legacy(Callback(None)).shut_down().await.is_ok());

        let failed = ShutdownTarget::legacy(Callback(Some("port busy")))
            .shut_down()
            .await;
        assert_eq!(failed.unwrap_err(), "port busy");

        let dropped = ShutdownTarget::legacy(Forgetful).shut_down().await;
        assert!(dropped.unwrap_err().contains("dropped"));
    }
}
