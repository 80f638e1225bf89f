//! # wirepool-terminus
//!
//! Process-wide graceful shutdown for servers and connection pools.
//!
//! A single [`TerminusManager`] collects every server and pool that must be
//! drained before the process exits. On `SIGINT`, `SIGTERM` or `SIGQUIT` it
//! runs the application stop hooks once, tears every registered target down
//! concurrently and exits with `0` if all of them finished cleanly or `1` if
//! any failed or the force timeout (60 seconds by default) elapsed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wirepool::{ConnectionPoolFactory, PoolConfig};
//! use wirepool_terminus::TerminusManager;
//!
//! let factory = ConnectionPoolFactory::with_default_adapters();
//! let pool = factory.create("http", PoolConfig::http())?;
//!
//! let terminus = TerminusManager::instance();
//! terminus.on_app_stop(|signal| tracing::info!(%signal, "stopping"));
//! terminus.register_pool("upstream", pool);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod manager;
pub mod signal;
pub mod target;

pub use error::{BoxError, TerminusError};
pub use manager::{
    AppStopHook, EXIT_FAILURE, EXIT_SUCCESS, ExitHook, FORCE_SHUTDOWN_TIMEOUT, ShutdownPhase,
    ShutdownReport, TerminusManager, TerminusOptions, install_signal_handlers,
};
pub use signal::Signal;
pub use target::{Destroyable, LegacyStop, ShutdownTarget, StopCallback};
