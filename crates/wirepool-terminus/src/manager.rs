//! The process-wide shutdown coordinator.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use wirepool::ManagedPool;

use crate::error::TerminusError;
use crate::signal::{Signal, SignalListener};
use crate::target::ShutdownTarget;

/// Time registered servers get to drain before the shutdown is forced.
pub const FORCE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit code after every server drained cleanly.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code after a failed or forced shutdown.
pub const EXIT_FAILURE: i32 = 1;

/// Called with the exit code once a shutdown finishes.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

/// Called once when the application starts stopping.
pub type AppStopHook = Box<dyn FnOnce(Signal) + Send>;

static INSTANCE: Lazy<RwLock<Arc<TerminusManager>>> =
    Lazy::new(|| RwLock::new(Arc::new(TerminusManager::new(TerminusOptions::default()))));

static SIGNAL_HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

fn exit_process(code: i32) {
    std::process::exit(code);
}

/// Coordinator configuration.
#[derive(Clone)]
pub struct TerminusOptions {
    /// Drain budget before the shutdown is forced.
    pub force_timeout: Duration,
    /// Install OS signal handlers on the first registration.
    pub handle_signals: bool,
    /// Receives the exit code. Defaults to [`std::process::exit`].
    pub exit: ExitHook,
}

impl Default for TerminusOptions {
    fn default() -> Self {
        Self {
            force_timeout: FORCE_SHUTDOWN_TIMEOUT,
            handle_signals: true,
            exit: Arc::new(exit_process),
        }
    }
}

impl TerminusOptions {
    /// Create options with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the drain budget.
    #[must_use]
    pub fn force_timeout(mut self, timeout: Duration) -> Self {
        self.force_timeout = timeout;
        self
    }

    /// Enable or disable OS signal handling.
    #[must_use]
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Replace the exit hook.
    #[must_use]
    pub fn exit_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.exit = Arc::new(hook);
        self
    }
}

impl fmt::Debug for TerminusOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminusOptions")
            .field("force_timeout", &self.force_timeout)
            .field("handle_signals", &self.handle_signals)
            .finish_non_exhaustive()
    }
}

/// Where the coordinator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownPhase {
    /// Accepting registrations.
    Running,
    /// Draining registered servers.
    Draining,
    /// Shutdown finished.
    Stopped,
}

/// Outcome of [`TerminusManager::shutdown_all`].
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Signal that started the shutdown.
    pub signal: Signal,
    /// Exit code handed to the exit hook.
    pub exit_code: i32,
    /// Servers that were asked to shut down.
    pub servers: usize,
    /// Servers that failed, or the timeout that forced the shutdown.
    pub failures: Vec<TerminusError>,
    /// Time spent draining.
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Whether every server drained cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

struct RegisteredServer {
    id: String,
    target: ShutdownTarget,
}

/// Coordinates a single graceful shutdown across every registered server.
///
/// One coordinator normally exists per process ([`TerminusManager::instance`]).
/// The first registration installs handlers for `SIGINT`, `SIGTERM` and
/// `SIGQUIT`; a signal starts [`shutdown_all`](Self::shutdown_all) on the
/// process-wide instance. Only the first shutdown runs. Later calls, such as
/// a second Ctrl-C while draining, are logged and ignored.
///
/// # Example
///
/// ```rust,ignore
/// use wirepool_terminus::{ShutdownTarget, TerminusManager};
///
/// let terminus = TerminusManager::instance();
/// terminus.on_app_stop(|signal| tracing::info!(%signal, "application stopping"));
/// terminus.register_server("api", ShutdownTarget::destroyable(api_server));
/// terminus.register_pool("api-http", pool);
/// ```
pub struct TerminusManager {
    options: TerminusOptions,
    servers: Mutex<Vec<RegisteredServer>>,
    app_stop: Mutex<Vec<AppStopHook>>,
    shutting_down: AtomicBool,
    phase: Mutex<ShutdownPhase>,
}

impl TerminusManager {
    /// Create a standalone coordinator.
    #[must_use]
    pub fn new(options: TerminusOptions) -> Self {
        Self {
            options,
            servers: Mutex::new(Vec::new()),
            app_stop: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            phase: Mutex::new(ShutdownPhase::Running),
        }
    }

    /// The process-wide coordinator, created on first use.
    #[must_use]
    pub fn instance() -> Arc<Self> {
        Arc::clone(&INSTANCE.read())
    }

    /// Replace the process-wide coordinator with one built from `options`.
    pub fn init_instance(options: TerminusOptions) -> Arc<Self> {
        let manager = Arc::new(Self::new(options));
        *INSTANCE.write() = Arc::clone(&manager);
        manager
    }

    /// Replace the process-wide coordinator with a fresh default one.
    ///
    /// Registrations and shutdown state are discarded. Installed signal
    /// handlers stay in place and route to the new instance.
    pub fn reset_instance() {
        *INSTANCE.write() = Arc::new(Self::new(TerminusOptions::default()));
    }

    /// Register a server under `id`.
    pub fn register_server(&self, id: impl Into<String>, target: ShutdownTarget) {
        let id = id.into();
        let count = {
            let mut servers = self.servers.lock();
            servers.push(RegisteredServer {
                id: id.clone(),
                target,
            });
            servers.len()
        };
        tracing::debug!(server = %id, registered = count, "server registered for shutdown");

        if self.options.handle_signals {
            install_signal_handlers();
        }
    }

    /// Register a connection pool under `id`.
    pub fn register_pool(&self, id: impl Into<String>, pool: Arc<dyn ManagedPool>) {
        self.register_server(id, ShutdownTarget::pool(pool));
    }

    /// Remove every registration under `id`. Returns `true` if any existed.
    pub fn unregister_server(&self, id: &str) -> bool {
        let mut servers = self.servers.lock();
        let before = servers.len();
        servers.retain(|server| server.id != id);
        servers.len() != before
    }

    /// Number of registered servers.
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.servers.lock().len()
    }

    /// Run `hook` when the shutdown starts.
    pub fn on_app_stop<F>(&self, hook: F)
    where
        F: FnOnce(Signal) + Send + 'static,
    {
        self.app_stop.lock().push(Box::new(hook));
    }

    /// Whether a shutdown has started.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.lock()
    }

    /// Shut down every registered server.
    ///
    /// Runs the app-stop hooks, then tears every server down concurrently
    /// within the force timeout, and finally passes the exit code to the
    /// exit hook: [`EXIT_SUCCESS`] if every server drained, otherwise
    /// [`EXIT_FAILURE`]. Returns [`TerminusError::AlreadyShuttingDown`] if
    /// a shutdown has already started.
    pub async fn shutdown_all(&self, signal: Signal) -> Result<ShutdownReport, TerminusError> {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(%signal, "shutdown already in progress, ignoring signal");
            return Err(TerminusError::AlreadyShuttingDown);
        }
        *self.phase.lock() = ShutdownPhase::Draining;

        let started = Instant::now();
        let servers: Vec<(String, ShutdownTarget)> = self
            .servers
            .lock()
            .iter()
            .map(|server| (server.id.clone(), server.target.clone()))
            .collect();
        tracing::info!(%signal, servers = servers.len(), "graceful shutdown started");

        let hooks = std::mem::take(&mut *self.app_stop.lock());
        for hook in hooks {
            hook(signal);
        }

        let drains = servers.iter().map(|(id, target)| async move {
            target
                .shut_down()
                .await
                .map_err(|message| TerminusError::Server {
                    id: id.clone(),
                    message,
                })
        });

        let failures = match tokio::time::timeout(self.options.force_timeout, join_all(drains)).await
        {
            Ok(results) => results
                .into_iter()
                .filter_map(Result::err)
                .inspect(|e| tracing::warn!(error = %e, "server shutdown failed"))
                .collect(),
            Err(_) => {
                let elapsed = started.elapsed();
                tracing::error!(?elapsed, "graceful shutdown timed out, forcing exit");
                vec![TerminusError::ShutdownTimeout { elapsed }]
            }
        };

        let exit_code = if failures.is_empty() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        };
        let report = ShutdownReport {
            signal,
            exit_code,
            servers: servers.len(),
            failures,
            elapsed: started.elapsed(),
        };
        *self.phase.lock() = ShutdownPhase::Stopped;
        tracing::info!(
            exit_code,
            failures = report.failures.len(),
            elapsed = ?report.elapsed,
            "graceful shutdown finished"
        );

        (self.options.exit)(exit_code);
        Ok(report)
    }
}

impl fmt::Debug for TerminusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminusManager")
            .field("servers", &self.server_count())
            .field("phase", &self.phase())
            .field("options", &self.options)
            .finish()
    }
}

/// Clears the installed flag when the listener task goes away.
struct InstalledFlag;

impl Drop for InstalledFlag {
    fn drop(&mut self) {
        SIGNAL_HANDLERS_INSTALLED.store(false, Ordering::SeqCst);
    }
}

/// Install the OS signal handlers for the process.
///
/// Handlers route every signal to [`TerminusManager::instance`]. The
/// listener runs on the current tokio runtime and lives as long as that
/// runtime, so at most one listener exists at a time. Once the runtime
/// shuts down, the next call installs a fresh listener on whichever
/// runtime is current. Returns `true` if this call installed them; `false`
/// if a listener is already running, or no tokio runtime is running.
pub fn install_signal_handlers() -> bool {
    if SIGNAL_HANDLERS_INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }
    let installed = InstalledFlag;

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no tokio runtime, signal handlers not installed");
        return false;
    };

    let mut listener = match SignalListener::new() {
        Ok(listener) => listener,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install signal handlers");
            return false;
        }
    };

    runtime.spawn(async move {
        let _installed = installed;
        while let Some(signal) = listener.recv().await {
            tracing::info!(%signal, "received signal");
            tokio::spawn(async move {
                let manager = TerminusManager::instance();
                if let Err(e) = manager.shutdown_all(signal).await {
                    tracing::debug!(%signal, error = %e, "signal ignored");
                }
            });
        }
        tracing::debug!("signal listener stopped");
    });
    tracing::debug!("signal handlers installed");
    true
}
