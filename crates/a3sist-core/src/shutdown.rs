//! Graceful Shutdown
//!
//! One controller owns the root cancellation token and the background
//! tasks spawned through it.
//!
//! ```text
//! Running ──shutdown()──▶ Draining ──handles joined or timed out──▶ Terminated
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//! shutdown.spawn("health-check", health_loop(shutdown.token()));
//! processor.run(shutdown.token()).await;
//! shutdown.shutdown().await;
//! ```

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default drain timeout in seconds
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Tokens cancelled, waiting for background tasks
    Draining,
    /// Shutdown complete
    Terminated,
}

impl ShutdownPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Terminated,
        }
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Draining => "Draining",
            Self::Terminated => "Terminated",
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coordinates cancellation and draining of background work
pub struct ShutdownController {
    cancel_token: CancellationToken,
    phase_tx: broadcast::Sender<ShutdownPhase>,
    phase: AtomicU8,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
    drain_timeout: Duration,
}

impl ShutdownController {
    /// Create a controller with the default drain timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_drain_timeout(Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS))
    }

    /// Create a controller with a custom drain timeout
    #[must_use]
    pub fn with_drain_timeout(drain_timeout: Duration) -> Arc<Self> {
        let (phase_tx, _) = broadcast::channel(8);
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            phase_tx,
            phase: AtomicU8::new(ShutdownPhase::Running as u8),
            handles: Mutex::new(Vec::new()),
            drain_timeout,
        })
    }

    /// A child token for one component
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Subscribe to phase changes
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.phase_tx.subscribe()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Whether shutdown has started
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.phase() != ShutdownPhase::Running
    }

    /// Number of background tasks owned by the controller
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Spawn a background task joined during shutdown.
    ///
    /// The task should watch a token from [`Self::token`].
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "Background task spawned");
        let handle = tokio::spawn(task);
        self.handles.lock().push((name, handle));
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        let _ = self.phase_tx.send(phase);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Cancel every token and join background tasks.
    ///
    /// Tasks still running after the drain timeout are aborted. Only the
    /// first call does anything.
    pub async fn shutdown(&self) {
        if self
            .phase
            .compare_exchange(
                ShutdownPhase::Running as u8,
                ShutdownPhase::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }
        let _ = self.phase_tx.send(ShutdownPhase::Draining);
        info!("Initiating graceful shutdown");
        self.cancel_token.cancel();

        let handles = std::mem::take(&mut *self.handles.lock());
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        for (name, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = %name, "Background task finished"),
                Ok(Err(e)) if e.is_cancelled() => debug!(task = %name, "Background task aborted"),
                Ok(Err(e)) => warn!(task = %name, error = %e, "Background task panicked"),
                Err(_) => {
                    warn!(
                        task = %name,
                        timeout_secs = self.drain_timeout.as_secs(),
                        "Drain timeout exceeded, aborting task"
                    );
                    handle.abort();
                }
            }
        }

        self.set_phase(ShutdownPhase::Terminated);
        info!("Graceful shutdown complete");
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
