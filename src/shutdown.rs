//! Graceful shutdown coordination.
//!
//! Shutdown runs in a fixed order so that no refresh is left running
//! unobserved and no listener accepts work after the scheduler is gone:
//!
//! 1. **Stop Accepting** - cancel the shared token; both listeners stop
//!    accepting connections and the scheduler stops ticking
//! 2. **Draining** - wait for the REST and gRPC servers to finish in-flight
//!    requests, bounded by `drain_timeout`
//! 3. **Stopping Scheduler** - wait for the scheduler loop to return; an
//!    in-flight refresh finishes under its own deadline
//! 4. **Complete** (or **Forced** if a bounded wait expired)
//!
//! # Example
//!
//! ```rust,no_run
//! use refresh_hash::shutdown::{ShutdownConfig, ShutdownCoordinator};
//! use tokio::task::JoinSet;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
//! let token = coordinator.token();
//!
//! let mut front_ends = JoinSet::new();
//! front_ends.spawn(async move {
//!     token.cancelled().await;
//!     ("rest", Ok(()))
//! });
//!
//! coordinator.wait_for_signal().await;
//! coordinator.shutdown(front_ends, None).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ServerConfig;
use crate::error::RefreshError;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one front-end server task: its name and how it ended.
pub type FrontEndExit = (&'static str, Result<()>);

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Phase 2: time the listeners get to finish in-flight requests
    pub drain_timeout: Duration,

    /// Phase 3: time the scheduler gets to return after cancellation
    pub scheduler_timeout: Duration,

    /// Abort stragglers and report success when a bounded wait expires,
    /// instead of failing the shutdown
    pub force_shutdown_on_timeout: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
            scheduler_timeout: Duration::from_secs(2),
            force_shutdown_on_timeout: true,
        }
    }
}

impl ShutdownConfig {
    /// Derive timeouts from the server configuration. The scheduler can only
    /// be busy with one refresh, so its bound follows the refresh deadline.
    pub fn for_server(config: &ServerConfig) -> Self {
        Self {
            drain_timeout: config.graceful_shutdown_timeout(),
            scheduler_timeout: config.refresh_timeout + Duration::from_secs(1),
            ..Self::default()
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_scheduler_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler_timeout = timeout;
        self
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Serving normally
    Running,
    /// Phase 1: token cancelled, listeners stop accepting
    StopAccepting,
    /// Phase 2: waiting for listeners to drain
    Draining,
    /// Phase 3: waiting for the scheduler loop to return
    StoppingScheduler,
    /// Shutdown complete
    Complete,
    /// A bounded wait expired and tasks were aborted
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StopAccepting => write!(f, "stop_accepting"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::StoppingScheduler => write!(f, "stopping_scheduler"),
            ShutdownPhase::Complete => write!(f, "complete"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

/// Coordinates shutdown of the listeners and the scheduler.
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: Arc<RwLock<ShutdownPhase>>,
    shutdown_token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: Arc::new(RwLock::new(ShutdownPhase::Running)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token shared by every long-running task.
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT)
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            },
        }
    }

    /// Run the shutdown phases in order.
    ///
    /// `scheduler` is `None` when the scheduler already returned (for example
    /// after a failed refresh) and its result was handled by the caller.
    pub async fn shutdown(
        &self,
        front_ends: JoinSet<FrontEndExit>,
        scheduler: Option<JoinHandle<Result<(), RefreshError>>>,
    ) -> Result<()> {
        info!("starting graceful shutdown sequence");

        self.phase_stop_accepting().await;
        let drained = self.phase_drain(front_ends).await;
        let scheduler_stopped = self.phase_stop_scheduler(scheduler).await;

        if drained && scheduler_stopped {
            *self.phase.write().await = ShutdownPhase::Complete;
            info!("graceful shutdown completed successfully");
            return Ok(());
        }

        *self.phase.write().await = ShutdownPhase::Forced;
        if self.config.force_shutdown_on_timeout {
            warn!("graceful shutdown timed out, remaining tasks were aborted");
            Ok(())
        } else {
            error!("graceful shutdown timed out");
            Err(anyhow::anyhow!("shutdown timeout exceeded"))
        }
    }

    /// Phase 1: stop accepting new work
    async fn phase_stop_accepting(&self) {
        *self.phase.write().await = ShutdownPhase::StopAccepting;
        info!("shutdown phase 1: stopping acceptance of new requests");
        self.shutdown_token.cancel();
    }

    /// Phase 2: let the listeners finish in-flight requests
    async fn phase_drain(&self, mut front_ends: JoinSet<FrontEndExit>) -> bool {
        *self.phase.write().await = ShutdownPhase::Draining;
        info!(
            listeners = front_ends.len(),
            "shutdown phase 2: draining in-flight requests"
        );

        let drain = async {
            while let Some(joined) = front_ends.join_next().await {
                match joined {
                    Ok((name, Ok(()))) => debug!(listener = name, "listener stopped"),
                    Ok((name, Err(e))) => warn!(listener = name, "listener stopped with error: {:#}", e),
                    Err(e) => error!("listener task failed: {}", e),
                }
            }
        };

        let drained = timeout(self.config.drain_timeout, drain).await;
        match drained {
            Ok(()) => {
                debug!("phase 2 complete: listeners drained");
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.drain_timeout.as_secs_f64(),
                    remaining = front_ends.len(),
                    "drain timeout reached, aborting listeners"
                );
                front_ends.abort_all();
                false
            }
        }
    }

    /// Phase 3: wait for the scheduler loop to return
    async fn phase_stop_scheduler(
        &self,
        scheduler: Option<JoinHandle<Result<(), RefreshError>>>,
    ) -> bool {
        *self.phase.write().await = ShutdownPhase::StoppingScheduler;
        let Some(mut handle) = scheduler else {
            debug!("scheduler already stopped");
            return true;
        };
        info!("shutdown phase 3: waiting for scheduler to stop");

        let joined = timeout(self.config.scheduler_timeout, &mut handle).await;
        match joined {
            Ok(Ok(Ok(()))) => {
                debug!("phase 3 complete: scheduler stopped");
                true
            }
            Ok(Ok(Err(e))) => {
                error!(error = %e, "scheduler stopped with error during shutdown");
                true
            }
            Ok(Err(e)) => {
                error!("scheduler task failed: {}", e);
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.scheduler_timeout.as_secs_f64(),
                    "scheduler did not stop in time, aborting"
                );
                handle.abort();
                false
            }
        }
    }
}
