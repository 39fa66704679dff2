//! Scheduled refresh - background task that regenerates the value on a timer.
//!
//! The scheduler is a two-state machine. [`RefreshScheduler::start`] enters
//! `Running`; each tick runs one refresh under its own deadline. The loop ends
//! in `Stopped` either because the governing token was cancelled (`Ok`) or
//! because a refresh failed (`Err`, fail-fast). There is no retry and no
//! restart: `start` consumes the scheduler.
//!
//! The refresh runs inline in the loop, so at most one refresh is outstanding
//! and cancellation is only observed between refreshes. An in-flight refresh
//! is bounded by `refresh_timeout`, not by the cancellation token.

use crate::error::RefreshError;
use crate::service::Refresher;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Configuration for the scheduled refresh loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between refreshes (fixed wall-clock period)
    pub refresh_interval: Duration,
    /// Deadline for a single refresh; expected to be <= `refresh_interval`
    pub refresh_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(1),
        }
    }
}

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Observable scheduler progress, shared with the health endpoints.
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    /// `None` until `start` is called
    state: RwLock<Option<SchedulerState>>,
    last_refresh_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    refresh_count: AtomicU64,
}

impl SchedulerStatus {
    pub fn state(&self) -> Option<SchedulerState> {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == Some(SchedulerState::Running)
    }

    /// Time of the last successful scheduled refresh.
    pub fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh_at.read()
    }

    /// Error that stopped the scheduler, if it stopped on failure.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    fn enter_running(&self) {
        *self.state.write() = Some(SchedulerState::Running);
    }

    fn record_refresh(&self, at: DateTime<Utc>) {
        *self.last_refresh_at.write() = Some(at);
        self.refresh_count.fetch_add(1, Ordering::Relaxed);
    }

    fn stop(&self, failure: Option<&RefreshError>) {
        if let Some(err) = failure {
            *self.last_error.write() = Some(err.to_string());
        }
        *self.state.write() = Some(SchedulerState::Stopped);
    }
}

/// Drives a [`Refresher`] on a fixed interval.
pub struct RefreshScheduler {
    config: SchedulerConfig,
    refresher: Arc<dyn Refresher>,
    status: Arc<SchedulerStatus>,
}

impl RefreshScheduler {
    pub fn new(config: SchedulerConfig, refresher: Arc<dyn Refresher>) -> Self {
        Self {
            config,
            refresher,
            status: Arc::new(SchedulerStatus::default()),
        }
    }

    /// Handle for observing the scheduler after `start` has taken ownership.
    pub fn status(&self) -> Arc<SchedulerStatus> {
        self.status.clone()
    }

    /// Run the refresh loop until `token` is cancelled or a refresh fails.
    ///
    /// Ticks fall on fixed boundaries `start + k * interval`, the first one a
    /// full interval after the call. A refresh that runs past a boundary
    /// drops the ticks it covered; the next refresh waits for the next
    /// boundary instead of starting as soon as the slow one returns.
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use refresh_hash::{InMemoryStore, RefreshScheduler, RefreshService, SchedulerConfig, UuidGenerator};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn example() -> Result<(), refresh_hash::RefreshError> {
    /// let service = Arc::new(RefreshService::new(
    ///     Arc::new(InMemoryStore::new()),
    ///     Arc::new(UuidGenerator::new()),
    /// ));
    /// let token = CancellationToken::new();
    /// let scheduler = RefreshScheduler::new(SchedulerConfig::default(), service);
    /// let handle = tokio::spawn(scheduler.start(token.clone()));
    ///
    /// token.cancel();
    /// handle.await.expect("scheduler task panicked")?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(self, token: CancellationToken) -> Result<(), RefreshError> {
        info!(
            interval_ms = self.config.refresh_interval.as_millis() as u64,
            timeout_ms = self.config.refresh_timeout.as_millis() as u64,
            "scheduled refresh started"
        );
        self.status.enter_running();

        let period = self.config.refresh_interval.max(Duration::from_millis(1));
        let mut next_tick = Instant::now() + period;

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!(
                        refreshes = self.status.refresh_count(),
                        "scheduled refresh cancelled, stopping"
                    );
                    self.status.stop(None);
                    return Ok(());
                }
                _ = sleep_until(next_tick) => {
                    debug!("scheduled refresh tick");
                    if let Err(err) = self.refresh_once().await {
                        error!(
                            error = %err,
                            code = %err.code(),
                            category = err.code().category(),
                            "scheduled refresh failed, stopping scheduler"
                        );
                        self.status.stop(Some(&err));
                        return Err(err);
                    }
                    let now = Instant::now();
                    let following = next_boundary(next_tick, period, now);
                    if following > next_tick + period {
                        debug!(
                            skipped = ((following - next_tick).as_nanos() / period.as_nanos()) as u64 - 1,
                            "refresh overran its interval, skipping missed ticks"
                        );
                    }
                    next_tick = following;
                    debug!("scheduled refresh done");
                }
            }
        }
    }

    /// One refresh bounded by `refresh_timeout`; the deadline is dropped as
    /// soon as the refresh future resolves.
    async fn refresh_once(&self) -> Result<(), RefreshError> {
        match timeout(self.config.refresh_timeout, self.refresher.refresh()).await {
            Ok(Ok(())) => {
                self.status.record_refresh(Utc::now());
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(RefreshError::timeout(self.config.refresh_timeout)),
        }
    }
}

/// First boundary `tick + k * period` (k >= 1) strictly after `now`.
fn next_boundary(tick: Instant, period: Duration, now: Instant) -> Instant {
    let mut next = tick + period;
    if next > now {
        return next;
    }
    let behind = (now - next).as_nanos() / period.as_nanos() + 1;
    next += Duration::from_nanos((period.as_nanos() * behind) as u64);
    next
}
