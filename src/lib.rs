pub mod config;
pub mod error;
pub mod generator;
pub mod health;
pub mod logging;
pub mod model;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod store;

pub use config::{CliArgs, ServerConfig};
pub use error::{ErrorCode, GeneratorError, RefreshError, StoreError};
pub use generator::{Clock, Generator, SystemClock, UuidGenerator};
pub use logging::{LoggingConfig, init_logging};
pub use model::{Value, ValueResponse};
pub use scheduler::{RefreshScheduler, SchedulerConfig, SchedulerState, SchedulerStatus};
pub use service::{RefreshService, Refresher, ValueService};
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};
pub use store::{InMemoryStore, ValueStore};

use anyhow::{Context, Result, anyhow};
use health::HealthChecker;
use server::{ApiState, HashGrpcService, grpc, rest};
use shutdown::FrontEndExit;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The two bound front-end sockets.
pub struct Listeners {
    pub http: TcpListener,
    pub grpc: TcpListener,
}

impl Listeners {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let http = TcpListener::bind(config.http_bind_address)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {}", config.http_bind_address))?;
        let grpc = TcpListener::bind(config.grpc_bind_address)
            .await
            .with_context(|| format!("failed to bind gRPC listener on {}", config.grpc_bind_address))?;
        Ok(Self { http, grpc })
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http.local_addr()?)
    }

    pub fn grpc_addr(&self) -> Result<SocketAddr> {
        Ok(self.grpc.local_addr()?)
    }
}

/// Store and generator the service is wired from.
#[derive(Clone)]
pub struct Components {
    pub store: Arc<dyn ValueStore>,
    pub generator: Arc<dyn Generator>,
}

impl Default for Components {
    fn default() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            generator: Arc::new(UuidGenerator::new()),
        }
    }
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let listeners = Listeners::bind(&config).await?;
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::for_server(&config));

    serve(
        config,
        listeners,
        Components::default(),
        &coordinator,
        coordinator.wait_for_signal(),
    )
    .await
}

/// Run the scheduler and both front-ends until `shutdown_signal` resolves or
/// one of them fails, then shut everything down in order.
///
/// A failed scheduled refresh stops only the scheduler: the front-ends keep
/// serving the last value unless the failure is fatal or
/// `exit_on_refresh_failure` is set.
pub async fn serve<F>(
    config: ServerConfig,
    listeners: Listeners,
    components: Components,
    coordinator: &ShutdownCoordinator,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let token = coordinator.token();
    let Components { store, generator } = components;

    let service = Arc::new(RefreshService::new(store.clone(), generator));
    let scheduler = RefreshScheduler::new(config.scheduler_config(), service.clone());
    let health = Arc::new(HealthChecker::new(store, scheduler.status()));

    info!(
        http = %listeners.http_addr()?,
        grpc = %listeners.grpc_addr()?,
        refresh_interval_ms = config.refresh_interval.as_millis() as u64,
        refresh_timeout_ms = config.refresh_timeout.as_millis() as u64,
        "starting refresh-hash server"
    );

    let mut scheduler_handle = tokio::spawn(scheduler.start(token.child_token()));

    let mut front_ends: JoinSet<FrontEndExit> = JoinSet::new();
    let router = server::router(
        ApiState::new(service.clone(), health).with_refresh_timeout(config.refresh_timeout),
    );
    let rest_token = token.clone();
    let Listeners { http, grpc } = listeners;
    front_ends.spawn(async move { ("rest", rest::serve(http, router, rest_token).await) });

    let grpc_service = HashGrpcService::new(service).with_refresh_timeout(config.refresh_timeout);
    let grpc_token = token.clone();
    front_ends.spawn(async move { ("grpc", grpc::serve(grpc, grpc_service, grpc_token).await) });

    tokio::pin!(shutdown_signal);
    let mut scheduler_done = false;
    let mut failure: Option<anyhow::Error> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("shutdown requested");
                break;
            }
            joined = &mut scheduler_handle, if !scheduler_done => {
                scheduler_done = true;
                match joined {
                    Ok(Ok(())) => debug!("scheduler stopped"),
                    Ok(Err(e)) if e.is_fatal() || config.exit_on_refresh_failure => {
                        error!(error = %e, code = %e.code(), "scheduler failed, shutting down");
                        failure = Some(anyhow::Error::new(e).context("refresh scheduler failed"));
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, code = %e.code(), "scheduler stopped, serving last value until shutdown");
                    }
                    Err(e) => {
                        failure = Some(anyhow!("scheduler task failed: {}", e));
                        break;
                    }
                }
            }
            Some(joined) = front_ends.join_next() => {
                failure = Some(match joined {
                    Ok((name, Ok(()))) => anyhow!("{} listener stopped unexpectedly", name),
                    Ok((name, Err(e))) => e.context(format!("{} listener failed", name)),
                    Err(e) => anyhow!("listener task failed: {}", e),
                });
                break;
            }
        }
    }

    let scheduler = if scheduler_done {
        None
    } else {
        Some(scheduler_handle)
    };
    coordinator.shutdown(front_ends, scheduler).await?;
    info!("successfully stopped");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
