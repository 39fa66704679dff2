//! Tests for graceful shutdown
//!
//! These tests verify:
//! - Shutdown phase progression
//! - Drain and scheduler timeouts, including the forced path
//! - Ordering: listeners drained before the scheduler is awaited
//! - End-to-end lifecycle of `serve` over real sockets

mod support;

use refresh_hash::server::grpc::proto::GetHashRequest;
use refresh_hash::server::grpc::proto::hash_service_client::HashServiceClient;
use refresh_hash::shutdown::{FrontEndExit, ShutdownConfig, ShutdownCoordinator, ShutdownPhase};
use refresh_hash::{
    Components, InMemoryStore, Listeners, RefreshScheduler, SchedulerConfig, ServerConfig,
    StoreError, Value, ValueStore, serve,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use support::{ExhaustedGenerator, FnRefresher, SequenceGenerator, always_ok};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_shutdown_config_builders() {
    let config = ShutdownConfig::default()
        .with_drain_timeout(Duration::from_millis(250))
        .with_scheduler_timeout(Duration::from_millis(100));

    assert_eq!(config.drain_timeout, Duration::from_millis(250));
    assert_eq!(config.scheduler_timeout, Duration::from_millis(100));
    assert!(config.force_shutdown_on_timeout);
}

#[tokio::test]
async fn test_listeners_drain_before_scheduler_is_awaited() {
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
    let drained = Arc::new(AtomicBool::new(false));

    let mut front_ends: JoinSet<FrontEndExit> = JoinSet::new();
    let token = coordinator.token();
    let flag = drained.clone();
    front_ends.spawn(async move {
        token.cancelled().await;
        sleep(Duration::from_millis(20)).await;
        flag.store(true, Ordering::SeqCst);
        ("rest", Ok(()))
    });

    let token = coordinator.token();
    let flag = drained.clone();
    let drained_when_awaited = Arc::new(AtomicBool::new(false));
    let seen = drained_when_awaited.clone();
    let scheduler = tokio::spawn(async move {
        token.cancelled().await;
        // finishes after the listener, like an in-flight refresh would
        sleep(Duration::from_millis(40)).await;
        seen.store(flag.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    });

    coordinator.shutdown(front_ends, Some(scheduler)).await.unwrap();
    assert!(drained.load(Ordering::SeqCst));
    assert!(drained_when_awaited.load(Ordering::SeqCst));
    assert_eq!(coordinator.phase().await, ShutdownPhase::Complete);
}

#[tokio::test]
async fn test_real_scheduler_stops_on_shutdown() {
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
    let refresher = FnRefresher::new(always_ok);
    let scheduler = RefreshScheduler::new(
        SchedulerConfig {
            refresh_interval: Duration::from_millis(5),
            refresh_timeout: Duration::from_millis(5),
        },
        refresher.clone(),
    );
    let status = scheduler.status();
    let handle = tokio::spawn(scheduler.start(coordinator.token().child_token()));

    sleep(Duration::from_millis(30)).await;
    coordinator.shutdown(JoinSet::new(), Some(handle)).await.unwrap();

    assert!(!status.is_running());
    assert!(refresher.calls() >= 1);
    let calls = refresher.calls();
    sleep(Duration::from_millis(30)).await;
    assert_eq!(refresher.calls(), calls);
}

#[tokio::test]
async fn test_force_shutdown_on_drain_timeout() {
    let config = ShutdownConfig::default().with_drain_timeout(Duration::from_millis(50));
    let coordinator = ShutdownCoordinator::new(config);

    let mut front_ends: JoinSet<FrontEndExit> = JoinSet::new();
    front_ends.spawn(async {
        // ignores cancellation
        sleep(Duration::from_secs(60)).await;
        ("grpc", Ok(()))
    });

    let result = timeout(
        Duration::from_secs(5),
        coordinator.shutdown(front_ends, None),
    )
    .await
    .unwrap();
    assert!(result.is_ok());
    assert_eq!(coordinator.phase().await, ShutdownPhase::Forced);
}

#[tokio::test]
async fn test_scheduler_timeout_without_force_fails() {
    let mut config = ShutdownConfig::default().with_scheduler_timeout(Duration::from_millis(50));
    config.force_shutdown_on_timeout = false;
    let coordinator = ShutdownCoordinator::new(config);

    let stuck = tokio::spawn(async {
        sleep(Duration::from_secs(60)).await;
        Ok(())
    });

    let result = coordinator.shutdown(JoinSet::new(), Some(stuck)).await;
    assert!(result.is_err());
    assert_eq!(coordinator.phase().await, ShutdownPhase::Forced);
}

fn test_config(interval_ms: u64, exit_on_refresh_failure: bool) -> ServerConfig {
    let any_port = SocketAddr::from(([127, 0, 0, 1], 0));
    ServerConfig {
        http_bind_address: any_port,
        grpc_bind_address: any_port,
        refresh_interval: Duration::from_millis(interval_ms),
        refresh_timeout: Duration::from_millis(interval_ms),
        graceful_shutdown_timeout_secs: 2,
        exit_on_refresh_failure,
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn grpc_uid(addr: SocketAddr) -> Result<String, tonic::Status> {
    let mut client = HashServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    let response = client.get_hash(GetHashRequest {}).await?;
    Ok(response.into_inner().uid)
}

#[tokio::test]
async fn test_serve_answers_both_protocols_then_stops() {
    let config = test_config(50, false);
    let listeners = Listeners::bind(&config).await.unwrap();
    let http_addr = listeners.http_addr().unwrap();
    let grpc_addr = listeners.grpc_addr().unwrap();
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::for_server(&config));
    let (stop, stopped) = oneshot::channel::<()>();

    let server = serve(config, listeners, Components::default(), &coordinator, async {
        let _ = stopped.await;
    });
    let client = async {
        let response = http_get(http_addr, "/api/hash").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"uuid\""));
        assert!(response.contains("\"datatime\""));

        let uid = grpc_uid(grpc_addr).await.unwrap();
        assert_eq!(uid.len(), 36);

        let missing = http_get(http_addr, "/nope").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        stop.send(()).unwrap();
    };

    let (served, ()) = timeout(Duration::from_secs(10), async { tokio::join!(server, client) })
        .await
        .unwrap();
    served.unwrap();
    assert_eq!(coordinator.phase().await, ShutdownPhase::Complete);
    assert!(TcpStream::connect(http_addr).await.is_err());
}

#[tokio::test]
async fn test_fatal_refresh_failure_stops_the_server() {
    let config = test_config(10, false);
    let listeners = Listeners::bind(&config).await.unwrap();
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::for_server(&config));
    let components = Components {
        store: Arc::new(InMemoryStore::new()),
        generator: Arc::new(ExhaustedGenerator),
    };

    let result = timeout(
        Duration::from_secs(5),
        serve(config, listeners, components, &coordinator, std::future::pending()),
    )
    .await
    .unwrap();

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("refresh scheduler failed"));
    assert!(format!("{err:#}").contains("entropy"));
    assert_eq!(coordinator.phase().await, ShutdownPhase::Complete);
}

/// Accepts the first write, rejects every later one.
struct FirstWriteOnlyStore {
    inner: InMemoryStore,
    writes: AtomicU64,
}

impl FirstWriteOnlyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            writes: AtomicU64::new(0),
        }
    }
}

impl ValueStore for FirstWriteOnlyStore {
    fn set(&self, value: Value) -> Result<(), StoreError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(StoreError::write("read-only"));
        }
        self.inner.set(value)
    }

    fn get(&self) -> Result<Option<Value>, StoreError> {
        self.inner.get()
    }
}

fn flaky_components() -> Components {
    Components {
        store: Arc::new(FirstWriteOnlyStore::new()),
        generator: Arc::new(SequenceGenerator::default()),
    }
}

#[tokio::test]
async fn test_refresh_failure_keeps_serving_last_value() {
    let config = test_config(10, false);
    let listeners = Listeners::bind(&config).await.unwrap();
    let grpc_addr = listeners.grpc_addr().unwrap();
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::for_server(&config));
    let (stop, stopped) = oneshot::channel::<()>();

    let server = serve(config, listeners, flaky_components(), &coordinator, async {
        let _ = stopped.await;
    });
    let client = async {
        // second scheduled refresh fails at ~20ms
        sleep(Duration::from_millis(100)).await;
        assert_eq!(grpc_uid(grpc_addr).await.unwrap(), "value-0");
        stop.send(()).unwrap();
    };

    let (served, ()) = timeout(Duration::from_secs(10), async { tokio::join!(server, client) })
        .await
        .unwrap();
    served.unwrap();
}

#[tokio::test]
async fn test_refresh_failure_exits_when_configured() {
    let config = test_config(10, true);
    let listeners = Listeners::bind(&config).await.unwrap();
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::for_server(&config));

    let result = timeout(
        Duration::from_secs(5),
        serve(config, listeners, flaky_components(), &coordinator, std::future::pending()),
    )
    .await
    .unwrap();

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("read-only"));
    assert!(coordinator.is_shutdown_initiated());
}
