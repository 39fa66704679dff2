use crate::scheduler::SchedulerConfig;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_GRPC_PORT: u16 = 50051;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub http_bind_address: SocketAddr,
    pub grpc_bind_address: SocketAddr,
    pub refresh_interval: Duration,
    pub refresh_timeout: Duration,
    pub graceful_shutdown_timeout_secs: u64,
    /// Stop the whole process when the scheduler fails instead of serving the
    /// last value until shutdown
    pub exit_on_refresh_failure: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_HTTP_PORT)),
            grpc_bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_GRPC_PORT)),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            refresh_timeout: Duration::from_millis(DEFAULT_REFRESH_TIMEOUT_MS),
            graceful_shutdown_timeout_secs: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS,
            exit_on_refresh_failure: false,
        }
    }
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            http_bind: cli_http_bind,
            grpc_bind: cli_grpc_bind,
            refresh_interval_ms: cli_refresh_interval_ms,
            refresh_timeout_ms: cli_refresh_timeout_ms,
            graceful_shutdown_timeout_secs: cli_graceful_shutdown_timeout_secs,
            exit_on_refresh_failure: cli_exit_on_refresh_failure,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            FileOverrides::default()
        };

        let FileOverrides {
            http_bind: file_http_bind,
            grpc_bind: file_grpc_bind,
            refresh_interval: file_refresh_interval,
            refresh_timeout: file_refresh_timeout,
            graceful_shutdown_timeout_secs: file_graceful_shutdown_timeout_secs,
            exit_on_refresh_failure: file_exit_on_refresh_failure,
        } = file_config;

        let defaults = Self::default();

        Ok(Self {
            http_bind_address: cli_http_bind
                .or(file_http_bind)
                .unwrap_or(defaults.http_bind_address),
            grpc_bind_address: cli_grpc_bind
                .or(file_grpc_bind)
                .unwrap_or(defaults.grpc_bind_address),
            refresh_interval: cli_refresh_interval_ms
                .map(Duration::from_millis)
                .or(file_refresh_interval)
                .unwrap_or(defaults.refresh_interval),
            refresh_timeout: cli_refresh_timeout_ms
                .map(Duration::from_millis)
                .or(file_refresh_timeout)
                .unwrap_or(defaults.refresh_timeout),
            graceful_shutdown_timeout_secs: cli_graceful_shutdown_timeout_secs
                .or(file_graceful_shutdown_timeout_secs)
                .unwrap_or(defaults.graceful_shutdown_timeout_secs),
            exit_on_refresh_failure: cli_exit_on_refresh_failure
                .or(file_exit_on_refresh_failure)
                .unwrap_or(defaults.exit_on_refresh_failure),
        })
    }

    /// Reject configurations the scheduler and listeners cannot honour.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.refresh_interval.is_zero(),
            "refresh interval must be greater than zero"
        );
        anyhow::ensure!(
            !self.refresh_timeout.is_zero(),
            "refresh timeout must be greater than zero"
        );
        anyhow::ensure!(
            self.refresh_timeout <= self.refresh_interval,
            "refresh timeout ({:?}) must not exceed refresh interval ({:?})",
            self.refresh_timeout,
            self.refresh_interval
        );
        anyhow::ensure!(
            self.http_bind_address != self.grpc_bind_address,
            "http and grpc listeners cannot share address {}",
            self.http_bind_address
        );
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            refresh_interval: self.refresh_interval,
            refresh_timeout: self.refresh_timeout,
        }
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_secs)
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "refresh-hash",
    about = "Serves a periodically regenerated identifier over REST and gRPC",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        env = "REFRESH_HASH_CONFIG",
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "REFRESH_HASH_HTTP_BIND",
        value_name = "ADDR",
        help = "Bind address of the REST API"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "REFRESH_HASH_GRPC_BIND",
        value_name = "ADDR",
        help = "Bind address of the gRPC API"
    )]
    pub grpc_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "REFRESH_HASH_REFRESH_INTERVAL_MS",
        value_name = "MS",
        help = "Milliseconds between scheduled refreshes",
        value_parser = clap::value_parser!(u64)
    )]
    pub refresh_interval_ms: Option<u64>,

    #[arg(
        long,
        env = "REFRESH_HASH_REFRESH_TIMEOUT_MS",
        value_name = "MS",
        help = "Deadline in milliseconds for a single scheduled refresh",
        value_parser = clap::value_parser!(u64)
    )]
    pub refresh_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "REFRESH_HASH_GRACEFUL_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Seconds the listeners get to drain on shutdown",
        value_parser = clap::value_parser!(u64)
    )]
    pub graceful_shutdown_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "REFRESH_HASH_EXIT_ON_REFRESH_FAILURE",
        value_name = "BOOL",
        help = "Shut down when a scheduled refresh fails (default: keep serving)"
    )]
    pub exit_on_refresh_failure: Option<bool>,
}

/// Config file contents. Two layouts are accepted: flat keys
/// (`http_bind`, `refresh_interval_ms`, ...) and the nested layout of older
/// deployments (`api-server.http.*`, `ticker.*`) with duration strings such as
/// `5s` or `1m30s`. Flat keys win when both are present; a `logger` section is
/// ignored, logging is configured through `LOG_*` variables.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    http_bind: Option<SocketAddr>,
    grpc_bind: Option<SocketAddr>,
    refresh_interval_ms: Option<u64>,
    refresh_timeout_ms: Option<u64>,
    graceful_shutdown_timeout_secs: Option<u64>,
    exit_on_refresh_failure: Option<bool>,
    #[serde(rename = "api-server")]
    api_server: Option<ApiServerSection>,
    ticker: Option<TickerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiServerSection {
    http: Option<HttpSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HttpSection {
    listen_address: Option<String>,
    graceful_timeout: Option<DurationValue>,
    address_grpc: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TickerSection {
    timer: Option<DurationValue>,
    time_out: Option<DurationValue>,
}

/// A bare integer is nanoseconds, a string is parsed with [`parse_duration`].
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Nanos(u64),
    Text(String),
}

impl DurationValue {
    fn resolve(&self) -> Result<Duration> {
        match self {
            DurationValue::Nanos(nanos) => Ok(Duration::from_nanos(*nanos)),
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}

/// File settings after both layouts are merged.
#[derive(Debug, Default, PartialEq, Eq)]
struct FileOverrides {
    http_bind: Option<SocketAddr>,
    grpc_bind: Option<SocketAddr>,
    refresh_interval: Option<Duration>,
    refresh_timeout: Option<Duration>,
    graceful_shutdown_timeout_secs: Option<u64>,
    exit_on_refresh_failure: Option<bool>,
}

impl PartialConfig {
    fn resolve(self) -> Result<FileOverrides> {
        let http = self.api_server.and_then(|section| section.http).unwrap_or_default();
        let ticker = self.ticker.unwrap_or_default();

        let nested_http_bind = http
            .listen_address
            .as_deref()
            .map(parse_listen_address)
            .transpose()?;
        let nested_grpc_bind = http
            .address_grpc
            .as_deref()
            .map(parse_listen_address)
            .transpose()?;
        let nested_graceful = http
            .graceful_timeout
            .as_ref()
            .map(DurationValue::resolve)
            .transpose()?
            .map(|timeout| timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0));
        let nested_interval = ticker.timer.as_ref().map(DurationValue::resolve).transpose()?;
        let nested_timeout = ticker.time_out.as_ref().map(DurationValue::resolve).transpose()?;

        Ok(FileOverrides {
            http_bind: self.http_bind.or(nested_http_bind),
            grpc_bind: self.grpc_bind.or(nested_grpc_bind),
            refresh_interval: self
                .refresh_interval_ms
                .map(Duration::from_millis)
                .or(nested_interval),
            refresh_timeout: self
                .refresh_timeout_ms
                .map(Duration::from_millis)
                .or(nested_timeout),
            graceful_shutdown_timeout_secs: self.graceful_shutdown_timeout_secs.or(nested_graceful),
            exit_on_refresh_failure: self.exit_on_refresh_failure,
        })
    }
}

fn load_config_file(path: &Path) -> Result<FileOverrides> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed: PartialConfig = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    parsed
        .resolve()
        .with_context(|| format!("invalid value in config file {:?}", path))
}

/// Parse `host:port`; an empty host (`:8080`) means every interface.
fn parse_listen_address(text: &str) -> Result<SocketAddr> {
    let text = text.trim();
    let (host, port) = text
        .rsplit_once(':')
        .with_context(|| format!("listen address {text:?} has no port"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in listen address {text:?}"))?;
    let ip = match host.trim_start_matches('[').trim_end_matches(']') {
        "" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        other => other
            .parse()
            .with_context(|| format!("invalid host in listen address {text:?}"))?,
    };
    Ok(SocketAddr::new(ip, port))
}

/// Parse a duration such as `300ms`, `1.5s` or `1h15m`.
///
/// Units: `ns`, `us` (`µs`), `ms`, `s`, `m`, `h`. A bare `0` is allowed,
/// any other number needs a unit.
fn parse_duration(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    anyhow::ensure!(!trimmed.is_empty(), "empty duration");
    anyhow::ensure!(!trimmed.starts_with('-'), "negative duration {text:?}");
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = trimmed;
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let amount: f64 = number
            .parse()
            .with_context(|| format!("invalid duration {text:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            "" => anyhow::bail!("missing unit in duration {text:?}"),
            other => anyhow::bail!("unknown unit {other:?} in duration {text:?}"),
        };
        nanos += amount * scale;
        rest = tail;
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}
