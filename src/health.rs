use crate::scheduler::{SchedulerState, SchedulerStatus};
use crate::store::ValueStore;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is functioning normally
    Healthy,
    /// Still serving, but not refreshing as configured
    Degraded,
    /// Component is not functioning
    Unhealthy,
}

impl HealthStatus {
    /// Returns the HTTP status code for this health status
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::OK, // Still serve traffic but indicate degradation
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Combines two health statuses, returning the worse of the two
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    pub fn healthy(component: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            error: None,
            timestamp: now(),
            details,
        }
    }

    pub fn degraded(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            error: Some(error.into()),
            timestamp: now(),
            details: None,
        }
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            error: Some(error.into()),
            timestamp: now(),
            details: None,
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

/// Readiness check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    /// Components that are not ready
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

/// Detailed component health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: HashMap<String, ComponentHealth>,
}

impl IntoResponse for ComponentHealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

/// Reports on the value store and the scheduler.
///
/// Reads the store directly so a health probe never triggers the lazy
/// refresh a regular read would.
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn ValueStore>,
    scheduler: Arc<SchedulerStatus>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn ValueStore>, scheduler: Arc<SchedulerStatus>) -> Self {
        Self { store, scheduler }
    }

    /// Healthy whenever the process can answer at all.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all_components();
        let mut overall = HealthStatus::Healthy;
        let mut not_ready = Vec::new();

        for (name, health) in &components {
            overall = overall.combine(health.status);
            if health.status == HealthStatus::Unhealthy {
                not_ready.push(name.clone());
            }
        }
        not_ready.sort();

        ReadinessResponse {
            ready: overall != HealthStatus::Unhealthy,
            status: overall,
            timestamp: now(),
            not_ready,
        }
    }

    pub fn components(&self) -> ComponentHealthResponse {
        let components = self.check_all_components();
        let overall = components
            .values()
            .fold(HealthStatus::Healthy, |acc, health| acc.combine(health.status));

        ComponentHealthResponse {
            status: overall,
            timestamp: now(),
            components,
        }
    }

    fn check_all_components(&self) -> HashMap<String, ComponentHealth> {
        let mut components = HashMap::new();
        components.insert("value".to_string(), self.check_value());
        components.insert("scheduler".to_string(), self.check_scheduler());
        components
    }

    fn check_value(&self) -> ComponentHealth {
        match self.store.get() {
            Ok(Some(value)) => ComponentHealth::healthy(
                "value",
                Some(serde_json::json!({
                    "generated_at": value.generated_at().to_rfc3339(),
                })),
            ),
            // readers still get a value through the lazy refresh
            Ok(None) => ComponentHealth::degraded("value", "no value generated yet"),
            Err(e) => ComponentHealth::unhealthy("value", e.to_string()),
        }
    }

    fn check_scheduler(&self) -> ComponentHealth {
        match self.scheduler.state() {
            None => ComponentHealth::unhealthy("scheduler", "scheduler not started"),
            Some(SchedulerState::Running) => ComponentHealth::healthy(
                "scheduler",
                Some(serde_json::json!({
                    "refresh_count": self.scheduler.refresh_count(),
                    "last_refresh_at": self.scheduler.last_refresh_at().map(|at| at.to_rfc3339()),
                })),
            ),
            Some(SchedulerState::Stopped) => match self.scheduler.last_error() {
                // serving the last value until the host shuts down
                Some(error) => ComponentHealth::degraded("scheduler", error),
                None => ComponentHealth::unhealthy("scheduler", "scheduler stopped"),
            },
        }
    }
}

/// `GET /health`
pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> HealthResponse {
    checker.liveness()
}

/// `GET /ready`
pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> ReadinessResponse {
    checker.readiness()
}

/// `GET /health/components`
pub async fn components_handler(
    State(checker): State<Arc<HealthChecker>>,
) -> ComponentHealthResponse {
    checker.components()
}
