//! REST/JSON front-end.

use crate::error::{ErrorCode, RefreshError};
use crate::health::{self, HealthChecker};
use crate::logging::operation_span;
use crate::model::ValueResponse;
use crate::server::{DEFAULT_REFRESH_TIMEOUT, refresh_within};
use crate::service::ValueService;
use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info};

pub const HASH_PATH: &str = "/api/hash";
pub const REFRESH_PATH: &str = "/api/hash/refresh";

/// Shared state of the REST router.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<dyn ValueService>,
    pub health: Arc<HealthChecker>,
    pub refresh_timeout: Duration,
}

impl ApiState {
    pub fn new(service: Arc<dyn ValueService>, health: Arc<HealthChecker>) -> Self {
        Self {
            service,
            health,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }
}

impl FromRef<ApiState> for Arc<HealthChecker> {
    fn from_ref(state: &ApiState) -> Self {
        state.health.clone()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(HASH_PATH, get(get_hash))
        .route(REFRESH_PATH, post(refresh_hash))
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .route("/health/components", get(health::components_handler))
        .fallback(not_found)
        .with_state(state)
}

/// Serve `router` on `listener` until `token` is cancelled, then finish
/// in-flight requests and return.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(transport = "http", bind = %addr, path = HASH_PATH, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    info!(transport = "http", "listener stopped");
    Ok(())
}

/// `GET /api/hash`
async fn get_hash(State(state): State<ApiState>) -> Result<Json<ValueResponse>, ApiError> {
    let value = state
        .service
        .get()
        .instrument(operation_span("rest.get_hash"))
        .await?;
    Ok(Json(value.into()))
}

/// `POST /api/hash/refresh`, 504 when the refresh overruns its timeout.
async fn refresh_hash(State(state): State<ApiState>) -> Result<Json<ValueResponse>, ApiError> {
    let value = refresh_within(state.service.as_ref(), state.refresh_timeout)
        .instrument(operation_span("rest.refresh_hash"))
        .await?;
    Ok(Json(value.into()))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// JSON body of a failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// A core error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(RefreshError);

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self.0, code = %code, "request failed");

        let body = ErrorBody {
            error: self.0.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
