//! Protocol front-ends.
//!
//! Both front-ends depend only on [`ValueService`](crate::service::ValueService)
//! and stop accepting connections when the shared cancellation token fires.
//! A forced refresh is bounded by the same timeout as a scheduled one.

pub mod grpc;
pub mod rest;

pub use grpc::HashGrpcService;
pub use rest::{ApiError, ApiState, router};

use crate::error::RefreshError;
use crate::model::Value;
use crate::service::ValueService;
use std::time::Duration;
use tokio::time::timeout;

pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(1);

/// Refresh, then read back the installed value. Fails with
/// [`RefreshError::Timeout`] when the refresh does not finish within `limit`;
/// the value in place before the call is kept in that case.
pub async fn refresh_within(
    service: &dyn ValueService,
    limit: Duration,
) -> Result<Value, RefreshError> {
    timeout(limit, service.refresh())
        .await
        .map_err(|_| RefreshError::timeout(limit))??;
    service.get().await
}
