//! gRPC front-end.

use crate::error::{ErrorCode, RefreshError};
use crate::logging::operation_span;
use crate::model::Value;
use crate::server::{DEFAULT_REFRESH_TIMEOUT, refresh_within};
use crate::service::ValueService;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::transport::server::TcpIncoming;
use tonic::{Request, Response, Status};
use tracing::{Instrument, error, info};

pub mod proto {
    tonic::include_proto!("refreshhash.v1");
}

use proto::hash_service_server::{HashService, HashServiceServer};
use proto::{GetHashRequest, GetHashResponse, RefreshHashRequest};

/// Adapts a [`ValueService`] to the generated `HashService` trait.
#[derive(Clone)]
pub struct HashGrpcService {
    service: Arc<dyn ValueService>,
    refresh_timeout: Duration,
}

impl HashGrpcService {
    pub fn new(service: Arc<dyn ValueService>) -> Self {
        Self {
            service,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    pub fn into_server(self) -> HashServiceServer<Self> {
        HashServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl HashService for HashGrpcService {
    async fn get_hash(
        &self,
        _request: Request<GetHashRequest>,
    ) -> Result<Response<GetHashResponse>, Status> {
        let value = self
            .service
            .get()
            .instrument(operation_span("grpc.get_hash"))
            .await
            .map_err(to_status)?;
        Ok(Response::new(to_response(value)))
    }

    async fn refresh_hash(
        &self,
        _request: Request<RefreshHashRequest>,
    ) -> Result<Response<GetHashResponse>, Status> {
        let value = refresh_within(self.service.as_ref(), self.refresh_timeout)
            .instrument(operation_span("grpc.refresh_hash"))
            .await
            .map_err(to_status)?;
        Ok(Response::new(to_response(value)))
    }
}

pub fn to_response(value: Value) -> GetHashResponse {
    GetHashResponse {
        generated_at_unix_ms: value.generated_at().timestamp_millis(),
        uid: value.id().to_string(),
    }
}

pub fn to_status(err: RefreshError) -> Status {
    let code = err.code();
    error!(error = %err, code = %code, "rpc failed");
    match code {
        ErrorCode::DeadlineExceeded => Status::deadline_exceeded(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

/// Serve `service` on `listener` until `token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    service: HashGrpcService,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let incoming = TcpIncoming::from_listener(listener, true, None)
        .map_err(|e| anyhow::anyhow!("failed to accept grpc connections on {}: {}", addr, e))?;
    info!(transport = "grpc", bind = %addr, "listening");

    Server::builder()
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(incoming, async move { token.cancelled().await })
        .await?;

    info!(transport = "grpc", "listener stopped");
    Ok(())
}
