//! Transport seam between the client and the gRPC stack.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tonic::transport::{Channel, Endpoint};
use tracing::info;

use crate::error::TemporaryError;
use crate::wire::external_preimage_service_client::ExternalPreimageServiceClient;
use crate::wire::{GetPreimageRequest, GetPreimageResponse};

/// Server-sent messages of one `GetPreimage` call.
pub type ResponseStream = BoxStream<'static, Result<GetPreimageResponse, tonic::Status>>;

/// Dials the external preimage service and opens `GetPreimage` streams.
///
/// [`GrpcRpc`] is the production implementation; tests substitute a stub to
/// script stream contents without a server.
#[async_trait]
pub trait PreimageRpc: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    async fn dial(
        &self,
        host: &str,
        connect_timeout: Duration,
    ) -> Result<Self::Connection, TemporaryError>;

    /// Sends `request` as the only client message and returns the response
    /// stream. The request side is closed once this returns.
    async fn get_preimage(
        &self,
        connection: &Self::Connection,
        request: GetPreimageRequest,
    ) -> Result<ResponseStream, tonic::Status>;
}

/// Plaintext gRPC over `tonic`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcRpc;

#[async_trait]
impl PreimageRpc for GrpcRpc {
    type Connection = Channel;

    async fn dial(&self, host: &str, connect_timeout: Duration) -> Result<Channel, TemporaryError> {
        let endpoint = Endpoint::from_shared(format!("http://{host}"))
            .map_err(|error| TemporaryError::Connection(error.to_string()))?
            .connect_timeout(connect_timeout);
        let channel = endpoint
            .connect()
            .await
            .map_err(|error| TemporaryError::Connection(error.to_string()))?;
        info!(host, "connected to external preimage service");
        Ok(channel)
    }

    async fn get_preimage(
        &self,
        connection: &Channel,
        request: GetPreimageRequest,
    ) -> Result<ResponseStream, tonic::Status> {
        let mut client = ExternalPreimageServiceClient::new(connection.clone());
        let response = client.get_preimage(request).await?;
        Ok(response.into_inner().boxed())
    }
}
