//! External preimage client.
//!
//! `GetPreimage` is a server-streaming call that is expected to produce a
//! single response, possibly after a long wait. [`ExtPreimageClient`] reduces
//! it to one verified [`Preimage`] and classifies every failure as temporary
//! or permanent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::config::ExtPreimageConfig;
use crate::error::{ConfigError, PermanentError, Result, TemporaryError};
use crate::pool::{Checkout, ConnectionOrigin, Connector};
use crate::rpc::{GrpcRpc, PreimageRpc};
use crate::types::{Chain, Preimage, PreimageRequest};
use crate::wire::{GetPreimageRequest, GetPreimageResponse, Symbol};

/// Anything that can turn a [`PreimageRequest`] into a verified preimage.
#[async_trait]
pub trait PreimageRetriever: Send + Sync {
    async fn retrieve(&self, request: &PreimageRequest) -> Result<Preimage>;

    /// Releases connections. Safe to call more than once.
    async fn stop(&self);
}

pub struct ExtPreimageClient<R: PreimageRpc = GrpcRpc> {
    host: String,
    chain: String,
    request_timeout: Duration,
    rpc: Arc<R>,
    connector: Connector<R>,
}

impl ExtPreimageClient<GrpcRpc> {
    /// Creates a client without connecting; the first retrieval dials.
    pub fn new(config: ExtPreimageConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_rpc(GrpcRpc, config)
    }
}

impl<R: PreimageRpc> ExtPreimageClient<R> {
    pub fn with_rpc(rpc: R, config: ExtPreimageConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let rpc = Arc::new(rpc);
        Ok(Self {
            host: config.host.clone(),
            chain: config.chain.clone(),
            request_timeout: config.request_timeout,
            connector: Connector::from_config(Arc::clone(&rpc), &config),
            rpc,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Checks out a connection, dialling if none is available.
    pub async fn connect(
        &self,
    ) -> std::result::Result<(Checkout<R::Connection>, ConnectionOrigin), TemporaryError> {
        self.connector.checkout().await
    }

    fn symbol(&self) -> std::result::Result<Symbol, TemporaryError> {
        self.chain
            .parse::<Chain>()
            .map(|chain| chain.symbol())
            .map_err(|_| TemporaryError::UnsupportedChain(self.chain.clone()))
    }

    /// Opens the stream and waits for its first message, bounded by the
    /// request timeout so a silent server cannot hold the caller.
    async fn fetch(
        &self,
        request: GetPreimageRequest,
    ) -> std::result::Result<GetPreimageResponse, TemporaryError> {
        let (connection, origin) = self.connect().await?;
        debug!(host = %self.host, ?origin, "opening GetPreimage stream");

        timeout(self.request_timeout, self.exchange(&connection, request))
            .await
            .map_err(|_| TemporaryError::Timeout(self.request_timeout))?
    }

    async fn exchange(
        &self,
        connection: &R::Connection,
        request: GetPreimageRequest,
    ) -> std::result::Result<GetPreimageResponse, TemporaryError> {
        let mut stream = self.rpc.get_preimage(connection, request).await?;
        match stream.next().await {
            Some(Ok(response)) => Ok(response),
            Some(Err(status)) => Err(TemporaryError::Transport(status)),
            None => Err(TemporaryError::StreamClosedEarly),
        }
    }

    pub async fn retrieve(&self, request: &PreimageRequest) -> Result<Preimage> {
        let symbol = self.symbol()?;

        let wire_request = GetPreimageRequest {
            payment_hash: request.payment_hash.to_vec(),
            amount: request.amount_sats,
            symbol: symbol as i32,
            time_lock: i64::from(request.time_lock),
            best_height: i64::from(request.best_height),
        };

        let response = self.fetch(wire_request).await?;

        if !response.permanent_error.is_empty() {
            error!(
                payment_hash = %request.payment_hash,
                error = %response.permanent_error,
                "external preimage service reported permanent failure"
            );
            return Err(PermanentError::Service(response.permanent_error).into());
        }

        let preimage = Preimage::try_from(response.payment_preimage.as_slice()).map_err(|_| {
            TemporaryError::InvalidPreimageLength {
                actual: response.payment_preimage.len(),
            }
        })?;

        // Hash and preimage are stored separately by the service, so check
        // the pairing before handing it out.
        if !preimage.matches(&request.payment_hash) {
            return Err(TemporaryError::PreimageHashMismatch.into());
        }

        Ok(preimage)
    }

    pub async fn stop(&self) {
        self.connector.close().await;
    }
}

#[async_trait]
impl<R: PreimageRpc> PreimageRetriever for ExtPreimageClient<R> {
    async fn retrieve(&self, request: &PreimageRequest) -> Result<Preimage> {
        ExtPreimageClient::retrieve(self, request).await
    }

    async fn stop(&self) {
        ExtPreimageClient::stop(self).await;
    }
}
