//! Client for an external preimage service.
//!
//! This crate exposes a small surface:
//! - payment hash / preimage domain types
//! - wire contracts for the `GetPreimage` streaming RPC
//! - a client that reduces that stream to one verified preimage, over either
//!   a single lazily dialled connection or a bounded connection pool

pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod rpc;
pub mod types;
pub mod wire;

pub use client::{ExtPreimageClient, PreimageRetriever};
pub use config::{ConnectionMode, ExtPreimageConfig};
pub use error::{ConfigError, PermanentError, Result, RetrievalError, TemporaryError};
pub use pool::{ConnectionOrigin, ConnectionPool, Connector, SingleConnection};
pub use rpc::{GrpcRpc, PreimageRpc, ResponseStream};
pub use types::{Chain, HASH_LEN, PaymentHash, Preimage, PreimageRequest};
