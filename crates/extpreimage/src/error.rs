//! Error taxonomy for external preimage retrieval.
//!
//! Every retrieval failure is either temporary (the same request may succeed
//! later) or permanent (the service will never produce the preimage). The two
//! are never merged: callers retry on [`TemporaryError`] and give up on
//! [`PermanentError`].

use thiserror::Error;

/// Failures that leave the preimage obtainable by a later attempt.
#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("extpreimage: invalid chain name: {0}")]
    UnsupportedChain(String),

    #[error("no extpreimage client configured")]
    NoClientConfigured,

    #[error("extpreimage: failed to start gRPC connection: {0}")]
    Connection(String),

    #[error("extpreimage: timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(std::time::Duration),

    #[error("extpreimage: client connections are closed")]
    Closed,

    #[error("extpreimage: no response within {0:?}")]
    Timeout(std::time::Duration),

    #[error("extpreimage: transport error: {0}")]
    Transport(#[from] tonic::Status),

    #[error("extpreimage: server closed stream early")]
    StreamClosedEarly,

    #[error("extpreimage: returned preimage was of length {actual}, expected 32")]
    InvalidPreimageLength { actual: usize },

    #[error("extpreimage: returned preimage did not match provided hash")]
    PreimageHashMismatch,

    #[error("unable to persist preimage to invoice registry: {0}")]
    RegistryWrite(String),
}

/// Failures after which the preimage can never be resolved on this path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermanentError {
    #[error("extpreimage: encountered permanent error from external service: {0}")]
    Service(String),

    #[error("no preimage available on invoice")]
    NoPreimageAvailable,
}

/// Outcome of a failed resolution attempt.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("temporary error: {0}")]
    Temporary(#[from] TemporaryError),

    #[error("permanent error: {0}")]
    Permanent(#[from] PermanentError),
}

impl RetrievalError {
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    pub fn as_temporary(&self) -> Option<&TemporaryError> {
        match self {
            Self::Temporary(error) => Some(error),
            Self::Permanent(_) => None,
        }
    }

    pub fn as_permanent(&self) -> Option<&PermanentError> {
        match self {
            Self::Permanent(error) => Some(error),
            Self::Temporary(_) => None,
        }
    }
}

/// Configuration and construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("extpreimage: invalid chain name: {0}")]
    UnsupportedChain(String),

    #[error("missing {0}")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Result alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
