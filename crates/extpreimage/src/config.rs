//! Client configuration.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::Chain;

pub const DEFAULT_POOL_CAPACITY: usize = 5;
pub const DEFAULT_POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on waiting for the single `GetPreimage` response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the client holds connections to the external preimage service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// One lazily dialled connection shared by every call.
    Single,
    /// A bounded pool; each call checks a connection out and returns it.
    #[default]
    Pooled,
}

impl ConnectionMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "pooled" | "pool" => Ok(Self::Pooled),
            other => Err(ConfigError::Invalid {
                name: "EXTPREIMAGE_CONNECTION_MODE",
                reason: format!("unknown mode {other}"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtPreimageConfig {
    /// `host:port` of the external preimage service.
    pub host: String,
    /// Configured chain name. Validated at client construction and mapped
    /// to a currency symbol on every request.
    pub chain: String,
    pub mode: ConnectionMode,
    pub pool_capacity: usize,
    pub pool_acquire_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ExtPreimageConfig {
    pub fn new(host: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            chain: chain.into(),
            mode: ConnectionMode::default(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pool_acquire_timeout: DEFAULT_POOL_ACQUIRE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("EXTPREIMAGE_RPC_HOST")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::Missing("EXTPREIMAGE_RPC_HOST"))?;
        let chain = env::var("EXTPREIMAGE_CHAIN").unwrap_or_else(|_| "bitcoin".to_string());
        let mode = ConnectionMode::parse(
            env::var("EXTPREIMAGE_CONNECTION_MODE")
                .unwrap_or_else(|_| "pooled".to_string())
                .as_str(),
        )?;
        let pool_capacity = env::var("EXTPREIMAGE_POOL_CAPACITY")
            .unwrap_or_else(|_| DEFAULT_POOL_CAPACITY.to_string())
            .parse::<usize>()
            .map_err(|error| ConfigError::Invalid {
                name: "EXTPREIMAGE_POOL_CAPACITY",
                reason: error.to_string(),
            })?;
        let pool_acquire_timeout = parse_millis(
            "EXTPREIMAGE_POOL_ACQUIRE_TIMEOUT_MS",
            DEFAULT_POOL_ACQUIRE_TIMEOUT,
        )?;
        let connect_timeout =
            parse_millis("EXTPREIMAGE_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT)?;
        let request_timeout =
            parse_millis("EXTPREIMAGE_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT)?;

        let config = Self {
            host,
            chain,
            mode,
            pool_capacity,
            pool_acquire_timeout,
            connect_timeout,
            request_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings a client cannot start without.
    pub fn validate(&self) -> Result<Chain, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("extpreimage host"));
        }
        if self.pool_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "EXTPREIMAGE_POOL_CAPACITY",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "EXTPREIMAGE_REQUEST_TIMEOUT_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.chain.parse()
    }
}

fn parse_millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|error| ConfigError::Invalid {
                name,
                reason: error.to_string(),
            }),
        Err(_) => Ok(default),
    }
}
