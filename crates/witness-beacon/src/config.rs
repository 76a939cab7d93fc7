//! Beacon configuration.

use std::env;
use std::time::Duration;

use extpreimage::ConfigError;

/// Interval between retries of a pending external preimage lookup.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 10;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on one resolution attempt, lookup or poll tick.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconConfig {
    pub poll_interval: Duration,
    /// Capacity of each subscriber's update channel.
    pub subscriber_buffer: usize,
    /// How long delivery waits on a full subscriber before moving on.
    pub delivery_timeout: Duration,
    /// How long a lookup or poll tick waits on the external service before
    /// treating the attempt as a temporary failure.
    pub resolve_timeout: Duration,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

impl BeaconConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_subscriber_buffer(mut self, subscriber_buffer: usize) -> Self {
        self.subscriber_buffer = subscriber_buffer;
        self
    }

    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    pub fn with_resolve_timeout(mut self, resolve_timeout: Duration) -> Self {
        self.resolve_timeout = resolve_timeout;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            poll_interval: parse_millis("WITNESS_BEACON_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL)?,
            subscriber_buffer: match env::var("WITNESS_BEACON_SUBSCRIBER_BUFFER") {
                Ok(value) => value.trim().parse().map_err(|error: std::num::ParseIntError| {
                    ConfigError::Invalid {
                        name: "WITNESS_BEACON_SUBSCRIBER_BUFFER",
                        reason: error.to_string(),
                    }
                })?,
                Err(_) => DEFAULT_SUBSCRIBER_BUFFER,
            },
            delivery_timeout: parse_millis(
                "WITNESS_BEACON_DELIVERY_TIMEOUT_MS",
                DEFAULT_DELIVERY_TIMEOUT,
            )?,
            resolve_timeout: parse_millis(
                "WITNESS_BEACON_RESOLVE_TIMEOUT_MS",
                DEFAULT_RESOLVE_TIMEOUT,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "WITNESS_BEACON_POLL_INTERVAL_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.resolve_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "WITNESS_BEACON_RESOLVE_TIMEOUT_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        // tokio's mpsc::channel panics on a zero capacity.
        if self.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "WITNESS_BEACON_SUBSCRIBER_BUFFER",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
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
