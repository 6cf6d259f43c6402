// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_CONNECTION_TIMEOUT_MS: i64 = 5000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Server endpoint must not be blank")]
    BlankEndpoint,

    #[error("Invalid server endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Failed to read client configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse client configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Settings of one client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfiguration {
    /// Full URL of the remoting endpoint, e.g. `http://localhost:8080/remoting`.
    pub server_endpoint: String,

    /// TCP connect timeout in milliseconds. Values below 1 fall back to the default.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: i64,

    /// Request timeout for ordinary exchanges.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub long_poll: bool,

    /// Request timeout for long-poll exchanges. Must exceed the server's hold time.
    #[serde(default = "default_long_poll_timeout_ms")]
    pub long_poll_timeout_ms: u64,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_connection_timeout_ms() -> i64 {
    DEFAULT_CONNECTION_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_long_poll_timeout_ms() -> u64 {
    60_000
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfiguration {
    pub fn new(server_endpoint: impl Into<String>) -> Result<Self, ConfigurationError> {
        let config = Self {
            server_endpoint: server_endpoint.into(),
            connection_timeout_ms: default_connection_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            long_poll: true,
            long_poll_timeout_ms: default_long_poll_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            log_level: default_log_level(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Set the connect timeout. Values below 1 ms are logged and ignored.
    pub fn with_connection_timeout(mut self, millis: i64) -> Self {
        if millis < 1 {
            warn!(
                requested = millis,
                default = DEFAULT_CONNECTION_TIMEOUT_MS,
                "Connection timeout must be positive, keeping default"
            );
            self.connection_timeout_ms = DEFAULT_CONNECTION_TIMEOUT_MS;
        } else {
            self.connection_timeout_ms = millis;
        }
        self
    }

    pub fn with_long_poll(mut self, enabled: bool) -> Self {
        self.long_poll = enabled;
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        if self.connection_timeout_ms < 1 {
            warn!(
                configured = self.connection_timeout_ms,
                default = DEFAULT_CONNECTION_TIMEOUT_MS,
                "Connection timeout must be positive, using default"
            );
            return Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS as u64);
        }
        Duration::from_millis(self.connection_timeout_ms as u64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let endpoint = self.server_endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigurationError::BlankEndpoint);
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigurationError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(())
    }
}
