//! Ingestion configuration.
//!
//! Everything here is checked once by [`IngestConfig::validate`], which the
//! ingestion manager calls from its constructor. A bad configuration never
//! reaches the retry loop.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variables read by [`ProviderCredentials::from_env`].
pub const ENV_CONSUMER_KEY: &str = "TERMWATCH_CONSUMER_KEY";
pub const ENV_CONSUMER_SECRET: &str = "TERMWATCH_CONSUMER_SECRET";
pub const ENV_ACCESS_TOKEN: &str = "TERMWATCH_ACCESS_TOKEN";
pub const ENV_ACCESS_TOKEN_SECRET: &str = "TERMWATCH_ACCESS_TOKEN_SECRET";

/// Credentials handed to the streaming provider on every open.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl ProviderCredentials {
    /// Read credentials from the `TERMWATCH_*` environment variables.
    /// Missing variables become empty strings and fail validation.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        Self {
            consumer_key: var(ENV_CONSUMER_KEY),
            consumer_secret: var(ENV_CONSUMER_SECRET),
            access_token: var(ENV_ACCESS_TOKEN),
            access_token_secret: var(ENV_ACCESS_TOKEN_SECRET),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("consumer_key", &self.consumer_key),
            ("consumer_secret", &self.consumer_secret),
            ("access_token", &self.access_token),
            ("access_token_secret", &self.access_token_secret),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingCredential(name));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &self.access_token)
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

/// Reconnect delay settings. Attempt `k` waits `min(max_delay, base^k)` ms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Exponent base, in milliseconds.
    /// Default: 50
    pub base_ms: u64,

    /// Upper bound on any single delay.
    /// Default: 300000 (5 minutes)
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 50,
            max_delay_ms: 5 * 60 * 1000,
        }
    }
}

impl BackoffConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_ms == 0 {
            return Err(ConfigError::InvalidBackoff("base_ms must be at least 1".into()));
        }
        if self.max_delay_ms == 0 {
            return Err(ConfigError::InvalidBackoff(
                "max_delay_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Sizes of the bounded buffers between the provider, the worker and the
/// store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Captured events waiting to be written. When full, new events are
    /// dropped.
    /// Default: 1024
    pub insert_capacity: usize,

    /// Provider signals waiting for the worker. When full, new signals are
    /// dropped.
    /// Default: 4096
    pub signal_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            insert_capacity: 1024,
            signal_capacity: 4096,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.insert_capacity == 0 {
            return Err(ConfigError::InvalidQueue("insert_capacity must be at least 1".into()));
        }
        if self.signal_capacity == 0 {
            return Err(ConfigError::InvalidQueue("signal_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Ingestion manager configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub credentials: ProviderCredentials,
    pub backoff: BackoffConfig,
    pub queues: QueueConfig,
}

impl IngestConfig {
    /// Defaults with the given credentials.
    pub fn with_credentials(credentials: ProviderCredentials) -> Self {
        Self {
            credentials,
            ..Default::default()
        }
    }

    /// Load from a JSON file. Fields left out take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.credentials.validate()?;
        self.backoff.validate()?;
        self.queues.validate()
    }
}
