//! Builder configuration.
//!
//! Limits that protect memory and invocation duration of a single build step.
//!
//! # Example
//!
//! ```
//! use readmodel_runtime::config::BuilderConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Read READMODEL_* variables, falling back to defaults
//! let config = BuilderConfig::from_env()?;
//! config.validate()?;
//!
//! println!("Events per batch: {}", config.event_limit);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
    /// Failed to parse an environment value
    #[error("Failed to parse {var}: {message}")]
    ParseError {
        /// Variable name
        var: String,
        /// Parse failure
        message: String,
    },
}

/// Limits applied by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Maximum events loaded per step
    pub event_limit: usize,
    /// Soft cap on the summed size of a batch, in bytes
    pub events_size_limit: usize,
    /// Lease lifetime in milliseconds; a crashed builder blocks its read model at most this long
    pub lease_ttl_ms: u64,
    /// Remaining budget below which no new event is started, in milliseconds
    pub min_vacant_time_ms: u64,
    /// Compare-and-swap retries before a ledger write gives up
    pub max_conflict_retries: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            event_limit: 1000,
            events_size_limit: 32 * 1024 * 1024,
            lease_ttl_ms: 15 * 60 * 1000,
            min_vacant_time_ms: 5000,
            max_conflict_retries: 8,
        }
    }
}

impl BuilderConfig {
    /// Longest accepted lease lifetime (24 hours)
    pub const MAX_LEASE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

    /// Environment variable for [`Self::event_limit`]
    pub const EVENT_LIMIT_VAR: &'static str = "READMODEL_EVENT_LIMIT";
    /// Environment variable for [`Self::events_size_limit`]
    pub const EVENTS_SIZE_LIMIT_VAR: &'static str = "READMODEL_EVENTS_SIZE_LIMIT";
    /// Environment variable for [`Self::lease_ttl_ms`]
    pub const LEASE_TTL_MS_VAR: &'static str = "READMODEL_LEASE_TTL_MS";
    /// Environment variable for [`Self::min_vacant_time_ms`]
    pub const MIN_VACANT_TIME_MS_VAR: &'static str = "READMODEL_MIN_VACANT_TIME_MS";
    /// Environment variable for [`Self::max_conflict_retries`]
    pub const MAX_CONFLICT_RETRIES_VAR: &'static str = "READMODEL_MAX_CONFLICT_RETRIES";

    /// Load configuration from `READMODEL_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed or the result is invalid
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            event_limit: parse_var(&lookup, Self::EVENT_LIMIT_VAR, defaults.event_limit)?,
            events_size_limit: parse_var(
                &lookup,
                Self::EVENTS_SIZE_LIMIT_VAR,
                defaults.events_size_limit,
            )?,
            lease_ttl_ms: parse_var(&lookup, Self::LEASE_TTL_MS_VAR, defaults.lease_ttl_ms)?,
            min_vacant_time_ms: parse_var(
                &lookup,
                Self::MIN_VACANT_TIME_MS_VAR,
                defaults.min_vacant_time_ms,
            )?,
            max_conflict_retries: parse_var(
                &lookup,
                Self::MAX_CONFLICT_RETRIES_VAR,
                defaults.max_conflict_retries,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_limit == 0 {
            return Err(ConfigError::ValidationError(
                "event_limit must be > 0".to_string(),
            ));
        }
        if self.events_size_limit == 0 {
            return Err(ConfigError::ValidationError(
                "events_size_limit must be > 0".to_string(),
            ));
        }
        if self.lease_ttl_ms == 0 {
            return Err(ConfigError::ValidationError(
                "lease_ttl_ms must be > 0".to_string(),
            ));
        }
        if self.lease_ttl_ms > Self::MAX_LEASE_TTL_MS {
            return Err(ConfigError::ValidationError(format!(
                "lease_ttl_ms ({}) must not exceed {}",
                self.lease_ttl_ms,
                Self::MAX_LEASE_TTL_MS
            )));
        }
        if self.min_vacant_time_ms >= self.lease_ttl_ms {
            return Err(ConfigError::ValidationError(format!(
                "min_vacant_time_ms ({}) must be below lease_ttl_ms ({})",
                self.min_vacant_time_ms, self.lease_ttl_ms
            )));
        }
        Ok(())
    }

    /// Lease lifetime
    #[must_use]
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.lease_ttl_ms).unwrap_or(i64::MAX))
    }

    /// Minimum remaining budget to start an event
    #[must_use]
    pub const fn min_vacant_time(&self) -> Duration {
        Duration::from_millis(self.min_vacant_time_ms)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            var: var.to_string(),
            message: e.to_string(),
        }),
    }
}
