//! Configuration for the desk booking client.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unlike unset variables, values that are set but cannot be parsed are
//! reported instead of silently replaced by the default.

use chrono::NaiveDate;
use deskbook_runtime::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Gateway base URL used when `DESK_BOOKING_BASE_URL` is unset
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Errors raised while reading configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value cannot be used
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Booking service base URL (`DESK_BOOKING_BASE_URL`)
    pub base_url: String,
    /// Timeout of a single gateway call in milliseconds (`DESK_BOOKING_REQUEST_TIMEOUT_MS`)
    pub request_timeout_ms: u64,
    /// Retries for desk and booking listings (`DESK_BOOKING_FETCH_RETRIES`)
    pub fetch_retries: usize,
    /// First backoff delay in milliseconds (`DESK_BOOKING_RETRY_DELAY_MS`)
    pub retry_delay_ms: u64,
    /// Date selected at start-up (`DESK_BOOKING_DEFAULT_DATE`)
    pub default_date: NaiveDate,
    /// Name used for bookings when none is given (`DESK_BOOKING_USER`)
    pub user: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 5_000,
            fetch_retries: 2,
            retry_delay_ms: 200,
            default_date: NaiveDate::from_ymd_opt(2024, 6, 18).unwrap_or_default(),
            user: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a variable that is set to an
    /// unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a variable that is set to an
    /// unusable value.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = match lookup("DESK_BOOKING_BASE_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                url.trim_end_matches('/').to_string()
            },
            Some(url) => {
                return Err(ConfigError::Invalid {
                    name: "DESK_BOOKING_BASE_URL",
                    value: url,
                    reason: "expected an http or https URL".to_string(),
                });
            },
            None => defaults.base_url,
        };

        let request_timeout_ms = parsed(
            &lookup,
            "DESK_BOOKING_REQUEST_TIMEOUT_MS",
            defaults.request_timeout_ms,
        )?;
        if request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "DESK_BOOKING_REQUEST_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "timeout must be positive".to_string(),
            });
        }

        Ok(Self {
            base_url,
            request_timeout_ms,
            fetch_retries: parsed(&lookup, "DESK_BOOKING_FETCH_RETRIES", defaults.fetch_retries)?,
            retry_delay_ms: parsed(&lookup, "DESK_BOOKING_RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            default_date: parsed(&lookup, "DESK_BOOKING_DEFAULT_DATE", defaults.default_date)?,
            user: lookup("DESK_BOOKING_USER").filter(|user| !user.trim().is_empty()),
        })
    }

    /// Engine settings derived from this configuration
    #[must_use]
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            fetch_retry: RetryPolicy::builder()
                .max_retries(self.fetch_retries)
                .initial_delay(Duration::from_millis(self.retry_delay_ms))
                .build(),
            ..EngineConfig::default()
        }
    }
}

fn parsed<L, T>(lookup: &L, name: &'static str, default: T) -> Result<T, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: err.to_string(),
        }),
    }
}

/// Settings of the synchronization engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Bound on every gateway call
    pub request_timeout: Duration,
    /// Backoff for desk and booking listings; commands are never retried
    pub fetch_retry: RetryPolicy,
    /// Extra time a caller waits for a command result beyond `request_timeout`
    pub command_wait_margin: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            fetch_retry: RetryPolicy::default(),
            command_wait_margin: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Short timeouts and millisecond backoff for tests
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            request_timeout: Duration::from_millis(500),
            fetch_retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .jitter(false)
                .build(),
            command_wait_margin: Duration::from_millis(500),
        }
    }

    /// How long a caller waits for the terminal result of a command
    #[must_use]
    pub fn command_wait(&self) -> Duration {
        self.request_timeout + self.command_wait_margin
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.default_date.to_string(), "2024-06-18");
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup_from(&[
            ("DESK_BOOKING_BASE_URL", "https://desks.example.com/api/"),
            ("DESK_BOOKING_REQUEST_TIMEOUT_MS", "750"),
            ("DESK_BOOKING_FETCH_RETRIES", "0"),
            ("DESK_BOOKING_RETRY_DELAY_MS", "10"),
            ("DESK_BOOKING_DEFAULT_DATE", "2024-07-01"),
            ("DESK_BOOKING_USER", "alice"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://desks.example.com/api");
        assert_eq!(config.request_timeout_ms, 750);
        assert_eq!(config.fetch_retries, 0);
        assert_eq!(config.default_date, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(config.user.as_deref(), Some("alice"));

        let engine = config.engine();
        assert_eq!(engine.request_timeout, Duration::from_millis(750));
        assert_eq!(engine.fetch_retry.max_retries, 0);
        assert_eq!(engine.fetch_retry.initial_delay, Duration::from_millis(10));
    }

    #[test]
    fn unparsable_number_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[("DESK_BOOKING_FETCH_RETRIES", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { name: "DESK_BOOKING_FETCH_RETRIES", .. }
        ));
    }

    #[test]
    fn bad_date_and_url_are_errors() {
        assert!(Config::from_lookup(lookup_from(&[("DESK_BOOKING_DEFAULT_DATE", "18/06/2024")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DESK_BOOKING_BASE_URL", "localhost:8000")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DESK_BOOKING_REQUEST_TIMEOUT_MS", "0")])).is_err());
    }

    #[test]
    fn blank_user_counts_as_unset() {
        let config = Config::from_lookup(lookup_from(&[("DESK_BOOKING_USER", "  ")])).unwrap();
        assert_eq!(config.user, None);
    }

    #[test]
    fn command_wait_adds_margin() {
        let config = EngineConfig::default();
        assert_eq!(config.command_wait(), Duration::from_secs(6));
    }
}
