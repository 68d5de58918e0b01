//! Client Configuration
//!
//! Defaults suit a local match server; every field can be overridden from
//! `DUEL_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::network::connection::{ConnectionConfig, ReconnectPolicy};
use crate::session::timer::DEFAULT_BASE_TIME_MS;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A URL did not parse.
    #[error("invalid {field} URL: {source}")]
    InvalidUrl {
        /// Offending field.
        field: &'static str,
        /// Parse error.
        source: url::ParseError,
    },

    /// A URL had the wrong scheme.
    #[error("{field} URL must use {expected}, got {found}")]
    WrongScheme {
        /// Offending field.
        field: &'static str,
        /// Accepted schemes.
        expected: &'static str,
        /// Scheme found.
        found: String,
    },

    /// A numeric variable did not parse.
    #[error("invalid value for {var}: {value}")]
    InvalidNumber {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Everything the client needs to run.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Match server WebSocket URL.
    pub server_url: String,
    /// Account API base URL. Without it the balance stays unknown.
    pub account_api_url: Option<String>,
    /// Balance cache file.
    pub balance_cache_path: Option<PathBuf>,
    /// Base clock per side when a game announces none.
    pub base_time_ms: u64,
    /// Display clock tick interval.
    pub tick_interval: Duration,
    /// Connection settings.
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080/ws".to_string(),
            account_api_url: None,
            balance_cache_path: None,
            base_time_ms: DEFAULT_BASE_TIME_MS,
            tick_interval: Duration::from_millis(250),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from environment variables on top of the defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `DUEL_SERVER_URL` | `server_url` |
    /// | `DUEL_ACCOUNT_URL` | `account_api_url` |
    /// | `DUEL_BALANCE_CACHE` | `balance_cache_path` |
    /// | `DUEL_BASE_TIME_MS` | `base_time_ms` |
    /// | `DUEL_TICK_MS` | `tick_interval` |
    /// | `DUEL_AUTH_TIMEOUT_SECS` | `connection.auth_timeout` |
    /// | `DUEL_RECONNECT_MAX_ATTEMPTS` | `connection.reconnect.max_attempts` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DUEL_SERVER_URL") {
            config.server_url = url;
        }
        config.account_api_url = lookup("DUEL_ACCOUNT_URL").filter(|v| !v.is_empty());
        config.balance_cache_path = lookup("DUEL_BALANCE_CACHE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        if let Some(ms) = parse_var::<u64, _>(&lookup, "DUEL_BASE_TIME_MS")? {
            config.base_time_ms = ms;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "DUEL_TICK_MS")? {
            config.tick_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "DUEL_AUTH_TIMEOUT_SECS")? {
            config.connection.auth_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "DUEL_RECONNECT_MAX_ATTEMPTS")? {
            config.connection.reconnect = ReconnectPolicy {
                max_attempts: attempts,
                ..config.connection.reconnect
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Check URLs and their schemes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("server", &self.server_url, &["ws", "wss"], "ws or wss")?;
        if let Some(url) = &self.account_api_url {
            check_url("account API", url, &["http", "https"], "http or https")?;
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}

fn check_url(
    field: &'static str,
    raw: &str,
    schemes: &[&str],
    expected: &'static str,
) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::WrongScheme {
            field,
            expected,
            found: url.scheme().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.connection.reconnect.max_attempts, 5);
        assert_eq!(config.base_time_ms, DEFAULT_BASE_TIME_MS);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DUEL_SERVER_URL", "wss://play.example.com/ws"),
            ("DUEL_ACCOUNT_URL", "https://api.example.com/v1"),
            ("DUEL_BALANCE_CACHE", "/tmp/duel/balance.json"),
            ("DUEL_BASE_TIME_MS", "180000"),
            ("DUEL_TICK_MS", "100"),
            ("DUEL_RECONNECT_MAX_ATTEMPTS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.server_url, "wss://play.example.com/ws");
        assert_eq!(config.account_api_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(
            config.balance_cache_path,
            Some(PathBuf::from("/tmp/duel/balance.json"))
        );
        assert_eq!(config.base_time_ms, 180_000);
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.connection.reconnect.max_attempts, 3);
        assert_eq!(
            config.connection.reconnect.initial_delay,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_rejects_http_server_url() {
        let err = ClientConfig::from_lookup(lookup(&[("DUEL_SERVER_URL", "http://x.example")]));
        assert!(matches!(err, Err(ConfigError::WrongScheme { .. })));
    }

    #[test]
    fn test_rejects_bad_number() {
        let err = ClientConfig::from_lookup(lookup(&[("DUEL_TICK_MS", "fast")]));
        assert!(matches!(
            err,
            Err(ConfigError::InvalidNumber {
                var: "DUEL_TICK_MS",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_unparseable_account_url() {
        let err = ClientConfig::from_lookup(lookup(&[("DUEL_ACCOUNT_URL", "::nope")]));
        assert!(matches!(err, Err(ConfigError::InvalidUrl { .. })));
    }
}
