//! Configuration management for the loyalty server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Values that are present but malformed are rejected rather than silently
//! replaced by the default.

use fidelidad_runtime::{RetryPolicy, StaleCandidatePolicy};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// What was expected.
        reason: String,
    },

    /// A variable required by another setting is missing.
    #[error("Missing {key}: {reason}")]
    Missing {
        /// Variable name.
        key: &'static str,
        /// Why it is needed.
        reason: &'static str,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err("expected pretty or json".to_string()),
        }
    }
}

/// Document store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// Process-local store; data is lost on exit.
    #[default]
    Memory,
    /// `PostgreSQL` document table.
    Postgres,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err("expected memory or postgres".to_string()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: SocketAddr,
    /// Log output format
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Backend selection
    pub backend: Backend,
    /// `PostgreSQL` connection URL, required for the postgres backend
    pub database_url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
}

/// Webhook notifier configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Target URL
    pub url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Delivery attempts after the first one
    pub max_retries: usize,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Document store settings
    pub store: StoreConfig,
    /// Transaction retry policy
    pub retry: RetryPolicy,
    /// What to do when an allocated coupon turns out to be consumed
    pub stale_policy: StaleCandidatePolicy,
    /// Webhook notifier; console notifications when `None`
    pub webhook: Option<WebhookConfig>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or a required one
    /// is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or a required one
    /// is missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let server = ServerConfig {
            bind: vars.parse("FIDELIDAD_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            log_format: vars.parse("FIDELIDAD_LOG_FORMAT", LogFormat::Pretty)?,
            log_filter: vars
                .get("FIDELIDAD_LOG_FILTER")
                .unwrap_or_else(|| "info,fidelidad=debug,sqlx=warn".to_string()),
            shutdown_timeout: vars.secs("FIDELIDAD_SHUTDOWN_TIMEOUT_SECS", 30)?,
        };

        let store = StoreConfig {
            backend: vars.parse("FIDELIDAD_STORE", Backend::Memory)?,
            database_url: vars.get("DATABASE_URL"),
            max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            acquire_timeout: vars.secs("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?,
        };
        if store.backend == Backend::Postgres && store.database_url.is_none() {
            return Err(ConfigError::Missing {
                key: "DATABASE_URL",
                reason: "required by the postgres store",
            });
        }
        if store.max_connections == 0 {
            return Err(vars.invalid("DATABASE_MAX_CONNECTIONS", "must be positive"));
        }

        let defaults = RetryPolicy::for_transactions();
        let retry = RetryPolicy {
            max_retries: vars.parse("FIDELIDAD_TX_MAX_RETRIES", defaults.max_retries)?,
            initial_delay: vars.millis("FIDELIDAD_TX_INITIAL_DELAY_MS", defaults.initial_delay)?,
            max_delay: vars.millis("FIDELIDAD_TX_MAX_DELAY_MS", defaults.max_delay)?,
            ..defaults
        };
        if retry.initial_delay > retry.max_delay {
            return Err(vars.invalid(
                "FIDELIDAD_TX_INITIAL_DELAY_MS",
                "must not exceed FIDELIDAD_TX_MAX_DELAY_MS",
            ));
        }

        let stale_policy = match vars.get("FIDELIDAD_STALE_COUPON_POLICY").as_deref().map(str::trim) {
            None | Some("fail") => StaleCandidatePolicy::Fail,
            Some("retry") => StaleCandidatePolicy::Retry,
            Some(_) => return Err(vars.invalid("FIDELIDAD_STALE_COUPON_POLICY", "expected fail or retry")),
        };

        let webhook = match vars.get("FIDELIDAD_WEBHOOK_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => Some(WebhookConfig {
                url,
                timeout: vars.secs("FIDELIDAD_WEBHOOK_TIMEOUT_SECS", 5)?,
                max_retries: vars.parse("FIDELIDAD_WEBHOOK_MAX_RETRIES", 3)?,
            }),
            Some(_) => return Err(vars.invalid("FIDELIDAD_WEBHOOK_URL", "expected an http(s) URL")),
            None => None,
        };

        Ok(Self {
            server,
            store,
            retry,
            stale_policy,
            webhook,
        })
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_secs)
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default).map(Duration::from_millis)
    }

    fn invalid(&self, key: &'static str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            key,
            value: self.get(key).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_use_the_memory_store() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.bind, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.server.log_format, LogFormat::Pretty);
        assert_eq!(config.store.backend, Backend::Memory);
        assert_eq!(config.retry, RetryPolicy::for_transactions());
        assert_eq!(config.stale_policy, StaleCandidatePolicy::Fail);
        assert!(config.webhook.is_none());
    }

    #[test]
    fn postgres_needs_a_database_url() {
        assert_eq!(
            load(&[("FIDELIDAD_STORE", "postgres")]).unwrap_err(),
            ConfigError::Missing {
                key: "DATABASE_URL",
                reason: "required by the postgres store",
            }
        );

        let config = load(&[
            ("FIDELIDAD_STORE", "Postgres"),
            ("DATABASE_URL", "postgres://localhost/fidelidad"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert_eq!(config.store.backend, Backend::Postgres);
        assert_eq!(config.store.max_connections, 4);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = load(&[("FIDELIDAD_BIND", "localhost")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FIDELIDAD_BIND", .. }));

        let err = load(&[("FIDELIDAD_TX_MAX_RETRIES", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FIDELIDAD_TX_MAX_RETRIES", .. }));

        let err = load(&[("FIDELIDAD_STALE_COUPON_POLICY", "skip")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn retry_delays_must_be_ordered() {
        let err = load(&[
            ("FIDELIDAD_TX_INITIAL_DELAY_MS", "500"),
            ("FIDELIDAD_TX_MAX_DELAY_MS", "100"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FIDELIDAD_TX_INITIAL_DELAY_MS", .. }));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("FIDELIDAD_BIND", "127.0.0.1:9000"),
            ("FIDELIDAD_LOG_FORMAT", "json"),
            ("FIDELIDAD_TX_MAX_RETRIES", "3"),
            ("FIDELIDAD_STALE_COUPON_POLICY", "retry"),
            ("FIDELIDAD_WEBHOOK_URL", "https://hooks.example.com/fidelidad"),
            ("FIDELIDAD_WEBHOOK_TIMEOUT_SECS", "2"),
        ])
        .unwrap();

        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.retry.jitter);
        assert_eq!(config.stale_policy, StaleCandidatePolicy::Retry);
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.timeout, Duration::from_secs(2));
        assert_eq!(webhook.max_retries, 3);
    }

    #[test]
    fn webhook_url_must_be_http() {
        let err = load(&[("FIDELIDAD_WEBHOOK_URL", "ftp://example.com")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FIDELIDAD_WEBHOOK_URL", .. }));
    }
}
