//! Aggregator configuration: environment, cache backend selection and
//! per-exchange policies.
//!
//! Precedence, lowest first: built-in defaults, JSON config file, `AGGREX_*`
//! environment variables.

use std::collections::BTreeMap;
use std::env;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use aggrex_warehouse::{resolve_aggrex_home, WarehouseConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::CachePolicy;
use crate::domain::duration_ms;
use crate::{CoreError, ExchangeId, ExchangePolicy, ValidationError};

pub const ENV_ENVIRONMENT: &str = "AGGREX_ENV";
pub const ENV_HOME: &str = "AGGREX_HOME";
pub const ENV_CACHE_BACKEND: &str = "AGGREX_CACHE_BACKEND";
pub const ENV_CACHE_WRITE_AHEAD: &str = "AGGREX_CACHE_WRITE_AHEAD";
pub const ENV_CACHE_PATH: &str = "AGGREX_CACHE_PATH";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(invalid(ENV_ENVIRONMENT, format!("unknown environment '{value}'"))),
        }
    }
}

/// Requested cache storage. `Auto` follows the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Auto,
    Memory,
    Duckdb,
}

impl FromStr for CacheBackendKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "memory" => Ok(Self::Memory),
            "duckdb" => Ok(Self::Duckdb),
            _ => Err(invalid(ENV_CACHE_BACKEND, format!("unknown cache backend '{value}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackendKind,
    /// Durable store location; defaults to `<home>/cache/responses.duckdb`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Defaults to on in production.
    #[serde(default)]
    pub write_ahead: Option<bool>,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    #[serde(default = "default_cleanup_interval", with = "duration_ms")]
    pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Auto,
            db_path: None,
            write_ahead: None,
            max_pool_size: default_max_pool_size(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_pool_size() -> usize {
    4
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

/// Cache storage after resolving `auto` against the environment.
#[derive(Debug, Clone)]
pub enum ResolvedCacheBackend {
    Memory,
    DuckDb(WarehouseConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub exchanges: BTreeMap<ExchangeId, ExchangePolicy>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            home: None,
            cache: CacheSettings::default(),
            exchanges: ExchangeId::ALL
                .into_iter()
                .map(|exchange| (exchange, ExchangePolicy::default_for(exchange)))
                .collect(),
        }
    }
}

impl AggregatorConfig {
    /// Defaults, then `path` (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = match path {
            Some(path) => Self::from_json(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document. Exchanges it omits keep their built-in policy,
    /// and each exchange entry only replaces the top-level fields it names.
    pub fn from_json(input: &str) -> Result<Self, CoreError> {
        let mut document: Value = serde_json::from_str(input)?;
        let exchanges = document
            .as_object_mut()
            .and_then(|root| root.remove("exchanges"));
        let mut config: Self = serde_json::from_value(document)?;

        if let Some(exchanges) = exchanges {
            let overrides: BTreeMap<ExchangeId, Map<String, Value>> = serde_json::from_value(exchanges)?;
            for (exchange, fields) in overrides {
                config
                    .exchanges
                    .insert(exchange, merge_policy(exchange, fields)?);
            }
        }
        for exchange in ExchangeId::ALL {
            config
                .exchanges
                .entry(exchange)
                .or_insert_with(|| ExchangePolicy::default_for(exchange));
        }
        Ok(config)
    }

    /// Apply `AGGREX_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup(ENV_ENVIRONMENT) {
            self.environment = value.parse()?;
        }
        if let Some(value) = lookup(ENV_HOME) {
            self.home = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_CACHE_BACKEND) {
            self.cache.backend = value.parse()?;
        }
        if let Some(value) = lookup(ENV_CACHE_WRITE_AHEAD) {
            self.cache.write_ahead = Some(parse_flag(ENV_CACHE_WRITE_AHEAD, &value)?);
        }
        if let Some(value) = lookup(ENV_CACHE_PATH) {
            self.cache.db_path = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cache.max_pool_size == 0 {
            return Err(invalid("cache.max_pool_size", "must be at least 1"));
        }
        if self.cache.cleanup_interval.is_zero() {
            return Err(invalid("cache.cleanup_interval", "must be positive"));
        }

        for (exchange, policy) in &self.exchanges {
            let field = |name: &str| format!("exchanges.{exchange}.{name}");
            if policy.base_url.trim().is_empty() {
                return Err(invalid(field("base_url"), "cannot be empty"));
            }
            if policy.cache.max_size == 0 {
                return Err(invalid(field("cache.max_size"), "must be at least 1"));
            }
            if policy.rate_limit.limit == 0 {
                return Err(invalid(field("rate_limit.limit"), "must be at least 1"));
            }
            if policy.rate_limit.window.is_zero() {
                return Err(invalid(field("rate_limit.window"), "must be positive"));
            }
            if policy.breaker.failure_threshold == 0 || policy.breaker.success_threshold == 0 {
                return Err(invalid(field("breaker"), "thresholds must be at least 1"));
            }
            if policy.retry.max_attempts == 0 {
                return Err(invalid(field("retry.max_attempts"), "must be at least 1"));
            }
            if !(0.0..=1.0).contains(&policy.retry.jitter) {
                return Err(invalid(field("retry.jitter"), "must be within 0.0..=1.0"));
            }
            if policy.request_timeout.is_zero() {
                return Err(invalid(field("request_timeout"), "must be positive"));
            }
        }
        Ok(())
    }

    pub fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(resolve_aggrex_home)
    }

    pub fn policy(&self, exchange: ExchangeId) -> ExchangePolicy {
        self.exchanges
            .get(&exchange)
            .cloned()
            .unwrap_or_else(|| ExchangePolicy::default_for(exchange))
    }

    pub fn cache_policies(&self) -> BTreeMap<ExchangeId, CachePolicy> {
        ExchangeId::ALL
            .into_iter()
            .map(|exchange| (exchange, self.policy(exchange).cache))
            .collect()
    }

    /// Production gets the durable store with write-ahead on; development an
    /// in-process store.
    pub fn resolved_cache_backend(&self) -> ResolvedCacheBackend {
        let durable = match self.cache.backend {
            CacheBackendKind::Memory => false,
            CacheBackendKind::Duckdb => true,
            CacheBackendKind::Auto => self.environment == Environment::Production,
        };
        if !durable {
            return ResolvedCacheBackend::Memory;
        }

        ResolvedCacheBackend::DuckDb(WarehouseConfig {
            db_path: self
                .cache
                .db_path
                .clone()
                .unwrap_or_else(|| self.home_dir().join("cache").join("responses.duckdb")),
            max_pool_size: self.cache.max_pool_size,
            write_ahead: self
                .cache
                .write_ahead
                .unwrap_or(self.environment == Environment::Production),
        })
    }
}

fn merge_policy(
    exchange: ExchangeId,
    fields: Map<String, Value>,
) -> Result<ExchangePolicy, serde_json::Error> {
    let mut policy = serde_json::to_value(ExchangePolicy::default_for(exchange))?;
    if let Value::Object(defaults) = &mut policy {
        defaults.extend(fields);
    }
    serde_json::from_value(policy)
}

fn parse_flag(field: &str, value: &str) -> Result<bool, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(field, format!("expected a boolean, got '{value}'"))),
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect::<BTreeMap<_, _>>();
        move |key| pairs.get(key).cloned()
    }

    #[test]
    fn development_defaults_to_memory() {
        let config = AggregatorConfig::default();
        assert!(matches!(config.resolved_cache_backend(), ResolvedCacheBackend::Memory));
        assert_eq!(config.exchanges.len(), ExchangeId::ALL.len());
    }

    #[test]
    fn production_defaults_to_durable_write_ahead() {
        let mut config = AggregatorConfig::default();
        config
            .apply_overrides(overrides(&[("AGGREX_ENV", "production"), ("AGGREX_HOME", "/srv/aggrex")]))
            .expect("valid overrides");

        match config.resolved_cache_backend() {
            ResolvedCacheBackend::DuckDb(warehouse) => {
                assert!(warehouse.write_ahead);
                assert_eq!(
                    warehouse.db_path,
                    PathBuf::from("/srv/aggrex/cache/responses.duckdb")
                );
            }
            ResolvedCacheBackend::Memory => panic!("production should be durable"),
        }
    }

    #[test]
    fn explicit_backend_and_write_ahead_override_environment() {
        let mut config = AggregatorConfig::default();
        config
            .apply_overrides(overrides(&[
                ("AGGREX_CACHE_BACKEND", "duckdb"),
                ("AGGREX_CACHE_WRITE_AHEAD", "off"),
                ("AGGREX_CACHE_PATH", "/tmp/cache.duckdb"),
            ]))
            .expect("valid overrides");

        match config.resolved_cache_backend() {
            ResolvedCacheBackend::DuckDb(warehouse) => {
                assert!(!warehouse.write_ahead);
                assert_eq!(warehouse.db_path, PathBuf::from("/tmp/cache.duckdb"));
            }
            ResolvedCacheBackend::Memory => panic!("duckdb was requested"),
        }
    }

    #[test]
    fn invalid_override_values_are_rejected() {
        let mut config = AggregatorConfig::default();
        let error = config
            .apply_overrides(overrides(&[("AGGREX_CACHE_WRITE_AHEAD", "maybe")]))
            .expect_err("bad flag");
        assert!(matches!(error, ValidationError::InvalidConfig { .. }));

        assert!(config
            .apply_overrides(overrides(&[("AGGREX_ENV", "staging")]))
            .is_err());
    }

    #[test]
    fn json_file_overrides_one_exchange_and_keeps_the_rest() {
        let config = AggregatorConfig::from_json(
            r#"{
                "environment": "production",
                "cache": { "backend": "memory", "cleanup_interval": 5000 },
                "exchanges": {
                    "bitmex": {
                        "base_url": "https://testnet.bitmex.com",
                        "cache": { "ttl": 10000, "max_size": 50, "strategy": "ttl" },
                        "rate_limit": { "limit": 30, "window": 60000 },
                        "request_timeout": 2000
                    }
                }
            }"#,
        )
        .expect("valid json");

        assert_eq!(config.environment, Environment::Production);
        assert!(matches!(config.resolved_cache_backend(), ResolvedCacheBackend::Memory));
        assert_eq!(config.cache.cleanup_interval, Duration::from_secs(5));

        let bitmex = config.policy(ExchangeId::Bitmex);
        assert_eq!(bitmex.cache.ttl, Duration::from_secs(10));
        assert_eq!(bitmex.rate_limit.circuit_threshold, None);
        assert_eq!(bitmex.breaker.failure_threshold, 5);
        assert_eq!(config.policy(ExchangeId::Kalshi), ExchangePolicy::kalshi_default());
        config.validate().expect("valid config");
    }

    #[test]
    fn partial_exchange_entry_keeps_built_in_fields() {
        let config = AggregatorConfig::from_json(
            r#"{ "exchanges": { "kalshi": { "base_url": "https://kalshi.test" } } }"#,
        )
        .expect("partial entry is accepted");

        let kalshi = config.policy(ExchangeId::Kalshi);
        let defaults = ExchangePolicy::kalshi_default();
        assert_eq!(kalshi.base_url, "https://kalshi.test");
        assert_eq!(kalshi.cache, defaults.cache);
        assert_eq!(kalshi.rate_limit, defaults.rate_limit);
        assert_eq!(kalshi.request_timeout, defaults.request_timeout);
        assert_eq!(config.policy(ExchangeId::Polymarket), ExchangePolicy::polymarket_default());
        config.validate().expect("valid config");
    }

    #[test]
    fn partial_entry_starts_from_that_exchanges_defaults() {
        let config = AggregatorConfig::from_json(
            r#"{ "exchanges": { "bitmex": { "request_timeout": 1500 } } }"#,
        )
        .expect("partial entry is accepted");

        let bitmex = config.policy(ExchangeId::Bitmex);
        assert_eq!(bitmex.request_timeout, Duration::from_millis(1500));
        assert_eq!(bitmex.rate_limit.circuit_threshold, Some(55));
        assert_eq!(bitmex.base_url, ExchangePolicy::bitmex_default().base_url);
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = AggregatorConfig::default();
        if let Some(policy) = config.exchanges.get_mut(&ExchangeId::Sports) {
            policy.rate_limit.limit = 0;
        }

        let error = config.validate().expect_err("zero limit");
        assert_eq!(
            error,
            ValidationError::InvalidConfig {
                field: String::from("exchanges.sports.rate_limit.limit"),
                reason: String::from("must be at least 1"),
            }
        );
    }
}
