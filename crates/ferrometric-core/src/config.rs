//! Ingestion run configuration.
//!
//! Loaded from TOML. Secrets never live in the file; they are read from the
//! environment (`FERROMETRIC_TOKEN`, or `FERROMETRIC_USERNAME` plus
//! `FERROMETRIC_PASSWORD` for a sign-in).
//!
//! ```toml
//! backfill_start = "2021-01-01"
//!
//! [provider]
//! name = "cryptoquant"
//! base_url = "https://live-api.cryptoquant.com"
//!
//! [limits]
//! quota_limit = 30
//! quota_window_ms = 60000
//!
//! [[series]]
//! asset = "btc"
//! metric = "exchange-reserve"
//! exchange = "binance"
//! resolution = "day"
//! chart_id = "61a5fb1f45de34521f1dcb6d"
//! fields = ["reserve", "reserve_usd"]
//!
//! # Series found in the provider catalog at run start.
//! [[discover]]
//! assets = ["eth"]
//! categories = ["market-indicator"]
//! resolution = "day"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::catalog::CatalogFilter;
use crate::http_client::HttpAuth;
use crate::provider::DEFAULT_PAGE_SIZE;
use crate::rate_limiter::RateLimitConfig;
use crate::retry::{Backoff, RetryPolicy};
use crate::{Resolution, Series, UtcDateTime, ValidationError};

pub const TOKEN_ENV: &str = "FERROMETRIC_TOKEN";
pub const USERNAME_ENV: &str = "FERROMETRIC_USERNAME";
pub const PASSWORD_ENV: &str = "FERROMETRIC_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("series '{0}' is configured more than once")]
    DuplicateSeries(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Send the token in this header instead of `Authorization: Bearer`.
    #[serde(default)]
    pub token_header: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub quota_window_ms: u64,
    pub quota_limit: u32,
    pub max_in_flight: usize,
    pub request_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = RateLimitConfig::default();
        Self {
            quota_window_ms: u64::try_from(limits.quota_window.as_millis()).unwrap_or(60_000),
            quota_limit: limits.quota_limit,
            max_in_flight: limits.max_in_flight,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    pub throttle_cooldown_ms: u64,
    pub max_throttle_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: true,
            throttle_cooldown_ms: 30_000,
            max_throttle_wait_ms: 900_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeriesConfig {
    pub asset: String,
    pub metric: String,
    #[serde(default)]
    pub exchange: Option<String>,
    pub resolution: Resolution,
    pub chart_id: String,
    /// Value field keys in storage order; taken from the payload when empty.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Provider account used to obtain a token by signing in.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    pub provider: ProviderConfig,
    pub backfill_start: UtcDateTime,
    /// Run horizon; defaults to the start of the run.
    #[serde(default)]
    pub until: Option<UtcDateTime>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub series: Vec<SeriesConfig>,
    #[serde(default)]
    pub discover: Vec<CatalogFilter>,
    #[serde(skip)]
    pub auth: HttpAuth,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill auth from process environment variables.
    pub fn with_env_secrets(self) -> Self {
        self.with_secrets(|name| std::env::var(name).ok())
    }

    /// Fill auth from `lookup`. A token wins over sign-in credentials.
    pub fn with_secrets(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(token) = non_empty(TOKEN_ENV) {
            self.auth = match &self.provider.token_header {
                Some(name) => HttpAuth::Header {
                    name: name.clone(),
                    value: token,
                },
                None => HttpAuth::BearerToken(token),
            };
            self.credentials = None;
        } else if let (Some(username), Some(password)) =
            (non_empty(USERNAME_ENV), non_empty(PASSWORD_ENV))
        {
            self.credentials = Some(Credentials { username, password });
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.provider.base_url.starts_with("http://")
            && !self.provider.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "provider.base_url must be an http(s) URL, got '{}'",
                self.provider.base_url
            )));
        }
        if self.provider.page_size == 0 {
            return Err(ConfigError::Invalid(String::from("provider.page_size must be > 0")));
        }
        if self.limits.quota_limit == 0 || self.limits.quota_window_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "limits.quota_limit and limits.quota_window_ms must be > 0",
            )));
        }
        if self.limits.max_in_flight == 0 {
            return Err(ConfigError::Invalid(String::from("limits.max_in_flight must be > 0")));
        }
        if self.limits.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "limits.request_timeout_ms must be > 0",
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(String::from("retry.max_attempts must be > 0")));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(String::from("retry.multiplier must be >= 1.0")));
        }
        if self.retry.max_throttle_wait_ms < self.retry.throttle_cooldown_ms {
            return Err(ConfigError::Invalid(String::from(
                "retry.max_throttle_wait_ms must be >= retry.throttle_cooldown_ms",
            )));
        }
        if let Some(until) = self.until {
            if until <= self.backfill_start {
                return Err(ConfigError::Invalid(format!(
                    "until {until} must be after backfill_start {}",
                    self.backfill_start
                )));
            }
        }

        if self.series.is_empty() && self.discover.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "config names no [[series]] and no [[discover]] entry",
            )));
        }

        self.series_list().map(|_| ())
    }

    /// Validated series, in configuration order.
    pub fn series_list(&self) -> Result<Vec<Arc<Series>>, ConfigError> {
        let mut seen = HashSet::new();
        let mut series = Vec::with_capacity(self.series.len());
        for entry in &self.series {
            let built = Series::new(
                &self.provider.name,
                &entry.asset,
                &entry.metric,
                entry.exchange.as_deref(),
                entry.resolution,
                &entry.chart_id,
            )?
            .with_fields(&entry.fields)?;
            if !seen.insert(built.id().clone()) {
                return Err(ConfigError::DuplicateSeries(built.id().to_string()));
            }
            series.push(Arc::new(built));
        }
        Ok(series)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            quota_window: Duration::from_millis(self.limits.quota_window_ms),
            quota_limit: self.limits.quota_limit,
            max_in_flight: self.limits.max_in_flight,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.retry.base_delay_ms),
                factor: self.retry.multiplier,
                max: Duration::from_millis(self.retry.max_delay_ms),
                jitter: self.retry.jitter,
            },
            throttle_cooldown: Duration::from_millis(self.retry.throttle_cooldown_ms),
            max_throttle_wait: Duration::from_millis(self.retry.max_throttle_wait_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.request_timeout_ms)
    }
}

fn default_provider_name() -> String {
    String::from("cryptoquant")
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
backfill_start = "2021-01-01"

[provider]
base_url = "https://provider.test"

[[series]]
asset = "BTC"
metric = "exchange-reserve"
exchange = "binance"
resolution = "day"
chart_id = "61a5fb1f"

[[series]]
asset = "eth"
metric = "mvrv"
resolution = "hour"
chart_id = "c2"
"#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = IngestConfig::from_toml(MINIMAL).expect("config");

        assert_eq!(config.provider.name, "cryptoquant");
        assert_eq!(config.provider.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rate_limit(), RateLimitConfig::default());
        assert_eq!(config.until, None);

        let series = config.series_list().expect("series");
        assert_eq!(series.len(), 2);
        assert_eq!(
            series[0].id().as_str(),
            "cryptoquant/btc/exchange-reserve/binance/day"
        );
        assert_eq!(series[1].resolution(), Resolution::Hour);
    }

    #[test]
    fn loads_pinned_fields_and_discovery_filters() {
        let content = format!(
            "{MINIMAL}\nfields = [\"mvrv\", \"sopr\"]\n\n[[discover]]\nassets = [\"btc\"]\nexchanges = [\"binance\"]\nresolution = \"1d\"\n"
        );
        let config = IngestConfig::from_toml(&content).expect("config");

        let series = config.series_list().expect("series");
        assert!(series[0].fields().is_empty());
        assert_eq!(series[1].fields(), ["mvrv", "sopr"]);
        assert_eq!(
            config.discover,
            vec![CatalogFilter {
                assets: vec![String::from("btc")],
                exchanges: vec![String::from("binance")],
                ..CatalogFilter::everything(Resolution::Day)
            }]
        );
    }

    #[test]
    fn requires_series_or_discovery() {
        let content = "backfill_start = \"2021-01-01\"\n\n[provider]\nbase_url = \"https://provider.test\"\n";
        assert!(matches!(
            IngestConfig::from_toml(content),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        let content = MINIMAL.replace("[provider]", "[provider]\nsecret = \"x\"");
        assert!(matches!(
            IngestConfig::from_toml(&content),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn rejects_duplicate_series() {
        let content = format!(
            "{MINIMAL}\n[[series]]\nasset = \"btc\"\nmetric = \"exchange-reserve\"\nexchange = \"Binance\"\nresolution = \"1d\"\nchart_id = \"other\"\n"
        );
        assert!(matches!(
            IngestConfig::from_toml(&content),
            Err(ConfigError::DuplicateSeries(_))
        ));
    }

    #[test]
    fn rejects_inverted_horizon() {
        let content = MINIMAL.replace(
            "backfill_start = \"2021-01-01\"",
            "backfill_start = \"2021-01-01\"\nuntil = \"2020-01-01\"",
        );
        assert!(matches!(
            IngestConfig::from_toml(&content),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn token_secret_takes_precedence() {
        let config = IngestConfig::from_toml(MINIMAL)
            .expect("config")
            .with_secrets(|name| match name {
                TOKEN_ENV => Some(String::from("tok")),
                USERNAME_ENV => Some(String::from("me")),
                PASSWORD_ENV => Some(String::from("pw")),
                _ => None,
            });
        assert_eq!(config.auth, HttpAuth::BearerToken(String::from("tok")));
        assert!(config.credentials.is_none());
    }

    #[test]
    fn credentials_used_without_token() {
        let config = IngestConfig::from_toml(MINIMAL)
            .expect("config")
            .with_secrets(|name| match name {
                USERNAME_ENV => Some(String::from("me")),
                PASSWORD_ENV => Some(String::from("pw")),
                _ => None,
            });
        assert_eq!(config.auth, HttpAuth::None);
        assert_eq!(
            config.credentials.as_ref().map(|c| c.username.as_str()),
            Some("me")
        );
        assert!(!format!("{:?}", config.credentials).contains("pw"));
    }
}
