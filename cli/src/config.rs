//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use sheetfx_fx::{RefreshStrategy, ResolverConfig, FRANKFURTER_BASE_URL};

/// Largest accepted number of decimal places.
pub const MAX_PRECISION: u32 = 10;

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the rate service.
    pub api_url: String,
    /// Cache file location.
    pub cache_file: PathBuf,
    /// Age after which a cached table is stale.
    pub cache_ttl: Duration,
    /// Upper bound on a single rate fetch.
    pub fetch_timeout: Duration,
    /// Bulk refresh strategy.
    pub refresh_strategy: RefreshStrategy,
    /// Default decimal places for converted values.
    pub precision: u32,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON log lines.
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: FRANKFURTER_BASE_URL.to_string(),
            cache_file: PathBuf::from("rates_cache.json"),
            cache_ttl: Duration::from_secs(120 * 60),
            fetch_timeout: Duration::from_secs(10),
            refresh_strategy: RefreshStrategy::CrossRate {
                anchor: sheetfx_common::Currency::usd(),
            },
            precision: 2,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Unparseable values leave the default in place.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("SHEETFX_API_URL") {
            config.api_url = url;
        }

        if let Some(path) = lookup("SHEETFX_CACHE_FILE") {
            config.cache_file = PathBuf::from(path);
        }

        if let Some(minutes) = lookup("SHEETFX_CACHE_TTL_MINUTES") {
            if let Ok(minutes) = minutes.trim().parse::<u64>() {
                config.cache_ttl = Duration::from_secs(minutes.saturating_mul(60));
            }
        }

        if let Some(secs) = lookup("SHEETFX_FETCH_TIMEOUT_SECS") {
            if let Ok(secs) = secs.trim().parse::<u64>() {
                config.fetch_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(strategy) = lookup("SHEETFX_REFRESH_STRATEGY") {
            if let Ok(strategy) = strategy.parse() {
                config.refresh_strategy = strategy;
            }
        }

        if let Some(precision) = lookup("SHEETFX_PRECISION") {
            if let Ok(precision) = precision.trim().parse() {
                config.precision = precision;
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(json) = lookup("SHEETFX_LOG_JSON") {
            config.log_json = matches!(json.trim(), "1" | "true" | "yes");
        }

        config
    }

    /// Cache TTL in the form the rate cache expects.
    pub fn rate_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 1000))
    }

    /// Build the resolver configuration.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            fetch_timeout: self.fetch_timeout,
            refresh_strategy: self.refresh_strategy.clone(),
            ..ResolverConfig::default()
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(format!("API URL must be http(s), got {:?}", self.api_url));
        }

        if self.cache_file.as_os_str().is_empty() {
            return Err("Cache file path cannot be empty".to_string());
        }

        if self.cache_ttl.is_zero() {
            return Err("Cache TTL must be positive".to_string());
        }

        if self.precision > MAX_PRECISION {
            return Err(format!("Precision cannot exceed {MAX_PRECISION}"));
        }

        self.resolver_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_cache_ttl(), chrono::Duration::hours(2));
        assert_eq!(config.refresh_strategy.to_string(), "cross:USD");
    }

    #[test]
    fn test_from_lookup() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("SHEETFX_API_URL", "http://localhost:8080"),
            ("SHEETFX_CACHE_FILE", "/tmp/rates.json"),
            ("SHEETFX_CACHE_TTL_MINUTES", "30"),
            ("SHEETFX_FETCH_TIMEOUT_SECS", "3"),
            ("SHEETFX_REFRESH_STRATEGY", "direct"),
            ("SHEETFX_PRECISION", "4"),
            ("LOG_LEVEL", "debug"),
            ("SHEETFX_LOG_JSON", "1"),
        ]));

        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.cache_file, PathBuf::from("/tmp/rates.json"));
        assert_eq!(config.rate_cache_ttl(), chrono::Duration::minutes(30));
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.refresh_strategy, RefreshStrategy::Direct);
        assert_eq!(config.precision, 4);
        assert_eq!(config.log_level, "debug");
        assert!(config.log_json);

        let resolver = config.resolver_config();
        assert_eq!(resolver.fetch_timeout, Duration::from_secs(3));
        assert_eq!(resolver.refresh_strategy, RefreshStrategy::Direct);
    }

    #[test]
    fn test_unparseable_values_keep_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("SHEETFX_CACHE_TTL_MINUTES", "two hours"),
            ("SHEETFX_REFRESH_STRATEGY", "sideways"),
            ("SHEETFX_PRECISION", "-1"),
        ]));

        assert_eq!(config.cache_ttl, AppConfig::default().cache_ttl);
        assert_eq!(config.refresh_strategy, AppConfig::default().refresh_strategy);
        assert_eq!(config.precision, 2);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AppConfig::default();
        config.cache_ttl = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.api_url = "ftp://rates".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.fetch_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.refresh_strategy = RefreshStrategy::CrossRate {
            anchor: sheetfx_common::Currency::new("XYZ"),
        };
        assert!(config.validate().is_err());
    }
}
