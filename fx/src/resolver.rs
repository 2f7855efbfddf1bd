//! Rate resolution: identity, cache, provider and offline fallback.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use sheetfx_common::{supported_currencies, Clock, Currency, CurrencyPair, SystemClock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheEntry, RateCache, RateSource};
use crate::error::{FxError, FxResult};
use crate::provider::{validate_table, RateProvider, RateTable};
use crate::refresh::RefreshStrategy;

/// Configuration for the rate resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound on a single provider fetch.
    pub fetch_timeout: std::time::Duration,
    /// Currencies requested from the provider and iterated by a bulk refresh.
    pub currencies: Vec<Currency>,
    /// How `refresh_all_rates` populates the cache.
    pub refresh_strategy: RefreshStrategy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: std::time::Duration::from_secs(10),
            currencies: supported_currencies(),
            refresh_strategy: RefreshStrategy::CrossRate {
                anchor: Currency::usd(),
            },
        }
    }
}

impl ResolverConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.fetch_timeout.is_zero() {
            return Err("Fetch timeout must be positive".to_string());
        }

        if self.currencies.is_empty() {
            return Err("Currency list cannot be empty".to_string());
        }

        if let RefreshStrategy::CrossRate { anchor } = &self.refresh_strategy {
            if !self.currencies.contains(anchor) {
                return Err(format!("Refresh anchor {anchor} is not a configured currency"));
            }
        }

        Ok(())
    }
}

/// How a returned rate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateProvenance {
    /// Identity conversion, no lookup performed.
    Same,
    /// Unexpired cache entry.
    Cache,
    /// Fresh provider fetch.
    Api,
    /// Stale cache entry served because the provider failed.
    Offline,
}

impl fmt::Display for RateProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            RateProvenance::Same => "same",
            RateProvenance::Cache => "cache",
            RateProvenance::Api => "api",
            RateProvenance::Offline => "offline",
        };
        f.write_str(tag)
    }
}

/// A rate together with its provenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRate {
    pub rate: f64,
    pub provenance: RateProvenance,
}

impl ResolvedRate {
    pub fn new(rate: f64, provenance: RateProvenance) -> Self {
        Self { rate, provenance }
    }
}

/// Reachability of the rate provider as seen through the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Online,
    Offline,
}

/// Serves rates for currency pairs from a cache backed by a provider.
///
/// All state is owned by the instance; share it behind an `Arc`. Fetches are
/// serialized per base currency, so concurrent misses for the same base
/// trigger one provider call and the waiters are served from its result.
pub struct RateResolver {
    provider: Arc<dyn RateProvider>,
    cache: RateCache,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
    in_flight: DashMap<Currency, Arc<Mutex<()>>>,
}

impl RateResolver {
    /// Create a resolver using the wall clock.
    pub fn new(provider: Arc<dyn RateProvider>, cache: RateCache, config: ResolverConfig) -> Self {
        Self {
            provider,
            cache,
            clock: Arc::new(SystemClock),
            config,
            in_flight: DashMap::new(),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying cache.
    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    /// Resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Name of the configured provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Get the rate converting one unit of `from` into `to`.
    ///
    /// Provider failures never surface directly: they fall back to the last
    /// cached table for `from` (even if expired) and only become
    /// [`FxError::RateUnavailable`] when no such table lists `to`.
    #[instrument(skip_all, fields(from = %from, to = %to))]
    pub async fn get_rate(&self, from: &Currency, to: &Currency) -> FxResult<ResolvedRate> {
        if CurrencyPair::new(from.clone(), to.clone()).is_identity() {
            return Ok(ResolvedRate::new(1.0, RateProvenance::Same));
        }

        if let Some(rate) = self.cache.fresh_rate(from, to, self.clock.now()) {
            return Ok(ResolvedRate::new(rate, RateProvenance::Cache));
        }

        let gate = self.gate(from);
        let _permit = gate.lock().await;

        // a concurrent caller may have fetched this base while we waited
        if let Some(rate) = self.cache.fresh_rate(from, to, self.clock.now()) {
            debug!("Served by concurrent fetch");
            return Ok(ResolvedRate::new(rate, RateProvenance::Cache));
        }

        match self.fetch_table(from).await {
            Ok(table) => {
                let entry = CacheEntry::new(from.clone(), table, self.clock.now(), RateSource::Api);
                let rate = entry.rate(to);
                self.cache.insert(entry);
                self.persist_logged();

                match rate {
                    Some(rate) => {
                        info!(rate, "Fetched rate from provider");
                        Ok(ResolvedRate::new(rate, RateProvenance::Api))
                    }
                    None => Err(FxError::unavailable(
                        from,
                        to,
                        format!("{to} not in provider response"),
                    )),
                }
            }
            Err(fetch_error) => {
                warn!(error = %fetch_error, "Rate fetch failed, trying cached table");
                match self.cache.any_rate(from, to) {
                    Some((rate, cached_at)) => {
                        warn!(rate, cached_at = %cached_at, "Serving stale rate");
                        Ok(ResolvedRate::new(rate, RateProvenance::Offline))
                    }
                    None => Err(FxError::unavailable(from, to, fetch_error.to_string())),
                }
            }
        }
    }

    /// Check whether a USD/EUR rate can currently be obtained without falling
    /// back to stale data.
    pub async fn probe_api(&self) -> ApiStatus {
        match self.get_rate(&Currency::usd(), &Currency::eur()).await {
            Ok(resolved) if resolved.provenance != RateProvenance::Offline => ApiStatus::Online,
            _ => ApiStatus::Offline,
        }
    }

    pub(crate) fn now(&self) -> sheetfx_common::Timestamp {
        self.clock.now()
    }

    /// Per-base fetch gate.
    pub(crate) fn gate(&self, base: &Currency) -> Arc<Mutex<()>> {
        self.in_flight
            .entry(base.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetch and validate the table for `base`, bounded by the fetch timeout.
    pub(crate) async fn fetch_table(&self, base: &Currency) -> FxResult<RateTable> {
        let targets: Vec<Currency> = self
            .config
            .currencies
            .iter()
            .filter(|c| *c != base)
            .cloned()
            .collect();

        let timeout = self.config.fetch_timeout;
        let table = tokio::time::timeout(timeout, self.provider.fetch_rates(base, &targets))
            .await
            .map_err(|_| FxError::upstream(base, format!("timed out after {timeout:?}")))??;

        validate_table(base, &table)?;
        Ok(table)
    }

    /// Persist the cache, logging instead of failing.
    pub(crate) fn persist_logged(&self) -> bool {
        match self.cache.persist() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to save rate cache");
                false
            }
        }
    }
}
