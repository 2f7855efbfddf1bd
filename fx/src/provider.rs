//! Rate provider trait and implementations.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sheetfx_common::Currency;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Rates keyed by target currency, expressed per one unit of a base.
pub type RateTable = BTreeMap<Currency, f64>;

/// Trait for exchange-rate sources.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch the rate table for `base` covering `targets`.
    ///
    /// Network errors, timeouts and malformed bodies are reported as
    /// [`FxError::UpstreamFetch`].
    async fn fetch_rates(&self, base: &Currency, targets: &[Currency]) -> FxResult<RateTable>;
}

/// Reject empty tables and rates that are not strictly positive.
pub fn validate_table(base: &Currency, table: &RateTable) -> FxResult<()> {
    if table.is_empty() {
        return Err(FxError::upstream(base, "provider returned no rates"));
    }
    if let Some((code, rate)) = table.iter().find(|(_, r)| !(r.is_finite() && **r > 0.0)) {
        return Err(FxError::upstream(
            base,
            format!("provider returned invalid rate {rate} for {code}"),
        ));
    }
    Ok(())
}

/// Base URL of the Frankfurter API.
pub const FRANKFURTER_BASE_URL: &str = "https://api.frankfurter.app";

/// Body of `GET /latest`.
#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    rates: Option<BTreeMap<String, f64>>,
}

/// Fetches rate tables over HTTP from a Frankfurter-compatible service.
#[derive(Debug, Clone)]
pub struct HttpRateProvider {
    client: Client,
    base_url: String,
}

impl HttpRateProvider {
    /// Create a provider whose requests are bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a provider with a custom HTTP client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn latest_url(&self) -> String {
        format!("{}/latest", self.base_url)
    }

    fn parse_body(base: &Currency, body: &str) -> FxResult<RateTable> {
        let response: LatestResponse = serde_json::from_str(body)
            .map_err(|e| FxError::upstream(base, format!("malformed response: {e}")))?;
        let rates = response
            .rates
            .ok_or_else(|| FxError::upstream(base, "response has no rates field"))?;
        Ok(rates
            .into_iter()
            .map(|(code, rate)| (Currency::new(code), rate))
            .collect())
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &str {
        "frankfurter"
    }

    async fn fetch_rates(&self, base: &Currency, targets: &[Currency]) -> FxResult<RateTable> {
        let to = targets
            .iter()
            .filter(|c| *c != base)
            .map(Currency::code)
            .collect::<Vec<_>>()
            .join(",");

        debug!(base = %base, targets = %to, "Requesting rate table");

        let response = self
            .client
            .get(self.latest_url())
            .query(&[("from", base.code()), ("to", to.as_str())])
            .send()
            .await
            .map_err(|e| FxError::upstream(base, e))?
            .error_for_status()
            .map_err(|e| FxError::upstream(base, e))?;
        let body = response.text().await.map_err(|e| FxError::upstream(base, e))?;

        Self::parse_body(base, &body)
    }
}

/// Mock rate provider for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateProvider {
    name: String,
    tables: dashmap::DashMap<Currency, RateTable>,
    failing: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicUsize,
    delay: parking_lot::Mutex<Option<Duration>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateProvider {
    /// Create a new mock provider with no tables.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: dashmap::DashMap::new(),
            failing: std::sync::atomic::AtomicBool::new(false),
            calls: std::sync::atomic::AtomicUsize::new(0),
            delay: parking_lot::Mutex::new(None),
        }
    }

    /// Set the table returned for `base`.
    pub fn set_table(&self, base: &str, rates: &[(&str, f64)]) {
        let table = rates
            .iter()
            .map(|(code, rate)| (Currency::new(*code), *rate))
            .collect();
        self.tables.insert(Currency::new(base), table);
    }

    /// Make every fetch fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Delay each fetch, to widen race windows in concurrency tests.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of fetches attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateProvider for MockRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self, base: &Currency, _targets: &[Currency]) -> FxResult<RateTable> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FxError::upstream(base, "mock provider offline"));
        }

        self.tables
            .get(base)
            .map(|t| t.clone())
            .ok_or_else(|| FxError::upstream(base, "no table configured"))
    }
}
