//! Bulk refresh of every configured currency's rate table.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use sheetfx_common::Currency;
use tracing::{error, info, instrument, warn};

use crate::cache::{CacheEntry, RateSource};
use crate::conversion::ProgressFn;
use crate::error::{FxError, FxResult};
use crate::provider::RateTable;
use crate::resolver::RateResolver;

/// How a bulk refresh populates the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStrategy {
    /// Fetch every currency's table from the provider.
    Direct,
    /// Fetch the anchor's table once and derive the rest through cross-rates.
    CrossRate { anchor: Currency },
}

impl fmt::Display for RefreshStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStrategy::Direct => write!(f, "direct"),
            RefreshStrategy::CrossRate { anchor } => write!(f, "cross:{anchor}"),
        }
    }
}

impl FromStr for RefreshStrategy {
    type Err = String;

    /// Accepts `direct`, `cross` (USD anchor) or `cross:<CODE>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("direct") {
            return Ok(RefreshStrategy::Direct);
        }
        if s.eq_ignore_ascii_case("cross") {
            return Ok(RefreshStrategy::CrossRate {
                anchor: Currency::usd(),
            });
        }
        match s.split_once(':') {
            Some((kind, code)) if kind.eq_ignore_ascii_case("cross") => {
                let anchor = Currency::parse(code).map_err(|e| e.to_string())?;
                Ok(RefreshStrategy::CrossRate { anchor })
            }
            _ => Err(format!(
                "Unknown refresh strategy {s:?}, expected \"direct\" or \"cross:<CODE>\""
            )),
        }
    }
}

/// Per-currency outcome of a bulk refresh.
pub type RefreshReport = BTreeMap<Currency, bool>;

/// Derive `currency`'s table from the anchor's table.
///
/// `rate(X→X) = 1`, `rate(X→anchor) = 1 / rate(anchor→X)` and
/// `rate(X→Y) = (1 / rate(anchor→X)) * rate(anchor→Y)`. No rounding is applied.
pub fn derive_cross_rates(
    anchor: &Currency,
    anchor_rates: &RateTable,
    currency: &Currency,
    universe: &[Currency],
) -> FxResult<RateTable> {
    let missing = |code: &Currency| {
        FxError::unavailable(anchor, code, format!("{code} missing from {anchor} table"))
    };

    let anchor_to_currency = *anchor_rates.get(currency).ok_or_else(|| missing(currency))?;
    let inverse = 1.0 / anchor_to_currency;

    universe
        .iter()
        .map(|target| {
            let rate = if target == currency {
                1.0
            } else if target == anchor {
                inverse
            } else {
                inverse * *anchor_rates.get(target).ok_or_else(|| missing(target))?
            };
            Ok((target.clone(), rate))
        })
        .collect()
}

impl RateResolver {
    /// Populate rate tables for every configured currency.
    ///
    /// Progress is reported as `(current, total, message)`. A failure for one
    /// currency is recorded and the rest continue. The cache is persisted once
    /// at the end, and only when at least one table was stored.
    #[instrument(skip_all, fields(strategy = %self.config().refresh_strategy))]
    pub async fn refresh_all_rates(&self, progress: Option<ProgressFn<'_>>) -> RefreshReport {
        let report = match self.config().refresh_strategy.clone() {
            RefreshStrategy::Direct => self.refresh_direct(progress).await,
            RefreshStrategy::CrossRate { anchor } => self.refresh_cross(&anchor, progress).await,
        };

        let succeeded = report.values().filter(|ok| **ok).count();
        if succeeded > 0 {
            self.persist_logged();
        }

        if succeeded == report.len() {
            info!("Refreshed {}/{} currencies.", succeeded, report.len());
        } else {
            warn!("Refreshed {}/{} currencies.", succeeded, report.len());
        }

        report
    }

    async fn refresh_direct(&self, progress: Option<ProgressFn<'_>>) -> RefreshReport {
        let currencies = self.config().currencies.clone();
        let total = currencies.len();
        let mut report = RefreshReport::new();

        for (i, currency) in currencies.iter().enumerate() {
            if let Some(progress) = progress {
                progress(i, total, &format!("Fetching {currency}..."));
            }

            let gate = self.gate(currency);
            let _permit = gate.lock().await;

            match self.fetch_table(currency).await {
                Ok(table) => {
                    let entry =
                        CacheEntry::new(currency.clone(), table, self.now(), RateSource::Api);
                    self.cache().insert(entry);
                    report.insert(currency.clone(), true);
                }
                Err(e) => {
                    error!(currency = %currency, error = %e, "Failed to refresh rates");
                    report.insert(currency.clone(), false);
                }
            }
        }

        if let Some(progress) = progress {
            progress(total, total, "Done");
        }
        report
    }

    async fn refresh_cross(
        &self,
        anchor: &Currency,
        progress: Option<ProgressFn<'_>>,
    ) -> RefreshReport {
        let currencies = self.config().currencies.clone();
        let total = currencies.len();

        if let Some(progress) = progress {
            progress(0, total, "Fetching base rates...");
        }

        let anchor_table = {
            let gate = self.gate(anchor);
            let _permit = gate.lock().await;
            self.fetch_table(anchor).await
        };

        let anchor_table = match anchor_table {
            Ok(table) => table,
            Err(e) => {
                error!(anchor = %anchor, error = %e, "Failed to fetch anchor rates");
                return currencies.into_iter().map(|c| (c, false)).collect();
            }
        };

        let now = self.now();
        let anchor_entry = CacheEntry::new(anchor.clone(), anchor_table, now, RateSource::Api);
        let anchor_rates = anchor_entry.rates.clone();
        self.cache().insert(anchor_entry);

        let mut report = RefreshReport::new();
        report.insert(anchor.clone(), true);

        for (i, currency) in currencies.iter().filter(|c| *c != anchor).enumerate() {
            if let Some(progress) = progress {
                progress(i + 1, total, &format!("Processing {currency}..."));
            }

            match derive_cross_rates(anchor, &anchor_rates, currency, &currencies) {
                Ok(rates) => {
                    self.cache().insert(CacheEntry::new(
                        currency.clone(),
                        rates,
                        now,
                        RateSource::Calculated,
                    ));
                    report.insert(currency.clone(), true);
                }
                Err(e) => {
                    error!(currency = %currency, error = %e, "Failed to calculate rates");
                    report.insert(currency.clone(), false);
                }
            }
        }

        if let Some(progress) = progress {
            progress(total, total, "Done");
        }
        report
    }
}
