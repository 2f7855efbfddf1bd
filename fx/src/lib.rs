//! SheetFX rate engine
//!
//! Exchange-rate resolution and spreadsheet range conversion.
//!
//! # Features
//!
//! - Pluggable rate providers, with an HTTP client for Frankfurter-compatible APIs
//! - Per-base rate cache with a TTL, persisted to a JSON file
//! - Offline fallback to expired cache entries
//! - Bulk refresh, either direct or derived through an anchor currency
//! - Cell-by-cell range conversion with per-cell outcomes
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sheetfx_fx::{ConversionEngine, ConversionRequest, HttpRateProvider, RateCache, RateResolver, ResolverConfig};
//! use sheetfx_common::Currency;
//!
//! let config = ResolverConfig::default();
//! let provider = HttpRateProvider::new(sheetfx_fx::FRANKFURTER_BASE_URL, config.fetch_timeout)?;
//! let cache = RateCache::load("rates_cache.json", chrono::Duration::hours(2));
//! let resolver = Arc::new(RateResolver::new(Arc::new(provider), cache, config));
//!
//! let rate = resolver.get_rate(&Currency::usd(), &Currency::eur()).await?;
//!
//! let engine = ConversionEngine::new(resolver);
//! let request = ConversionRequest::new(Currency::usd(), Currency::eur());
//! let (values, stats) = engine.convert_range(&grid, &request, None).await;
//! ```

pub mod cache;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod provider;
pub mod refresh;
pub mod resolver;

pub use cache::{CacheEntry, CacheStats, RateCache, RateSource};
pub use conversion::{
    CellStatus, CellValue, ConversionRequest, ConversionStats, OutputFormat, ProgressFn,
    ValueGrid,
};
pub use engine::ConversionEngine;
pub use error::{FxError, FxResult};
pub use provider::{HttpRateProvider, RateProvider, RateTable, FRANKFURTER_BASE_URL};
pub use refresh::{derive_cross_rates, RefreshReport, RefreshStrategy};
pub use resolver::{ApiStatus, RateProvenance, RateResolver, ResolvedRate, ResolverConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
