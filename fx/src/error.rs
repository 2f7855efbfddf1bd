//! FX error types.

use std::path::PathBuf;

use sheetfx_common::{Currency, CurrencyPair};
use thiserror::Error;

/// Errors that can occur while resolving, caching or applying rates.
#[derive(Debug, Clone, Error)]
pub enum FxError {
    /// No usable rate, cached or fetched, for the requested pair.
    #[error("Rate not available for {pair}: {reason}")]
    RateUnavailable { pair: CurrencyPair, reason: String },

    /// The rate provider could not be reached or returned a bad table.
    #[error("Rate fetch failed for base {base}: {reason}")]
    UpstreamFetch { base: Currency, reason: String },

    /// The cache file could not be read or written.
    #[error("Cache persistence failed for {}: {reason}", .path.display())]
    Persistence { path: PathBuf, reason: String },

    /// A cell value could not be read as a number.
    #[error("Not a numeric value: {0}")]
    NonNumericValue(String),

    /// Applying the rate produced a value outside the representable range.
    #[error("Converting {amount} at rate {rate} overflows")]
    Overflow { amount: f64, rate: f64 },
}

impl FxError {
    /// Build a `RateUnavailable` for `from -> to`.
    pub fn unavailable(from: &Currency, to: &Currency, reason: impl Into<String>) -> Self {
        FxError::RateUnavailable {
            pair: CurrencyPair::new(from.clone(), to.clone()),
            reason: reason.into(),
        }
    }

    /// Build an `UpstreamFetch` for `base`.
    pub fn upstream(base: &Currency, reason: impl ToString) -> Self {
        FxError::UpstreamFetch {
            base: base.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
