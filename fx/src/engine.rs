//! Range conversion engine.

use std::sync::Arc;

use sheetfx_common::{format_with_code, round_half_away};
use tracing::{debug, info, instrument, warn};

use crate::conversion::{
    CellStatus, CellValue, ConversionRequest, ConversionStats, OutputFormat, ProgressFn,
    ValueGrid,
};
use crate::error::{FxError, FxResult};
use crate::resolver::{RateProvenance, RateResolver};

/// Converts cell values and ranges between currencies.
///
/// Per-cell failures never abort a range: a failing cell is replaced with
/// `error: <message>` text and counted in [`ConversionStats::errors`].
#[derive(Clone)]
pub struct ConversionEngine {
    resolver: Arc<RateResolver>,
}

impl ConversionEngine {
    /// Create an engine backed by `resolver`.
    pub fn new(resolver: Arc<RateResolver>) -> Self {
        Self { resolver }
    }

    /// Get the underlying resolver.
    pub fn resolver(&self) -> &Arc<RateResolver> {
        &self.resolver
    }

    /// Convert a single value.
    pub async fn convert_value(
        &self,
        value: &CellValue,
        request: &ConversionRequest,
    ) -> (CellValue, CellStatus) {
        if value.is_empty() {
            return (value.clone(), CellStatus::SkippedEmpty);
        }

        let amount = match value.as_number() {
            Ok(amount) => amount,
            Err(e) => {
                debug!(error = %e, "Leaving non-numeric cell unchanged");
                return (value.clone(), CellStatus::SkippedNonNumeric);
            }
        };

        match self.apply_rate(amount, request).await {
            Ok((converted, provenance)) => (converted, CellStatus::Converted(provenance)),
            Err(e) => {
                let message = e.to_string();
                warn!(amount, error = %message, "Cell conversion failed");
                (
                    CellValue::Text(format!("error: {message}")),
                    CellStatus::Error(message),
                )
            }
        }
    }

    /// Convert every cell of `grid`, preserving its shape.
    ///
    /// `progress` is called before each cell with its zero-based index.
    #[instrument(skip_all, fields(pair = %request.pair()))]
    pub async fn convert_range(
        &self,
        grid: &[Vec<CellValue>],
        request: &ConversionRequest,
        progress: Option<ProgressFn<'_>>,
    ) -> (ValueGrid, ConversionStats) {
        let total = grid.iter().map(Vec::len).sum();
        let mut stats = ConversionStats::default();
        let mut output = Vec::with_capacity(grid.len());
        let mut index = 0;

        for row in grid {
            let mut converted_row = Vec::with_capacity(row.len());
            for cell in row {
                if let Some(report) = progress {
                    report(index, total, "Processing...");
                }
                let (value, status) = self.convert_value(cell, request).await;
                stats.record(&status);
                converted_row.push(value);
                index += 1;
            }
            output.push(converted_row);
        }

        info!(
            total = stats.total,
            converted = stats.converted,
            skipped = stats.skipped,
            errors = stats.errors,
            "Range converted"
        );
        (output, stats)
    }

    async fn apply_rate(
        &self,
        amount: f64,
        request: &ConversionRequest,
    ) -> FxResult<(CellValue, RateProvenance)> {
        let resolved = self
            .resolver
            .get_rate(&request.from_currency, &request.to_currency)
            .await?;

        let converted = amount * resolved.rate;
        if !converted.is_finite() {
            return Err(FxError::Overflow {
                amount,
                rate: resolved.rate,
            });
        }

        let value = match request.output {
            OutputFormat::Number => {
                CellValue::Number(round_half_away(converted, request.precision))
            }
            OutputFormat::WithCurrencySuffix => CellValue::Text(format_with_code(
                converted,
                request.precision,
                &request.to_currency,
            )),
        };

        Ok((value, resolved.provenance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RateCache;
    use crate::provider::MockRateProvider;
    use crate::resolver::ResolverConfig;
    use chrono::Duration;
    use sheetfx_common::Currency;

    fn setup() -> (Arc<MockRateProvider>, ConversionEngine) {
        let provider = Arc::new(MockRateProvider::new("test"));
        provider.set_table("USD", &[("EUR", 0.9), ("JPY", 150.0)]);
        let resolver = RateResolver::new(
            provider.clone(),
            RateCache::in_memory(Duration::minutes(30)),
            ResolverConfig::default(),
        );
        (provider, ConversionEngine::new(Arc::new(resolver)))
    }

    fn usd_to_eur() -> ConversionRequest {
        ConversionRequest::new(Currency::usd(), Currency::eur())
    }

    #[tokio::test]
    async fn test_mixed_range() {
        let (_, engine) = setup();
        let grid = vec![vec![
            CellValue::from(""),
            CellValue::Empty,
            CellValue::from("Label"),
            CellValue::Number(100.0),
        ]];

        let (output, stats) = engine.convert_range(&grid, &usd_to_eur(), None).await;

        assert_eq!(
            stats,
            ConversionStats {
                total: 4,
                converted: 1,
                skipped: 3,
                errors: 0
            }
        );
        assert_eq!(output[0][0], CellValue::from(""));
        assert_eq!(output[0][1], CellValue::Empty);
        assert_eq!(output[0][2], CellValue::from("Label"));
        assert_eq!(output[0][3], CellValue::Number(90.0));
    }

    #[tokio::test]
    async fn test_numeric_text_and_bool() {
        let (_, engine) = setup();
        let request = usd_to_eur();

        let (value, status) = engine.convert_value(&CellValue::from(" 250 "), &request).await;
        assert_eq!(value, CellValue::Number(225.0));
        assert_eq!(status, CellStatus::Converted(RateProvenance::Api));

        let (value, status) = engine.convert_value(&CellValue::Bool(true), &request).await;
        assert_eq!(value, CellValue::Bool(true));
        assert_eq!(status, CellStatus::SkippedNonNumeric);
    }

    #[tokio::test]
    async fn test_dates_are_left_alone() {
        let (_, engine) = setup();
        let grid = vec![vec![CellValue::DateTime(45292.0), CellValue::Number(100.0)]];

        let (output, stats) = engine.convert_range(&grid, &usd_to_eur(), None).await;

        assert_eq!(stats.converted, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(output[0][0], CellValue::DateTime(45292.0));
        assert_eq!(output[0][1], CellValue::Number(90.0));
    }

    #[tokio::test]
    async fn test_conversion_is_deterministic() {
        let (provider, engine) = setup();
        let grid = vec![vec![CellValue::Number(12.345)], vec![CellValue::Number(-7.0)]];

        let (first, _) = engine.convert_range(&grid, &usd_to_eur(), None).await;
        let (second, stats) = engine.convert_range(&grid, &usd_to_eur(), None).await;

        assert_eq!(first, second);
        assert_eq!(first[0][0], CellValue::Number(11.11));
        assert_eq!(first[1][0], CellValue::Number(-6.3));
        assert_eq!(stats.converted, 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_precision_and_same_currency() {
        let (provider, engine) = setup();
        let request = ConversionRequest::new(Currency::eur(), Currency::eur()).with_precision(0);

        let (value, status) = engine.convert_value(&CellValue::Number(2.5), &request).await;
        assert_eq!(value, CellValue::Number(3.0));
        assert_eq!(status, CellStatus::Converted(RateProvenance::Same));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_currency_suffix_output() {
        let (_, engine) = setup();
        let request = usd_to_eur().with_currency_suffix();

        let (value, _) = engine
            .convert_value(&CellValue::Number(2_000_000.0), &request)
            .await;
        assert_eq!(value, CellValue::from("1,800,000.00 EUR"));

        let (value, _) = engine.convert_value(&CellValue::Number(1000.0), &request).await;
        assert_eq!(value, CellValue::from("900.00 EUR"));
    }

    #[tokio::test]
    async fn test_currency_suffix_beyond_decimal_range() {
        let (_, engine) = setup();
        let request = usd_to_eur().with_currency_suffix();

        let (value, status) = engine.convert_value(&CellValue::Number(1e29), &request).await;

        assert_eq!(status, CellStatus::Converted(RateProvenance::Api));
        assert_eq!(
            value,
            CellValue::from("89,999,999,999,999,994,049,054,375,936.00 EUR")
        );
    }

    #[tokio::test]
    async fn test_unavailable_rate_marks_cell() {
        let (provider, engine) = setup();
        provider.set_failing(true);
        let grid = vec![vec![CellValue::Number(10.0), CellValue::from("n/a")]];

        let (output, stats) = engine.convert_range(&grid, &usd_to_eur(), None).await;

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.total, 2);
        match &output[0][0] {
            CellValue::Text(text) => {
                assert!(text.starts_with("error: "), "unexpected text {text}");
                assert!(text.contains("USD/EUR"));
            }
            other => panic!("expected error text, got {other:?}"),
        }
        assert_eq!(output[0][1], CellValue::from("n/a"));
    }

    #[tokio::test]
    async fn test_ragged_rows_and_progress() {
        let (_, engine) = setup();
        let grid = vec![
            vec![CellValue::Number(1.0), CellValue::Number(2.0), CellValue::Number(3.0)],
            vec![],
            vec![CellValue::Number(4.0)],
        ];
        let seen = parking_lot::Mutex::new(Vec::new());
        let record = |current: usize, total: usize, message: &str| {
            seen.lock().push((current, total, message.to_string()));
        };

        let (output, stats) = engine
            .convert_range(&grid, &usd_to_eur(), Some(&record))
            .await;

        assert_eq!(output.len(), 3);
        assert_eq!(output[0].len(), 3);
        assert!(output[1].is_empty());
        assert_eq!(output[2], vec![CellValue::Number(3.6)]);
        assert_eq!(stats.total, 4);

        let seen = seen.into_inner();
        let indices: Vec<_> = seen.iter().map(|(i, t, _)| (*i, *t)).collect();
        assert_eq!(indices, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
        assert!(seen.iter().all(|(_, _, m)| m == "Processing..."));
    }
}
