//! Currency conversion types: cell values, requests, per-cell outcomes.

use std::fmt;

use serde::Serialize;
use sheetfx_common::{Currency, CurrencyPair};

use crate::error::{FxError, FxResult};
use crate::resolver::RateProvenance;

/// Progress callback receiving `(current, total, message)`.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize, &str) + Send + Sync);

/// A single spreadsheet cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Blank cell.
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    /// Date or time as a spreadsheet serial day number. Never converted.
    DateTime(f64),
}

impl CellValue {
    /// Blank cells and empty strings.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Coerce to a finite number.
    ///
    /// Text is trimmed and parsed; booleans and dates are not treated as
    /// numbers.
    pub fn as_number(&self) -> FxResult<f64> {
        let parsed = match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Empty | CellValue::Bool(_) | CellValue::DateTime(_) => None,
        };
        parsed
            .filter(|n| n.is_finite())
            .ok_or_else(|| FxError::NonNumericValue(self.to_string()))
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::DateTime(serial) => write!(f, "date({serial})"),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Empty)
    }
}

/// Rows of cells. Rows may differ in length.
pub type ValueGrid = Vec<Vec<CellValue>>;

/// Shape of a converted cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Rounded number.
    #[default]
    Number,
    /// Text such as `1,234.50 EUR`.
    WithCurrencySuffix,
}

/// Parameters of one conversion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub from_currency: Currency,
    pub to_currency: Currency,
    /// Decimal places of the converted value.
    pub precision: u32,
    pub output: OutputFormat,
}

impl ConversionRequest {
    /// Create a request rounding to two decimals.
    pub fn new(from_currency: Currency, to_currency: Currency) -> Self {
        Self {
            from_currency,
            to_currency,
            precision: 2,
            output: OutputFormat::Number,
        }
    }

    /// Round to `precision` decimal places.
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    /// Produce formatted text with the target currency appended.
    pub fn with_currency_suffix(mut self) -> Self {
        self.output = OutputFormat::WithCurrencySuffix;
        self
    }

    /// Get the currency pair.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from_currency.clone(), self.to_currency.clone())
    }
}

/// Outcome of converting one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellStatus {
    SkippedEmpty,
    SkippedNonNumeric,
    Converted(RateProvenance),
    Error(String),
}

impl CellStatus {
    pub fn is_converted(&self) -> bool {
        matches!(self, CellStatus::Converted(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CellStatus::SkippedEmpty | CellStatus::SkippedNonNumeric)
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellStatus::SkippedEmpty => write!(f, "skipped (empty)"),
            CellStatus::SkippedNonNumeric => write!(f, "skipped (non-numeric)"),
            CellStatus::Converted(provenance) => write!(f, "converted ({provenance})"),
            CellStatus::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Aggregate counts for a converted range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversionStats {
    pub total: usize,
    pub converted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ConversionStats {
    /// Count one cell.
    pub fn record(&mut self, status: &CellStatus) {
        self.total += 1;
        if status.is_converted() {
            self.converted += 1;
        } else if status.is_skipped() {
            self.skipped += 1;
        } else {
            self.errors += 1;
        }
    }
}

impl fmt::Display for ConversionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cells: {} converted, {} skipped, {} errors",
            self.total, self.converted, self.skipped, self.errors
        )
    }
}
