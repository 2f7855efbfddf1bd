//! Monetary types and rounding helpers for SheetFX.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Largest scale a `Decimal` can carry.
const MAX_PRECISION: u32 = 28;

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Parse a user supplied code, requiring exactly three ASCII letters.
    pub fn parse(code: &str) -> Result<Self> {
        let trimmed = code.trim();
        if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self::new(trimmed))
        } else {
            Err(CommonError::InvalidCurrencyCode(code.to_string()))
        }
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl FromStr for Currency {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A currency pair for FX operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Base currency (the one being converted from).
    pub base: Currency,
    /// Quote currency (the one being converted to).
    pub quote: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// True when base and quote are the same currency.
    pub fn is_identity(&self) -> bool {
        self.base == self.quote
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A monetary amount with currency.
///
/// Amounts enter as `f64` (spreadsheet cells and API rates are binary floats)
/// and are carried as `Decimal` so rounding happens on the decimal digits a
/// user sees rather than on the binary expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount value (high precision decimal).
    pub value: Decimal,
    /// ISO 4217 currency code.
    pub currency: Currency,
}

impl Money {
    /// Create from a float using its shortest round-trip representation.
    ///
    /// Returns `None` for non-finite values and magnitudes `Decimal` cannot hold.
    pub fn from_f64(value: f64, currency: Currency) -> Option<Self> {
        decimal_from_f64(value).map(|value| Self { value, currency })
    }

    /// Round to `precision` decimal places, half away from zero.
    pub fn round(&self, precision: u32) -> Self {
        let places = precision.min(MAX_PRECISION);
        let mut value = self
            .value
            .round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(places);
        if value.is_zero() {
            value.set_sign_positive(true);
        }
        Self {
            value,
            currency: self.currency.clone(),
        }
    }

    /// Format the amount with comma thousands separators and the currency code
    /// appended, e.g. `1,234.50 EUR`. The amount keeps its current scale.
    pub fn to_grouped_string(&self) -> String {
        format!("{} {}", group_thousands(&self.value.to_string()), self.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

/// Round a float to `precision` decimal places, half away from zero.
///
/// Non-finite values are returned unchanged. Magnitudes beyond the `Decimal`
/// range are already integral and are returned as is; magnitudes below it
/// round to zero.
pub fn round_half_away(value: f64, precision: u32) -> f64 {
    let places = precision.min(MAX_PRECISION);
    decimal_from_f64(value)
        .map(|d| d.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| decimal_to_f64(&d))
        .unwrap_or_else(|| {
            if value.is_finite() && value.abs() < 1.0 {
                0.0
            } else {
                value
            }
        })
}

/// Format `value` rounded to `precision` places with thousands separators and
/// `currency` appended.
///
/// Magnitudes `Decimal` cannot hold fall back to the float's exact decimal
/// expansion, which is already integral at that size.
pub fn format_with_code(value: f64, precision: u32, currency: &Currency) -> String {
    match Money::from_f64(value, currency.clone()) {
        Some(money) => money.round(precision).to_grouped_string(),
        None => {
            let places = precision.min(MAX_PRECISION) as usize;
            format!("{} {currency}", group_thousands(&format!("{value:.places$}")))
        }
    }
}

fn group_thousands(raw: &str) -> String {
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    // f64 Display is the shortest string that parses back to the same float
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_scientific(&format!("{value:e}")).ok())
}

fn decimal_to_f64(value: &Decimal) -> Option<f64> {
    // parsing the decimal string is correctly rounded
    value.to_string().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("usd").unwrap(), Currency::usd());
        assert_eq!(Currency::parse(" EUR ").unwrap(), Currency::eur());
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("US1").is_err());
        assert!(Currency::parse("EURO").is_err());
    }

    #[test]
    fn test_currency_json_is_bare_code() {
        let json = serde_json::to_string(&Currency::eur()).unwrap();
        assert_eq!(json, "\"EUR\"");

        let rates: std::collections::BTreeMap<Currency, f64> =
            serde_json::from_str(r#"{"USD": 1.08, "JPY": 161.2}"#).unwrap();
        assert_eq!(rates.get(&Currency::usd()), Some(&1.08));
        assert_eq!(rates.keys().next(), Some(&Currency::jpy()));
    }

    #[test]
    fn test_pair_display() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::eur());
        assert_eq!(pair.to_string(), "USD/EUR");
        assert!(!pair.is_identity());
        assert!(CurrencyPair::new(Currency::jpy(), Currency::jpy()).is_identity());
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_half_away(2.345, 2), 2.35);
        assert_eq!(round_half_away(-2.345, 2), -2.35);
        assert_eq!(round_half_away(2.5, 0), 3.0);
        assert_eq!(round_half_away(100.0 * 0.9, 2), 90.0);
        assert_eq!(round_half_away(1.0 / 3.0, 4), 0.3333);
    }

    #[test]
    fn test_round_out_of_decimal_range() {
        assert_eq!(round_half_away(1e300, 2), 1e300);
        assert_eq!(round_half_away(1e-40, 2), 0.0);
        assert!(round_half_away(f64::NAN, 2).is_nan());
    }

    #[test]
    fn test_grouped_string() {
        let money = Money::from_f64(1234567.891, Currency::eur()).unwrap().round(2);
        assert_eq!(money.to_grouped_string(), "1,234,567.89 EUR");

        let small = Money::from_f64(12.5, Currency::usd()).unwrap().round(2);
        assert_eq!(small.to_grouped_string(), "12.50 USD");

        let negative = Money::from_f64(-1000.0, Currency::jpy()).unwrap().round(0);
        assert_eq!(negative.to_grouped_string(), "-1,000 JPY");

        let zero = Money::from_f64(-0.001, Currency::usd()).unwrap().round(2);
        assert_eq!(zero.to_grouped_string(), "0.00 USD");
    }

    #[test]
    fn test_format_beyond_decimal_range() {
        assert_eq!(format_with_code(1234.5, 2, &Currency::eur()), "1,234.50 EUR");
        assert_eq!(
            format_with_code(1e30, 2, &Currency::usd()),
            "1,000,000,000,000,000,019,884,624,838,656.00 USD"
        );
        assert_eq!(
            format_with_code(-1e29, 0, &Currency::jpy()),
            "-99,999,999,999,999,991,433,150,857,216 JPY"
        );
    }

    proptest! {
        #[test]
        fn prop_rounding_is_idempotent(value in -1.0e6f64..1.0e6, precision in 0u32..7) {
            let once = round_half_away(value, precision);
            prop_assert_eq!(round_half_away(once, precision), once);
        }

        #[test]
        fn prop_rounding_stays_within_half_unit(value in -1.0e6f64..1.0e6, precision in 0u32..6) {
            let rounded = round_half_away(value, precision);
            let half_unit = 0.5 * 10f64.powi(-(precision as i32));
            prop_assert!((rounded - value).abs() <= half_unit * (1.0 + 1e-9));
        }
    }
}
