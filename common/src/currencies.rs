//! The configured currency universe.

use crate::error::{CommonError, Result};
use crate::monetary::Currency;

/// Codes offered for conversion and iterated by a bulk refresh, sorted.
pub const SUPPORTED_CURRENCIES: [&str; 30] = [
    "AUD", "BRL", "CAD", "CHF", "CNY", "CZK", "DKK", "EUR", "GBP", "HKD", "HUF", "IDR", "ILS",
    "INR", "JPY", "KRW", "MXN", "MYR", "NOK", "NZD", "PHP", "PLN", "RON", "RUB", "SEK", "SGD",
    "THB", "TRY", "USD", "ZAR",
];

/// The default universe as owned currencies.
pub fn supported_currencies() -> Vec<Currency> {
    SUPPORTED_CURRENCIES.iter().map(|code| Currency::new(*code)).collect()
}

/// Parse a code and require it to be part of `universe`.
pub fn parse_supported(code: &str, universe: &[Currency]) -> Result<Currency> {
    let currency = Currency::parse(code)?;
    if universe.contains(&currency) {
        Ok(currency)
    } else {
        Err(CommonError::UnsupportedCurrency(currency.code().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_is_sorted_and_unique() {
        let mut sorted = SUPPORTED_CURRENCIES.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, SUPPORTED_CURRENCIES.to_vec());
    }

    #[test]
    fn test_parse_supported() {
        let universe = supported_currencies();
        assert_eq!(parse_supported("eur", &universe).unwrap(), Currency::eur());
        assert_eq!(
            parse_supported("XAU", &universe),
            Err(CommonError::UnsupportedCurrency("XAU".to_string()))
        );
        assert!(matches!(
            parse_supported("E1", &universe),
            Err(CommonError::InvalidCurrencyCode(_))
        ));
    }
}
