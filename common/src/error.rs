//! Error types for shared SheetFX types.

use thiserror::Error;

/// Errors raised while parsing shared types from user input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// The value is not a three-letter alphabetic currency code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrencyCode(String),

    /// The currency code is well formed but outside the configured universe.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

/// Result type alias for shared operations.
pub type Result<T> = std::result::Result<T, CommonError>;
