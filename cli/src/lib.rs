//! SheetFX command line front end
//!
//! Wires configuration, the rate resolver and a spreadsheet binding together
//! so a range can be converted end to end.

pub mod config;
pub mod session;
pub mod workbook;

pub use config::AppConfig;
pub use session::{ConversionOutcome, ConversionSession, SessionError};
pub use workbook::{
    BindingError, InMemoryWorkbook, Selection, Sheet, SpreadsheetBinding, WriteMode,
    XlsxWorkbook,
};
