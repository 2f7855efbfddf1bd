//! SheetFX Common Types
//!
//! Shared types used across SheetFX: currency codes and pairs, the
//! configured currency universe, rounding and formatting helpers, and the
//! injectable clock.

pub mod currencies;
pub mod error;
pub mod monetary;
pub mod time;

pub use currencies::*;
pub use error::*;
pub use monetary::*;
pub use time::*;
