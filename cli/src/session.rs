//! Conversion session: read the selected range, convert it, write it back.

use serde::Serialize;
use sheetfx_fx::{ConversionEngine, ConversionRequest, ConversionStats, ProgressFn};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::workbook::{BindingError, Selection, SpreadsheetBinding, WriteMode};

/// Failures that abort a conversion outright.
///
/// Per-cell problems are never reported here; they show up in
/// [`ConversionStats`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot connect to the spreadsheet host")]
    NotConnected,

    #[error("No cell range is selected")]
    NoSelection,

    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Result of converting one selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionOutcome {
    pub range: String,
    pub stats: ConversionStats,
    /// Whether converted values were written back.
    pub written: bool,
}

/// Drives a [`ConversionEngine`] against a spreadsheet binding.
pub struct ConversionSession<B> {
    binding: B,
    engine: ConversionEngine,
}

impl<B: SpreadsheetBinding> ConversionSession<B> {
    pub fn new(binding: B, engine: ConversionEngine) -> Self {
        Self { binding, engine }
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    /// Connect if needed. Fails only when the host cannot be reached.
    pub fn ensure_connected(&mut self) -> Result<(), SessionError> {
        if self.binding.is_connected() || self.binding.connect() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Convert the user's current selection in place.
    ///
    /// Values are written back only when at least one cell converted.
    #[instrument(skip_all, fields(pair = %request.pair()))]
    pub async fn convert_selection(
        &mut self,
        request: &ConversionRequest,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ConversionOutcome, SessionError> {
        self.ensure_connected()?;
        let selection = self
            .binding
            .select_range()
            .ok_or(SessionError::NoSelection)?;
        self.convert_range(&selection, request, progress).await
    }

    async fn convert_range(
        &mut self,
        selection: &Selection,
        request: &ConversionRequest,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ConversionOutcome, SessionError> {
        let values = self.binding.read_values(selection)?;
        let (converted, stats) = self.engine.convert_range(&values, request, progress).await;

        let written = stats.converted > 0;
        if written {
            self.binding
                .write_values(selection, &converted, WriteMode::Overwrite)?;
            info!(range = %selection, converted = stats.converted, "Converted values written");
        } else {
            warn!(range = %selection, "No cells converted, nothing written");
        }

        Ok(ConversionOutcome {
            range: selection.to_string(),
            stats,
            written,
        })
    }
}
