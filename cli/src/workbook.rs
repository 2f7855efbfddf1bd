//! Spreadsheet binding.
//!
//! [`SpreadsheetBinding`] is the capability a conversion session drives:
//! connect, read a selected range, write converted values back and manage
//! open workbooks. [`InMemoryWorkbook`] backs tests; [`XlsxWorkbook`] reads
//! `.xlsx` files with calamine and saves them with rust_xlsxwriter.
//!
//! A binding is driven from a single task and is not shared.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_xlsxwriter::{Format, Formula, Workbook};
use sheetfx_fx::{CellValue, ValueGrid};
use thiserror::Error;
use tracing::{debug, info};

/// Rows per worksheet in the xlsx format.
const MAX_ROWS: u32 = 1_048_576;
/// Columns per worksheet in the xlsx format.
const MAX_COLS: u32 = 16_384;

/// Errors raised by a spreadsheet binding.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("No workbook is active")]
    NoActiveWorkbook,

    #[error("Workbook not open: {0}")]
    UnknownWorkbook(String),

    #[error("Worksheet not found: {0}")]
    UnknownSheet(String),

    #[error("Invalid cell range {0:?}")]
    InvalidRange(String),

    #[error("Failed to read {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    #[error("Failed to save {}: {reason}", .path.display())]
    Save { path: PathBuf, reason: String },
}

/// Result type for binding operations.
pub type BindingResult<T> = Result<T, BindingError>;

/// A rectangular cell range, zero-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Worksheet name; the first sheet when unset.
    pub sheet: Option<String>,
    pub first_row: u32,
    pub first_col: u32,
    pub last_row: u32,
    pub last_col: u32,
}

impl Selection {
    /// Create a selection spanning two corners in any order.
    pub fn new(row_a: u32, col_a: u32, row_b: u32, col_b: u32) -> Self {
        Self {
            sheet: None,
            first_row: row_a.min(row_b),
            first_col: col_a.min(col_b),
            last_row: row_a.max(row_b),
            last_col: col_a.max(col_b),
        }
    }

    /// Restrict the selection to a named worksheet.
    pub fn on_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn rows(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.last_col - self.first_col + 1
    }

    /// Parse A1 notation such as `B2`, `A1:C10`, `$A$1:$B$4` or `Data!A1:B2`.
    pub fn parse(input: &str) -> BindingResult<Self> {
        let invalid = || BindingError::InvalidRange(input.to_string());
        let trimmed = input.trim();

        let (sheet, range) = match trimmed.rsplit_once('!') {
            Some((sheet, range)) => {
                let sheet = sheet.trim_matches('\'');
                if sheet.is_empty() {
                    return Err(invalid());
                }
                (Some(sheet.to_string()), range)
            }
            None => (None, trimmed),
        };

        let (start, end) = range.split_once(':').unwrap_or((range, range));
        let (row_a, col_a) = parse_cell(start).ok_or_else(invalid)?;
        let (row_b, col_b) = parse_cell(end).ok_or_else(invalid)?;

        let mut selection = Self::new(row_a, col_a, row_b, col_b);
        selection.sheet = sheet;
        Ok(selection)
    }
}

impl FromStr for Selection {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{sheet}!")?;
        }
        write!(
            f,
            "{}{}:{}{}",
            column_name(self.first_col),
            self.first_row + 1,
            column_name(self.last_col),
            self.last_row + 1
        )
    }
}

/// Parse one A1 cell reference into zero-based `(row, col)`.
fn parse_cell(cell: &str) -> Option<(u32, u32)> {
    let cell = cell.trim().replace('$', "");
    let split = cell.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let col = letters.chars().try_fold(0u32, |acc, c| {
        let digit = u32::from(c.to_ascii_uppercase()) - u32::from('A') + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })?;
    let row: u32 = digits.parse().ok()?;

    if row == 0 || row > MAX_ROWS || col > MAX_COLS {
        return None;
    }
    Some((row - 1, col - 1))
}

/// Column letters for a zero-based index.
fn column_name(col: u32) -> String {
    let mut n = col + 1;
    let mut name = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    name.iter().rev().collect()
}

/// How converted values are written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Replace the selected cells.
    #[default]
    Overwrite,
}

/// Capability interface of a spreadsheet host.
pub trait SpreadsheetBinding {
    /// Establish the connection. Returns `false` when the host is unreachable.
    fn connect(&mut self) -> bool;

    fn is_connected(&self) -> bool;

    /// Read the selected cells as a grid of `rows() x cols()` values.
    fn read_values(&self, selection: &Selection) -> BindingResult<ValueGrid>;

    /// Write `values` starting at the selection's top-left cell.
    fn write_values(
        &mut self,
        selection: &Selection,
        values: &[Vec<CellValue>],
        mode: WriteMode,
    ) -> BindingResult<()>;

    /// Names of the open workbooks.
    fn list_open_workbooks(&self) -> Vec<String>;

    /// Open a workbook and make it active. Returns its name.
    fn open_workbook(&mut self, path: &Path) -> BindingResult<String>;

    fn set_active_workbook(&mut self, name: &str) -> BindingResult<()>;

    /// The range the user has chosen, if any.
    fn select_range(&self) -> Option<Selection>;
}

/// A worksheet holding sparse cell values and formulas.
///
/// A formula is kept alongside its cell's last computed value and is
/// dropped once that value is replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    name: String,
    cells: BTreeMap<(u32, u32), CellValue>,
    formulas: BTreeMap<(u32, u32), String>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
            formulas: BTreeMap::new(),
        }
    }

    /// Build a sheet whose top-left cell is `A1`.
    pub fn from_grid(name: impl Into<String>, grid: ValueGrid) -> Self {
        let mut sheet = Self::new(name);
        for (row, values) in grid.into_iter().enumerate() {
            for (col, value) in values.into_iter().enumerate() {
                sheet.set(row as u32, col as u32, value);
            }
        }
        sheet
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, row: u32, col: u32) -> CellValue {
        self.cells
            .get(&(row, col))
            .cloned()
            .unwrap_or(CellValue::Empty)
    }

    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if self.get(row, col) == value {
            return;
        }
        self.formulas.remove(&(row, col));
        if value == CellValue::Empty {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), value);
        }
    }

    /// Formula text of a cell, without the leading `=`.
    pub fn formula(&self, row: u32, col: u32) -> Option<&str> {
        self.formulas.get(&(row, col)).map(String::as_str)
    }

    /// Attach a formula to a cell, keeping its current value as the result.
    pub fn set_formula(&mut self, row: u32, col: u32, formula: impl Into<String>) {
        let formula = formula.into();
        let formula = formula.strip_prefix('=').unwrap_or(&formula).to_string();
        self.formulas.insert((row, col), formula);
    }

    fn read(&self, selection: &Selection) -> ValueGrid {
        (selection.first_row..=selection.last_row)
            .map(|row| {
                (selection.first_col..=selection.last_col)
                    .map(|col| self.get(row, col))
                    .collect()
            })
            .collect()
    }

    fn write(&mut self, selection: &Selection, values: &[Vec<CellValue>]) {
        for (r, row) in values.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                self.set(
                    selection.first_row + r as u32,
                    selection.first_col + c as u32,
                    value.clone(),
                );
            }
        }
    }
}

/// An open workbook.
#[derive(Debug, Clone)]
struct Book {
    name: String,
    path: Option<PathBuf>,
    sheets: Vec<Sheet>,
}

impl Book {
    fn sheet(&self, name: Option<&str>) -> BindingResult<&Sheet> {
        let sheet = match name {
            Some(name) => self.sheets.iter().find(|s| s.name == name),
            None => self.sheets.first(),
        };
        sheet.ok_or_else(|| BindingError::UnknownSheet(name.unwrap_or_default().to_string()))
    }

    fn sheet_mut(&mut self, name: Option<&str>) -> BindingResult<&mut Sheet> {
        let sheet = match name {
            Some(name) => self.sheets.iter_mut().find(|s| s.name == name),
            None => self.sheets.first_mut(),
        };
        sheet.ok_or_else(|| BindingError::UnknownSheet(name.unwrap_or_default().to_string()))
    }
}

/// Open workbooks, the active one and the current selection.
#[derive(Debug, Default)]
struct OpenBooks {
    books: Vec<Book>,
    active: Option<usize>,
    selection: Option<Selection>,
}

impl OpenBooks {
    fn names(&self) -> Vec<String> {
        self.books.iter().map(|b| b.name.clone()).collect()
    }

    /// Add or replace a book by name and make it active.
    fn insert(&mut self, book: Book) -> String {
        let name = book.name.clone();
        let index = match self.books.iter().position(|b| b.name == name) {
            Some(index) => {
                self.books[index] = book;
                index
            }
            None => {
                self.books.push(book);
                self.books.len() - 1
            }
        };
        self.active = Some(index);
        name
    }

    fn activate(&mut self, name: &str) -> BindingResult<()> {
        let index = self
            .books
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| BindingError::UnknownWorkbook(name.to_string()))?;
        self.active = Some(index);
        Ok(())
    }

    fn active(&self) -> BindingResult<&Book> {
        self.active
            .and_then(|i| self.books.get(i))
            .ok_or(BindingError::NoActiveWorkbook)
    }

    fn active_mut(&mut self) -> BindingResult<&mut Book> {
        self.active
            .and_then(|i| self.books.get_mut(i))
            .ok_or(BindingError::NoActiveWorkbook)
    }

    fn read(&self, selection: &Selection) -> BindingResult<ValueGrid> {
        let sheet = self.active()?.sheet(selection.sheet.as_deref())?;
        Ok(sheet.read(selection))
    }

    fn write(&mut self, selection: &Selection, values: &[Vec<CellValue>]) -> BindingResult<()> {
        let sheet = self.active_mut()?.sheet_mut(selection.sheet.as_deref())?;
        sheet.write(selection, values);
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// In-memory workbook host for tests.
#[derive(Debug)]
pub struct InMemoryWorkbook {
    books: OpenBooks,
    reachable: bool,
    connected: bool,
    writes: usize,
}

impl Default for InMemoryWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        Self {
            books: OpenBooks::default(),
            reachable: true,
            connected: false,
            writes: 0,
        }
    }

    /// A host that refuses every connection attempt.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    /// Add a workbook and make it active.
    pub fn with_workbook(mut self, name: impl Into<String>, sheets: Vec<Sheet>) -> Self {
        self.books.insert(Book {
            name: name.into(),
            path: None,
            sheets,
        });
        self
    }

    /// Set the user's selection.
    pub fn select(&mut self, selection: Selection) {
        self.books.selection = Some(selection);
    }

    /// Look up a sheet of an open workbook.
    pub fn sheet(&self, workbook: &str, sheet: &str) -> Option<&Sheet> {
        self.books
            .books
            .iter()
            .find(|b| b.name == workbook)?
            .sheets
            .iter()
            .find(|s| s.name == sheet)
    }

    /// Number of `write_values` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl SpreadsheetBinding for InMemoryWorkbook {
    fn connect(&mut self) -> bool {
        self.connected = self.reachable;
        self.connected
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_values(&self, selection: &Selection) -> BindingResult<ValueGrid> {
        self.books.read(selection)
    }

    fn write_values(
        &mut self,
        selection: &Selection,
        values: &[Vec<CellValue>],
        _mode: WriteMode,
    ) -> BindingResult<()> {
        self.books.write(selection, values)?;
        self.writes += 1;
        Ok(())
    }

    fn list_open_workbooks(&self) -> Vec<String> {
        self.books.names()
    }

    fn open_workbook(&mut self, path: &Path) -> BindingResult<String> {
        Ok(self.books.insert(Book {
            name: file_name(path),
            path: Some(path.to_path_buf()),
            sheets: vec![Sheet::new("Sheet1")],
        }))
    }

    fn set_active_workbook(&mut self, name: &str) -> BindingResult<()> {
        self.books.activate(name)
    }

    fn select_range(&self) -> Option<Selection> {
        self.books.selection.clone()
    }
}

/// Workbook host backed by `.xlsx` files on disk.
///
/// Writes are saved to the active workbook's file immediately. Values,
/// formulas and date cells survive a save. Other formatting is not preserved.
#[derive(Debug, Default)]
pub struct XlsxWorkbook {
    books: OpenBooks,
    connected: bool,
}

impl XlsxWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the user's selection.
    pub fn select(&mut self, selection: Selection) {
        self.books.selection = Some(selection);
    }
}

impl SpreadsheetBinding for XlsxWorkbook {
    /// Connected while the active workbook's file is present.
    fn connect(&mut self) -> bool {
        self.connected = self
            .books
            .active()
            .ok()
            .and_then(|b| b.path.as_deref())
            .is_some_and(Path::exists);
        self.connected
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_values(&self, selection: &Selection) -> BindingResult<ValueGrid> {
        self.books.read(selection)
    }

    fn write_values(
        &mut self,
        selection: &Selection,
        values: &[Vec<CellValue>],
        _mode: WriteMode,
    ) -> BindingResult<()> {
        self.books.write(selection, values)?;
        let book = self.books.active()?;
        if let Some(path) = &book.path {
            save_xlsx(path, &book.sheets)?;
            info!(workbook = %book.name, range = %selection, "Workbook saved");
        }
        Ok(())
    }

    fn list_open_workbooks(&self) -> Vec<String> {
        self.books.names()
    }

    fn open_workbook(&mut self, path: &Path) -> BindingResult<String> {
        let sheets = read_xlsx(path)?;
        debug!(path = %path.display(), sheets = sheets.len(), "Workbook loaded");
        Ok(self.books.insert(Book {
            name: file_name(path),
            path: Some(path.to_path_buf()),
            sheets,
        }))
    }

    fn set_active_workbook(&mut self, name: &str) -> BindingResult<()> {
        self.books.activate(name)?;
        self.connected = false;
        Ok(())
    }

    fn select_range(&self) -> Option<Selection> {
        self.books.selection.clone()
    }
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::DateTime(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        other => CellValue::Text(other.to_string()),
    }
}

/// Load every worksheet of an `.xlsx` file.
pub fn read_xlsx(path: &Path) -> BindingResult<Vec<Sheet>> {
    let read_error = |reason: String| BindingError::Read {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|e: calamine::XlsxError| read_error(e.to_string()))?;
    let sheet_names = workbook.sheet_names().to_vec();

    let mut sheets = Vec::with_capacity(sheet_names.len());
    for name in sheet_names {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| read_error(e.to_string()))?;
        let (row0, col0) = range.start().unwrap_or((0, 0));

        let mut sheet = Sheet::new(name.clone());
        for (r, row) in range.rows().enumerate() {
            for (c, data) in row.iter().enumerate() {
                sheet.set(row0 + r as u32, col0 + c as u32, cell_from_data(data));
            }
        }

        let formulas = workbook
            .worksheet_formula(&name)
            .map_err(|e| read_error(e.to_string()))?;
        let (row0, col0) = formulas.start().unwrap_or((0, 0));
        for (r, c, formula) in formulas.used_cells() {
            if !formula.is_empty() {
                sheet.set_formula(row0 + r as u32, col0 + c as u32, formula.as_str());
            }
        }
        sheets.push(sheet);
    }
    Ok(sheets)
}

/// Save worksheets to an `.xlsx` file, replacing it.
pub fn save_xlsx(path: &Path, sheets: &[Sheet]) -> BindingResult<()> {
    let save_error = |reason: String| BindingError::Save {
        path: path.to_path_buf(),
        reason,
    };

    let date_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&sheet.name)
            .map_err(|e| save_error(e.to_string()))?;

        for (&(row, col), value) in &sheet.cells {
            if sheet.formulas.contains_key(&(row, col)) {
                continue;
            }
            let col = u16::try_from(col)
                .map_err(|_| save_error(format!("column {col} out of range")))?;
            let written = match value {
                CellValue::Empty => continue,
                CellValue::Number(n) => worksheet.write_number(row, col, *n),
                CellValue::Text(s) => worksheet.write_string(row, col, s.as_str()),
                CellValue::Bool(b) => worksheet.write_boolean(row, col, *b),
                CellValue::DateTime(serial) => {
                    worksheet.write_number_with_format(row, col, *serial, &date_format)
                }
            };
            written.map_err(|e| save_error(e.to_string()))?;
        }

        for (&(row, col), text) in &sheet.formulas {
            let result = match sheet.get(row, col) {
                CellValue::Empty => String::new(),
                CellValue::Number(n) | CellValue::DateTime(n) => n.to_string(),
                CellValue::Text(s) => s,
                CellValue::Bool(b) => b.to_string().to_uppercase(),
            };
            let col = u16::try_from(col)
                .map_err(|_| save_error(format!("column {col} out of range")))?;
            worksheet
                .write_formula(row, col, Formula::new(format!("={text}")).set_result(result))
                .map_err(|e| save_error(e.to_string()))?;
        }
    }

    workbook.save(path).map_err(|e| save_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn grid() -> ValueGrid {
        vec![
            vec![CellValue::from("Item"), CellValue::from("Price")],
            vec![CellValue::from("Widget"), CellValue::Number(100.0)],
            vec![CellValue::from("Gadget"), CellValue::Number(250.5)],
        ]
    }

    #[test]
    fn test_parse_selection() {
        let selection = Selection::parse("B2:C10").unwrap();
        assert_eq!(selection, Selection::new(1, 1, 9, 2));
        assert_eq!(selection.rows(), 9);
        assert_eq!(selection.cols(), 2);

        let selection: Selection = "Prices!$AA$3".parse().unwrap();
        assert_eq!(selection.sheet.as_deref(), Some("Prices"));
        assert_eq!((selection.first_row, selection.first_col), (2, 26));
        assert_eq!(selection.rows(), 1);

        let reversed = Selection::parse("C3:A1").unwrap();
        assert_eq!(reversed, Selection::new(0, 0, 2, 2));
    }

    #[test]
    fn test_parse_invalid_selection() {
        for input in ["", "A0", "1A", "A1:", "!A1", "A1:B", "XFE1"] {
            assert!(
                matches!(Selection::parse(input), Err(BindingError::InvalidRange(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_selection_display() {
        assert_eq!(Selection::new(0, 0, 9, 27).to_string(), "A1:AB10");
        assert_eq!(
            Selection::new(1, 1, 1, 1).on_sheet("Data").to_string(),
            "Data!B2:B2"
        );
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn test_in_memory_read_write() {
        let mut workbook =
            InMemoryWorkbook::new().with_workbook("Book1", vec![Sheet::from_grid("Sheet1", grid())]);
        assert!(workbook.connect());

        let selection = Selection::parse("B2:B4").unwrap();
        let values = workbook.read_values(&selection).unwrap();
        assert_eq!(
            values,
            vec![
                vec![CellValue::Number(100.0)],
                vec![CellValue::Number(250.5)],
                vec![CellValue::Empty],
            ]
        );

        workbook
            .write_values(
                &selection,
                &[vec![CellValue::Number(90.0)]],
                WriteMode::Overwrite,
            )
            .unwrap();
        let sheet = workbook.sheet("Book1", "Sheet1").unwrap();
        assert_eq!(sheet.get(1, 1), CellValue::Number(90.0));
        assert_eq!(sheet.get(2, 1), CellValue::Number(250.5));
        assert_eq!(workbook.write_count(), 1);
    }

    #[test]
    fn test_workbook_management() {
        let mut workbook = InMemoryWorkbook::new()
            .with_workbook("Book1", vec![Sheet::from_grid("Sheet1", grid())])
            .with_workbook("Book2", vec![Sheet::new("Sheet1")]);
        assert_eq!(workbook.list_open_workbooks(), vec!["Book1", "Book2"]);

        let cell = Selection::parse("A1").unwrap();
        assert_eq!(workbook.read_values(&cell).unwrap(), vec![vec![CellValue::Empty]]);

        workbook.set_active_workbook("Book1").unwrap();
        assert_eq!(
            workbook.read_values(&cell).unwrap(),
            vec![vec![CellValue::from("Item")]]
        );

        assert!(matches!(
            workbook.set_active_workbook("Missing"),
            Err(BindingError::UnknownWorkbook(_))
        ));
        assert!(matches!(
            workbook.read_values(&cell.clone().on_sheet("Nope")),
            Err(BindingError::UnknownSheet(_))
        ));

        let name = workbook.open_workbook(Path::new("/data/report.xlsx")).unwrap();
        assert_eq!(name, "report.xlsx");
        assert_eq!(workbook.list_open_workbooks().len(), 3);
    }

    #[test]
    fn test_unreachable_host() {
        let mut workbook = InMemoryWorkbook::unreachable();
        assert!(!workbook.connect());
        assert!(!workbook.is_connected());
        assert!(matches!(
            workbook.read_values(&Selection::new(0, 0, 0, 0)),
            Err(BindingError::NoActiveWorkbook)
        ));
    }

    #[test]
    fn test_xlsx_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prices.xlsx");
        save_xlsx(
            &path,
            &[
                Sheet::from_grid("Prices", grid()),
                Sheet::from_grid("Flags", vec![vec![CellValue::Bool(true)]]),
            ],
        )
        .unwrap();

        let mut workbook = XlsxWorkbook::new();
        assert!(!workbook.connect());
        let name = workbook.open_workbook(&path).unwrap();
        assert_eq!(name, "prices.xlsx");
        assert!(workbook.connect());

        let selection = Selection::parse("Prices!A2:B3").unwrap();
        assert_eq!(workbook.read_values(&selection).unwrap(), grid()[1..].to_vec());

        let converted = vec![
            vec![CellValue::from("Widget"), CellValue::Number(90.0)],
            vec![CellValue::from("Gadget"), CellValue::Number(225.45)],
        ];
        workbook
            .write_values(&selection, &converted, WriteMode::Overwrite)
            .unwrap();

        let sheets = read_xlsx(&path).unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].name(), "Prices");
        assert_eq!(sheets[0].get(0, 1), CellValue::from("Price"));
        assert_eq!(sheets[0].get(2, 1), CellValue::Number(225.45));
        assert_eq!(sheets[1].get(0, 0), CellValue::Bool(true));
    }

    #[test]
    fn test_formula_kept_until_value_changes() {
        let mut sheet = Sheet::new("S");
        sheet.set(0, 0, CellValue::Number(4.0));
        sheet.set_formula(0, 0, "=B1*2");
        assert_eq!(sheet.formula(0, 0), Some("B1*2"));

        sheet.set(0, 0, CellValue::Number(4.0));
        assert_eq!(sheet.formula(0, 0), Some("B1*2"));

        sheet.set(0, 0, CellValue::Number(3.6));
        assert_eq!(sheet.formula(0, 0), None);
        assert_eq!(sheet.get(0, 0), CellValue::Number(3.6));
    }

    #[test]
    fn test_xlsx_write_keeps_formulas_and_dates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.xlsx");
        let mut sheet = Sheet::from_grid(
            "S",
            vec![vec![CellValue::Number(100.0), CellValue::DateTime(45292.5)]],
        );
        sheet.set(5, 5, CellValue::Number(2.0));
        sheet.set(6, 5, CellValue::Number(4.0));
        sheet.set_formula(6, 5, "F6*2");
        save_xlsx(&path, &[sheet]).unwrap();

        let mut workbook = XlsxWorkbook::new();
        workbook.open_workbook(&path).unwrap();
        let selection = Selection::parse("S!A1:B1").unwrap();
        assert_eq!(
            workbook.read_values(&selection).unwrap(),
            vec![vec![CellValue::Number(100.0), CellValue::DateTime(45292.5)]]
        );
        workbook
            .write_values(
                &selection,
                &[vec![CellValue::Number(90.0), CellValue::DateTime(45292.5)]],
                WriteMode::Overwrite,
            )
            .unwrap();

        let mut saved: Xlsx<_> = open_workbook(&path).unwrap();
        let formulas = saved.worksheet_formula("S").unwrap();
        let found: Vec<_> = formulas
            .used_cells()
            .filter(|(_, _, f)| !f.is_empty())
            .map(|(_, _, f)| f.trim_start_matches('=').to_string())
            .collect();
        assert_eq!(found, vec!["F6*2".to_string()]);

        let sheets = read_xlsx(&path).unwrap();
        assert_eq!(sheets[0].get(0, 0), CellValue::Number(90.0));
        assert_eq!(sheets[0].get(0, 1), CellValue::DateTime(45292.5));
        assert_eq!(sheets[0].get(6, 5), CellValue::Number(4.0));
    }

    #[test]
    fn test_read_missing_file() {
        let mut workbook = XlsxWorkbook::new();
        let err = workbook
            .open_workbook(Path::new("/nonexistent/book.xlsx"))
            .unwrap_err();
        assert!(matches!(err, BindingError::Read { .. }));
    }
}
