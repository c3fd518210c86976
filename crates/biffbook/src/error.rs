//! Error types for biffbook

use biffbook_core::{CellAddress, CellRange};
use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by workbook operations
///
/// Conflicts are reported before anything is changed, so a failed call
/// leaves the workbook as it was.
#[derive(Debug, Error)]
pub enum Error {
    /// Addressing or sheet-list error
    #[error(transparent)]
    Core(#[from] biffbook_core::Error),

    /// Formula parse, render or name-table error
    #[error(transparent)]
    Formula(#[from] biffbook_formula::FormulaError),

    /// Reading or writing the BIFF8 stream failed
    #[error(transparent)]
    Xls(#[from] biffbook_xls::XlsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A new shared or array formula would overlap an existing group
    #[error("Range {range} overlaps the formula group at {existing}")]
    Overlap { range: CellRange, existing: CellRange },

    /// Part of an array formula was edited on its own
    #[error("Cell {cell} is part of the array formula at {range}")]
    ArrayFormulaConflict { cell: CellAddress, range: CellRange },

    /// A row or column shift would cut through a formula group
    #[error("Shift would split the formula group at {range}")]
    GroupSplit { range: CellRange },

    /// A formula still uses a name that was never defined. `sheet` is
    /// [`NO_SHEET`](biffbook_formula::NO_SHEET) inside a workbook name.
    #[error("Name '{name}' is not defined")]
    UnresolvedName { name: String, sheet: usize },

    /// The cell holds no formula
    #[error("Cell {0} does not contain a formula")]
    NotAFormula(CellAddress),

    /// The sheet is a chart, macro or module sheet kept as raw records
    #[error("Sheet {0} is not a worksheet")]
    NotAWorksheet(usize),

    /// File extension other than .xls
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}
