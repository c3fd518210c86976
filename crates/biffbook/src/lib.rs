//! # biffbook
//!
//! Formula storage for BIFF8 (.xls) workbooks: token expressions, shared
//! and array formula groups, defined names and external-workbook links,
//! kept consistent while sheets, rows and columns move, and written back
//! to a file Excel accepts.
//!
//! ## Features
//!
//! - Read and write `.xls` workbooks (BIFF8 inside an OLE2 container)
//! - Parse formulas from text and render them back
//! - Shared and array formulas with Excel's edit rules
//! - Workbook- and sheet-scoped names, including forward references
//! - External workbook links that can be retargeted
//! - Row, column and sheet moves that keep every reference pointing at
//!   the same cells
//!
//! ## Example
//!
//! ```rust
//! use biffbook::prelude::*;
//! use std::io::Cursor;
//!
//! let mut workbook = Workbook::new();
//! let data = workbook.add_sheet("Data").unwrap();
//! workbook.sheet_mut(data).unwrap().set_cell_value("B2", 21.0).unwrap();
//!
//! workbook.set_cell_formula(0, "A1", "Data!B2*2").unwrap();
//! workbook.create_shared_formula(0, "B1:B10", "A1+1").unwrap();
//! assert_eq!(workbook.cell_formula(0, "B5").unwrap().as_deref(), Some("A5+1"));
//!
//! let bytes = workbook.to_bytes().unwrap();
//! let back = Workbook::read(Cursor::new(bytes), &ReadOptions::default()).unwrap();
//! assert_eq!(back.cell_formula(0, "A1").unwrap().as_deref(), Some("Data!B2*2"));
//! ```

mod aggregate;
mod cell;
mod error;
mod io;
mod row;
mod settings;
mod workbook;
mod worksheet;

pub mod prelude;

pub use aggregate::{ArrayFormulaGroup, FormulaGroups, GroupRef, SharedFormulaGroup};
pub use cell::{Cell, CellContent, FormulaBody, FormulaCell};
pub use error::{Error, Result};
pub use row::Row;
pub use settings::{ReadOptions, WorkbookSettings, WriteOptions};
pub use workbook::{LocatedOperand, Workbook};
pub use worksheet::{SheetKind, SheetVisibility, Worksheet};

// Re-export core types
pub use biffbook_core::{
    CellAddress, CellError, CellRange, CellValue, SharedString, MAX_COLS, MAX_ROWS,
    MAX_SHEET_NAME_LEN,
};

// Re-export formula types
pub use biffbook_formula::{
    parse_formula, parse_formula_as, render_formula, DefinedName, ExternalLink, ExternalName,
    FormulaError, FormulaType, LinkId, NameId, NameScope, Token, TokenExpr, NO_SHEET,
};

// Re-export I/O types
pub use biffbook_xls::XlsError;
