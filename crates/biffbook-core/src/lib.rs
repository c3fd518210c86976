//! # biffbook-core
//!
//! Core data structures shared by the biffbook crates.
//!
//! This crate provides the fundamental types used throughout biffbook:
//! - [`CellAddress`] and [`CellRange`] - Cell addressing with per-axis absolute flags
//! - [`CellValue`] - Plain cell values and cached formula results
//! - [`CellError`] - Spreadsheet error values with their BIFF8 codes
//!
//! All limits are the BIFF8 ones: 65,536 rows and 256 columns per sheet.
//!
//! ## Example
//!
//! ```rust
//! use biffbook_core::{CellAddress, CellRange};
//!
//! let addr = CellAddress::parse("$B2").unwrap();
//! assert_eq!((addr.row, addr.col), (1, 1));
//! assert!(addr.col_absolute && !addr.row_absolute);
//!
//! let range = CellRange::parse("B2:C3").unwrap();
//! assert_eq!(range.cell_count(), 4);
//! ```

pub mod cell;
pub mod error;

pub use cell::{offset_col, offset_row, CellAddress, CellError, CellRange, CellValue, SharedString};
pub use error::{Error, Result};

/// Maximum number of rows in a BIFF8 worksheet
pub const MAX_ROWS: u32 = 65_536;

/// Maximum number of columns in a BIFF8 worksheet
pub const MAX_COLS: u16 = 256;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;
