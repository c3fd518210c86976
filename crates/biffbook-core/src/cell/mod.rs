//! Cell-related types and utilities
//!
//! This module contains:
//! - [`CellAddress`] - A cell's location (e.g., "A1") with absolute flags
//! - [`CellRange`] - A rectangular range of cells (e.g., "A1:B10")
//! - [`CellValue`] - A plain value or cached formula result
//! - [`offset_row`] / [`offset_col`] - Bounds-checked coordinate arithmetic

mod address;
mod value;

pub use address::{offset_col, offset_row, CellAddress, CellRange, CellRangeIterator};
pub use value::{CellError, CellValue, SharedString};
