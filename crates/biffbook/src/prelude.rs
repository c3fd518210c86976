//! Prelude module - common imports for biffbook users
//!
//! ```rust
//! use biffbook::prelude::*;
//! ```

pub use crate::{
    // Cell types
    Cell,
    CellAddress,
    CellContent,
    CellError,
    CellRange,
    CellValue,

    // Error types
    Error,
    // Formula groups
    GroupRef,
    LocatedOperand,
    // Names
    NameId,
    NameScope,

    ReadOptions,
    Result,

    SheetKind,
    SheetVisibility,
    // Main types
    Workbook,
    WorkbookSettings,
    Worksheet,
    WriteOptions,
};
