//! # biffbook-formula
//!
//! Formula model for biffbook.
//!
//! This crate provides:
//! - The postfix token model BIFF8 stores formulas in
//! - Formula parsing (text → tokens) and rendering (tokens → text)
//! - Rebasing formulas between cells, as shared formulas need
//! - Formula adjustment when rows, columns or sheets move
//! - The defined-name and external-link table
//! - The built-in function table
//!
//! ## Example
//!
//! ```rust
//! use biffbook_core::CellAddress;
//! use biffbook_formula::{parse_formula, render_formula, SheetList};
//!
//! let ctx = SheetList::new(["Sheet1"]);
//! let expr = parse_formula("=A2*2", &ctx, 0).unwrap();
//! let moved = expr.rebase(CellAddress::new(1, 1), CellAddress::new(11, 1));
//! assert_eq!(render_formula(&moved, &ctx, 0).unwrap(), "A12*2");
//! ```

pub mod context;
pub mod error;
pub mod functions;
pub mod links;
pub mod names;
pub mod parser;
pub mod rebase;
pub mod reference_table;
pub mod render;
pub mod shift;
pub mod token;

pub use context::{SheetList, WorkbookContext};
pub use error::{FormulaError, FormulaResult};
pub use functions::FunctionSpec;
pub use links::{ExternalLink, ExternalName, LinkId};
pub use names::{validate_name, BuiltinName, DefinedName, NameId, NameScope, NO_SHEET};
pub use parser::{parse_formula, parse_formula_as, FormulaType};
pub use rebase::rebase;
pub use reference_table::{NameResolution, ReferenceTable};
pub use render::{quote_sheet_name, render_formula};
pub use shift::{Axis, FormulaShifter};
pub use token::{
    AreaRef, ArrayConstant, ArrayValue, BinaryOperator, BookRef, FunctionCall, OperandClass,
    SheetSpan, Token, TokenExpr, UnaryOperator,
};
