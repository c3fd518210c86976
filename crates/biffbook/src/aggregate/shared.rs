//! Shared formula groups

use biffbook_core::{CellAddress, CellRange};
use biffbook_formula::TokenExpr;

/// One formula stored once for a rectangle of cells
///
/// The tokens are those of the anchor (top-left) cell. Every member sees
/// them rebased from the anchor to its own position.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedFormulaGroup {
    range: CellRange,
    formula: TokenExpr,
}

impl SharedFormulaGroup {
    pub fn new(range: CellRange, formula: TokenExpr) -> Self {
        Self { range, formula }
    }

    pub fn range(&self) -> CellRange {
        self.range
    }

    pub fn anchor(&self) -> CellAddress {
        self.range.start.relative()
    }

    /// Tokens as stored, seen from the anchor
    pub fn formula(&self) -> &TokenExpr {
        &self.formula
    }

    /// Tokens seen from `cell`
    pub fn formula_at(&self, cell: CellAddress) -> TokenExpr {
        self.formula.rebase(self.anchor(), cell)
    }

    pub(crate) fn set_formula(&mut self, formula: TokenExpr) {
        self.formula = formula;
    }

    pub(crate) fn formula_mut(&mut self) -> &mut TokenExpr {
        &mut self.formula
    }

    pub(crate) fn set_range(&mut self, range: CellRange) {
        self.range = range;
    }
}
