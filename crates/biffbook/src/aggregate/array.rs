//! Array formula groups

use biffbook_core::{CellAddress, CellRange};
use biffbook_formula::TokenExpr;

/// One formula evaluated once over a rectangle of cells
///
/// Unlike a shared formula the tokens are not rebased: every cell of the
/// rectangle shows the same formula.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayFormulaGroup {
    range: CellRange,
    formula: TokenExpr,
}

impl ArrayFormulaGroup {
    pub fn new(range: CellRange, formula: TokenExpr) -> Self {
        Self { range, formula }
    }

    pub fn range(&self) -> CellRange {
        self.range
    }

    pub fn anchor(&self) -> CellAddress {
        self.range.start.relative()
    }

    pub fn formula(&self) -> &TokenExpr {
        &self.formula
    }

    pub(crate) fn formula_mut(&mut self) -> &mut TokenExpr {
        &mut self.formula
    }

    pub(crate) fn set_range(&mut self, range: CellRange) {
        self.range = range;
    }
}
