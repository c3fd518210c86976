//! Cell content
//!
//! A cell is a style index plus its content. Formula cells either own their
//! tokens or point at the anchor of the shared or array group they belong
//! to; the group's tokens live with the group, never in the member.

use biffbook_core::{CellAddress, CellError, CellValue, SharedString};
use biffbook_formula::TokenExpr;
use biffbook_xls::biff::defaults::DEFAULT_CELL_XF;

/// Where a formula cell's tokens come from
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaBody {
    /// Tokens stored in the cell itself
    Own(TokenExpr),
    /// Member of the shared formula anchored at `anchor`
    Shared { anchor: CellAddress },
    /// Member of the array formula anchored at `anchor`
    Array { anchor: CellAddress },
}

impl FormulaBody {
    /// Anchor of the group the cell belongs to, if any
    pub fn anchor(&self) -> Option<CellAddress> {
        match self {
            FormulaBody::Own(_) => None,
            FormulaBody::Shared { anchor } | FormulaBody::Array { anchor } => Some(*anchor),
        }
    }
}

/// A formula cell: its tokens (or group), last calculated value and the
/// FORMULA record option flags
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaCell {
    pub body: FormulaBody,
    /// Result of the last calculation; `Empty` when never calculated
    pub cached: CellValue,
    /// FORMULA grbit bits other than the shared-formula flag
    pub flags: u16,
}

impl FormulaCell {
    pub fn new(body: FormulaBody) -> Self {
        Self {
            body,
            cached: CellValue::Empty,
            flags: 0,
        }
    }

    pub fn own(tokens: TokenExpr) -> Self {
        Self::new(FormulaBody::Own(tokens))
    }
}

/// What a cell holds
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    /// Formatting only
    Blank,
    Number(f64),
    Text(SharedString),
    Boolean(bool),
    Error(CellError),
    Formula(FormulaCell),
}

impl CellContent {
    /// Content for a plain value
    pub fn from_value(value: CellValue) -> Self {
        match value {
            CellValue::Empty => CellContent::Blank,
            CellValue::Number(n) => CellContent::Number(n),
            CellValue::String(s) => CellContent::Text(s),
            CellValue::Boolean(b) => CellContent::Boolean(b),
            CellValue::Error(e) => CellContent::Error(e),
        }
    }
}

/// Complete data for a single cell
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// XF index into the workbook's style records
    pub style: u16,
    pub content: CellContent,
}

impl Cell {
    /// Create a cell with the default cell format
    pub fn new(content: CellContent) -> Self {
        Self {
            style: DEFAULT_CELL_XF,
            content,
        }
    }

    pub fn with_style(content: CellContent, style: u16) -> Self {
        Self { style, content }
    }

    pub fn blank() -> Self {
        Self::new(CellContent::Blank)
    }

    /// The cell's value; formula cells report their cached result
    pub fn value(&self) -> CellValue {
        match &self.content {
            CellContent::Blank => CellValue::Empty,
            CellContent::Number(n) => CellValue::Number(*n),
            CellContent::Text(s) => CellValue::String(s.clone()),
            CellContent::Boolean(b) => CellValue::Boolean(*b),
            CellContent::Error(e) => CellValue::Error(*e),
            CellContent::Formula(f) => f.cached.clone(),
        }
    }

    pub fn formula(&self) -> Option<&FormulaCell> {
        match &self.content {
            CellContent::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub fn formula_mut(&mut self) -> Option<&mut FormulaCell> {
        match &mut self.content {
            CellContent::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self.content, CellContent::Formula(_))
    }

    /// Anchor of the shared or array group this cell is a member of
    pub fn group_anchor(&self) -> Option<CellAddress> {
        self.formula().and_then(|f| f.body.anchor())
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biffbook_formula::Token;

    #[test]
    fn test_formula_cell_reports_cached_value() {
        let mut formula = FormulaCell::own(TokenExpr::new(vec![Token::Integer(2)]));
        formula.cached = CellValue::Number(2.0);
        let cell = Cell::new(CellContent::Formula(formula));
        assert!(cell.is_formula());
        assert_eq!(cell.value(), CellValue::Number(2.0));
        assert_eq!(cell.group_anchor(), None);
    }

    #[test]
    fn test_member_knows_its_anchor() {
        let anchor = CellAddress::new(1, 1);
        let cell = Cell::new(CellContent::Formula(FormulaCell::new(FormulaBody::Shared { anchor })));
        assert_eq!(cell.group_anchor(), Some(anchor));
        assert_eq!(cell.style, DEFAULT_CELL_XF);
    }
}
