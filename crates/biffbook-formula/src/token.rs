//! Postfix token model
//!
//! A formula is stored the way BIFF8 stores it: a sequence of tokens in
//! reverse Polish order. Operands push one value, operators and function
//! calls pop their arguments and push the result. Unlike the on-disk form,
//! every reference here holds absolute sheet coordinates plus a
//! relative/absolute flag per axis; shared formulas are expanded by
//! [`TokenExpr::rebase`](crate::rebase).

use biffbook_core::{CellAddress, CellError, CellRange};

use crate::error::{FormulaError, FormulaResult};
use crate::functions;
use crate::links::LinkId;
use crate::names::NameId;

/// Operand class of a reference-like token.
///
/// BIFF8 encodes it in the token id; it tells a consumer whether the operand
/// is wanted as a reference, a single value or an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandClass {
    Reference,
    Value,
    Array,
}

/// The workbook a 3-D reference points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookRef {
    /// The workbook holding the formula
    Local,
    /// A workbook reached through an external link
    External(LinkId),
}

/// Range of sheets covered by a 3-D reference (inclusive)
///
/// For [`BookRef::Local`] the indices are positions in the workbook's sheet
/// list; for an external book they index the link's sheet names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetSpan {
    pub book: BookRef,
    pub first: u16,
    pub last: u16,
}

impl SheetSpan {
    /// A span covering one sheet of this workbook
    pub fn local(sheet: u16) -> Self {
        Self {
            book: BookRef::Local,
            first: sheet,
            last: sheet,
        }
    }

    /// A span covering one sheet of an external workbook
    pub fn external(link: LinkId, sheet: u16) -> Self {
        Self {
            book: BookRef::External(link),
            first: sheet,
            last: sheet,
        }
    }

    /// Whether this span is exactly the given sheet of this workbook
    pub fn is_local_sheet(&self, sheet: usize) -> bool {
        self.book == BookRef::Local && self.first as usize == sheet && self.last as usize == sheet
    }
}

/// A rectangular area as written in the formula.
///
/// The corners keep their own absolute flags; they are not normalised so
/// that `$A1:A$2` renders back the way it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaRef {
    pub first: CellAddress,
    pub last: CellAddress,
}

impl AreaRef {
    pub fn new(first: CellAddress, last: CellAddress) -> Self {
        Self { first, last }
    }

    /// The covered cells as a normalised range
    pub fn range(&self) -> CellRange {
        CellRange::new(self.first, self.last)
    }
}

/// Prefix and postfix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// +x
    Plus,
    /// -x
    Minus,
    /// x%
    Percent,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Concat,
    LessThan,
    LessEqual,
    Equal,
    GreaterEqual,
    GreaterThan,
    NotEqual,
    /// Reference intersection (space)
    Intersect,
    /// Reference union (comma inside parentheses)
    Union,
    /// Range operator (colon between non-trivial operands)
    Range,
}

impl BinaryOperator {
    /// Formula text of the operator
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Power => "^",
            BinaryOperator::Concat => "&",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Equal => "=",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::Intersect => " ",
            BinaryOperator::Union => ",",
            BinaryOperator::Range => ":",
        }
    }

    /// Whether the operator combines references rather than values
    pub fn is_reference_operator(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Intersect | BinaryOperator::Union | BinaryOperator::Range
        )
    }
}

/// A call to a built-in function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionCall {
    /// Index into the BIFF8 function table
    pub index: u16,
    /// Number of arguments popped from the stack
    pub argc: u8,
    /// Stored as a variable-argument call (`PtgFuncVar`)
    pub variable: bool,
    pub class: OperandClass,
}

impl FunctionCall {
    /// Function name from the built-in table, if known
    pub fn name(&self) -> Option<&'static str> {
        functions::by_index(self.index).map(|spec| spec.name)
    }
}

/// One element of an array constant
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
}

/// An inline array constant such as `{1,2;3,4}`
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayConstant {
    /// Row-major values; every row has the same length
    pub rows: Vec<Vec<ArrayValue>>,
}

impl ArrayConstant {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }
}

/// A single postfix token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    /// Integer literal 0..=65535 (stored compactly as `PtgInt`)
    Integer(u16),
    Text(String),
    Boolean(bool),
    Error(CellError),
    /// An omitted function argument
    Missing,
    Array {
        value: ArrayConstant,
        class: OperandClass,
    },

    // Operators
    Unary(UnaryOperator),
    Binary(BinaryOperator),
    /// Explicit parentheses around the operand on top of the stack
    Paren,
    Function(FunctionCall),

    // References
    Ref {
        address: CellAddress,
        class: OperandClass,
    },
    Area {
        area: AreaRef,
        class: OperandClass,
    },
    Ref3d {
        sheets: SheetSpan,
        address: CellAddress,
        class: OperandClass,
    },
    Area3d {
        sheets: SheetSpan,
        area: AreaRef,
        class: OperandClass,
    },
    /// A cell reference that no longer points anywhere (#REF!)
    RefErr {
        class: OperandClass,
    },
    /// An area reference that no longer points anywhere (#REF!)
    AreaErr {
        class: OperandClass,
    },
    RefErr3d {
        sheets: SheetSpan,
        class: OperandClass,
    },
    AreaErr3d {
        sheets: SheetSpan,
        class: OperandClass,
    },

    // Names
    Name {
        id: NameId,
        class: OperandClass,
    },
    /// A name that was not defined when the formula was parsed
    UnresolvedName {
        name: String,
        class: OperandClass,
    },
    /// A defined name that lives in an external workbook
    ExternName {
        link: LinkId,
        index: u16,
        class: OperandClass,
    },
}

impl Token {
    /// Number of stack entries consumed by this token
    pub fn pops(&self) -> usize {
        match self {
            Token::Unary(_) | Token::Paren => 1,
            Token::Binary(_) => 2,
            Token::Function(call) => call.argc as usize,
            _ => 0,
        }
    }

    /// Whether the token pushes an operand without consuming anything
    pub fn is_operand(&self) -> bool {
        self.pops() == 0
    }

    /// Whether the token is a cell, area or 3-D reference (deleted or not)
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Token::Ref { .. }
                | Token::Area { .. }
                | Token::Ref3d { .. }
                | Token::Area3d { .. }
                | Token::RefErr { .. }
                | Token::AreaErr { .. }
                | Token::RefErr3d { .. }
                | Token::AreaErr3d { .. }
        )
    }

    /// Whether the token is a reference that has been invalidated
    pub fn is_deleted_reference(&self) -> bool {
        matches!(
            self,
            Token::RefErr { .. }
                | Token::AreaErr { .. }
                | Token::RefErr3d { .. }
                | Token::AreaErr3d { .. }
        )
    }

    /// Operand class of references, names, arrays and function calls
    pub fn class(&self) -> Option<OperandClass> {
        match self {
            Token::Array { class, .. }
            | Token::Ref { class, .. }
            | Token::Area { class, .. }
            | Token::Ref3d { class, .. }
            | Token::Area3d { class, .. }
            | Token::RefErr { class }
            | Token::AreaErr { class }
            | Token::RefErr3d { class, .. }
            | Token::AreaErr3d { class, .. }
            | Token::Name { class, .. }
            | Token::UnresolvedName { class, .. }
            | Token::ExternName { class, .. } => Some(*class),
            Token::Function(call) => Some(call.class),
            _ => None,
        }
    }

    /// Change the operand class; tokens without a class are left alone
    pub fn set_class(&mut self, new_class: OperandClass) {
        match self {
            Token::Array { class, .. }
            | Token::Ref { class, .. }
            | Token::Area { class, .. }
            | Token::Ref3d { class, .. }
            | Token::Area3d { class, .. }
            | Token::RefErr { class }
            | Token::AreaErr { class }
            | Token::RefErr3d { class, .. }
            | Token::AreaErr3d { class, .. }
            | Token::Name { class, .. }
            | Token::UnresolvedName { class, .. }
            | Token::ExternName { class, .. } => *class = new_class,
            Token::Function(call) => call.class = new_class,
            _ => {}
        }
    }

    /// The deleted counterpart of a reference token
    ///
    /// Non-reference tokens are returned unchanged.
    pub fn into_deleted(self) -> Token {
        match self {
            Token::Ref { class, .. } => Token::RefErr { class },
            Token::Area { class, .. } => Token::AreaErr { class },
            Token::Ref3d { sheets, class, .. } => Token::RefErr3d { sheets, class },
            Token::Area3d { sheets, class, .. } => Token::AreaErr3d { sheets, class },
            other => other,
        }
    }

    /// The 3-D sheet span of the token, if it has one
    pub fn sheet_span(&self) -> Option<&SheetSpan> {
        match self {
            Token::Ref3d { sheets, .. }
            | Token::Area3d { sheets, .. }
            | Token::RefErr3d { sheets, .. }
            | Token::AreaErr3d { sheets, .. } => Some(sheets),
            _ => None,
        }
    }

    pub fn sheet_span_mut(&mut self) -> Option<&mut SheetSpan> {
        match self {
            Token::Ref3d { sheets, .. }
            | Token::Area3d { sheets, .. }
            | Token::RefErr3d { sheets, .. }
            | Token::AreaErr3d { sheets, .. } => Some(sheets),
            _ => None,
        }
    }
}

/// A complete formula in postfix order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenExpr {
    tokens: Vec<Token>,
}

impl TokenExpr {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    /// Build an expression after checking that it leaves exactly one value
    pub fn from_tokens(tokens: Vec<Token>) -> FormulaResult<Self> {
        let expr = Self { tokens };
        expr.validate()?;
        Ok(expr)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut [Token] {
        &mut self.tokens
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Check that the postfix sequence is well formed
    pub fn validate(&self) -> FormulaResult<()> {
        let mut depth = 0usize;
        for (i, token) in self.tokens.iter().enumerate() {
            let pops = token.pops();
            if depth < pops {
                return Err(FormulaError::MalformedTokens(format!(
                    "token {} ({:?}) needs {} operands, stack has {}",
                    i, token, pops, depth
                )));
            }
            depth = depth - pops + 1;
        }
        if depth != 1 {
            return Err(FormulaError::MalformedTokens(format!(
                "expression leaves {} values on the stack",
                depth
            )));
        }
        Ok(())
    }

    /// Reference tokens in order of appearance
    pub fn references(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| t.is_reference())
    }

    /// Whether any function in the formula is volatile (NOW, RAND, ...)
    pub fn is_volatile(&self) -> bool {
        self.tokens.iter().any(|t| match t {
            Token::Function(call) => functions::by_index(call.index).map_or(false, |f| f.volatile),
            _ => false,
        })
    }

    /// Whether the formula contains a #REF! reference
    pub fn contains_deleted_reference(&self) -> bool {
        self.tokens.iter().any(Token::is_deleted_reference)
    }

    /// Whether any token goes through the given external link
    pub fn uses_link(&self, link: LinkId) -> bool {
        self.tokens.iter().any(|t| match t {
            Token::ExternName { link: l, .. } => *l == link,
            other => other
                .sheet_span()
                .map_or(false, |s| s.book == BookRef::External(link)),
        })
    }

    /// Whether any token names the given defined name
    pub fn uses_name(&self, id: NameId) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::Name { id: n, .. } if *n == id))
    }

    /// Whether the formula still has names that were never resolved
    pub fn has_unresolved_names(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::UnresolvedName { .. }))
    }
}

impl From<Vec<Token>> for TokenExpr {
    fn from(tokens: Vec<Token>) -> Self {
        Self::new(tokens)
    }
}

impl<'a> IntoIterator for &'a TokenExpr {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(row: u32, col: u16) -> Token {
        Token::Ref {
            address: CellAddress::new(row, col),
            class: OperandClass::Value,
        }
    }

    #[test]
    fn test_validate_accepts_balanced_expression() {
        let expr = TokenExpr::new(vec![
            cell(0, 0),
            Token::Integer(2),
            Token::Binary(BinaryOperator::Multiply),
        ]);
        assert!(expr.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_underflow_and_leftovers() {
        let underflow = TokenExpr::new(vec![cell(0, 0), Token::Binary(BinaryOperator::Add)]);
        assert!(underflow.validate().is_err());

        let leftovers = TokenExpr::new(vec![cell(0, 0), cell(1, 1)]);
        assert!(leftovers.validate().is_err());
        assert!(TokenExpr::default().validate().is_err());
    }

    #[test]
    fn test_into_deleted_keeps_span() {
        let span = SheetSpan::local(2);
        let token = Token::Area3d {
            sheets: span,
            area: AreaRef::new(CellAddress::new(0, 0), CellAddress::new(1, 1)),
            class: OperandClass::Reference,
        };
        assert_eq!(
            token.into_deleted(),
            Token::AreaErr3d {
                sheets: span,
                class: OperandClass::Reference
            }
        );
    }

    #[test]
    fn test_uses_link() {
        let expr = TokenExpr::new(vec![Token::Ref3d {
            sheets: SheetSpan::external(LinkId(1), 0),
            address: CellAddress::new(0, 0),
            class: OperandClass::Value,
        }]);
        assert!(expr.uses_link(LinkId(1)));
        assert!(!expr.uses_link(LinkId(0)));
    }
}
