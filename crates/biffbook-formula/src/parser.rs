//! Formula parser
//!
//! A recursive descent parser for Excel formulas with proper operator
//! precedence. Text is parsed into a small tree first and then flattened
//! into postfix [`Token`]s. Operand classes are assigned while flattening
//! because they depend on where an operand sits, not on what it is.

use std::mem;

use biffbook_core::{CellAddress, CellError};

use crate::context::WorkbookContext;
use crate::error::{FormulaError, FormulaResult};
use crate::functions::{self, FunctionSpec};
use crate::links::LinkId;
use crate::names::{NameId, NameScope};
use crate::token::{
    AreaRef, ArrayConstant, ArrayValue, BinaryOperator, BookRef, FunctionCall, OperandClass,
    SheetSpan, Token, TokenExpr, UnaryOperator,
};

/// Where a formula lives, which decides the operand classes it is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormulaType {
    /// An ordinary cell formula
    #[default]
    Cell,
    /// The formula of a shared-formula group
    Shared,
    /// The formula of an array-formula group
    Array,
    /// The definition of a defined name
    Name,
}

/// Parse a cell formula into postfix tokens
///
/// `sheet` is the index of the sheet the formula lives on; it decides which
/// sheet-scoped names are visible. The leading `=` is optional.
///
/// # Example
/// ```rust
/// use biffbook_formula::{parse_formula, render_formula, SheetList};
///
/// let ctx = SheetList::new(["Sheet1"]);
/// let expr = parse_formula("=SUM(A1:A10)*2", &ctx, 0).unwrap();
/// assert_eq!(render_formula(&expr, &ctx, 0).unwrap(), "SUM(A1:A10)*2");
/// ```
pub fn parse_formula(
    formula: &str,
    ctx: &dyn WorkbookContext,
    sheet: usize,
) -> FormulaResult<TokenExpr> {
    parse_formula_as(formula, ctx, sheet, FormulaType::Cell)
}

/// Parse a formula for a specific [`FormulaType`]
pub fn parse_formula_as(
    formula: &str,
    ctx: &dyn WorkbookContext,
    sheet: usize,
    formula_type: FormulaType,
) -> FormulaResult<TokenExpr> {
    let end = formula.trim_end().len();
    let mut start = formula.len() - formula.trim_start().len();
    if formula[start..end].starts_with('=') {
        start += 1;
    }

    let mut parser = FormulaParser::new(formula, start, end, ctx, sheet)?;
    if parser.current == Lexeme::Eof {
        return Err(FormulaError::parse(start, "empty formula"));
    }
    let tree = parser.parse_expression()?;

    // Make sure we consumed all input
    if parser.current != Lexeme::Eof {
        return Err(parser.error(format!(
            "unexpected {} after expression",
            parser.current.describe()
        )));
    }

    let mut emitter = Emitter {
        formula_type,
        tokens: Vec::new(),
    };
    emitter.emit(tree, Slot::Value);
    TokenExpr::from_tokens(emitter.tokens)
}

/// Token for a numeric literal: small whole numbers use the compact form
pub(crate) fn number_token(value: f64) -> Token {
    if value.fract() == 0.0 && (0.0..=65535.0).contains(&value) {
        Token::Integer(value as u16)
    } else {
        Token::Number(value)
    }
}

/// Sheet qualifier in front of a reference, as written
#[derive(Debug, Clone, PartialEq)]
struct SheetPrefix {
    book: Option<String>,
    /// First sheet and, for a 3-D span, the last one
    sheets: Option<(String, Option<String>)>,
}

/// Lexical tokens
#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    // Literals
    Number(f64),
    String(String),
    Boolean(bool),
    Error(CellError),

    // Identifiers and references
    Identifier(String),
    CellRef(String),
    Prefix(SheetPrefix),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    Ampersand,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Colon,
    Comma,
    Semicolon,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,

    Eof,
}

impl Lexeme {
    fn describe(&self) -> String {
        match self {
            Lexeme::Number(n) => format!("number {}", n),
            Lexeme::String(s) => format!("string \"{}\"", s),
            Lexeme::Boolean(b) => format!("{}", b).to_uppercase(),
            Lexeme::Error(e) => e.as_str().to_string(),
            Lexeme::Identifier(s) | Lexeme::CellRef(s) => format!("'{}'", s),
            Lexeme::Prefix(_) => "sheet prefix".into(),
            Lexeme::Eof => "end of formula".into(),
            other => format!("{:?}", other),
        }
    }
}

/// Parsed formula before flattening
#[derive(Debug, Clone)]
enum Node {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
    Missing,
    Array(ArrayConstant),
    Ref {
        sheets: Option<SheetSpan>,
        address: CellAddress,
    },
    Area {
        sheets: Option<SheetSpan>,
        area: AreaRef,
    },
    /// `Sheet1!#REF!`
    DeletedRef(SheetSpan),
    Name(NameTarget),
    Unary(UnaryOperator, Box<Node>),
    Binary(BinaryOperator, Box<Node>, Box<Node>),
    Paren(Box<Node>),
    Function {
        spec: &'static FunctionSpec,
        args: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
enum NameTarget {
    Defined(NameId),
    Unresolved(String),
    External { link: LinkId, index: u16 },
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '\\'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '\\' | '$')
}

struct FormulaParser<'a> {
    input: &'a str,
    end: usize,
    pos: usize,
    /// Byte offset where `current` starts
    token_start: usize,
    current: Lexeme,
    ctx: &'a dyn WorkbookContext,
    sheet: usize,
}

impl<'a> FormulaParser<'a> {
    fn new(
        input: &'a str,
        start: usize,
        end: usize,
        ctx: &'a dyn WorkbookContext,
        sheet: usize,
    ) -> FormulaResult<Self> {
        let mut parser = Self {
            input,
            end,
            pos: start,
            token_start: start,
            current: Lexeme::Eof,
            ctx,
            sheet,
        };
        parser.current = parser.scan_token()?;
        Ok(parser)
    }

    fn error(&self, message: impl Into<String>) -> FormulaError {
        FormulaError::parse(self.token_start, message)
    }

    // === Token scanning ===

    fn scan_token(&mut self) -> FormulaResult<Lexeme> {
        self.skip_whitespace();
        self.token_start = self.pos;

        let Some(c) = self.peek_char() else {
            return Ok(Lexeme::Eof);
        };

        let single = match c {
            '+' => Some(Lexeme::Plus),
            '-' => Some(Lexeme::Minus),
            '*' => Some(Lexeme::Star),
            '/' => Some(Lexeme::Slash),
            '^' => Some(Lexeme::Caret),
            '%' => Some(Lexeme::Percent),
            '&' => Some(Lexeme::Ampersand),
            ':' => Some(Lexeme::Colon),
            ',' => Some(Lexeme::Comma),
            ';' => Some(Lexeme::Semicolon),
            '(' => Some(Lexeme::LeftParen),
            ')' => Some(Lexeme::RightParen),
            '{' => Some(Lexeme::LeftBrace),
            '}' => Some(Lexeme::RightBrace),
            '=' => Some(Lexeme::Equal),
            _ => None,
        };
        if let Some(lexeme) = single {
            self.advance();
            return Ok(lexeme);
        }

        // Two-character operators
        if c == '<' {
            self.advance();
            return Ok(match self.peek_char() {
                Some('=') => {
                    self.advance();
                    Lexeme::LessEqual
                }
                Some('>') => {
                    self.advance();
                    Lexeme::NotEqual
                }
                _ => Lexeme::LessThan,
            });
        }
        if c == '>' {
            self.advance();
            if self.peek_char() == Some('=') {
                self.advance();
                return Ok(Lexeme::GreaterEqual);
            }
            return Ok(Lexeme::GreaterThan);
        }

        match c {
            '"' => return self.scan_string(),
            '\'' => return self.scan_quoted_prefix(),
            '[' => return self.scan_book_prefix(),
            _ => {}
        }

        if c.is_ascii_digit()
            || (c == '.' && self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit()))
        {
            return self.scan_number();
        }

        if is_name_start(c) || c == '$' || c == '#' {
            return self.scan_identifier_or_ref();
        }

        Err(self.error(format!("unexpected character '{}'", c)))
    }

    fn scan_string(&mut self) -> FormulaResult<Lexeme> {
        self.advance(); // opening quote

        let mut s = String::new();
        loop {
            match self.peek_char() {
                None => return Err(self.error("unterminated string literal")),
                Some('"') => {
                    self.advance();
                    // "" is an escaped quote
                    if self.peek_char() == Some('"') {
                        s.push('"');
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok(Lexeme::String(s))
    }

    fn scan_number(&mut self) -> FormulaResult<Lexeme> {
        let start = self.pos;

        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek_char() == Some('.') {
            self.advance();
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if self.peek_char().map_or(false, |c| c == 'e' || c == 'E') {
            self.advance();
            if self.peek_char().map_or(false, |c| c == '+' || c == '-') {
                self.advance();
            }
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(Lexeme::Number)
            .map_err(|_| self.error(format!("invalid number '{}'", text)))
    }

    fn scan_identifier_or_ref(&mut self) -> FormulaResult<Lexeme> {
        if self.peek_char() == Some('#') {
            let start = self.pos;
            self.advance();
            while self.peek_char().map_or(false, |c| {
                c.is_ascii_alphanumeric() || c == '!' || c == '/' || c == '?'
            }) {
                self.advance();
            }
            let text = &self.input[start..self.pos];
            return CellError::from_str(text)
                .map(Lexeme::Error)
                .ok_or_else(|| self.error(format!("unknown error value '{}'", text)));
        }

        let start = self.pos;
        while self.peek_char().map_or(false, is_name_char) {
            self.advance();
        }
        let text = self.input[start..self.pos].to_string();

        // Sheet1!  or  Sheet1:Sheet3!
        if self.peek_char() == Some('!') {
            self.advance();
            return Ok(Lexeme::Prefix(SheetPrefix {
                book: None,
                sheets: Some((text, None)),
            }));
        }
        if self.peek_char() == Some(':') {
            if let Some(last) = self.scan_sheet_range_end() {
                return Ok(Lexeme::Prefix(SheetPrefix {
                    book: None,
                    sheets: Some((text, Some(last))),
                }));
            }
        }

        // TRUE( and FALSE( are function calls
        let followed_by_paren = self.peek_char() == Some('(');
        if !followed_by_paren {
            if text.eq_ignore_ascii_case("TRUE") {
                return Ok(Lexeme::Boolean(true));
            }
            if text.eq_ignore_ascii_case("FALSE") {
                return Ok(Lexeme::Boolean(false));
            }
        }

        // LOG10(100) is a function call, not a cell reference
        if !followed_by_paren && Self::is_cell_reference(&text) {
            return Ok(Lexeme::CellRef(text));
        }

        Ok(Lexeme::Identifier(text))
    }

    /// After `Sheet1`, consume `:Sheet3!` if that is what follows
    fn scan_sheet_range_end(&mut self) -> Option<String> {
        let saved = self.pos;
        self.advance(); // ':'
        let start = self.pos;
        while self.peek_char().map_or(false, is_name_char) {
            self.advance();
        }
        if self.pos > start && self.peek_char() == Some('!') {
            let last = self.input[start..self.pos].to_string();
            self.advance();
            return Some(last);
        }
        self.pos = saved;
        None
    }

    /// `'My Sheet'!`, `'Jan:Mar'!` or `'[Book.xls]My Sheet'!`
    fn scan_quoted_prefix(&mut self) -> FormulaResult<Lexeme> {
        self.advance(); // opening quote

        let mut raw = String::new();
        loop {
            match self.peek_char() {
                None => return Err(self.error("unterminated quoted sheet name")),
                Some('\'') => {
                    self.advance();
                    if self.peek_char() == Some('\'') {
                        raw.push('\'');
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    raw.push(c);
                    self.advance();
                }
            }
        }
        if self.peek_char() != Some('!') {
            return Err(self.error("expected '!' after quoted sheet name"));
        }
        self.advance();

        let (book, sheets) = match raw.strip_prefix('[') {
            Some(rest) => {
                let (book, sheets) = rest
                    .split_once(']')
                    .ok_or_else(|| self.error("missing ']' after workbook name"))?;
                (Some(book.to_string()), sheets)
            }
            None => (None, raw.as_str()),
        };
        let (first, last) = match sheets.split_once(':') {
            Some((first, last)) => (first, Some(last.to_string())),
            None => (sheets, None),
        };
        if first.is_empty() {
            return Err(self.error("empty sheet name"));
        }

        Ok(Lexeme::Prefix(SheetPrefix {
            book,
            sheets: Some((first.to_string(), last)),
        }))
    }

    /// `[Book.xls]Sheet1!` or `[Book.xls]!Name`
    fn scan_book_prefix(&mut self) -> FormulaResult<Lexeme> {
        self.advance(); // '['

        let start = self.pos;
        while self.peek_char().map_or(false, |c| c != ']') {
            self.advance();
        }
        if self.peek_char() != Some(']') {
            return Err(self.error("missing ']' after workbook name"));
        }
        let book = self.input[start..self.pos].to_string();
        self.advance();

        if self.peek_char() == Some('!') {
            self.advance();
            return Ok(Lexeme::Prefix(SheetPrefix {
                book: Some(book),
                sheets: None,
            }));
        }

        let start = self.pos;
        while self.peek_char().map_or(false, is_name_char) {
            self.advance();
        }
        if self.pos == start {
            return Err(self.error("expected a sheet name after the workbook name"));
        }
        let first = self.input[start..self.pos].to_string();
        let last = match self.peek_char() {
            Some('!') => {
                self.advance();
                None
            }
            Some(':') => Some(
                self.scan_sheet_range_end()
                    .ok_or_else(|| self.error("expected '!' after sheet range"))?,
            ),
            _ => return Err(self.error("expected '!' after sheet name")),
        };

        Ok(Lexeme::Prefix(SheetPrefix {
            book: Some(book),
            sheets: Some((first, last)),
        }))
    }

    /// `[$]letters[$]digits` inside the BIFF8 grid
    fn is_cell_reference(text: &str) -> bool {
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;

        if chars.get(i) == Some(&'$') {
            i += 1;
        }
        let letter_start = i;
        while i < chars.len() && chars[i].is_ascii_alphabetic() {
            i += 1;
        }
        if i == letter_start {
            return false;
        }
        if chars.get(i) == Some(&'$') {
            i += 1;
        }
        let digit_start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == digit_start || i != chars.len() {
            return false;
        }

        // IW1 or A65537 look like references but are names in BIFF8
        CellAddress::parse(text).is_ok()
    }

    // === Helper methods ===

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..self.end].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..self.end].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, char::is_whitespace) {
            self.advance();
        }
    }

    fn consume(&mut self) -> FormulaResult<Lexeme> {
        let next = self.scan_token()?;
        Ok(mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, expected: &Lexeme) -> FormulaResult<()> {
        if &self.current == expected {
            self.consume()?;
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, got {}",
                expected.describe(),
                self.current.describe()
            )))
        }
    }

    // === Expression parsing with precedence ===
    // Precedence (lowest to highest):
    // 1. Comparison: =, <>, <, <=, >, >=
    // 2. Concatenation: &
    // 3. Addition/Subtraction: +, -
    // 4. Multiplication/Division: *, /
    // 5. Exponentiation: ^
    // 6. Unary: -, +, %
    // 7. Intersection: space
    // 8. Range: :
    // 9. Primary: literals, references, function calls, parentheses

    fn parse_expression(&mut self) -> FormulaResult<Node> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> FormulaResult<Node> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match self.current {
                Lexeme::Equal => BinaryOperator::Equal,
                Lexeme::NotEqual => BinaryOperator::NotEqual,
                Lexeme::LessThan => BinaryOperator::LessThan,
                Lexeme::LessEqual => BinaryOperator::LessEqual,
                Lexeme::GreaterThan => BinaryOperator::GreaterThan,
                Lexeme::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };
            self.consume()?;
            let right = self.parse_concatenation()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> FormulaResult<Node> {
        let mut left = self.parse_additive()?;

        while self.current == Lexeme::Ampersand {
            self.consume()?;
            let right = self.parse_additive()?;
            left = Node::Binary(BinaryOperator::Concat, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<Node> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current {
                Lexeme::Plus => BinaryOperator::Add,
                Lexeme::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.consume()?;
            let right = self.parse_multiplicative()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<Node> {
        let mut left = self.parse_exponent()?;

        loop {
            let op = match self.current {
                Lexeme::Star => BinaryOperator::Multiply,
                Lexeme::Slash => BinaryOperator::Divide,
                _ => break,
            };
            self.consume()?;
            let right = self.parse_exponent()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_exponent(&mut self) -> FormulaResult<Node> {
        let mut left = self.parse_unary()?;

        // Left associative, as Excel evaluates 2^3^2
        while self.current == Lexeme::Caret {
            self.consume()?;
            let right = self.parse_unary()?;
            left = Node::Binary(BinaryOperator::Power, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> FormulaResult<Node> {
        let prefix = match self.current {
            Lexeme::Minus => Some(UnaryOperator::Minus),
            Lexeme::Plus => Some(UnaryOperator::Plus),
            _ => None,
        };
        if let Some(op) = prefix {
            self.consume()?;
            let operand = self.parse_unary()?;
            return Ok(Node::Unary(op, Box::new(operand)));
        }

        let mut expr = self.parse_range()?;
        while self.current == Lexeme::Percent {
            self.consume()?;
            expr = Node::Unary(UnaryOperator::Percent, Box::new(expr));
        }

        Ok(expr)
    }

    /// `A1:B2 B2:C3` intersects; the space binds looser than `:`
    fn parse_range(&mut self) -> FormulaResult<Node> {
        let mut left = self.parse_area()?;

        while self.at_intersection() {
            let right = self.parse_area()?;
            left = Node::Binary(BinaryOperator::Intersect, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Whitespace followed by another operand, where nothing else may follow
    /// a complete operand
    fn at_intersection(&self) -> bool {
        let starts_operand = matches!(
            self.current,
            Lexeme::CellRef(_) | Lexeme::Prefix(_) | Lexeme::Identifier(_) | Lexeme::LeftParen
        );
        starts_operand
            && self.input[..self.token_start]
                .chars()
                .next_back()
                .map_or(false, char::is_whitespace)
    }

    fn parse_area(&mut self) -> FormulaResult<Node> {
        let mut left = self.parse_primary()?;

        while self.current == Lexeme::Colon {
            self.consume()?;
            let right = self.parse_primary()?;
            left = match (left, right) {
                // A1:B2 and Sheet1!A1:B2 are single area tokens
                (
                    Node::Ref {
                        sheets,
                        address: first,
                    },
                    Node::Ref {
                        sheets: last_sheets,
                        address: last,
                    },
                ) if last_sheets.is_none() || last_sheets == sheets => Node::Area {
                    sheets,
                    area: AreaRef::new(first, last),
                },
                (left, right) => Node::Binary(BinaryOperator::Range, Box::new(left), Box::new(right)),
            };
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> FormulaResult<Node> {
        match self.current.clone() {
            Lexeme::Number(n) => {
                self.consume()?;
                Ok(Node::Number(n))
            }
            Lexeme::String(s) => {
                self.consume()?;
                Ok(Node::Text(s))
            }
            Lexeme::Boolean(b) => {
                self.consume()?;
                Ok(Node::Boolean(b))
            }
            Lexeme::Error(e) => {
                self.consume()?;
                Ok(Node::Error(e))
            }
            Lexeme::LeftParen => {
                self.consume()?;
                let mut inner = self.parse_expression()?;
                // (A1,B2) is a union
                while self.current == Lexeme::Comma {
                    self.consume()?;
                    let right = self.parse_expression()?;
                    inner = Node::Binary(BinaryOperator::Union, Box::new(inner), Box::new(right));
                }
                self.expect(&Lexeme::RightParen)?;
                Ok(Node::Paren(Box::new(inner)))
            }
            Lexeme::LeftBrace => self.parse_array(),
            Lexeme::Prefix(prefix) => {
                self.consume()?;
                self.parse_prefixed(prefix)
            }
            Lexeme::CellRef(text) => {
                self.consume()?;
                Ok(Node::Ref {
                    sheets: None,
                    address: self.cell_address(&text)?,
                })
            }
            Lexeme::Identifier(name) => {
                self.consume()?;
                if self.current == Lexeme::LeftParen {
                    self.parse_function_call(name)
                } else {
                    Ok(Node::Name(self.local_name(name)))
                }
            }
            other => Err(self.error(format!("unexpected {}", other.describe()))),
        }
    }

    fn parse_array(&mut self) -> FormulaResult<Node> {
        self.expect(&Lexeme::LeftBrace)?;

        let mut rows = Vec::new();
        let mut current_row = vec![self.parse_array_value()?];
        loop {
            match self.current {
                Lexeme::Comma => {
                    self.consume()?;
                    current_row.push(self.parse_array_value()?);
                }
                Lexeme::Semicolon => {
                    self.consume()?;
                    rows.push(mem::take(&mut current_row));
                    current_row.push(self.parse_array_value()?);
                }
                Lexeme::RightBrace => break,
                _ => return Err(self.error("expected ',' ';' or '}' in array")),
            }
        }
        rows.push(current_row);
        self.expect(&Lexeme::RightBrace)?;

        let width = rows[0].len();
        if rows.iter().any(|row| row.len() != width) {
            return Err(self.error("array rows must all have the same number of values"));
        }
        Ok(Node::Array(ArrayConstant { rows }))
    }

    fn parse_array_value(&mut self) -> FormulaResult<ArrayValue> {
        let negative = self.current == Lexeme::Minus;
        if negative {
            self.consume()?;
        }
        match self.current.clone() {
            Lexeme::Number(n) => {
                self.consume()?;
                Ok(ArrayValue::Number(if negative { -n } else { n }))
            }
            Lexeme::String(s) if !negative => {
                self.consume()?;
                Ok(ArrayValue::Text(s))
            }
            Lexeme::Boolean(b) if !negative => {
                self.consume()?;
                Ok(ArrayValue::Boolean(b))
            }
            Lexeme::Error(e) if !negative => {
                self.consume()?;
                Ok(ArrayValue::Error(e))
            }
            other => Err(self.error(format!(
                "array constants may only hold literals, got {}",
                other.describe()
            ))),
        }
    }

    fn parse_function_call(&mut self, name: String) -> FormulaResult<Node> {
        let spec = functions::by_name(&name)
            .ok_or_else(|| FormulaError::UnknownFunction(name.to_uppercase()))?;
        self.expect(&Lexeme::LeftParen)?;

        let mut args = Vec::new();
        if self.current != Lexeme::RightParen {
            loop {
                if matches!(self.current, Lexeme::Comma | Lexeme::RightParen) {
                    args.push(Node::Missing);
                } else {
                    args.push(self.parse_expression()?);
                }
                if self.current == Lexeme::Comma {
                    self.consume()?;
                } else {
                    break;
                }
            }
        }
        self.expect(&Lexeme::RightParen)?;

        if !spec.accepts(args.len()) {
            return Err(FormulaError::ArgumentCount {
                function: spec.name.to_string(),
                expected: spec.arity_text(),
                actual: args.len(),
            });
        }
        Ok(Node::Function { spec, args })
    }

    fn parse_prefixed(&mut self, prefix: SheetPrefix) -> FormulaResult<Node> {
        let SheetPrefix { book, sheets } = prefix;
        let Some((first, last)) = sheets else {
            // [Book.xls]!Name
            let book = book.unwrap_or_default();
            return match self.consume()? {
                Lexeme::Identifier(name) => self.external_name(&book, &name),
                other => Err(self.error(format!(
                    "expected a name after '[{}]!', got {}",
                    book,
                    other.describe()
                ))),
            };
        };

        let span = self.resolve_span(book.as_deref(), &first, last.as_deref())?;
        match self.current.clone() {
            Lexeme::CellRef(text) => {
                self.consume()?;
                Ok(Node::Ref {
                    sheets: Some(span),
                    address: self.cell_address(&text)?,
                })
            }
            Lexeme::Error(CellError::Ref) => {
                self.consume()?;
                Ok(Node::DeletedRef(span))
            }
            Lexeme::Identifier(name) if span.book == BookRef::Local && span.first == span.last => {
                self.consume()?;
                let scope = NameScope::Sheet(span.first as usize);
                self.ctx
                    .references()
                    .lookup_exact(&name, scope)
                    .map(|id| Node::Name(NameTarget::Defined(id)))
                    .ok_or_else(|| {
                        self.error(format!("no name '{}' is defined on sheet '{}'", name, first))
                    })
            }
            other => Err(self.error(format!(
                "expected a cell reference after '{}!', got {}",
                first,
                other.describe()
            ))),
        }
    }

    fn cell_address(&self, text: &str) -> FormulaResult<CellAddress> {
        CellAddress::parse(text)
            .map_err(|e| self.error(format!("invalid cell reference '{}': {}", text, e)))
    }

    fn local_sheet(&self, name: &str) -> FormulaResult<u16> {
        self.ctx
            .sheet_index(name)
            .and_then(|i| u16::try_from(i).ok())
            .ok_or_else(|| FormulaError::UnknownSheet(name.to_string()))
    }

    fn resolve_span(
        &self,
        book: Option<&str>,
        first: &str,
        last: Option<&str>,
    ) -> FormulaResult<SheetSpan> {
        let (book, first_index, last_index) = match book {
            None => {
                let f = self.local_sheet(first)?;
                let l = match last {
                    Some(l) => self.local_sheet(l)?,
                    None => f,
                };
                (BookRef::Local, f, l)
            }
            Some(identifier) => {
                let references = self.ctx.references();
                let link = references
                    .find_link(identifier)
                    .ok_or_else(|| FormulaError::UnknownExternalWorkbook(identifier.to_string()))?;
                let entry = references
                    .link(link)
                    .ok_or(FormulaError::LinkNotFound(link.0))?;
                let sheet = |name: &str| {
                    entry
                        .sheet_index(name)
                        .ok_or_else(|| FormulaError::UnknownSheet(format!("[{}]{}", identifier, name)))
                };
                let f = sheet(first)?;
                let l = match last {
                    Some(l) => sheet(l)?,
                    None => f,
                };
                (BookRef::External(link), f, l)
            }
        };
        Ok(SheetSpan {
            book,
            first: first_index.min(last_index),
            last: first_index.max(last_index),
        })
    }

    fn local_name(&self, name: String) -> NameTarget {
        match self.ctx.references().lookup(&name, self.sheet) {
            Some(id) => NameTarget::Defined(id),
            None => NameTarget::Unresolved(name),
        }
    }

    fn external_name(&self, book: &str, name: &str) -> FormulaResult<Node> {
        let references = self.ctx.references();
        let link = references
            .find_link(book)
            .ok_or_else(|| FormulaError::UnknownExternalWorkbook(book.to_string()))?;
        let index = references
            .link(link)
            .and_then(|entry| entry.name_index(name))
            .ok_or_else(|| {
                self.error(format!("workbook '{}' has no name '{}'", book, name))
            })?;
        Ok(Node::Name(NameTarget::External { link, index }))
    }
}

/// Position of an operand, which decides its class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// The whole formula, or an operand of a value operator
    Value,
    /// Directly passed to a function
    Argument,
    /// Operand of a range or union operator
    Reference,
}

struct Emitter {
    formula_type: FormulaType,
    tokens: Vec<Token>,
}

impl Emitter {
    fn reference_class(&self, slot: Slot) -> OperandClass {
        match (self.formula_type, slot) {
            (FormulaType::Name, _) | (_, Slot::Argument) | (_, Slot::Reference) => {
                OperandClass::Reference
            }
            (FormulaType::Array, Slot::Value) => OperandClass::Array,
            _ => OperandClass::Value,
        }
    }

    fn function_class(&self) -> OperandClass {
        match self.formula_type {
            FormulaType::Array => OperandClass::Array,
            _ => OperandClass::Value,
        }
    }

    fn emit(&mut self, node: Node, slot: Slot) {
        let token = match node {
            Node::Number(n) => number_token(n),
            Node::Text(s) => Token::Text(s),
            Node::Boolean(b) => Token::Boolean(b),
            Node::Error(e) => Token::Error(e),
            Node::Missing => Token::Missing,
            Node::Array(value) => Token::Array {
                value,
                class: OperandClass::Array,
            },
            Node::Ref { sheets, address } => {
                let class = self.reference_class(slot);
                match sheets {
                    Some(sheets) => Token::Ref3d {
                        sheets,
                        address,
                        class,
                    },
                    None => Token::Ref { address, class },
                }
            }
            Node::Area { sheets, area } => {
                let class = self.reference_class(slot);
                match sheets {
                    Some(sheets) => Token::Area3d {
                        sheets,
                        area,
                        class,
                    },
                    None => Token::Area { area, class },
                }
            }
            Node::DeletedRef(sheets) => Token::RefErr3d {
                sheets,
                class: self.reference_class(slot),
            },
            Node::Name(target) => {
                let class = self.reference_class(slot);
                match target {
                    NameTarget::Defined(id) => Token::Name { id, class },
                    NameTarget::Unresolved(name) => Token::UnresolvedName { name, class },
                    NameTarget::External { link, index } => Token::ExternName { link, index, class },
                }
            }
            Node::Unary(op, operand) => {
                self.emit(*operand, Slot::Value);
                Token::Unary(op)
            }
            Node::Binary(op, left, right) => {
                let operand_slot = if op.is_reference_operator() {
                    Slot::Reference
                } else {
                    Slot::Value
                };
                self.emit(*left, operand_slot);
                self.emit(*right, operand_slot);
                Token::Binary(op)
            }
            Node::Paren(inner) => {
                self.emit(*inner, slot);
                Token::Paren
            }
            Node::Function { spec, args } => {
                let argc = args.len() as u8;
                for arg in args {
                    self.emit(arg, Slot::Argument);
                }
                Token::Function(FunctionCall {
                    index: spec.index,
                    argc,
                    variable: !spec.is_fixed_arity(),
                    class: self.function_class(),
                })
            }
        };
        self.tokens.push(token);
    }
}
