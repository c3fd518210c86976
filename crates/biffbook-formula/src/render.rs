//! Formula text from postfix tokens
//!
//! Rendering walks the tokens with a stack of strings. Parentheses are only
//! printed where the formula has a [`Token::Paren`], so a parsed formula
//! renders back to the text it was parsed from, apart from whitespace and
//! letter case.

use biffbook_core::CellAddress;

use crate::context::WorkbookContext;
use crate::error::{FormulaError, FormulaResult};
use crate::names::{looks_like_column_and_row, looks_like_r1c1, NameScope};
use crate::token::{ArrayConstant, ArrayValue, BookRef, SheetSpan, Token, TokenExpr, UnaryOperator};

/// Render a formula as text, without the leading `=`
///
/// `sheet` is the sheet the formula lives on; sheet-scoped names from other
/// sheets are printed with their sheet prefix.
pub fn render_formula(
    expr: &TokenExpr,
    ctx: &dyn WorkbookContext,
    sheet: usize,
) -> FormulaResult<String> {
    let mut stack: Vec<String> = Vec::with_capacity(expr.len());

    for token in expr {
        let pops = token.pops();
        if stack.len() < pops {
            return Err(FormulaError::MalformedTokens(format!(
                "{:?} needs {} operands, stack has {}",
                token,
                pops,
                stack.len()
            )));
        }
        let args = stack.split_off(stack.len() - pops);

        let text = match token {
            Token::Number(n) => format_number(*n),
            Token::Integer(n) => n.to_string(),
            Token::Text(s) => quote_text(s),
            Token::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Token::Error(e) => e.as_str().to_string(),
            Token::Missing => String::new(),
            Token::Array { value, .. } => format_array(value),

            Token::Unary(op) => match op {
                UnaryOperator::Plus => format!("+{}", args[0]),
                UnaryOperator::Minus => format!("-{}", args[0]),
                UnaryOperator::Percent => format!("{}%", args[0]),
            },
            Token::Binary(op) => format!("{}{}{}", args[0], op.symbol(), args[1]),
            Token::Paren => format!("({})", args[0]),
            Token::Function(call) => {
                let name = call
                    .name()
                    .ok_or_else(|| FormulaError::UnknownFunction(format!("#{}", call.index)))?;
                format!("{}({})", name, args.join(","))
            }

            Token::Ref { address, .. } => address.to_a1_string(),
            Token::Area { area, .. } => {
                format!("{}:{}", area.first.to_a1_string(), area.last.to_a1_string())
            }
            Token::Ref3d {
                sheets, address, ..
            } => format!("{}{}", sheet_prefix(sheets, ctx)?, address.to_a1_string()),
            Token::Area3d { sheets, area, .. } => format!(
                "{}{}:{}",
                sheet_prefix(sheets, ctx)?,
                area.first.to_a1_string(),
                area.last.to_a1_string()
            ),
            Token::RefErr { .. } | Token::AreaErr { .. } => "#REF!".to_string(),
            Token::RefErr3d { sheets, .. } | Token::AreaErr3d { sheets, .. } => {
                format!("{}#REF!", sheet_prefix(sheets, ctx)?)
            }

            Token::Name { id, .. } => {
                let entry = ctx
                    .references()
                    .name(*id)
                    .ok_or(FormulaError::NameNotFound(*id))?;
                match entry.scope {
                    NameScope::Sheet(scope) if scope != sheet => {
                        let sheet_name = ctx
                            .sheet_name(scope)
                            .ok_or_else(|| FormulaError::UnknownSheet(format!("#{}", scope)))?;
                        format!("{}!{}", quote_sheet_name(sheet_name), entry.name)
                    }
                    _ => entry.name.clone(),
                }
            }
            Token::UnresolvedName { name, .. } => name.clone(),
            Token::ExternName { link, index, .. } => {
                let entry = ctx
                    .references()
                    .link(*link)
                    .ok_or(FormulaError::LinkNotFound(link.0))?;
                let name = entry.names.get(*index as usize).ok_or_else(|| {
                    FormulaError::MalformedTokens(format!(
                        "external name {} missing from link {}",
                        index, link
                    ))
                })?;
                format!("[{}]!{}", entry.identifier, name.name)
            }
        };
        stack.push(text);
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(text), true) => Ok(text),
        _ => Err(FormulaError::MalformedTokens(
            "expression does not reduce to a single value".into(),
        )),
    }
}

/// Shortest text that parses back to the same number
pub(crate) fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return "#NUM!".to_string();
    }
    let magnitude = n.abs();
    if magnitude >= 1e15 || (magnitude != 0.0 && magnitude < 1e-9) {
        // 1E+300, 2.5E-12
        let text = format!("{:E}", n);
        match text.split_once('E') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}E+{}", mantissa, exponent)
            }
            _ => text,
        }
    } else {
        format!("{}", n)
    }
}

fn quote_text(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn format_array(value: &ArrayConstant) -> String {
    let rows: Vec<String> = value
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| match v {
                    ArrayValue::Empty => String::new(),
                    ArrayValue::Number(n) => format_number(*n),
                    ArrayValue::Text(s) => quote_text(s),
                    ArrayValue::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
                    ArrayValue::Error(e) => e.as_str().to_string(),
                })
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();
    format!("{{{}}}", rows.join(";"))
}

/// Whether a sheet name must be written in single quotes
pub fn needs_quoting(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return true;
    };
    first.is_ascii_digit()
        || name
            .chars()
            .any(|c| !(c.is_alphanumeric() || c == '_' || c == '.'))
        || CellAddress::parse(name).is_ok()
        || looks_like_column_and_row(name)
        || looks_like_r1c1(name)
        || name.eq_ignore_ascii_case("TRUE")
        || name.eq_ignore_ascii_case("FALSE")
}

/// `Sheet1` or `'My Sheet'`, with embedded quotes doubled
pub fn quote_sheet_name(name: &str) -> String {
    if needs_quoting(name) {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

/// `Sheet1!`, `'Jan:Mar'!` or `[Book.xls]Sheet1!`
fn sheet_prefix(span: &SheetSpan, ctx: &dyn WorkbookContext) -> FormulaResult<String> {
    let (book, first, last) = match span.book {
        BookRef::Local => {
            let name = |i: u16| {
                ctx.sheet_name(i as usize)
                    .map(str::to_string)
                    .ok_or_else(|| FormulaError::UnknownSheet(format!("#{}", i)))
            };
            (None, name(span.first)?, name(span.last)?)
        }
        BookRef::External(link) => {
            let entry = ctx
                .references()
                .link(link)
                .ok_or(FormulaError::LinkNotFound(link.0))?;
            let name = |i: u16| {
                entry
                    .sheet_name(i)
                    .map(str::to_string)
                    .ok_or_else(|| FormulaError::UnknownSheet(format!("[{}]#{}", entry.identifier, i)))
            };
            (
                Some(entry.identifier.as_str()),
                name(span.first)?,
                name(span.last)?,
            )
        }
    };

    let sheets = if span.first == span.last {
        first.clone()
    } else {
        format!("{}:{}", first, last)
    };
    let quote = needs_quoting(&first) || (span.first != span.last && needs_quoting(&last));
    let body = match book {
        Some(identifier) => format!("[{}]{}", identifier, sheets),
        None => sheets,
    };
    if quote {
        Ok(format!("'{}'!", body.replace('\'', "''")))
    } else {
        Ok(format!("{}!", body))
    }
}
