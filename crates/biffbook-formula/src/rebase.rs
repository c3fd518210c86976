//! Moving a formula to another cell
//!
//! A shared formula is stored once, with coordinates as seen from its
//! anchor cell. Every member cell sees the same formula shifted by its
//! distance from the anchor: relative axes move, absolute axes stay put.
//! A reference pushed off the grid becomes a `#REF!` token.

use biffbook_core::{offset_col, offset_row, CellAddress};

use crate::token::{AreaRef, Token, TokenExpr};

/// Move one address by the given distance, honouring its absolute flags
pub fn rebase_address(address: CellAddress, row_delta: i64, col_delta: i64) -> Option<CellAddress> {
    let row = if address.row_absolute {
        address.row
    } else {
        offset_row(address.row, row_delta)?
    };
    let col = if address.col_absolute {
        address.col
    } else {
        offset_col(address.col, col_delta)?
    };
    Some(CellAddress { row, col, ..address })
}

fn rebase_area(area: AreaRef, row_delta: i64, col_delta: i64) -> Option<AreaRef> {
    Some(AreaRef::new(
        rebase_address(area.first, row_delta, col_delta)?,
        rebase_address(area.last, row_delta, col_delta)?,
    ))
}

fn rebase_token(token: &Token, row_delta: i64, col_delta: i64) -> Token {
    let moved = match token {
        Token::Ref { address, class } => {
            rebase_address(*address, row_delta, col_delta).map(|address| Token::Ref {
                address,
                class: *class,
            })
        }
        Token::Area { area, class } => {
            rebase_area(*area, row_delta, col_delta).map(|area| Token::Area { area, class: *class })
        }
        Token::Ref3d {
            sheets,
            address,
            class,
        } => rebase_address(*address, row_delta, col_delta).map(|address| Token::Ref3d {
            sheets: *sheets,
            address,
            class: *class,
        }),
        Token::Area3d {
            sheets,
            area,
            class,
        } => rebase_area(*area, row_delta, col_delta).map(|area| Token::Area3d {
            sheets: *sheets,
            area,
            class: *class,
        }),
        other => return other.clone(),
    };
    moved.unwrap_or_else(|| token.clone().into_deleted())
}

/// The formula as it reads when moved from cell `from` to cell `to`
///
/// Absolute flags of `from` and `to` are ignored.
pub fn rebase(expr: &TokenExpr, from: CellAddress, to: CellAddress) -> TokenExpr {
    let row_delta = to.row as i64 - from.row as i64;
    let col_delta = to.col as i64 - from.col as i64;
    if row_delta == 0 && col_delta == 0 {
        return expr.clone();
    }
    TokenExpr::new(
        expr.iter()
            .map(|t| rebase_token(t, row_delta, col_delta))
            .collect(),
    )
}

impl TokenExpr {
    /// See [`rebase`]
    pub fn rebase(&self, from: CellAddress, to: CellAddress) -> TokenExpr {
        rebase(self, from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{BinaryOperator, OperandClass};
    use pretty_assertions::assert_eq;

    fn cell_times_two(address: CellAddress) -> TokenExpr {
        TokenExpr::new(vec![
            Token::Ref {
                address,
                class: OperandClass::Value,
            },
            Token::Integer(2),
            Token::Binary(BinaryOperator::Multiply),
        ])
    }

    #[test]
    fn test_relative_reference_follows_the_cell() {
        // B2 = A2*2 copied down to B12 reads A12*2
        let anchor = CellAddress::new(1, 1);
        let expr = cell_times_two(CellAddress::new(1, 0));
        assert_eq!(
            expr.rebase(anchor, CellAddress::new(11, 1)),
            cell_times_two(CellAddress::new(11, 0))
        );
    }

    #[test]
    fn test_absolute_axes_stay() {
        let expr = cell_times_two(CellAddress::with_absolute(0, 0, true, false));
        assert_eq!(
            expr.rebase(CellAddress::new(0, 1), CellAddress::new(5, 3)),
            cell_times_two(CellAddress::with_absolute(0, 2, true, false))
        );
    }

    #[test]
    fn test_reference_past_the_grid_is_deleted() {
        let expr = cell_times_two(CellAddress::new(0, 0));
        let moved = expr.rebase(CellAddress::new(5, 5), CellAddress::new(0, 5));
        assert_eq!(moved.tokens()[0], Token::RefErr { class: OperandClass::Value });
        assert!(moved.contains_deleted_reference());
    }

    #[test]
    fn test_area_breaks_when_either_corner_leaves() {
        let expr = TokenExpr::new(vec![Token::Area {
            area: AreaRef::new(CellAddress::new(0, 0), CellAddress::absolute(3, 3)),
            class: OperandClass::Reference,
        }]);
        let moved = expr.rebase(CellAddress::new(2, 0), CellAddress::new(0, 0));
        assert_eq!(
            moved.tokens(),
            &[Token::AreaErr {
                class: OperandClass::Reference
            }]
        );
    }
}
