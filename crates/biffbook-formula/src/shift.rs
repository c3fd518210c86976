//! Keeping formulas valid across structural edits
//!
//! When a block of rows (or columns) moves, every formula that points into
//! the block follows it, and references to the cells the block lands on are
//! overwritten with `#REF!`. Areas grow, shrink or move depending on how
//! they overlap the moved block and its destination.
//!
//! The same shifter updates 3-D sheet indices when a sheet is moved or
//! removed.

use biffbook_core::{CellAddress, CellError, MAX_COLS, MAX_ROWS};

use crate::reference_table::moved_index;
use crate::token::{AreaRef, BookRef, SheetSpan, Token, TokenExpr};

/// Direction of a row or column shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Rows,
    Columns,
}

impl Axis {
    /// Number of rows or columns on a sheet
    pub fn limit(&self) -> u32 {
        match self {
            Axis::Rows => MAX_ROWS,
            Axis::Columns => MAX_COLS as u32,
        }
    }

    /// Coordinate of an address along this axis
    pub fn get(&self, address: &CellAddress) -> u32 {
        match self {
            Axis::Rows => address.row,
            Axis::Columns => address.col as u32,
        }
    }

    fn set(&self, address: &mut CellAddress, value: u32) {
        match self {
            Axis::Rows => address.row = value,
            Axis::Columns => address.col = value as u16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftKind {
    Move {
        sheet: usize,
        axis: Axis,
        first: u32,
        last: u32,
        delta: i64,
    },
    SheetMoved {
        from: usize,
        to: usize,
    },
    SheetRemoved {
        index: usize,
    },
}

/// Result of moving one coordinate or one pair of coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome<T> {
    Unchanged,
    Moved(T),
    Deleted,
}

/// Rewrites formulas after rows, columns or sheets move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormulaShifter {
    kind: ShiftKind,
}

impl FormulaShifter {
    /// Rows `first..=last` of `sheet` move by `delta`
    pub fn rows(sheet: usize, first: u32, last: u32, delta: i64) -> Self {
        Self::moved(sheet, Axis::Rows, first, last, delta)
    }

    /// Columns `first..=last` of `sheet` move by `delta`
    pub fn columns(sheet: usize, first: u16, last: u16, delta: i64) -> Self {
        Self::moved(sheet, Axis::Columns, first as u32, last as u32, delta)
    }

    pub fn moved(sheet: usize, axis: Axis, first: u32, last: u32, delta: i64) -> Self {
        // A full axis length already lands every cell off the grid
        let limit = i64::from(axis.limit());
        Self {
            kind: ShiftKind::Move {
                sheet,
                axis,
                first,
                last,
                delta: delta.clamp(-limit, limit),
            },
        }
    }

    /// The sheet at position `from` now sits at `to`
    pub fn sheet_moved(from: usize, to: usize) -> Self {
        Self {
            kind: ShiftKind::SheetMoved { from, to },
        }
    }

    /// The sheet at `index` was removed
    pub fn sheet_removed(index: usize) -> Self {
        Self {
            kind: ShiftKind::SheetRemoved { index },
        }
    }

    /// Rewrite `expr` in place; returns whether any token changed
    ///
    /// `host_sheet` is the sheet holding the formula, or `None` for a
    /// defined name. Plain (2-D) references are only adjusted in formulas
    /// hosted on the shifted sheet.
    pub fn adjust(&self, expr: &mut TokenExpr, host_sheet: Option<usize>) -> bool {
        let mut changed = false;
        for token in expr.tokens_mut() {
            if let Some(replacement) = self.adjust_token(token, host_sheet) {
                if &replacement != token {
                    *token = replacement;
                    changed = true;
                }
            }
        }
        changed
    }

    fn adjust_token(&self, token: &Token, host_sheet: Option<usize>) -> Option<Token> {
        match self.kind {
            ShiftKind::Move {
                sheet,
                axis,
                first,
                last,
                delta,
            } => {
                let mover = Mover {
                    axis,
                    first: first as i64,
                    last: last as i64,
                    delta,
                };
                let local = host_sheet == Some(sheet);
                match token {
                    Token::Ref { address, .. } if local => mover.single(token, *address),
                    Token::Area { area, .. } if local => mover.area(token, *area),
                    Token::Ref3d {
                        sheets, address, ..
                    } if sheets.is_local_sheet(sheet) => mover.single(token, *address),
                    Token::Area3d { sheets, area, .. } if sheets.is_local_sheet(sheet) => {
                        mover.area(token, *area)
                    }
                    _ => None,
                }
            }
            ShiftKind::SheetMoved { from, to } => {
                let span = local_span(token)?;
                let a = moved_index(span.first as usize, from, to) as u16;
                let b = moved_index(span.last as usize, from, to) as u16;
                let mut moved = token.clone();
                if let Some(s) = moved.sheet_span_mut() {
                    s.first = a.min(b);
                    s.last = a.max(b);
                }
                Some(moved)
            }
            ShiftKind::SheetRemoved { index } => {
                let span = local_span(token)?;
                let removed = index as u16;
                if span.first == removed && span.last == removed {
                    return Some(Token::Error(CellError::Ref));
                }
                let mut moved = token.clone();
                if let Some(s) = moved.sheet_span_mut() {
                    if s.first > removed {
                        s.first -= 1;
                    }
                    if s.last >= removed {
                        s.last -= 1;
                    }
                }
                Some(moved)
            }
        }
    }
}

fn local_span(token: &Token) -> Option<SheetSpan> {
    token
        .sheet_span()
        .filter(|s| s.book == BookRef::Local)
        .copied()
}

/// Coordinate arithmetic of a row or column move
struct Mover {
    axis: Axis,
    first: i64,
    last: i64,
    delta: i64,
}

impl Mover {
    fn in_grid(&self, value: i64) -> bool {
        (0..self.axis.limit() as i64).contains(&value)
    }

    fn dest_first(&self) -> i64 {
        self.first + self.delta
    }

    fn dest_last(&self) -> i64 {
        self.last + self.delta
    }

    fn single(&self, token: &Token, address: CellAddress) -> Option<Token> {
        match self.move_single(self.axis.get(&address) as i64) {
            Outcome::Unchanged => None,
            Outcome::Deleted => Some(token.clone().into_deleted()),
            Outcome::Moved(value) => {
                let mut moved = token.clone();
                if let Token::Ref { address, .. } | Token::Ref3d { address, .. } = &mut moved {
                    self.axis.set(address, value as u32);
                }
                Some(moved)
            }
        }
    }

    fn area(&self, token: &Token, area: AreaRef) -> Option<Token> {
        let a = self.axis.get(&area.first) as i64;
        let b = self.axis.get(&area.last) as i64;
        let (lo, hi) = (a.min(b), a.max(b));
        match self.move_area(lo, hi) {
            Outcome::Unchanged => None,
            Outcome::Deleted => Some(token.clone().into_deleted()),
            Outcome::Moved((new_lo, new_hi)) => {
                let (new_lo, new_hi) = (new_lo.min(new_hi), new_lo.max(new_hi));
                if !self.in_grid(new_lo) || !self.in_grid(new_hi) {
                    return Some(token.clone().into_deleted());
                }
                let mut moved = token.clone();
                if let Token::Area { area, .. } | Token::Area3d { area, .. } = &mut moved {
                    // The corner that held the low end keeps it
                    let (low_corner, high_corner) = if a <= b {
                        (&mut area.first, &mut area.last)
                    } else {
                        (&mut area.last, &mut area.first)
                    };
                    self.axis.set(low_corner, new_lo as u32);
                    self.axis.set(high_corner, new_hi as u32);
                }
                Some(moved)
            }
        }
    }

    fn move_single(&self, value: i64) -> Outcome<i64> {
        if self.first <= value && value <= self.last {
            let moved = value + self.delta;
            return if self.in_grid(moved) {
                Outcome::Moved(moved)
            } else {
                Outcome::Deleted
            };
        }
        if self.dest_first() <= value && value <= self.dest_last() {
            // Overwritten by the moved block
            return Outcome::Deleted;
        }
        Outcome::Unchanged
    }

    fn move_area(&self, lo: i64, hi: i64) -> Outcome<(i64, i64)> {
        let (first, last, delta) = (self.first, self.last, self.delta);
        let (dest_first, dest_last) = (self.dest_first(), self.dest_last());

        // The moved block encloses the area
        if first <= lo && hi <= last {
            return Outcome::Moved((lo + delta, hi + delta));
        }

        // The area strictly encloses the moved block
        if lo < first && last < hi {
            if dest_first < lo && lo <= dest_last {
                return Outcome::Moved((dest_last + 1, hi));
            }
            if dest_first <= hi && hi < dest_last {
                return Outcome::Moved((lo, dest_first - 1));
            }
            return Outcome::Unchanged;
        }

        // The low end moves, the high end does not
        if first <= lo && lo <= last {
            if delta < 0 {
                return Outcome::Moved((lo + delta, hi));
            }
            if dest_first > hi {
                return Outcome::Unchanged;
            }
            let mut new_lo = lo + delta;
            if dest_last < hi {
                return Outcome::Moved((new_lo, hi));
            }
            let remaining_lo = last + 1;
            if dest_first > remaining_lo {
                new_lo = remaining_lo;
            }
            return Outcome::Moved((new_lo, hi.max(dest_last)));
        }

        // The high end moves, the low end does not
        if first <= hi && hi <= last {
            if delta > 0 {
                return Outcome::Moved((lo, hi + delta));
            }
            if dest_last < lo {
                return Outcome::Unchanged;
            }
            let mut new_hi = hi + delta;
            if dest_first > lo {
                return Outcome::Moved((lo, new_hi));
            }
            let remaining_hi = first - 1;
            if dest_last < remaining_hi {
                new_hi = remaining_hi;
            }
            return Outcome::Moved((lo.min(dest_first), new_hi));
        }

        // None of the area moves; only the destination matters
        if dest_last < lo || hi < dest_first {
            return Outcome::Unchanged;
        }
        if dest_first <= lo && hi <= dest_last {
            return Outcome::Deleted;
        }
        if lo <= dest_first && dest_last <= hi {
            return Outcome::Unchanged;
        }
        if dest_first < lo && lo <= dest_last {
            return Outcome::Moved((dest_last + 1, hi));
        }
        if dest_first <= hi && hi < dest_last {
            return Outcome::Moved((lo, dest_first - 1));
        }
        Outcome::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkId;
    use crate::token::OperandClass;
    use pretty_assertions::assert_eq;

    fn cell(row: u32, col: u16) -> Token {
        Token::Ref {
            address: CellAddress::new(row, col),
            class: OperandClass::Value,
        }
    }

    fn rows(first: u32, last: u32) -> Token {
        Token::Area {
            area: AreaRef::new(CellAddress::new(first, 0), CellAddress::new(last, 0)),
            class: OperandClass::Reference,
        }
    }

    fn shifted(shifter: FormulaShifter, token: Token, host: Option<usize>) -> Token {
        let mut expr = TokenExpr::new(vec![token]);
        shifter.adjust(&mut expr, host);
        expr.into_tokens().remove(0)
    }

    #[test]
    fn test_huge_delta_deletes_moved_references() {
        for delta in [i64::MAX, i64::MIN] {
            let shifter = FormulaShifter::rows(0, 2, 4, delta);
            assert_eq!(
                shifted(shifter, cell(3, 0), Some(0)),
                Token::RefErr {
                    class: OperandClass::Value
                }
            );
            assert_eq!(shifted(shifter, cell(0, 0), Some(0)), cell(0, 0));
        }
    }

    #[test]
    fn test_single_references() {
        // rows 3..=5 (0-based 2..=4) move down by 3
        let shifter = FormulaShifter::rows(0, 2, 4, 3);
        assert_eq!(shifted(shifter, cell(3, 0), Some(0)), cell(6, 0));
        assert_eq!(shifted(shifter, cell(0, 0), Some(0)), cell(0, 0));
        assert_eq!(
            shifted(shifter, cell(6, 0), Some(0)),
            Token::RefErr {
                class: OperandClass::Value
            }
        );
        assert_eq!(shifted(shifter, cell(8, 0), Some(0)), cell(8, 0));
    }

    #[test]
    fn test_other_sheets_are_left_alone() {
        let shifter = FormulaShifter::rows(0, 2, 4, 3);
        assert_eq!(shifted(shifter, cell(3, 0), Some(1)), cell(3, 0));
        assert_eq!(shifted(shifter, cell(3, 0), None), cell(3, 0));

        let three_d = |row| Token::Ref3d {
            sheets: SheetSpan::local(0),
            address: CellAddress::new(row, 0),
            class: OperandClass::Value,
        };
        assert_eq!(shifted(shifter, three_d(3), Some(1)), three_d(6));
        assert_eq!(shifted(shifter, three_d(3), None), three_d(6));
    }

    #[test]
    fn test_areas() {
        // block inside the area, landing inside it too
        assert_eq!(
            shifted(FormulaShifter::rows(0, 2, 4, 2), rows(0, 9), Some(0)),
            rows(0, 9)
        );
        // whole area moves
        assert_eq!(
            shifted(FormulaShifter::rows(0, 2, 4, 2), rows(2, 4), Some(0)),
            rows(4, 6)
        );
        // low end moves up
        assert_eq!(
            shifted(FormulaShifter::rows(0, 2, 4, -1), rows(3, 9), Some(0)),
            rows(2, 9)
        );
        // high end moves down
        assert_eq!(
            shifted(FormulaShifter::rows(0, 2, 4, 2), rows(0, 3), Some(0)),
            rows(0, 5)
        );
        // destination covers the area
        assert_eq!(
            shifted(FormulaShifter::rows(0, 2, 4, 4), rows(6, 7), Some(0)),
            Token::AreaErr {
                class: OperandClass::Reference
            }
        );
        // destination overlaps the start of the area
        assert_eq!(
            shifted(FormulaShifter::rows(0, 2, 4, 5), rows(8, 12), Some(0)),
            rows(10, 12)
        );
    }

    #[test]
    fn test_columns() {
        let shifter = FormulaShifter::columns(0, 1, 1, 2);
        assert_eq!(shifted(shifter, cell(0, 1), Some(0)), cell(0, 3));
        assert_eq!(
            shifted(shifter, cell(0, 3), Some(0)),
            Token::RefErr {
                class: OperandClass::Value
            }
        );
    }

    #[test]
    fn test_sheet_removed() {
        let span = |first, last| Token::RefErr3d {
            sheets: SheetSpan {
                book: BookRef::Local,
                first,
                last,
            },
            class: OperandClass::Value,
        };
        let shifter = FormulaShifter::sheet_removed(1);
        assert_eq!(
            shifted(shifter, span(1, 1), Some(0)),
            Token::Error(CellError::Ref)
        );
        assert_eq!(shifted(shifter, span(0, 2), Some(0)), span(0, 1));
        assert_eq!(shifted(shifter, span(2, 3), Some(0)), span(1, 2));
        assert_eq!(shifted(shifter, span(0, 0), Some(0)), span(0, 0));

        let external = Token::Ref3d {
            sheets: SheetSpan::external(LinkId(0), 1),
            address: CellAddress::new(0, 0),
            class: OperandClass::Value,
        };
        assert_eq!(shifted(shifter, external.clone(), Some(0)), external);
    }

    #[test]
    fn test_sheet_moved() {
        let on = |sheet| Token::Ref3d {
            sheets: SheetSpan::local(sheet),
            address: CellAddress::new(0, 0),
            class: OperandClass::Value,
        };
        let shifter = FormulaShifter::sheet_moved(0, 2);
        assert_eq!(shifted(shifter, on(0), None), on(2));
        assert_eq!(shifted(shifter, on(1), None), on(0));
        assert_eq!(shifted(shifter, on(3), None), on(3));
    }

    #[test]
    fn test_adjust_reports_changes() {
        let shifter = FormulaShifter::rows(0, 10, 20, 1);
        let mut expr = TokenExpr::new(vec![cell(0, 0)]);
        assert!(!shifter.adjust(&mut expr, Some(0)));
        let mut expr = TokenExpr::new(vec![cell(15, 0)]);
        assert!(shifter.adjust(&mut expr, Some(0)));
    }
}
