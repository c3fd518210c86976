//! Worksheet type

use std::borrow::Cow;
use std::collections::BTreeMap;

use biffbook_core::{CellAddress, CellRange, CellValue, MAX_COLS, MAX_ROWS};
use biffbook_formula::{Axis, FormulaShifter, TokenExpr};
use biffbook_xls::BiffRecord;
use log::debug;

use crate::aggregate::{ArrayFormulaGroup, FormulaGroups, GroupRef, SharedFormulaGroup};
use crate::cell::{Cell, CellContent, FormulaBody, FormulaCell};
use crate::error::{Error, Result};
use crate::row::Row;

/// Sheet visibility, as stored in BOUNDSHEET
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SheetVisibility {
    #[default]
    Visible,
    Hidden,
    /// Hidden and not listed in Excel's unhide dialog
    VeryHidden,
}

impl SheetVisibility {
    pub fn code(&self) -> u8 {
        match self {
            SheetVisibility::Visible => 0,
            SheetVisibility::Hidden => 1,
            SheetVisibility::VeryHidden => 2,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code & 0x03 {
            1 => SheetVisibility::Hidden,
            2 => SheetVisibility::VeryHidden,
            _ => SheetVisibility::Visible,
        }
    }
}

/// What a sheet holds
///
/// Only worksheets are modelled; the others keep their records as read so
/// the sheet list (and every sheet index in formulas) stays intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SheetKind {
    #[default]
    Worksheet,
    MacroSheet,
    Chart,
    VbModule,
    Other(u8),
}

impl SheetKind {
    pub fn code(&self) -> u8 {
        match self {
            SheetKind::Worksheet => 0,
            SheetKind::MacroSheet => 1,
            SheetKind::Chart => 2,
            SheetKind::VbModule => 6,
            SheetKind::Other(code) => *code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => SheetKind::Worksheet,
            1 => SheetKind::MacroSheet,
            2 => SheetKind::Chart,
            6 => SheetKind::VbModule,
            other => SheetKind::Other(other),
        }
    }
}

/// A worksheet (single sheet in a workbook)
#[derive(Debug, Clone)]
pub struct Worksheet {
    /// Sheet name
    name: String,
    kind: SheetKind,
    visibility: SheetVisibility,
    /// Rows by index
    rows: BTreeMap<u32, Row>,
    /// Shared and array formulas
    groups: FormulaGroups,
    /// Records before DIMENSION the model does not cover, in file order
    pub(crate) leading_records: Vec<BiffRecord>,
    /// Records after the cell table the model does not cover, in file order
    pub(crate) trailing_records: Vec<BiffRecord>,
    /// Whole substream (BOF to EOF) of a sheet that is not a worksheet
    pub(crate) opaque_records: Vec<BiffRecord>,
}

impl Worksheet {
    /// Create a new worksheet with the given name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: SheetKind::Worksheet,
            visibility: SheetVisibility::Visible,
            rows: BTreeMap::new(),
            groups: FormulaGroups::new(),
            leading_records: Vec::new(),
            trailing_records: Vec::new(),
            opaque_records: Vec::new(),
        }
    }

    /// A sheet kept as raw records
    pub(crate) fn opaque<S: Into<String>>(name: S, kind: SheetKind, records: Vec<BiffRecord>) -> Self {
        Self {
            kind,
            opaque_records: records,
            ..Self::new(name)
        }
    }

    /// Get the sheet name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    pub fn kind(&self) -> SheetKind {
        self.kind
    }

    pub fn visibility(&self) -> SheetVisibility {
        self.visibility
    }

    pub fn set_visibility(&mut self, visibility: SheetVisibility) {
        self.visibility = visibility;
    }

    /// Shared and array formula groups on this sheet
    pub fn groups(&self) -> &FormulaGroups {
        &self.groups
    }

    // === Cell Access ===

    /// Get a cell by address string (e.g., "A1")
    pub fn cell(&self, address: &str) -> Result<Option<&Cell>> {
        let addr = CellAddress::parse(address)?;
        Ok(self.cell_at(addr.row, addr.col))
    }

    /// Get a cell by row and column indices
    pub fn cell_at(&self, row: u32, col: u16) -> Option<&Cell> {
        self.rows.get(&row).and_then(|r| r.cell(col))
    }

    fn cell_at_mut(&mut self, row: u32, col: u16) -> Option<&mut Cell> {
        self.rows.get_mut(&row).and_then(|r| r.cell_mut(col))
    }

    fn cell_or_blank(&mut self, row: u32, col: u16) -> &mut Cell {
        self.rows
            .entry(row)
            .or_insert_with(|| Row::new(row))
            .cell_or_blank(col)
    }

    /// Get cell value by address; formula cells report their cached value
    pub fn get_value(&self, address: &str) -> Result<CellValue> {
        let addr = CellAddress::parse(address)?;
        Ok(self.get_value_at(addr.row, addr.col))
    }

    /// Get cell value by indices
    pub fn get_value_at(&self, row: u32, col: u16) -> CellValue {
        self.cell_at(row, col)
            .map(Cell::value)
            .unwrap_or(CellValue::Empty)
    }

    /// The tokens a formula cell evaluates, with group formulas rebased
    /// to the cell
    pub fn formula_at(&self, row: u32, col: u16) -> Option<Cow<'_, TokenExpr>> {
        let formula = self.cell_at(row, col)?.formula()?;
        let cell = CellAddress::new(row, col);
        match &formula.body {
            FormulaBody::Own(tokens) => Some(Cow::Borrowed(tokens)),
            FormulaBody::Shared { anchor } => self
                .groups
                .shared(*anchor)
                .map(|g| Cow::Owned(g.formula_at(cell))),
            FormulaBody::Array { anchor } => self
                .groups
                .array(*anchor)
                .map(|g| Cow::Borrowed(g.formula())),
        }
    }

    /// XF index of a cell, if the cell exists
    pub fn cell_style_index_at(&self, row: u32, col: u16) -> Option<u16> {
        self.cell_at(row, col).map(|c| c.style)
    }

    /// Rows in index order
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn row(&self, index: u32) -> Option<&Row> {
        self.rows.get(&index)
    }

    /// Row for formatting changes, created if missing
    pub fn row_mut(&mut self, index: u32) -> Result<&mut Row> {
        validate_cell_position(index, 0)?;
        Ok(self.rows.entry(index).or_insert_with(|| Row::new(index)))
    }

    /// All cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (CellAddress, &Cell)> {
        self.rows.iter().flat_map(|(r, row)| {
            row.cells()
                .map(move |(c, cell)| (CellAddress::new(*r, c), cell))
        })
    }

    /// Number of cells
    pub fn cell_count(&self) -> usize {
        self.rows.values().map(Row::cell_count).sum()
    }

    /// First row holding a cell
    pub fn first_row(&self) -> Option<u32> {
        self.rows.values().find(|r| !r.is_empty()).map(|r| r.index)
    }

    /// Last row holding a cell (inclusive)
    pub fn last_row(&self) -> Option<u32> {
        self.rows.values().rev().find(|r| !r.is_empty()).map(|r| r.index)
    }

    /// Bounds of all cells, or `None` for a sheet without cells
    pub fn dimensions(&self) -> Option<CellRange> {
        let first_row = self.first_row()?;
        let last_row = self.last_row()?;
        let first_col = self.rows.values().filter_map(Row::first_col).min()?;
        let last_col = self.rows.values().filter_map(Row::last_col).max()?;
        Some(CellRange::from_indices(first_row, first_col, last_row, last_col))
    }

    // === Cell Modification ===

    /// Set a plain value by address string
    pub fn set_cell_value<V: Into<CellValue>>(&mut self, address: &str, value: V) -> Result<()> {
        let addr = CellAddress::parse(address)?;
        self.set_cell_value_at(addr.row, addr.col, value)
    }

    /// Set a plain value by row and column indices
    ///
    /// Fails with [`Error::ArrayFormulaConflict`] inside an array formula.
    /// A shared formula member is detached from its group; editing the
    /// anchor dissolves the group first.
    pub fn set_cell_value_at<V: Into<CellValue>>(&mut self, row: u32, col: u16, value: V) -> Result<()> {
        self.release_cell(row, col)?;
        self.cell_or_blank(row, col).content = CellContent::from_value(value.into());
        Ok(())
    }

    /// Give a cell its own formula, with the same group rules as
    /// [`set_cell_value_at`](Self::set_cell_value_at)
    pub fn set_formula_at(&mut self, row: u32, col: u16, tokens: TokenExpr) -> Result<()> {
        tokens.validate()?;
        self.release_cell(row, col)?;
        self.cell_or_blank(row, col).content = CellContent::Formula(FormulaCell::own(tokens));
        Ok(())
    }

    /// Remove a cell, with the same group rules as
    /// [`set_cell_value_at`](Self::set_cell_value_at)
    pub fn remove_cell_at(&mut self, row: u32, col: u16) -> Result<Option<Cell>> {
        self.release_cell(row, col)?;
        let Some(r) = self.rows.get_mut(&row) else {
            return Ok(None);
        };
        let removed = r.remove_cell(col);
        if r.is_empty() && !r.has_custom_settings() {
            self.rows.remove(&row);
        }
        Ok(removed)
    }

    /// Set the XF index of a cell, creating it blank if missing
    ///
    /// Styles may change anywhere, array formula members included.
    pub fn set_cell_style_index_at(&mut self, row: u32, col: u16, style: u16) -> Result<()> {
        validate_cell_position(row, col)?;
        self.cell_or_blank(row, col).style = style;
        Ok(())
    }

    /// Replace the cached result of a formula cell
    pub fn set_cached_result_at(&mut self, row: u32, col: u16, value: CellValue) -> Result<()> {
        let formula = self
            .cell_at_mut(row, col)
            .and_then(Cell::formula_mut)
            .ok_or(Error::NotAFormula(CellAddress::new(row, col)))?;
        formula.cached = value;
        Ok(())
    }

    /// Make a cell free to receive new content
    fn release_cell(&mut self, row: u32, col: u16) -> Result<()> {
        validate_cell_position(row, col)?;
        let cell = CellAddress::new(row, col);
        match self.cell_at(row, col).and_then(|c| c.formula()).map(|f| &f.body) {
            Some(FormulaBody::Array { anchor }) => {
                let range = self
                    .groups
                    .array(*anchor)
                    .map_or(CellRange::single(*anchor), ArrayFormulaGroup::range);
                Err(Error::ArrayFormulaConflict { cell, range })
            }
            Some(FormulaBody::Shared { anchor }) if anchor.position() == cell.position() => {
                let anchor = *anchor;
                self.dissolve(GroupRef::Shared(anchor));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // === Formula Groups ===

    /// Store one formula for all cells of `range`
    ///
    /// `formula` is written as seen from the top-left cell; every other cell
    /// sees it rebased to its own position. Missing cells are created and
    /// existing cells keep their style. Fails with [`Error::Overlap`] if
    /// the range meets another shared or array formula.
    pub fn create_shared_formula(&mut self, range: CellRange, formula: TokenExpr) -> Result<()> {
        let anchor = self.prepare_group(&range, &formula)?;
        for addr in range.cells() {
            self.cell_or_blank(addr.row, addr.col).content =
                CellContent::Formula(FormulaCell::new(FormulaBody::Shared { anchor }));
        }
        self.groups
            .insert_shared(SharedFormulaGroup::new(normalized(range), formula));
        debug!("created shared formula {} on '{}'", range, self.name);
        Ok(())
    }

    /// Enter `formula` as an array formula over `range`
    ///
    /// Every cell of the rectangle becomes a member. Fails with
    /// [`Error::Overlap`] if the range meets another shared or array formula.
    pub fn create_array_formula(&mut self, range: CellRange, formula: TokenExpr) -> Result<()> {
        let anchor = self.prepare_group(&range, &formula)?;
        for addr in range.cells() {
            self.cell_or_blank(addr.row, addr.col).content =
                CellContent::Formula(FormulaCell::new(FormulaBody::Array { anchor }));
        }
        self.groups
            .insert_array(ArrayFormulaGroup::new(normalized(range), formula));
        debug!("created array formula {} on '{}'", range, self.name);
        Ok(())
    }

    fn prepare_group(&self, range: &CellRange, formula: &TokenExpr) -> Result<CellAddress> {
        range.validate()?;
        formula.validate()?;
        if let Some(existing) = self.groups.find_overlap(range) {
            return Err(Error::Overlap {
                range: *range,
                existing,
            });
        }
        Ok(range.start.relative())
    }

    /// Turn every member of a group into a cell with its own formula
    ///
    /// Shared members get the group formula rebased to their position,
    /// array members get it unchanged. Returns `false` if the group does
    /// not exist (already dissolved).
    pub fn dissolve(&mut self, group: GroupRef) -> bool {
        match group {
            GroupRef::Shared(anchor) => {
                let Some(shared) = self.groups.remove_shared(anchor) else {
                    return false;
                };
                let members = self.members_of(&shared.range(), group);
                for addr in members {
                    let tokens = shared.formula_at(addr);
                    self.set_body(addr, FormulaBody::Own(tokens));
                }
                debug!("dissolved shared formula {} on '{}'", shared.range(), self.name);
            }
            GroupRef::Array(anchor) => {
                let Some(array) = self.groups.remove_array(anchor) else {
                    return false;
                };
                let members = self.members_of(&array.range(), group);
                for addr in members {
                    self.set_body(addr, FormulaBody::Own(array.formula().clone()));
                }
                debug!("dissolved array formula {} on '{}'", array.range(), self.name);
            }
        }
        true
    }

    /// Remove the array formula covering exactly `range`, leaving its cells
    /// blank with their styles
    pub fn remove_array_formula(&mut self, range: &CellRange) -> bool {
        let anchor = range.start.relative();
        match self.groups.array(anchor) {
            Some(array) if normalized(array.range()) == normalized(*range) => {}
            _ => return false,
        }
        let members = self.members_of(range, GroupRef::Array(anchor));
        self.groups.remove_array(anchor);
        for addr in members {
            if let Some(cell) = self.cell_at_mut(addr.row, addr.col) {
                cell.content = CellContent::Blank;
            }
        }
        debug!("removed array formula {} on '{}'", range, self.name);
        true
    }

    /// Cells of `range` that still point at `group`
    pub fn members_of(&self, range: &CellRange, group: GroupRef) -> Vec<CellAddress> {
        let anchor = group.anchor().position();
        range
            .cells()
            .filter(|addr| {
                let body = self
                    .cell_at(addr.row, addr.col)
                    .and_then(Cell::formula)
                    .map(|f| &f.body);
                match (body, group) {
                    (Some(FormulaBody::Shared { anchor: a }), GroupRef::Shared(_))
                    | (Some(FormulaBody::Array { anchor: a }), GroupRef::Array(_)) => {
                        a.position() == anchor
                    }
                    _ => false,
                }
            })
            .map(|addr| addr.relative())
            .collect()
    }

    fn set_body(&mut self, addr: CellAddress, body: FormulaBody) {
        if let Some(formula) = self.cell_at_mut(addr.row, addr.col).and_then(Cell::formula_mut) {
            formula.body = body;
        }
    }

    // === Structural Edits ===

    /// Move rows or columns `first..=last` by `delta`, with everything in
    /// them: cells, rows and formula groups
    ///
    /// Cells on the destination that are not part of the block are
    /// overwritten. Formula tokens are not touched here; the workbook runs
    /// the shifter over every formula afterwards.
    pub(crate) fn move_block(&mut self, axis: Axis, first: u32, last: u32, delta: i64) -> Result<()> {
        validate_block(axis, first, last, delta)?;
        let plan = self.groups.plan_shift(axis, first, last, delta)?;
        let dest_first = (first as i64 + delta) as u32;
        let dest_last = (last as i64 + delta) as u32;

        match axis {
            Axis::Rows => {
                let moved: Vec<u32> = self.rows.range(first..=last).map(|(r, _)| *r).collect();
                let moved: Vec<Row> = moved.iter().filter_map(|r| self.rows.remove(r)).collect();
                let doomed: Vec<u32> = self
                    .rows
                    .range(dest_first..=dest_last)
                    .map(|(r, _)| *r)
                    .collect();
                for r in doomed {
                    self.rows.remove(&r);
                }
                for mut row in moved {
                    row.index = (row.index as i64 + delta) as u32;
                    self.rows.insert(row.index, row);
                }
            }
            Axis::Columns => {
                for row in self.rows.values_mut() {
                    let moved = row.take_cells(first as u16, last as u16);
                    row.take_cells(dest_first as u16, dest_last as u16);
                    for (col, cell) in moved {
                        row.set_cell((col as i64 + delta) as u16, cell);
                    }
                }
            }
        }

        for group in &plan.overwritten {
            match group {
                GroupRef::Shared(anchor) => {
                    self.groups.remove_shared(*anchor);
                }
                GroupRef::Array(anchor) => {
                    self.groups.remove_array(*anchor);
                }
            }
        }

        let (row_delta, col_delta) = match axis {
            Axis::Rows => (delta, 0),
            Axis::Columns => (0, delta),
        };
        let mut shared = Vec::new();
        let mut arrays = Vec::new();
        for group in &plan.moved {
            match group {
                GroupRef::Shared(anchor) => shared.extend(self.groups.remove_shared(*anchor)),
                GroupRef::Array(anchor) => arrays.extend(self.groups.remove_array(*anchor)),
            }
        }
        for mut group in shared {
            let old = group.anchor();
            if let Some(range) = group.range().offset(row_delta, col_delta) {
                group.set_range(range);
                let anchor = group.anchor();
                self.repoint_members(&range, old, FormulaBody::Shared { anchor });
                self.groups.insert_shared(group);
            }
        }
        for mut group in arrays {
            let old = group.anchor();
            if let Some(range) = group.range().offset(row_delta, col_delta) {
                group.set_range(range);
                let anchor = group.anchor();
                self.repoint_members(&range, old, FormulaBody::Array { anchor });
                self.groups.insert_array(group);
            }
        }
        Ok(())
    }

    fn repoint_members(&mut self, range: &CellRange, old: CellAddress, body: FormulaBody) {
        for addr in range.cells() {
            if let Some(formula) = self.cell_at_mut(addr.row, addr.col).and_then(Cell::formula_mut) {
                let points_at_old = match (&formula.body, &body) {
                    (FormulaBody::Shared { anchor }, FormulaBody::Shared { .. })
                    | (FormulaBody::Array { anchor }, FormulaBody::Array { .. }) => {
                        anchor.position() == old.position()
                    }
                    _ => false,
                };
                if points_at_old {
                    formula.body = body.clone();
                }
            }
        }
    }

    /// Run `shifter` over every formula hosted on this sheet
    ///
    /// A shared formula stays shared only if every member still equals the
    /// adjusted group formula rebased to it; otherwise the group is
    /// dissolved into the adjusted per-cell formulas.
    pub(crate) fn adjust_formulas(&mut self, shifter: &FormulaShifter, host: usize) {
        for row in self.rows.values_mut() {
            for (_, cell) in row.cells_mut() {
                if let Some(FormulaCell {
                    body: FormulaBody::Own(tokens),
                    ..
                }) = cell.formula_mut()
                {
                    shifter.adjust(tokens, Some(host));
                }
            }
        }
        for array in self.groups.arrays_mut() {
            shifter.adjust(array.formula_mut(), Some(host));
        }

        for anchor in self.groups.shared_anchors() {
            let Some(group) = self.groups.shared(anchor) else {
                continue;
            };
            let mut shifted = group.formula().clone();
            shifter.adjust(&mut shifted, Some(host));

            let members = self.members_of(&group.range(), GroupRef::Shared(anchor));
            let mut adjusted = Vec::with_capacity(members.len());
            let mut consistent = true;
            for addr in members {
                let mut tokens = group.formula_at(addr);
                shifter.adjust(&mut tokens, Some(host));
                consistent &= tokens == shifted.rebase(anchor, addr);
                adjusted.push((addr, tokens));
            }

            if consistent {
                if let Some(group) = self.groups.shared_mut(anchor) {
                    group.set_formula(shifted);
                }
            } else {
                let range = group.range();
                self.groups.remove_shared(anchor);
                for (addr, tokens) in adjusted {
                    self.set_body(addr, FormulaBody::Own(tokens));
                }
                debug!(
                    "dissolved shared formula {} on '{}': members no longer share one formula",
                    range, self.name
                );
            }
        }
    }

    /// Visit every stored formula: own cell formulas and group formulas
    pub(crate) fn for_each_formula_mut(&mut self, mut f: impl FnMut(&mut TokenExpr)) {
        for row in self.rows.values_mut() {
            for (_, cell) in row.cells_mut() {
                if let Some(FormulaCell {
                    body: FormulaBody::Own(tokens),
                    ..
                }) = cell.formula_mut()
                {
                    f(tokens);
                }
            }
        }
        for group in self.groups.shared_groups_mut() {
            f(group.formula_mut());
        }
        for group in self.groups.arrays_mut() {
            f(group.formula_mut());
        }
    }

    /// Every stored formula, as [`for_each_formula_mut`](Self::for_each_formula_mut) visits them
    pub fn formulas(&self) -> impl Iterator<Item = &TokenExpr> {
        let own = self.rows.values().flat_map(|row| {
            row.cells().filter_map(|(_, cell)| match cell.formula() {
                Some(FormulaCell {
                    body: FormulaBody::Own(tokens),
                    ..
                }) => Some(tokens),
                _ => None,
            })
        });
        own.chain(self.groups.shared_groups().map(SharedFormulaGroup::formula))
            .chain(self.groups.array_groups().map(ArrayFormulaGroup::formula))
    }

    // === Reading ===

    /// Add a cell read from a file; group rules are not applied
    pub(crate) fn insert_cell(&mut self, row: u32, col: u16, cell: Cell) {
        self.rows
            .entry(row)
            .or_insert_with(|| Row::new(row))
            .set_cell(col, cell);
    }

    pub(crate) fn insert_row(&mut self, row: Row) {
        match self.rows.get_mut(&row.index) {
            Some(existing) => {
                existing.height = row.height;
                existing.hidden = row.hidden;
                existing.outline_level = row.outline_level;
                existing.collapsed = row.collapsed;
                existing.style_index = row.style_index;
            }
            None => {
                self.rows.insert(row.index, row);
            }
        }
    }

    pub(crate) fn groups_mut(&mut self) -> &mut FormulaGroups {
        &mut self.groups
    }
}

/// Copy of `range` with both corners relative
fn normalized(range: CellRange) -> CellRange {
    CellRange::new(range.start.relative(), range.end.relative())
}

fn validate_cell_position(row: u32, col: u16) -> Result<()> {
    CellAddress::new(row, col).validate()?;
    Ok(())
}

fn validate_block(axis: Axis, first: u32, last: u32, delta: i64) -> Result<()> {
    let limit = i64::from(axis.limit());
    let out_of_bounds = |index: Option<i64>| {
        let index = index.map_or(u32::MAX, |i| u32::try_from(i.max(0)).unwrap_or(u32::MAX));
        match axis {
            Axis::Rows => biffbook_core::Error::RowOutOfBounds(index, MAX_ROWS - 1),
            Axis::Columns => biffbook_core::Error::ColumnOutOfBounds(index, MAX_COLS - 1),
        }
    };
    if first > last {
        return Err(biffbook_core::Error::InvalidRange(format!("{first} > {last}")).into());
    }
    if i64::from(last) >= limit {
        return Err(out_of_bounds(Some(i64::from(last))).into());
    }
    let moved_first = i64::from(first).checked_add(delta);
    if moved_first.map_or(true, |i| i < 0) {
        return Err(out_of_bounds(moved_first).into());
    }
    let moved_last = i64::from(last).checked_add(delta);
    if moved_last.map_or(true, |i| i >= limit) {
        return Err(out_of_bounds(moved_last).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use biffbook_formula::{BinaryOperator, OperandClass, Token};
    use pretty_assertions::assert_eq;

    fn times_two(row: u32, col: u16) -> TokenExpr {
        TokenExpr::new(vec![
            Token::Ref {
                address: CellAddress::new(row, col),
                class: OperandClass::Value,
            },
            Token::Integer(2),
            Token::Binary(BinaryOperator::Multiply),
        ])
    }

    fn range(text: &str) -> CellRange {
        CellRange::parse(text).unwrap()
    }

    #[test]
    fn test_dimensions_track_cells() {
        let mut ws = Worksheet::new("Sheet1");
        assert_eq!(ws.dimensions(), None);

        ws.set_cell_value("C5", 1.0).unwrap();
        ws.set_cell_value("B9", "x").unwrap();
        assert_eq!(ws.dimensions(), Some(range("B5:C9")));

        ws.remove_cell_at(8, 1).unwrap();
        assert_eq!(ws.dimensions(), Some(range("C5")));
        assert_eq!((ws.first_row(), ws.last_row()), (Some(4), Some(4)));
    }

    #[test]
    fn test_out_of_range_cell_is_rejected() {
        let mut ws = Worksheet::new("Sheet1");
        assert!(matches!(
            ws.set_cell_value_at(MAX_ROWS, 0, 1.0),
            Err(Error::Core(biffbook_core::Error::RowOutOfBounds(..)))
        ));
        assert_eq!(ws.cell_count(), 0);
    }

    #[test]
    fn test_shared_members_see_rebased_tokens() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_shared_formula(range("B2:B5"), times_two(1, 0)).unwrap();

        assert_eq!(ws.cell_count(), 4);
        for row in 1..=4 {
            assert_eq!(ws.formula_at(row, 1).unwrap().into_owned(), times_two(row, 0));
        }
    }

    #[test]
    fn test_overlapping_group_is_rejected() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_shared_formula(range("B2:B5"), times_two(1, 0)).unwrap();
        let before = ws.cell_count();

        let err = ws.create_array_formula(range("A4:C4"), times_two(0, 0)).unwrap_err();
        assert!(matches!(err, Error::Overlap { existing, .. } if existing == range("B2:B5")));
        assert_eq!(ws.cell_count(), before);
        assert!(ws.cell_at(3, 0).is_none());
    }

    #[test]
    fn test_edit_inside_array_fails_without_change() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_array_formula(range("A1:B2"), times_two(5, 5)).unwrap();
        let snapshot: Vec<Cell> = ws.cells().map(|(_, c)| c.clone()).collect();

        assert!(matches!(
            ws.set_cell_value_at(1, 1, 3.0),
            Err(Error::ArrayFormulaConflict { .. })
        ));
        assert!(matches!(
            ws.remove_cell_at(0, 0),
            Err(Error::ArrayFormulaConflict { .. })
        ));
        let after: Vec<Cell> = ws.cells().map(|(_, c)| c.clone()).collect();
        assert_eq!(after, snapshot);

        // styles are not content
        ws.set_cell_style_index_at(1, 1, 20).unwrap();
        assert_eq!(ws.cell_style_index_at(1, 1), Some(20));
    }

    #[test]
    fn test_editing_shared_anchor_dissolves_group() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_shared_formula(range("B2:B4"), times_two(1, 0)).unwrap();
        ws.set_cell_value_at(1, 1, 7.0).unwrap();

        assert!(ws.groups().is_empty());
        assert_eq!(ws.get_value_at(1, 1), CellValue::Number(7.0));
        assert_eq!(ws.formula_at(3, 1).unwrap().into_owned(), times_two(3, 0));
    }

    #[test]
    fn test_editing_shared_member_detaches_it() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_shared_formula(range("B2:B4"), times_two(1, 0)).unwrap();
        ws.set_cell_value_at(2, 1, 7.0).unwrap();

        let anchor = CellAddress::new(1, 1);
        assert!(ws.groups().shared(anchor).is_some());
        assert_eq!(
            ws.members_of(&range("B2:B4"), GroupRef::Shared(anchor)),
            vec![CellAddress::new(1, 1), CellAddress::new(3, 1)]
        );
    }

    #[test]
    fn test_dissolve_is_idempotent() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_shared_formula(range("C1:D3"), times_two(0, 0)).unwrap();
        let expected: Vec<TokenExpr> = range("C1:D3")
            .cells()
            .map(|a| ws.formula_at(a.row, a.col).unwrap().into_owned())
            .collect();

        let group = GroupRef::Shared(CellAddress::new(0, 2));
        assert!(ws.dissolve(group));
        assert!(!ws.dissolve(group));

        let after: Vec<TokenExpr> = range("C1:D3")
            .cells()
            .map(|a| ws.formula_at(a.row, a.col).unwrap().into_owned())
            .collect();
        assert_eq!(after, expected);
        assert!(ws.groups().is_empty());
    }

    #[test]
    fn test_remove_array_formula_blanks_cells() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_array_formula(range("A1:A3"), times_two(5, 5)).unwrap();
        assert!(!ws.remove_array_formula(&range("A1:A2")));
        assert!(ws.remove_array_formula(&range("A1:A3")));
        assert!(ws.groups().is_empty());
        assert!(ws.cells().all(|(_, c)| c.content == CellContent::Blank));
    }

    #[test]
    fn test_cached_result_on_plain_cell_is_an_error() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_value_at(0, 0, 1.0).unwrap();
        assert!(matches!(
            ws.set_cached_result_at(0, 0, CellValue::Number(2.0)),
            Err(Error::NotAFormula(_))
        ));
    }

    #[test]
    fn test_move_block_carries_groups() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_shared_formula(range("B2:B4"), times_two(1, 0)).unwrap();
        ws.set_cell_value("A12", 1.0).unwrap();

        ws.move_block(Axis::Rows, 0, 5, 10).unwrap();

        let anchor = CellAddress::new(11, 1);
        assert_eq!(ws.groups().shared(anchor).map(|g| g.range()), Some(range("B12:B14")));
        assert_eq!(ws.members_of(&range("B12:B14"), GroupRef::Shared(anchor)).len(), 3);
        // A12 lay in the destination and was overwritten
        assert!(ws.cell_at(11, 0).is_none());
    }

    #[test]
    fn test_move_block_rejects_split_and_bounds() {
        let mut ws = Worksheet::new("Sheet1");
        ws.create_array_formula(range("C3:D4"), times_two(0, 0)).unwrap();

        assert!(matches!(
            ws.move_block(Axis::Columns, 3, 10, 1),
            Err(Error::GroupSplit { .. })
        ));
        assert!(matches!(
            ws.move_block(Axis::Columns, 250, 255, 1),
            Err(Error::Core(biffbook_core::Error::ColumnOutOfBounds(..)))
        ));
        assert_eq!(ws.groups().array(CellAddress::new(2, 2)).map(|g| g.range()), Some(range("C3:D4")));
    }
}
