//! Row type

use std::collections::BTreeMap;

use crate::cell::Cell;

/// A row: its cells in column order plus row formatting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    /// Row index (0-based)
    pub index: u32,
    /// Custom height in twips (None = default)
    pub height: Option<u16>,
    /// Row is hidden
    pub hidden: bool,
    /// Outline/grouping level (0-7)
    pub outline_level: u8,
    /// Row is collapsed (in outline)
    pub collapsed: bool,
    /// Row-level XF index (None = no row style)
    pub style_index: Option<u16>,
    cells: BTreeMap<u16, Cell>,
}

impl Row {
    /// Create a new row with default settings
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Check if this row has any custom settings
    pub fn has_custom_settings(&self) -> bool {
        self.height.is_some()
            || self.hidden
            || self.outline_level > 0
            || self.style_index.is_some()
            || self.collapsed
    }

    pub fn cell(&self, col: u16) -> Option<&Cell> {
        self.cells.get(&col)
    }

    pub fn cell_mut(&mut self, col: u16) -> Option<&mut Cell> {
        self.cells.get_mut(&col)
    }

    /// Insert or replace a cell, returning the previous one
    pub fn set_cell(&mut self, col: u16, cell: Cell) -> Option<Cell> {
        self.cells.insert(col, cell)
    }

    pub fn remove_cell(&mut self, col: u16) -> Option<Cell> {
        self.cells.remove(&col)
    }

    /// The cell at `col`, created blank if missing
    pub fn cell_or_blank(&mut self, col: u16) -> &mut Cell {
        self.cells.entry(col).or_default()
    }

    /// Cells in column order
    pub fn cells(&self) -> impl Iterator<Item = (u16, &Cell)> {
        self.cells.iter().map(|(c, cell)| (*c, cell))
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = (u16, &mut Cell)> {
        self.cells.iter_mut().map(|(c, cell)| (*c, cell))
    }

    /// First occupied column
    pub fn first_col(&self) -> Option<u16> {
        self.cells.keys().next().copied()
    }

    /// Last occupied column (inclusive)
    pub fn last_col(&self) -> Option<u16> {
        self.cells.keys().next_back().copied()
    }

    /// Check if row has any cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of cells in row
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Take the cells whose column lies in `first..=last`
    pub(crate) fn take_cells(&mut self, first: u16, last: u16) -> Vec<(u16, Cell)> {
        let cols: Vec<u16> = self.cells.range(first..=last).map(|(c, _)| *c).collect();
        cols.into_iter()
            .filter_map(|c| self.cells.remove(&c).map(|cell| (c, cell)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellContent;

    #[test]
    fn test_column_bounds_follow_inserts_and_removes() {
        let mut row = Row::new(4);
        assert_eq!(row.first_col(), None);

        row.set_cell(7, Cell::new(CellContent::Number(1.0)));
        row.set_cell(2, Cell::blank());
        row.set_cell(9, Cell::new(CellContent::Boolean(true)));
        assert_eq!((row.first_col(), row.last_col()), (Some(2), Some(9)));

        row.remove_cell(9);
        assert_eq!(row.last_col(), Some(7));
        row.remove_cell(2);
        assert_eq!(row.first_col(), Some(7));
    }

    #[test]
    fn test_take_cells_in_range() {
        let mut row = Row::new(0);
        for col in [1, 3, 5, 7] {
            row.set_cell(col, Cell::blank());
        }
        let taken: Vec<u16> = row.take_cells(3, 6).into_iter().map(|(c, _)| c).collect();
        assert_eq!(taken, vec![3, 5]);
        assert_eq!(row.cell_count(), 2);
    }
}
