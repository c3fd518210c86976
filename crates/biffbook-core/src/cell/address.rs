//! Cell address and range types

use crate::error::{Error, Result};
use crate::{MAX_COLS, MAX_ROWS};
use std::fmt;
use std::str::FromStr;

/// Move a row index by `delta`, or `None` if the result leaves the sheet.
///
/// Every coordinate shift in the workspace (shared-formula rebasing, row
/// moves) goes through this function and [`offset_col`], so they agree on
/// what "past the boundary" means.
#[inline]
pub fn offset_row(row: u32, delta: i64) -> Option<u32> {
    let moved = i64::from(row).checked_add(delta)?;
    if (0..i64::from(MAX_ROWS)).contains(&moved) {
        Some(moved as u32)
    } else {
        None
    }
}

/// Move a column index by `delta`, or `None` if the result leaves the sheet.
#[inline]
pub fn offset_col(col: u16, delta: i64) -> Option<u16> {
    let moved = i64::from(col).checked_add(delta)?;
    if (0..i64::from(MAX_COLS)).contains(&moved) {
        Some(moved as u16)
    } else {
        None
    }
}

/// A cell address (e.g., "A1", "$B$2")
///
/// BIFF8 addresses use column letters A-IV and row numbers 1-65536. The
/// optional `$` prefix marks an axis absolute: it is left alone when the
/// formula holding the reference is copied or shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellAddress {
    /// Row index (0-based internally, 1-based in display)
    pub row: u32,
    /// Column index (0-based, A=0, B=1, ..., IV=255)
    pub col: u16,
    /// Whether the row reference is absolute ($)
    pub row_absolute: bool,
    /// Whether the column reference is absolute ($)
    pub col_absolute: bool,
}

impl CellAddress {
    /// Create a new cell address with relative references
    pub fn new(row: u32, col: u16) -> Self {
        Self {
            row,
            col,
            row_absolute: false,
            col_absolute: false,
        }
    }

    /// Create a new cell address with specified absolute/relative flags
    pub fn with_absolute(row: u32, col: u16, row_absolute: bool, col_absolute: bool) -> Self {
        Self {
            row,
            col,
            row_absolute,
            col_absolute,
        }
    }

    /// Create an absolute cell address ($A$1 style)
    pub fn absolute(row: u32, col: u16) -> Self {
        Self {
            row,
            col,
            row_absolute: true,
            col_absolute: true,
        }
    }

    /// Parse a cell address from A1-style notation
    ///
    /// # Examples
    /// ```
    /// use biffbook_core::CellAddress;
    ///
    /// let addr = CellAddress::parse("A1").unwrap();
    /// assert_eq!(addr.row, 0);
    /// assert_eq!(addr.col, 0);
    ///
    /// let addr = CellAddress::parse("$B$2").unwrap();
    /// assert_eq!(addr.row, 1);
    /// assert_eq!(addr.col, 1);
    /// assert!(addr.row_absolute);
    /// assert!(addr.col_absolute);
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidAddress("empty address".into()));
        }

        let bytes = s.as_bytes();
        let mut pos = 0;

        let col_absolute = if bytes.get(pos) == Some(&b'$') {
            pos += 1;
            true
        } else {
            false
        };

        let col_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }

        if pos == col_start {
            return Err(Error::InvalidAddress(format!(
                "no column letters in '{}'",
                s
            )));
        }

        let col = Self::letters_to_column(&s[col_start..pos])?;

        let row_absolute = if bytes.get(pos) == Some(&b'$') {
            pos += 1;
            true
        } else {
            false
        };

        let row_str = &s[pos..];
        if row_str.is_empty() {
            return Err(Error::InvalidAddress(format!("no row number in '{}'", s)));
        }

        let row: u32 = row_str
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("invalid row number in '{}'", s)))?;

        if row == 0 {
            return Err(Error::InvalidAddress(format!(
                "row number must be >= 1 in '{}'",
                s
            )));
        }

        let row = row - 1;
        if row >= MAX_ROWS {
            return Err(Error::RowOutOfBounds(row, MAX_ROWS - 1));
        }

        Ok(Self {
            row,
            col,
            row_absolute,
            col_absolute,
        })
    }

    /// Convert column index to letters (0 = A, 25 = Z, 26 = AA, etc.)
    pub fn column_to_letters(col: u16) -> String {
        let mut result = String::new();
        let mut n = col as u32 + 1;

        while n > 0 {
            n -= 1;
            let c = ((n % 26) as u8 + b'A') as char;
            result.insert(0, c);
            n /= 26;
        }

        result
    }

    /// Convert column letters to index (A = 0, Z = 25, AA = 26, etc.)
    pub fn letters_to_column(letters: &str) -> Result<u16> {
        if letters.is_empty() {
            return Err(Error::InvalidAddress("empty column letters".into()));
        }
        // IV is the last BIFF8 column; anything longer cannot be valid
        if letters.len() > 3 {
            return Err(Error::ColumnOutOfBounds(u32::MAX, MAX_COLS - 1));
        }

        let mut col: u32 = 0;
        for c in letters.chars() {
            if !c.is_ascii_alphabetic() {
                return Err(Error::InvalidAddress(format!(
                    "invalid column letter '{}'",
                    c
                )));
            }
            col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        }

        let col = col - 1;
        if col >= MAX_COLS as u32 {
            return Err(Error::ColumnOutOfBounds(col, MAX_COLS - 1));
        }

        Ok(col as u16)
    }

    /// Format as A1-style string
    pub fn to_a1_string(&self) -> String {
        let mut result = String::new();

        if self.col_absolute {
            result.push('$');
        }
        result.push_str(&Self::column_to_letters(self.col));

        if self.row_absolute {
            result.push('$');
        }
        result.push_str(&(self.row + 1).to_string());

        result
    }

    /// The (row, column) pair, ignoring absolute flags.
    ///
    /// Used as the key of row-major maps.
    pub fn position(&self) -> (u32, u16) {
        (self.row, self.col)
    }

    /// Same position with both axes relative.
    pub fn relative(&self) -> Self {
        Self::new(self.row, self.col)
    }

    /// Check that the address lies inside the BIFF8 grid.
    pub fn validate(&self) -> Result<()> {
        if self.row >= MAX_ROWS {
            return Err(Error::RowOutOfBounds(self.row, MAX_ROWS - 1));
        }
        if self.col >= MAX_COLS {
            return Err(Error::ColumnOutOfBounds(self.col as u32, MAX_COLS - 1));
        }
        Ok(())
    }

    /// Create a range from this address to another
    pub fn to(&self, other: CellAddress) -> CellRange {
        CellRange::new(*self, other)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1_string())
    }
}

impl FromStr for CellAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A range of cells (e.g., "A1:B10")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellRange {
    /// Start address (top-left)
    pub start: CellAddress,
    /// End address (bottom-right)
    pub end: CellAddress,
}

impl CellRange {
    /// Create a new cell range
    pub fn new(start: CellAddress, end: CellAddress) -> Self {
        // Normalize so start is top-left and end is bottom-right
        let (start_row, end_row) = if start.row <= end.row {
            (start.row, end.row)
        } else {
            (end.row, start.row)
        };

        let (start_col, end_col) = if start.col <= end.col {
            (start.col, end.col)
        } else {
            (end.col, start.col)
        };

        Self {
            start: CellAddress::with_absolute(
                start_row,
                start_col,
                start.row_absolute,
                start.col_absolute,
            ),
            end: CellAddress::with_absolute(end_row, end_col, end.row_absolute, end.col_absolute),
        }
    }

    /// Create a range from row/column indices
    pub fn from_indices(start_row: u32, start_col: u16, end_row: u32, end_col: u16) -> Self {
        Self::new(
            CellAddress::new(start_row, start_col),
            CellAddress::new(end_row, end_col),
        )
    }

    /// Create a single-cell range
    pub fn single(addr: CellAddress) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Parse a range from A1:B10 notation
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(colon_pos) = s.find(':') {
            let start = CellAddress::parse(&s[..colon_pos])?;
            let end = CellAddress::parse(&s[colon_pos + 1..])?;
            Ok(Self::new(start, end))
        } else {
            let addr = CellAddress::parse(s)?;
            Ok(Self::single(addr))
        }
    }

    /// Check if a cell is within this range
    pub fn contains(&self, addr: &CellAddress) -> bool {
        self.contains_position(addr.row, addr.col)
    }

    /// Check if a (row, column) position is within this range
    pub fn contains_position(&self, row: u32, col: u16) -> bool {
        row >= self.start.row && row <= self.end.row && col >= self.start.col && col <= self.end.col
    }

    /// Check if `other` lies entirely inside this range
    pub fn contains_range(&self, other: &CellRange) -> bool {
        self.contains(&other.start) && self.contains(&other.end)
    }

    /// Get the number of rows in the range
    pub fn row_count(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    /// Get the number of columns in the range
    pub fn col_count(&self) -> u16 {
        self.end.col - self.start.col + 1
    }

    /// Get the total number of cells in the range
    pub fn cell_count(&self) -> u64 {
        self.row_count() as u64 * self.col_count() as u64
    }

    /// Whether the range covers exactly one cell
    pub fn is_single_cell(&self) -> bool {
        self.start.position() == self.end.position()
    }

    /// Check if this range overlaps with another
    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.start.row <= other.end.row
            && self.end.row >= other.start.row
            && self.start.col <= other.end.col
            && self.end.col >= other.start.col
    }

    /// Get the intersection of two ranges, if any
    pub fn intersect(&self, other: &CellRange) -> Option<CellRange> {
        if !self.overlaps(other) {
            return None;
        }

        Some(CellRange::from_indices(
            self.start.row.max(other.start.row),
            self.start.col.max(other.start.col),
            self.end.row.min(other.end.row),
            self.end.col.min(other.end.col),
        ))
    }

    /// Move the whole range, or `None` if any corner would leave the sheet
    pub fn offset(&self, row_delta: i64, col_delta: i64) -> Option<CellRange> {
        Some(CellRange::from_indices(
            offset_row(self.start.row, row_delta)?,
            offset_col(self.start.col, col_delta)?,
            offset_row(self.end.row, row_delta)?,
            offset_col(self.end.col, col_delta)?,
        ))
    }

    /// Check that both corners lie inside the BIFF8 grid
    pub fn validate(&self) -> Result<()> {
        self.start.validate()?;
        self.end.validate()
    }

    /// Iterate over all cell addresses in the range (row by row)
    pub fn cells(&self) -> CellRangeIterator {
        CellRangeIterator {
            range: *self,
            current_row: self.start.row,
            current_col: self.start.col,
            remaining: self.cell_count(),
        }
    }

    /// Format as A1:B10 string
    pub fn to_a1_string(&self) -> String {
        if self.start == self.end {
            self.start.to_a1_string()
        } else {
            format!("{}:{}", self.start.to_a1_string(), self.end.to_a1_string())
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1_string())
    }
}

impl FromStr for CellRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Iterator over cells in a range
pub struct CellRangeIterator {
    range: CellRange,
    current_row: u32,
    current_col: u16,
    remaining: u64,
}

impl Iterator for CellRangeIterator {
    type Item = CellAddress;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let addr = CellAddress::new(self.current_row, self.current_col);
        self.remaining -= 1;

        if self.current_col == self.range.end.col {
            self.current_col = self.range.start.col;
            self.current_row += 1;
        } else {
            self.current_col += 1;
        }

        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CellRangeIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_column_to_letters() {
        assert_eq!(CellAddress::column_to_letters(0), "A");
        assert_eq!(CellAddress::column_to_letters(25), "Z");
        assert_eq!(CellAddress::column_to_letters(26), "AA");
        assert_eq!(CellAddress::column_to_letters(255), "IV");
    }

    #[test]
    fn test_letters_to_column() {
        assert_eq!(CellAddress::letters_to_column("A").unwrap(), 0);
        assert_eq!(CellAddress::letters_to_column("ab").unwrap(), 27);
        assert_eq!(CellAddress::letters_to_column("IV").unwrap(), 255);
        assert!(CellAddress::letters_to_column("IW").is_err());
        assert!(CellAddress::letters_to_column("XFD").is_err());
    }

    #[test]
    fn test_cell_address_parse() {
        let addr = CellAddress::parse("B2").unwrap();
        assert_eq!(addr.position(), (1, 1));
        assert!(!addr.row_absolute && !addr.col_absolute);

        let addr = CellAddress::parse("$A1").unwrap();
        assert!(addr.col_absolute);
        assert!(!addr.row_absolute);

        let addr = CellAddress::parse("A$1").unwrap();
        assert!(!addr.col_absolute);
        assert!(addr.row_absolute);

        let addr = CellAddress::parse("IV65536").unwrap();
        assert_eq!(addr.position(), (65535, 255));
    }

    #[test]
    fn test_cell_address_parse_errors() {
        assert!(CellAddress::parse("").is_err());
        assert!(CellAddress::parse("A").is_err());
        assert!(CellAddress::parse("1").is_err());
        assert!(CellAddress::parse("A0").is_err());
        assert!(CellAddress::parse("A65537").is_err());
        assert!(CellAddress::parse("IW1").is_err());
    }

    #[test]
    fn test_cell_address_display() {
        assert_eq!(CellAddress::new(0, 0).to_string(), "A1");
        assert_eq!(CellAddress::new(99, 2).to_string(), "C100");
        assert_eq!(CellAddress::absolute(0, 0).to_string(), "$A$1");
        assert_eq!(CellAddress::with_absolute(4, 3, true, false).to_string(), "D$5");
    }

    #[test]
    fn test_offsets_stop_at_the_grid() {
        assert_eq!(offset_row(10, -10), Some(0));
        assert_eq!(offset_row(10, -11), None);
        assert_eq!(offset_row(65_535, 1), None);
        assert_eq!(offset_col(255, 0), Some(255));
        assert_eq!(offset_col(0, 256), None);
    }

    #[test]
    fn test_cell_range_parse_and_contains() {
        let range = CellRange::parse("D4:B2").unwrap();
        assert_eq!(range.start.position(), (1, 1));
        assert_eq!(range.end.position(), (3, 3));

        assert!(range.contains(&CellAddress::new(2, 2)));
        assert!(!range.contains(&CellAddress::new(0, 0)));
        assert!(range.contains_range(&CellRange::parse("C3:D4").unwrap()));
    }

    #[test]
    fn test_cell_range_offset() {
        let range = CellRange::parse("B2:C3").unwrap();
        assert_eq!(range.offset(2, 1), Some(CellRange::parse("C4:D5").unwrap()));
        assert_eq!(range.offset(-2, 0), None);
    }

    #[test]
    fn test_cell_range_iterator() {
        let range = CellRange::parse("A1:B2").unwrap();
        let cells: Vec<_> = range.cells().map(|a| a.position()).collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_iterator_reaches_last_column() {
        let range = CellRange::from_indices(65_535, 254, 65_535, 255);
        assert_eq!(range.cells().count(), 2);
    }

    #[test]
    fn test_offset_at_extreme_deltas() {
        assert_eq!(offset_row(5, i64::MAX), None);
        assert_eq!(offset_row(5, i64::MIN), None);
        assert_eq!(offset_col(5, i64::MAX), None);
        assert_eq!(offset_row(65_535, 0), Some(65_535));
        assert_eq!(offset_col(0, 255), Some(255));
    }

    proptest! {
        #[test]
        fn prop_a1_text_round_trips(
            row in 0u32..MAX_ROWS,
            col in 0u16..MAX_COLS,
            row_absolute in any::<bool>(),
            col_absolute in any::<bool>(),
        ) {
            let address = CellAddress::with_absolute(row, col, row_absolute, col_absolute);
            let parsed = CellAddress::parse(&address.to_a1_string()).unwrap();
            prop_assert_eq!(parsed, address);
        }

        #[test]
        fn prop_offset_moves_back(
            row in 0u32..MAX_ROWS,
            col in 0u16..MAX_COLS,
            delta in -70_000i64..70_000,
        ) {
            let target_row = i64::from(row) + delta;
            match offset_row(row, delta) {
                Some(moved) => prop_assert_eq!(offset_row(moved, -delta), Some(row)),
                None => prop_assert!(target_row < 0 || target_row >= i64::from(MAX_ROWS)),
            }
            let target_col = i64::from(col) + delta;
            match offset_col(col, delta) {
                Some(moved) => prop_assert_eq!(offset_col(moved, -delta), Some(col)),
                None => prop_assert!(target_col < 0 || target_col >= i64::from(MAX_COLS)),
            }
        }
    }
}
