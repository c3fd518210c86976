//! What the parser and renderer need to know about the workbook

use crate::reference_table::ReferenceTable;

/// Read-only view of a workbook used to resolve and print sheet names,
/// defined names and external links
pub trait WorkbookContext {
    fn sheet_count(&self) -> usize;

    fn sheet_name(&self, index: usize) -> Option<&str>;

    /// Position of a sheet by name (case-insensitive)
    fn sheet_index(&self, name: &str) -> Option<usize> {
        (0..self.sheet_count()).find(|&i| {
            self.sheet_name(i)
                .map_or(false, |s| s.eq_ignore_ascii_case(name))
        })
    }

    fn references(&self) -> &ReferenceTable;
}

/// A free-standing context: a list of sheet names and a reference table
///
/// Useful when formulas are handled outside of a full workbook, such as
/// while decoding records.
#[derive(Debug, Clone, Default)]
pub struct SheetList {
    pub sheets: Vec<String>,
    pub references: ReferenceTable,
}

impl SheetList {
    pub fn new<I, S>(sheets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sheets: sheets.into_iter().map(Into::into).collect(),
            references: ReferenceTable::new(),
        }
    }
}

impl WorkbookContext for SheetList {
    fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    fn sheet_name(&self, index: usize) -> Option<&str> {
        self.sheets.get(index).map(String::as_str)
    }

    fn references(&self) -> &ReferenceTable {
        &self.references
    }
}
